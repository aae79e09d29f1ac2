//! CLI module
//!
//! Provides:
//! - Argument parsing for the pipeline subcommands
//! - Service bootstrap (model download, reference snapshot, metrics store)
//! - Subcommand dispatch and result printing

pub mod args;
pub mod bootstrap;
pub mod dispatch;

// Re-exports
pub use args::{Args, Mode};
pub use bootstrap::bootstrap_service;
pub use dispatch::{run_cli_mode, ExitCode};

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Exit codes (deterministic)
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG_ERROR: i32 = 2;
