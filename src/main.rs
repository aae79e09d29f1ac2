//! smokedet CLI
//!
//! Parses the subcommand, installs the tracing subscriber and hands over to
//! [`smokedet::cli::run_cli_mode`].

use clap::Parser;
use tracing_subscriber::EnvFilter;

use smokedet::cli::{run_cli_mode, Args};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.json);

    let exit_code = run_cli_mode(args).await;
    std::process::exit(exit_code);
}
