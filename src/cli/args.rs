//! CLI argument parsing
//!
//! ```text
//! smokedet [--config <path>] [--json] <command> [command-args]
//!
//! COMMANDS:
//!   train [--columns A,B]... [--tracked]   Train locally or as tracked runs
//!   evaluate [--version N]                 Evaluate the local model or a registered version
//!   register [--threshold ACC]             Register runs above an accuracy threshold
//!   download [--version N]                 Fetch a registered version for serving
//!   serve                                  Bootstrap and run the HTTP service
//!   monitor --input <batch.csv>            Log drift of one CSV batch
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parsed CLI arguments
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "smokedet", version, about = "Smoke detection training, registry and inference")]
pub struct Args {
    /// Settings file (defaults to ./smokedet.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// JSON output, for logs and command results
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Mode,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Mode {
    /// Train a model on the configured dataset
    Train {
        /// Comma separated feature set; repeat for several tracked runs
        #[arg(long = "columns")]
        columns: Vec<String>,

        /// Log runs, params and artifacts to the tracking server
        #[arg(long)]
        tracked: bool,
    },

    /// Report train/validation accuracy of a model
    Evaluate {
        /// Registered version; the local model dir when omitted
        #[arg(long)]
        version: Option<String>,
    },

    /// Register every run whose validation accuracy reaches the threshold
    Register {
        /// Minimum validation accuracy in percent
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Download a registered version into the deployment model dir
    Download {
        #[arg(long)]
        version: Option<String>,
    },

    /// Run the inference service
    Serve,

    /// Score one CSV batch against the reference snapshot and log it
    Monitor {
        #[arg(long)]
        input: PathBuf,
    },
}

impl Mode {
    /// Feature sets named by repeated `--columns A,B` flags
    pub fn column_sets(columns: &[String]) -> Vec<Vec<String>> {
        columns
            .iter()
            .map(|set| {
                set.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|set| !set.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("smokedet").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_train_with_column_sets() {
        let args = parse(&[
            "train",
            "--tracked",
            "--columns",
            "Temperature[C],Humidity[%]",
            "--columns",
            "eCO2[ppm]",
        ]);
        let Mode::Train { columns, tracked } = args.command else {
            panic!("expected train");
        };
        assert!(tracked);
        assert_eq!(
            Mode::column_sets(&columns),
            vec![
                vec!["Temperature[C]".to_string(), "Humidity[%]".to_string()],
                vec!["eCO2[ppm]".to_string()],
            ]
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&["evaluate", "--version", "3", "--json", "--config", "prod.toml"]);
        assert!(args.json);
        assert_eq!(args.config, Some(PathBuf::from("prod.toml")));
        assert_eq!(
            args.command,
            Mode::Evaluate {
                version: Some("3".to_string())
            }
        );
    }

    #[test]
    fn test_monitor_requires_input() {
        assert!(Args::try_parse_from(["smokedet", "monitor"]).is_err());
        let args = parse(&["monitor", "--input", "batch.csv"]);
        assert_eq!(
            args.command,
            Mode::Monitor {
                input: PathBuf::from("batch.csv")
            }
        );
    }

    #[test]
    fn test_blank_column_sets_are_dropped() {
        let sets = Mode::column_sets(&[" , ".to_string(), "A, B".to_string()]);
        assert_eq!(sets, vec![vec!["A".to_string(), "B".to_string()]]);
    }
}
