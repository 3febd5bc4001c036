//! Command-line interface definitions.

pub mod check;
pub mod run;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::error::Result;
use crate::infrastructure::config::Config;

/// Lifeline - resilient connection management.
#[derive(Parser, Debug)]
#[command(name = "lifeline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the connection manager until Ctrl-C
    Run(RunArgs),

    /// Validate configuration and print the effective settings
    Check(ConfigPathArg),
}

/// Shared argument for commands that only need a config path.
#[derive(Parser, Debug)]
pub struct ConfigPathArg {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seconds between health and metrics reports
    #[arg(long, default_value = "60")]
    pub report_interval_secs: u64,

    /// Override log level (debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Use JSON log format instead of pretty
    #[arg(long)]
    pub json_logs: bool,

    /// WebSocket URL to dial and keep alive (repeatable)
    #[arg(long = "connect", value_name = "URL")]
    pub connect: Vec<String>,
}

/// Load `path`, or the defaults when no path is given.
///
/// # Errors
///
/// Returns an error if the file cannot be read or fails validation.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::parse_from(["lifeline", "run"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.config.is_none());
        assert_eq!(args.report_interval_secs, 60);
        assert!(args.connect.is_empty());
    }

    #[test]
    fn run_accepts_repeated_connect() {
        let cli = Cli::parse_from([
            "lifeline",
            "run",
            "--connect",
            "ws://a",
            "--connect",
            "ws://b",
            "--report-interval-secs",
            "5",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.connect, vec!["ws://a", "ws://b"]);
        assert_eq!(args.report_interval_secs, 5);
    }

    #[test]
    fn check_takes_config_path() {
        let cli = Cli::parse_from(["lifeline", "check", "-c", "lifeline.toml"]);
        let Commands::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.config, Some(PathBuf::from("lifeline.toml")));
    }

    #[test]
    fn missing_path_uses_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.registry.max_connections, 1000);
    }
}
