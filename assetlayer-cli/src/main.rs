//! AssetLayer CLI - Command-line interface
//!
//! Fetches content through the cache chain and manages the local caches and
//! configuration file.

use std::path::PathBuf;
use std::process::ExitCode;

use assetlayer::logging::{init_logging, LogConfig, LoggingGuard};
use clap::{Parser, Subcommand};

mod commands;
mod error;

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use error::CliError;

/// Content-addressed asset fetching and cache management.
#[derive(Debug, Parser)]
#[command(name = "assetlayer", version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity and echo logs to stderr (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for assetlayer.log (default: the user cache directory)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a file by fingerprint or name
    Fetch(FetchArgs),

    /// Inspect and manage the caches
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// View and edit the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn default_log_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("assetlayer").join("logs"))
}

fn log_config(cli: &Cli) -> LogConfig {
    let filter = match cli.verbose {
        0 => "assetlayer=info",
        1 => "assetlayer=debug",
        2 => "debug",
        _ => "trace",
    };
    let mut config = LogConfig::new(filter);
    if let Some(dir) = cli.log_dir.clone().or_else(default_log_dir) {
        config = config.with_directory(dir);
    }
    // Quiet terminal unless asked for.
    if cli.verbose == 0 {
        config = config.without_stderr();
    }
    config
}

fn init(cli: &Cli) -> Result<LoggingGuard, CliError> {
    Ok(init_logging(&log_config(cli))?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = match init(&cli) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: {e}");
            None
        }
    };
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "assetlayer starting");

    let result = match cli.command {
        Commands::Fetch(args) => commands::fetch::run(args).await,
        Commands::Cache { action } => commands::cache::run(action).await,
        Commands::Config { command } => commands::config::run(command),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from(["assetlayer", "fetch", "abc", "--start", "4", "--length", "8"])
            .unwrap();
        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.target, "abc");
                assert_eq!(args.start, 4);
                assert_eq!(args.length, Some(8));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_cache_purge() {
        let cli = Cli::try_parse_from(["assetlayer", "-vv", "cache", "purge", "00ff"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Cache { action: CacheAction::Purge { .. } }
        ));
    }

    #[test]
    fn test_log_config_follows_verbosity() {
        let quiet = Cli::try_parse_from(["assetlayer", "--log-dir", "/tmp/al", "cache", "stats"]).unwrap();
        let config = log_config(&quiet);
        assert_eq!(config.default_filter, "assetlayer=info");
        assert_eq!(config.directory, Some(PathBuf::from("/tmp/al")));
        assert!(!config.stderr);

        let loud = Cli::try_parse_from(["assetlayer", "-vv", "cache", "stats"]).unwrap();
        let config = log_config(&loud);
        assert_eq!(config.default_filter, "debug");
        assert!(config.stderr);
    }

    #[test]
    fn test_parse_config_set() {
        let cli = Cli::try_parse_from(["assetlayer", "config", "set", "cache.disk_size", "8GB"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { command: ConfigCommands::Set { .. } }));
    }
}
