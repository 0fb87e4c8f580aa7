//! Cache management CLI commands.

use assetlayer::config::format_size;
use assetlayer::fingerprint::Fingerprint;
use clap::Subcommand;
use console::style;

use super::common::{load_config, start_app};
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show per-layer cache statistics
    Stats,
    /// Remove one file from every cache layer
    Purge {
        /// Hex fingerprint of the file
        hash: String,
    },
    /// Delete everything in the disk cache
    Clear,
}

/// Run a cache subcommand.
pub async fn run(action: CacheAction) -> Result<(), CliError> {
    let config = load_config();
    // Validate before starting anything.
    let fingerprint = match &action {
        CacheAction::Purge { hash } => Some(
            hash.parse::<Fingerprint>()
                .map_err(|e| CliError::InvalidArgument(e.to_string()))?,
        ),
        _ => None,
    };

    let app = start_app(&config).await?;
    let result = match action {
        CacheAction::Stats => {
            println!("{}", style("Cache layers").bold());
            for (name, stats) in app.cache_stats() {
                println!(
                    "  {:<8} {:>6} entries  {:>10} / {}",
                    name,
                    stats.entries,
                    format_size(stats.bytes),
                    format_size(stats.capacity)
                );
            }
            println!("Disk cache directory: {}", config.cache.directory.display());
            Ok(())
        }
        CacheAction::Purge { .. } => {
            if let Some(fingerprint) = fingerprint {
                let layers = app.purge(&fingerprint).await;
                if layers == 0 {
                    println!("{fingerprint} was not cached");
                } else {
                    println!("Purged {fingerprint} from {layers} layer(s)");
                }
            }
            Ok(())
        }
        CacheAction::Clear => {
            println!("Clearing disk cache at: {}", config.cache.directory.display());
            let removed = app.clear_disk_cache().await;
            println!("Deleted {removed} cached file(s)");
            Ok(())
        }
    };
    app.shutdown().await;
    result
}
