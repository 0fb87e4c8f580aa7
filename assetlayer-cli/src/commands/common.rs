//! Helpers shared across CLI commands.

use assetlayer::app::{AppConfig, AssetLayerApp};
use assetlayer::config::ConfigFile;
use tracing::debug;

use crate::error::CliError;

/// Loads `config.ini`, falling back to defaults when it is unreadable.
pub fn load_config() -> ConfigFile {
    match ConfigFile::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: {e}; using default configuration");
            ConfigFile::default()
        }
    }
}

/// Starts the engine from the user's configuration.
pub async fn start_app(config: &ConfigFile) -> Result<AssetLayerApp, CliError> {
    let app_config = AppConfig::from_config_file(config)?;
    debug!(?app_config, "starting engine");
    Ok(AssetLayerApp::start(app_config).await?)
}
