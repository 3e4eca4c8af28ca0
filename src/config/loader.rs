use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tracing::debug;

use super::{get_data_dir, Config, StoreBackend};

/// Load configuration from an optional TOML file, then apply environment
/// overrides and validate.
pub async fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            debug!("Loaded configuration from {}", path.display());
            Config::from_toml_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => Config::new(),
    };

    config.merge_env_vars();

    if config.store.backend == StoreBackend::File && config.store.path.is_none() {
        config.store.path = Some(get_data_dir()?.join("executions"));
    }

    config.validate()?;
    Ok(config)
}
