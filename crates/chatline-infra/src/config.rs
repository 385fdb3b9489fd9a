//! Configuration loader for Chatline.
//!
//! Reads `config.toml` (from `--config` or the data directory, `~/.chatline/`
//! in production) and deserializes it into [`ChatlineConfig`]. Falls back to
//! defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use chatline_types::config::ChatlineConfig;

use crate::sqlite::pool::default_database_url;

/// Name of the config file inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CHATLINE_DATA_DIR";

/// Resolve the data directory: `$CHATLINE_DATA_DIR`, else `~/.chatline`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatline")
}

/// Load configuration from `config_path`, or `{data_dir}/config.toml` when
/// no explicit path is given.
///
/// - If the file does not exist, returns [`ChatlineConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   returns the default.
pub async fn load_config(config_path: Option<&Path>, data_dir: &Path) -> ChatlineConfig {
    let explicit = config_path.is_some();
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE));

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if explicit {
                tracing::warn!("Config file {} not found, using defaults", config_path.display());
            } else {
                tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            }
            return ChatlineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ChatlineConfig::default();
        }
    };

    match toml::from_str::<ChatlineConfig>(&content) {
        Ok(config) => {
            tracing::debug!("Loaded configuration from {}", config_path.display());
            config
        }
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            ChatlineConfig::default()
        }
    }
}

/// The configured database URL, or `sqlite://{data_dir}/chatline.db`.
pub fn database_url(config: &ChatlineConfig, data_dir: &Path) -> String {
    config
        .database
        .url
        .clone()
        .unwrap_or_else(|| default_database_url(data_dir))
}
