//! Initialize the configuration directory: create ~/.chatlink and a default config.json.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and a default `config.json` if they do not exist.
/// An existing config file is left untouched. Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let dir = config::config_dir(config_path);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating config directory {}", dir.display()))?;

    if config_path.exists() {
        log::debug!("config already exists at {}, skipping", config_path.display());
    } else {
        let default_config = serde_json::to_string_pretty(&config::Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_defaults_once() {
        let dir = std::env::temp_dir().join(format!("chatlink-init-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("config.json");
        let created = init_config_dir(&path).unwrap();
        assert_eq!(created, dir.join("nested"));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["client"]["reconnect"]["baseDelayMs"], 1000);
        assert_eq!(written["client"]["reconnect"]["growthFactor"], 2);
        assert_eq!(written["client"]["reconnect"]["capDelayMs"], 30000);
        assert_eq!(written["client"]["reconnect"]["maxAttempts"], 5);

        std::fs::write(&path, r#"{ "client": { "streaming": false } }"#).unwrap();
        init_config_dir(&path).unwrap();
        let (c, _) = config::load_config(Some(path.clone())).unwrap();
        assert!(!c.client.streaming);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
