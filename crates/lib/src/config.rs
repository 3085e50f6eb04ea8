//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatlink/config.json`) and environment.

use crate::client::policy::ReconnectConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Service base URL used when neither config nor env names one.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000";

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Connection client settings.
    #[serde(default)]
    pub client: ClientConfig,
}

/// Endpoint, streaming preference, and reconnect backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Service base URL (`http(s)://` or `ws(s)://`). Overridden by CHATLINK_ENDPOINT env.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Ask the server to stream replies token by token (default true).
    #[serde(default = "default_streaming")]
    pub streaming: bool,

    /// Give up on a single connect attempt after this long.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_streaming() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            streaming: default_streaming(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Resolve the endpoint: env CHATLINK_ENDPOINT overrides config.
pub fn resolve_endpoint(config: &Config) -> String {
    endpoint_override(std::env::var("CHATLINK_ENDPOINT").ok())
        .unwrap_or_else(|| config.client.endpoint.trim().to_string())
}

fn endpoint_override(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATLINK_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".chatlink").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Directory holding the config file.
pub fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Load config from the given path, or the default path (or CHATLINK_CONFIG_PATH).
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
