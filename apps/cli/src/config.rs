//! CLI configuration.
//!
//! Stored as TOML:
//! - Linux: `$XDG_CONFIG_HOME/chunkup/chunkup.toml` (or `~/.config/...`)
//! - Windows: `%APPDATA%/chunkup/chunkup.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use chunkup_protocol::constants::{
    DEFAULT_ENDPOINT, DEFAULT_LISTING_URL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_DELAYS_MS,
};
use chunkup_transfer::{DEFAULT_CHUNK_SIZE, RetryPolicy};
use chunkup_uploader::UploaderConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// tus creation endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Base URL of the listing API.
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Bytes per PATCH request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Uploads running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Delay before each retry of a failed request, in milliseconds.
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Remember unfinished uploads and resume them on the next run.
    #[serde(default = "default_true")]
    pub resume: bool,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.into()
}

fn default_listing_url() -> String {
    DEFAULT_LISTING_URL.into()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrent() -> usize {
    UploaderConfig::default().max_concurrent
}

fn default_retry_delays() -> Vec<u64> {
    DEFAULT_RETRY_DELAYS_MS.to_vec()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            listing_url: default_listing_url(),
            chunk_size: default_chunk_size(),
            max_concurrent: default_max_concurrent(),
            retry_delays_ms: default_retry_delays(),
            request_timeout_secs: default_request_timeout(),
            resume: default_true(),
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// An explicit path must exist. Without one, the platform default is
    /// read, or created with defaults on first run.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        let path = config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            if let Err(e) = config.save_to(&path) {
                tracing::warn!(path = %path.display(), error = %e, "could not write default configuration");
            }
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be greater than zero");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn uploader_config(&self) -> UploaderConfig {
        UploaderConfig {
            chunk_size: self.chunk_size,
            max_concurrent: self.max_concurrent,
            retry: RetryPolicy::from_millis(&self.retry_delays_ms),
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    let base = std::env::var("APPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default\\AppData"));

    #[cfg(not(target_os = "windows"))]
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
            PathBuf::from(home).join(".config")
        });

    base.join("chunkup").join("chunkup.toml")
}
