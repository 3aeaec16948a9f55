//! Configuration management for the service navigation core

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which probe drives health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// Randomized stand-in that never touches the network
    Simulated,
    /// Real HTTP GET against the service URL
    Http,
}

impl From<&str> for ProbeMode {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "http" | "real" => ProbeMode::Http,
            _ => ProbeMode::Simulated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the local key-value store
    pub storage_dir: PathBuf,

    /// Backend base URL used when no backend record is persisted
    pub backend_url: Option<String>,

    /// Quiet period before a collection is pushed to the backend
    pub sync_debounce: Duration,

    /// HTTP timeout for backend requests
    pub http_timeout: Duration,

    /// Capacity of the cross-context sync channel
    pub sync_channel_capacity: usize,

    /// Interval between automatic health check passes
    pub health_check_interval: Duration,

    /// Probe implementation used for health checks
    pub probe_mode: ProbeMode,

    /// Timeout of a single HTTP probe
    pub probe_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./data"),
            backend_url: None,
            sync_debounce: Duration::from_millis(500),
            http_timeout: Duration::from_secs(10),
            sync_channel_capacity: 64,
            health_check_interval: Duration::from_secs(5 * 60),
            probe_mode: ProbeMode::Simulated,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(dir) = env::var("SERVICE_NAV_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }

        if let Ok(url) = env::var("BACKEND_URL") {
            let url = url.trim();
            config.backend_url = if url.is_empty() { None } else { Some(url.to_string()) };
        }

        if let Ok(debounce) = env::var("SYNC_DEBOUNCE_MS") {
            if let Ok(ms) = debounce.parse::<u64>() {
                config.sync_debounce = Duration::from_millis(ms);
            }
        }

        if let Ok(timeout) = env::var("HTTP_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.http_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(capacity) = env::var("SYNC_CHANNEL_CAPACITY") {
            if let Ok(capacity) = capacity.parse() {
                config.sync_channel_capacity = capacity;
            }
        }

        if let Ok(interval) = env::var("HEALTH_CHECK_INTERVAL_SECONDS") {
            if let Ok(seconds) = interval.parse::<u64>() {
                config.health_check_interval = Duration::from_secs(seconds);
            }
        }

        if let Ok(probe) = env::var("HEALTH_PROBE") {
            config.probe_mode = ProbeMode::from(probe.as_str());
        }

        if let Ok(timeout) = env::var("PROBE_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.probe_timeout = Duration::from_secs(seconds);
            }
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err("storage_dir cannot be empty".to_string());
        }

        if let Some(url) = &self.backend_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("backend_url must be an http(s) URL, got {}", url));
            }
        }

        if self.http_timeout.is_zero() {
            return Err("http_timeout must be greater than 0".to_string());
        }

        if self.sync_channel_capacity == 0 {
            return Err("sync_channel_capacity must be greater than 0".to_string());
        }

        if self.health_check_interval.is_zero() {
            return Err("health_check_interval must be greater than 0".to_string());
        }

        if self.probe_timeout.is_zero() {
            return Err("probe_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
