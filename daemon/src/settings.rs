use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 5;
pub const MIN_SEND_TIMEOUT_SECS: u64 = 1;
pub const MAX_SEND_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;
pub const MAX_BUFFER_CAPACITY: usize = 10_000;
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Daemon-level settings. Deserialized from `<app_dir>/daemon.toml`.
///
/// These tune the process itself; the user-facing configuration (notification
/// target and monitor targets) lives in `config.json`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Base URL of the messaging API, without a trailing slash.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Per-destination delivery timeout in seconds. Clamped to [1, 60].
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Capacity of the outbound message buffer. Clamped to [1, 10000].
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Dispatch messages without waiting for each fan-out to finish.
    #[serde(default)]
    pub background_dispatch: bool,
    /// `tracing` filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            background_dispatch: false,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Settings {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(
            self.send_timeout_secs
                .clamp(MIN_SEND_TIMEOUT_SECS, MAX_SEND_TIMEOUT_SECS),
        )
    }

    pub fn effective_buffer_capacity(&self) -> usize {
        self.buffer_capacity.clamp(1, MAX_BUFFER_CAPACITY)
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }
}

/// Loads the settings file at `path`, returning `Settings::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_send_timeout() -> u64 {
    DEFAULT_SEND_TIMEOUT_SECS
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
