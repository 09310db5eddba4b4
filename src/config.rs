//! Configuration file parser for `suprss.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos. Values are validated after parsing.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A key parsed but holds a value the service cannot run with.
    #[error("Invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file, or `:memory:`.
    pub database_path: String,

    /// Seconds between polling cycles.
    pub poll_interval_secs: u64,

    /// Maximum number of due feeds dispatched per cycle.
    pub feeds_per_cycle: usize,

    /// Maximum number of refreshes running at the same time.
    pub max_concurrent_refreshes: usize,

    /// Per-request HTTP timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Retries for 429, 5xx and truncated responses.
    pub max_retries: u32,

    /// First retry delay in milliseconds, doubled on each retry.
    pub retry_base_delay_ms: u64,

    /// Largest accepted feed document.
    pub max_feed_size_bytes: usize,

    pub user_agent: String,

    /// Permit feeds on loopback or private-network hosts.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "suprss.db".to_string(),
            poll_interval_secs: 300,
            feeds_per_cycle: 10,
            max_concurrent_refreshes: 10,
            fetch_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            max_feed_size_bytes: 10 * 1024 * 1024,
            user_agent: "SUPRSS/1.0".to_string(),
            allow_private_hosts: false,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "database_path",
        "poll_interval_secs",
        "feeds_per_cycle",
        "max_concurrent_refreshes",
        "fetch_timeout_secs",
        "max_retries",
        "retry_base_delay_ms",
        "max_feed_size_bytes",
        "user_agent",
        "allow_private_hosts",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range value → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to bound memory use
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path,
            poll_interval_secs = config.poll_interval_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler or fetcher cannot operate with.
    ///
    /// `max_retries` and `retry_base_delay_ms` may be zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        if self.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "database_path",
                reason: "cannot be empty".to_string(),
            });
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "user_agent",
                reason: "cannot be empty".to_string(),
            });
        }
        positive("poll_interval_secs", self.poll_interval_secs)?;
        positive("feeds_per_cycle", self.feeds_per_cycle as u64)?;
        positive("max_concurrent_refreshes", self.max_concurrent_refreshes as u64)?;
        positive("fetch_timeout_secs", self.fetch_timeout_secs)?;
        positive("max_feed_size_bytes", self.max_feed_size_bytes as u64)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Upper bound on one whole fetch: every attempt at the full request
    /// timeout plus every backoff sleep.
    pub fn refresh_deadline(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let requests = Duration::from_secs(self.fetch_timeout_secs).saturating_mul(attempts);
        let backoff = (0..self.max_retries).fold(Duration::ZERO, |acc, retry| {
            acc.saturating_add(
                Duration::from_millis(self.retry_base_delay_ms)
                    .saturating_mul(2u32.saturating_pow(retry)),
            )
        });
        requests.saturating_add(backoff)
    }
}

// ============================================================================
// Tests
// ============================================================================
