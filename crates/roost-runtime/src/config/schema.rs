//! Configuration schema definitions.
//!
//! ```toml
//! admins = ["10001"]
//!
//! [logging]
//! level = "debug"
//! filters = { roost_framework = "trace" }
//!
//! [outbox]
//! min_interval_ms = 800
//!
//! [tokens]
//! ttl_secs = 300
//!
//! [sessions]
//! idle_timeout_secs = 1800
//!
//! [features]
//! puzzle = true
//!
//! [[plugins.puzzle.concepts]]
//! answer = "Kettle"
//! category = "object"
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoostConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub outbox: OutboxConfig,

    #[serde(default)]
    pub tokens: TokenConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// User ids allowed to request admin tokens.
    #[serde(default)]
    pub admins: Vec<String>,

    /// Initial feature switches. Features not listed are enabled.
    #[serde(default)]
    pub features: HashMap<String, bool>,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-plugin sections, handed to each plugin's init hook as JSON.
    #[serde(default)]
    pub plugins: HashMap<String, Value>,
}

impl RoostConfig {
    /// Period of the maintenance sweep: the shorter of the outbox and
    /// session sweep intervals.
    pub fn sweep_interval(&self) -> Duration {
        let secs = self
            .outbox
            .sweep_interval_secs
            .min(self.sessions.sweep_interval_secs)
            .max(1);
        Duration::from_secs(secs)
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `compact` otherwise.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Required when `output = "file"`.
    pub file_path: Option<PathBuf>,
    /// Per-target levels, e.g. `roost_framework = "debug"`.
    pub filters: HashMap<String, LogLevel>,
    pub span_events: SpanEventConfig,
    pub thread_ids: bool,
    /// Include file and line of the call site.
    pub file_location: bool,
}

// =============================================================================
// Services
// =============================================================================

/// `[outbox]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Minimum spacing between two sends to the same conversation. `0`
    /// disables pacing.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl OutboxConfig {
    pub fn min_interval(&self) -> Option<Duration> {
        (self.min_interval_ms > 0).then(|| Duration::from_millis(self.min_interval_ms))
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_min_interval_ms() -> u64 {
    800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// `[tokens]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_token_ttl_secs")]
    pub ttl_secs: u64,
}

impl TokenConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_token_ttl_secs(),
        }
    }
}

fn default_token_ttl_secs() -> u64 {
    300
}

/// `[sessions]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions untouched for this long are ended by the sweeper. Unset
    /// means sessions live until their plugin ends them.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// `[dispatch]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound for one event's handler chain. `0` disables the limit.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    /// Pause before pulling again after the event source fails.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl DispatchConfig {
    pub fn handler_timeout(&self) -> Option<Duration> {
        (self.handler_timeout_secs > 0).then(|| Duration::from_secs(self.handler_timeout_secs))
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: default_handler_timeout_secs(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

fn default_handler_timeout_secs() -> u64 {
    30
}

fn default_reconnect_backoff_ms() -> u64 {
    1000
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the JSON file store. Defaults to the platform data
    /// directory joined with `roost`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("roost")))
            .unwrap_or_else(|| PathBuf::from("data"))
    }
}
