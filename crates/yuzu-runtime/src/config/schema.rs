//! Typed `yuzu.toml`. Every section and field is optional.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use yuzu_core::PairingMethod;
use yuzu_framework::DEFAULT_PREFIX;

/// Everything the runtime reads from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct YuzuConfig {
    pub bot: BotConfig,
    pub logging: LoggingConfig,
    pub reconnect: ReconnectConfig,
    /// Free-form per-module sections, `[plugins.<name>]`.
    pub plugins: HashMap<String, serde_json::Value>,
}

impl YuzuConfig {
    /// Section for plugin module `name`, `null` when absent.
    pub fn plugin_config(&self, name: &str) -> serde_json::Value {
        self.plugins
            .get(name)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}

// =============================================================================
// Bot
// =============================================================================

/// Bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Command prefix characters; each one is a valid prefix.
    pub prefix: String,

    /// Where the transport keeps its credentials.
    pub session_dir: PathBuf,

    /// Where plugin stores and the expiration cache live.
    pub data_dir: PathBuf,

    /// Pairing flow hint handed to connectors.
    pub method: PairingMethod,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            session_dir: PathBuf::from("./session"),
            data_dir: PathBuf::from("./data"),
            method: PairingMethod::default(),
        }
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

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` overrides it when set.
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,

    /// Log file for [`LogOutput::File`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    pub thread_ids: bool,

    /// Include file names and line numbers.
    pub file_location: bool,

    pub span_events: SpanEventConfig,

    /// Per-target levels, e.g. `yuzu_framework = "debug"`.
    pub filters: HashMap<String, LogLevel>,
}

// =============================================================================
// Reconnect
// =============================================================================

/// When and how fast a closed connection is reopened.
///
/// Retry `n` waits `initial_delay_ms * backoff_multiplier^(n-1)`, capped at
/// `max_delay_ms`. The count resets after every successful connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// `false` ends the run at the first close.
    pub enabled: bool,
    /// Consecutive failures tolerated, 0 for unlimited.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 0,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Whether retry number `attempt` (1-based) is allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && (self.max_retries == 0 || attempt <= self.max_retries)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay_ms.min(self.max_delay_ms as f64) as u64)
    }
}
