//! Transaction tunables and their loader.
//!
//! Configuration precedence:
//! 1. Default values (lowest priority)
//! 2. TOML file
//! 3. Environment variables (`QUICD_TXN_` prefix, highest priority)

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::Config as ConfigLoader;
use serde::{Deserialize, Serialize};

use crate::flow_control::{DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE};

/// Per-transaction behaviour shared by every stream of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Enforce per-stream flow control. Off for HTTP/1.1.
    ///
    /// **Default:** `true`
    pub use_flow_control: bool,

    /// Receive window advertised when a stream opens.
    ///
    /// **Default:** `65535`
    pub receive_initial_window: u32,

    /// Send window assumed when a stream opens, until the peer says otherwise.
    ///
    /// **Default:** `65535`
    pub send_initial_window: u32,

    /// Grant receive credit back once `capacity / divisor` bytes were
    /// delivered. While the connection drains, credit is granted only when
    /// the full window was delivered.
    ///
    /// **Default:** `2`
    pub window_update_divisor: u32,

    /// Idle timeout while waiting for ingress, in milliseconds. 0 disables.
    ///
    /// **Default:** `60000`
    pub idle_timeout_ms: u64,

    /// Maximum ingress events held while the handler has paused ingress.
    /// Exceeding it aborts the transaction.
    ///
    /// **Default:** `1024`
    pub max_deferred_ingress: usize,

    /// Egress ceiling in bits per second applied to new transactions.
    /// 0 disables pacing.
    ///
    /// **Default:** `0`
    pub egress_rate_limit_bps: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            use_flow_control: true,
            receive_initial_window: DEFAULT_WINDOW_SIZE,
            send_initial_window: DEFAULT_WINDOW_SIZE,
            window_update_divisor: 2,
            idle_timeout_ms: 60_000,
            max_deferred_ingress: 1024,
            egress_rate_limit_bps: 0,
        }
    }
}

impl TransactionConfig {
    /// Large windows and deep ingress queues for bulk transfer.
    pub fn high_throughput() -> Self {
        Self {
            receive_initial_window: 16 * 1024 * 1024, // 16 MB
            send_initial_window: 16 * 1024 * 1024,
            window_update_divisor: 4,
            max_deferred_ingress: 8192,
            ..Default::default()
        }
    }

    /// Small windows and a short ingress queue for many cheap streams.
    pub fn low_memory() -> Self {
        Self {
            receive_initial_window: 16 * 1024, // 16 KB
            send_initial_window: 16 * 1024,
            max_deferred_ingress: 64,
            idle_timeout_ms: 15_000,
            ..Default::default()
        }
    }

    /// Config for serial codecs, which have no per-stream flow control.
    pub fn http1() -> Self {
        Self {
            use_flow_control: false,
            ..Default::default()
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Validate, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.receive_initial_window > MAX_WINDOW_SIZE {
            errors.push(format!(
                "receive_initial_window must not exceed {}",
                MAX_WINDOW_SIZE
            ));
        }
        if self.send_initial_window > MAX_WINDOW_SIZE {
            errors.push(format!(
                "send_initial_window must not exceed {}",
                MAX_WINDOW_SIZE
            ));
        }
        if self.use_flow_control && self.receive_initial_window == 0 {
            errors.push("receive_initial_window must be non-zero with flow control".into());
        }
        if self.window_update_divisor == 0 {
            errors.push("window_update_divisor must be non-zero".into());
        }
        if self.max_deferred_ingress == 0 {
            errors.push("max_deferred_ingress must be non-zero".into());
        }
        if self.egress_rate_limit_bps != 0 && self.egress_rate_limit_bps < 8000 {
            errors.push("egress_rate_limit_bps must be 0 or at least 8000".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Load from a TOML file, then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the file exists but cannot be read or parsed
    /// - an environment override is malformed
    /// - validation fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml_str(&text)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?
        } else {
            tracing::warn!(
                config_path = %path.display(),
                "Configuration file not found, using defaults"
            );
            Self::default()
        };

        config.apply_env_overrides()?;

        config.validate().map_err(|errors| {
            anyhow::anyhow!("Configuration validation failed:\n{}", errors.join("\n"))
        })?;

        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid transaction config")
    }

    /// Apply `QUICD_TXN_*` environment variables, e.g.
    /// `QUICD_TXN_IDLE_TIMEOUT_MS=5000`.
    fn apply_env_overrides(&mut self) -> Result<()> {
        let env = ConfigLoader::builder()
            .add_source(config::Environment::with_prefix("QUICD_TXN").prefix_separator("_"))
            .build()
            .context("Failed to load environment variables")?;

        if let Ok(value) = env.get_bool("use_flow_control") {
            self.use_flow_control = value;
        }
        if let Ok(value) = env.get_int("receive_initial_window") {
            self.receive_initial_window = u32::try_from(value)
                .context("QUICD_TXN_RECEIVE_INITIAL_WINDOW out of range")?;
        }
        if let Ok(value) = env.get_int("send_initial_window") {
            self.send_initial_window = u32::try_from(value)
                .context("QUICD_TXN_SEND_INITIAL_WINDOW out of range")?;
        }
        if let Ok(value) = env.get_int("window_update_divisor") {
            self.window_update_divisor = u32::try_from(value)
                .context("QUICD_TXN_WINDOW_UPDATE_DIVISOR out of range")?;
        }
        if let Ok(value) = env.get_int("idle_timeout_ms") {
            self.idle_timeout_ms =
                u64::try_from(value).context("QUICD_TXN_IDLE_TIMEOUT_MS out of range")?;
        }
        if let Ok(value) = env.get_int("max_deferred_ingress") {
            self.max_deferred_ingress = usize::try_from(value)
                .context("QUICD_TXN_MAX_DEFERRED_INGRESS out of range")?;
        }
        if let Ok(value) = env.get_int("egress_rate_limit_bps") {
            self.egress_rate_limit_bps = u64::try_from(value)
                .context("QUICD_TXN_EGRESS_RATE_LIMIT_BPS out of range")?;
        }
        Ok(())
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Logging setup used by [`crate::telemetry::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// **Default:** `info`
    pub level: LogLevel,

    /// Include source file and line number in log lines.
    ///
    /// **Default:** `false`
    pub include_file_line: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_file_line: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}
