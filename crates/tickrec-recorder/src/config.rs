//! Application configuration.
//!
//! Loaded from a TOML file. A path ending in `.txt` is read as the older
//! key=value format, which only carries API credentials and endpoint; every
//! tuning value then takes its default.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tickrec_persistence::{parse_key_values, WriterConfig};
use tickrec_wire::{ConnectionSettings, DispatchConfig, TransportConfig, MAX_FRAME_LEN};

/// API endpoint and application credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub client_id: String,
    pub client_secret: String,
    /// TCP connect and TLS handshake timeout (ms). Default: 10,000.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String {
    "live.ctraderapi.com".to_string()
}

fn default_port() -> u16 {
    5035
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Outbound pacing. The server drops clients that exceed its limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Pause after every dispatcher iteration (ms). Default: 2,010.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    /// Minimum gap between frames (ms). Default: 2,000.
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
    /// Maximum frames per window. Default: 30.
    #[serde(default = "default_window_max_messages")]
    pub window_max_messages: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_send_interval_ms() -> u64 {
    2_010
}

fn default_min_spacing_ms() -> u64 {
    2_000
}

fn default_window_max_messages() -> u32 {
    30
}

fn default_window_secs() -> u64 {
    60
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            send_interval_ms: default_send_interval_ms(),
            min_spacing_ms: default_min_spacing_ms(),
            window_max_messages: default_window_max_messages(),
            window_secs: default_window_secs(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl From<&DispatchSettings> for DispatchConfig {
    fn from(s: &DispatchSettings) -> Self {
        Self {
            send_interval: Duration::from_millis(s.send_interval_ms),
            min_spacing: Duration::from_millis(s.min_spacing_ms),
            window_max_messages: s.window_max_messages,
            window: Duration::from_secs(s.window_secs),
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
        }
    }
}

/// Tick writer pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterSettings {
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Failed appends to one file before its pending ticks are dropped.
    #[serde(default = "default_max_group_retries")]
    pub max_group_retries: u32,
}

fn default_max_batch() -> usize {
    10_000
}

fn default_idle_wait_ms() -> u64 {
    1_000
}

fn default_error_backoff_ms() -> u64 {
    1_000
}

fn default_max_group_retries() -> u32 {
    5
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
            idle_wait_ms: default_idle_wait_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            max_group_retries: default_max_group_retries(),
        }
    }
}

impl From<&WriterSettings> for WriterConfig {
    fn from(s: &WriterSettings) -> Self {
        Self {
            max_batch: s.max_batch,
            idle_wait: Duration::from_millis(s.idle_wait_ms),
            error_backoff: Duration::from_millis(s.error_backoff_ms),
            max_group_retries: s.max_group_retries,
        }
    }
}

/// Reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Attempts before giving up. 0 = retry forever.
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Activity and error log files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogConfig {
    /// Directory for `activity.log` and `errors.log`. Empty disables them.
    #[serde(default = "default_activity_dir")]
    pub dir: String,
    #[serde(default = "default_activity_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Lines appended per file per flush.
    #[serde(default = "default_activity_max_batch")]
    pub max_batch: usize,
}

fn default_activity_dir() -> String {
    "local".to_string()
}

fn default_activity_flush_interval_ms() -> u64 {
    1_000
}

fn default_activity_max_batch() -> usize {
    10_000
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            dir: default_activity_dir(),
            flush_interval_ms: default_activity_flush_interval_ms(),
            max_batch: default_activity_max_batch(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub writer: WriterSettings,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub activity: ActivityLogConfig,
    /// Directory holding one key=value file per account.
    #[serde(default = "default_accounts_dir")]
    pub accounts_dir: String,
    /// Interval between statistics summaries (seconds). 0 disables them.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_accounts_dir() -> String {
    "local/users".to_string()
}

fn default_stats_interval_secs() -> u64 {
    300
}

impl AppConfig {
    /// Load configuration from file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let config = if path.ends_with(".txt") {
            Self::from_legacy_txt(&content, Path::new(path))?
        } else {
            toml::from_str(&content)
                .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse the key=value format (`ClientId`, `ClientSecret`, `ApiHost`, `ApiPort`).
    pub fn from_legacy_txt(content: &str, source: &Path) -> AppResult<Self> {
        let pairs =
            parse_key_values(content, source).map_err(|e| AppError::Config(e.to_string()))?;
        let lookup = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| AppError::Config(format!("{key} missing from {}", source.display())))
        };

        let port = lookup("ApiPort")?;
        let port = port
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid ApiPort {port:?}")))?;

        Ok(Self {
            api: ApiConfig {
                host: lookup("ApiHost")?,
                port,
                client_id: lookup("ClientId")?,
                client_secret: lookup("ClientSecret")?,
                connect_timeout_ms: default_connect_timeout_ms(),
            },
            dispatch: DispatchSettings::default(),
            writer: WriterSettings::default(),
            reconnect: ReconnectConfig::default(),
            activity: ActivityLogConfig::default(),
            accounts_dir: default_accounts_dir(),
            stats_interval_secs: default_stats_interval_secs(),
        })
    }

    /// Reject values that would break the connection or the writer.
    pub fn validate(&self) -> AppResult<()> {
        if self.api.host.trim().is_empty() {
            return Err(AppError::Config("api.host must not be empty".to_string()));
        }
        if self.api.port == 0 {
            return Err(AppError::Config("api.port must not be 0".to_string()));
        }
        if self.api.client_id.is_empty() || self.api.client_secret.is_empty() {
            return Err(AppError::Config(
                "api.client_id and api.client_secret are required".to_string(),
            ));
        }
        if self.dispatch.min_spacing_ms < 2_000 {
            return Err(AppError::Config(format!(
                "dispatch.min_spacing_ms must be at least 2000 (got {})",
                self.dispatch.min_spacing_ms
            )));
        }
        if self.dispatch.window_max_messages == 0 || self.dispatch.window_secs == 0 {
            return Err(AppError::Config(
                "dispatch window must allow at least one message".to_string(),
            ));
        }
        if self.dispatch.heartbeat_interval_ms == 0 {
            return Err(AppError::Config(
                "dispatch.heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.writer.max_batch == 0 {
            return Err(AppError::Config("writer.max_batch must be positive".to_string()));
        }
        if !self.activity.dir.trim().is_empty()
            && (self.activity.flush_interval_ms == 0 || self.activity.max_batch == 0)
        {
            return Err(AppError::Config(
                "activity.flush_interval_ms and activity.max_batch must be positive".to_string(),
            ));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(AppError::Config(
                "reconnect.base_delay_ms exceeds reconnect.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        let mut transport = TransportConfig::new(self.api.host.clone(), self.api.port);
        transport.connect_timeout = Duration::from_millis(self.api.connect_timeout_ms);
        ConnectionSettings {
            transport,
            dispatch: DispatchConfig::from(&self.dispatch),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig::from(&self.writer)
    }
}
