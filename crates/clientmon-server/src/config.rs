use std::path::Path;

use clientmon_common::types::NewAlertRule;
use clientmon_notify::ChannelsConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub usage: UsageConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            health_check: HealthCheckConfig::default(),
            notify: NotifyConfig::default(),
            retention: RetentionConfig::default(),
            usage: UsageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_check_enabled")]
    pub enabled: bool,
    /// How often `serve` looks for due clients.
    #[serde(default = "default_health_check_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_health_check_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound for a whole probe, connect included.
    #[serde(default = "default_health_check_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause between sequential probes; unused when `max_concurrent > 1`.
    #[serde(default = "default_health_check_inter_check_delay_ms")]
    pub inter_check_delay_ms: u64,
    #[serde(default = "default_health_check_max_concurrent")]
    pub max_concurrent: usize,
    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` for probes.
    #[serde(default = "default_health_check_use_system_proxy")]
    pub use_system_proxy: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: default_health_check_enabled(),
            tick_secs: default_health_check_tick_secs(),
            connect_timeout_secs: default_health_check_connect_timeout_secs(),
            timeout_secs: default_health_check_timeout_secs(),
            inter_check_delay_ms: default_health_check_inter_check_delay_ms(),
            max_concurrent: default_health_check_max_concurrent(),
            use_system_proxy: default_health_check_use_system_proxy(),
        }
    }
}

fn default_health_check_enabled() -> bool {
    true
}

fn default_health_check_tick_secs() -> u64 {
    60
}

fn default_health_check_connect_timeout_secs() -> u64 {
    10
}

fn default_health_check_timeout_secs() -> u64 {
    30
}

fn default_health_check_inter_check_delay_ms() -> u64 {
    500
}

fn default_health_check_max_concurrent() -> usize {
    1
}

fn default_health_check_use_system_proxy() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_channel_timeout_secs")]
    pub channel_timeout_secs: u64,
    /// `[notify.email]`, `[notify.slack]` and `[notify.webhook]` tables.
    #[serde(flatten)]
    pub channels: ChannelsConfig,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_timeout_secs: default_channel_timeout_secs(),
            channels: ChannelsConfig::default(),
        }
    }
}

fn default_channel_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> u32 {
    90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Authorization plus token requests a day needs before its error rate
    /// is evaluated.
    #[serde(default = "default_error_rate_min_requests")]
    pub error_rate_min_requests: i64,
    #[serde(default = "default_inactive_after_days")]
    pub inactive_after_days: i64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            error_rate_min_requests: default_error_rate_min_requests(),
            inactive_after_days: default_inactive_after_days(),
        }
    }
}

fn default_error_rate_min_requests() -> i64 {
    20
}

fn default_inactive_after_days() -> i64 {
    30
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_database_file() -> String {
    "clientmon.db".to_string()
}

// ---- Rules seed file (used by the `init-rules` subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesSeedFile {
    #[serde(default)]
    pub rules: Vec<NewAlertRule>,
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }
}
