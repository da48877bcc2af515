use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 5002;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_RUNNER_URL: &str = "http://127.0.0.1:5001";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 3_600;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 300; // runner reruns a failed task after 5 minutes

/// Top-level config (extract.toml + EXTRACT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub attempts: AttemptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the registry is polled for due jobs.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Wall-clock budget for one runner invocation. Exceeding it counts as a failed attempt.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// How often cycles left open by a failed append are picked up again.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RetryPolicyKind {
    /// Same delay before every retry.
    Fixed,
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    Exponential,
}

/// Delay between a failed attempt and the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_policy")]
    pub policy: RetryPolicyKind,
    #[serde(default = "default_retry_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_retry_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicyKind::Fixed,
            base_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            max_delay_secs: default_retry_max_delay_secs(),
        }
    }
}

/// Bounded retry of audit appends before a run cycle is abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_append_attempts")]
    pub append_attempts: u32,
    #[serde(default = "default_append_backoff_ms")]
    pub append_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            append_attempts: default_append_attempts(),
            append_backoff_ms: default_append_backoff_ms(),
        }
    }
}

/// Where the external task runner listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_runner_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_RUNNER_URL.to_string(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptsBackend {
    /// Process-local counters; lost on restart.
    #[default]
    Memory,
    /// Counters in the shared SQLite file, reachable from every process using it.
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttemptsConfig {
    #[serde(default)]
    pub backend: AttemptsBackend,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_run_timeout_secs() -> u64 {
    DEFAULT_RUN_TIMEOUT_SECS
}
fn default_reconcile_interval_secs() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_SECS
}
fn default_retry_policy() -> RetryPolicyKind {
    RetryPolicyKind::Fixed
}
fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}
fn default_retry_max_delay_secs() -> u64 {
    3_600
}
fn default_append_attempts() -> u32 {
    5
}
fn default_append_backoff_ms() -> u64 {
    200
}
fn default_runner_url() -> String {
    DEFAULT_RUNNER_URL.to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.extract/extract.db", home)
}

impl ExtractConfig {
    /// Load config from a TOML file with EXTRACT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.extract/extract.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ExtractConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("EXTRACT_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.extract/extract.toml", home)
}
