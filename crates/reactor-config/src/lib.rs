//! Top-level configuration, loaded from `~/.reactor/config.toml` with
//! environment-variable overrides, matching spec.md §6's configuration
//! table.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.reactor/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default)]
    pub coordination_store_url: CoordinationStoreUrl,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            coordination_store_url: CoordinationStoreUrl::default(),
            webhook: WebhookConfig::default(),
            script: ScriptConfig::default(),
            scaling: ScalingConfig::default(),
            cluster: ClusterConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

fn default_instance_id() -> String {
    format!(
        "{}-{}",
        hostname_or_unknown(),
        uuid::Uuid::new_v4().as_simple()
    )
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "reactor-instance".to_string())
}

impl Config {
    /// Load config from `~/.reactor/config.toml`, falling back to defaults
    /// if the file does not exist. Environment variables of the form
    /// `REACTOR_<SECTION>__<FIELD>` override individual fields after load.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let mut cfg = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            Config::default()
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut cfg: Config =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reactor")
            .join("config.toml")
    }

    /// Apply a small set of environment overrides recognized by §6's
    /// configuration table, mirroring the teacher's env-first posture for
    /// deployment-sensitive values (instance identity, store URLs).
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("REACTOR_INSTANCE_ID") {
            if !id.is_empty() {
                self.instance_id = id;
            }
        }
        if let Ok(url) = std::env::var("REACTOR_COORDINATION_STORE_URL") {
            if !url.is_empty() {
                self.coordination_store_url.0 = url;
            }
        }
        if let Ok(url) = std::env::var("REACTOR_SCRIPT_API_BASE_URL") {
            if !url.is_empty() {
                self.script.api_base_url = url;
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

/// Newtype so a bare string doesn't need its own `#[serde(default)]` dance
/// for the `redis://127.0.0.1:6379` default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoordinationStoreUrl(pub String);

impl Default for CoordinationStoreUrl {
    fn default() -> Self {
        Self("redis://127.0.0.1:6379".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate_limit: WebhookRateLimitConfig,
    #[serde(default = "default_processing_concurrency")]
    pub processing_concurrency: usize,
    #[serde(default = "default_failure_history")]
    pub failure_history_len: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            timeout_secs: default_webhook_timeout_secs(),
            rate_limit: WebhookRateLimitConfig::default(),
            processing_concurrency: default_processing_concurrency(),
            failure_history_len: default_failure_history(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_max_retry_delay_ms() -> u64 {
    60_000
}
fn default_webhook_timeout_secs() -> u64 {
    10
}
fn default_processing_concurrency() -> usize {
    8
}
fn default_failure_history() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRateLimitConfig {
    #[serde(default = "default_rpm")]
    pub default_max_rpm: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for WebhookRateLimitConfig {
    fn default() -> Self {
        Self {
            default_max_rpm: default_rpm(),
            window_ms: default_window_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_rpm() -> u32 {
    60
}
fn default_window_ms() -> u64 {
    60_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default)]
    pub execution: ScriptExecutionConfig,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            execution: ScriptExecutionConfig::default(),
            api_base_url: default_api_base_url(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptExecutionConfig {
    #[serde(default = "default_script_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_script_rpm")]
    pub default_max_rpm: u32,
}

impl Default for ScriptExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_script_timeout_secs(),
            default_max_rpm: default_script_rpm(),
        }
    }
}

fn default_script_timeout_secs() -> u64 {
    30
}
fn default_script_rpm() -> u32 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_leadership_renewal_secs")]
    pub leadership_renewal_interval_secs: u64,
    #[serde(default = "default_lock_cleanup_secs")]
    pub lock_cleanup_interval_secs: u64,
    #[serde(default = "default_max_script_execution_secs")]
    pub max_script_execution_time_secs: u64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            leadership_renewal_interval_secs: default_leadership_renewal_secs(),
            lock_cleanup_interval_secs: default_lock_cleanup_secs(),
            max_script_execution_time_secs: default_max_script_execution_secs(),
        }
    }
}

fn default_lock_ttl_secs() -> u64 {
    30
}
fn default_leadership_renewal_secs() -> u64 {
    15
}
fn default_lock_cleanup_secs() -> u64 {
    60
}
fn default_max_script_execution_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_true")]
    pub cron_leader_election: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cron_leader_election: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default)]
    pub admin_bearer_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            admin_bearer_token: None,
        }
    }
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    8090
}
