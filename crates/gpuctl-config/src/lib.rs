//! Typed, environment-driven process configuration.
//!
//! Mirrors `clawnode::config::NodeConfig`'s shape (a
//! `default_x()` function paired with each field) but sources overrides from
//! the environment rather than a JSON file, per spec.md §6.

#![forbid(unsafe_code)]

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for environment variable {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

type ConfigResult<T> = Result<T, ConfigError>;

fn env_or<T: FromStr>(key: &'static str, default: T) -> ConfigResult<T> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

fn env_required(key: &'static str) -> ConfigResult<String> {
    env::var(key).map_err(|_| ConfigError::MissingRequired(key))
}

fn env_opt(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn default_base_url() -> String {
    "https://api.novita.ai".to_string()
}

fn default_region() -> String {
    "CN-HK-01".to_string()
}

fn default_key_prefix() -> String {
    "novita_api".to_string()
}

/// Upstream GPU API client configuration (backs `gpuctl-upstream`).
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_region: String,
    pub poll_interval_seconds: u64,
    pub max_retry_attempts: u32,
    pub request_timeout_ms: u64,
}

impl UpstreamConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            api_key: env_required("NOVITA_API_KEY")?,
            base_url: env_or("NOVITA_BASE_URL", default_base_url())?,
            default_region: env_or("DEFAULT_REGION", default_region())?,
            poll_interval_seconds: env_or("POLL_INTERVAL_SECONDS", 10u64)?,
            max_retry_attempts: env_or("MAX_RETRY_ATTEMPTS", 3u32)?,
            request_timeout_ms: env_or("REQUEST_TIMEOUT_MS", 30_000u64)?,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Default health check parameters (backs `gpuctl-health`, spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckDefaultsConfig {
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_wait_ms: u64,
}

impl HealthCheckDefaultsConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            timeout_ms: env_or("HEALTH_CHECK_TIMEOUT_MS", 10_000u64)?,
            retry_attempts: env_or("HEALTH_CHECK_RETRY_ATTEMPTS", 3u32)?,
            retry_delay_ms: env_or("HEALTH_CHECK_RETRY_DELAY_MS", 2_000u64)?,
            max_wait_ms: env_or("HEALTH_CHECK_MAX_WAIT_MS", 300_000u64)?,
        })
    }
}

/// Migration scheduler configuration (backs `gpuctl-migration`, spec §4.9).
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub enabled: bool,
    pub schedule_interval_ms: u64,
    pub job_timeout_ms: u64,
    pub max_concurrent: u32,
    pub dry_run: bool,
    pub retry_failed: bool,
}

impl MigrationConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            enabled: env_or("MIGRATION_ENABLED", true)?,
            schedule_interval_ms: env_or("MIGRATION_SCHEDULE_INTERVAL_MS", 900_000u64)?,
            job_timeout_ms: env_or("MIGRATION_JOB_TIMEOUT_MS", 120_000u64)?,
            max_concurrent: env_or("MIGRATION_MAX_CONCURRENT", 5u32)?,
            dry_run: env_or("MIGRATION_DRY_RUN", false)?,
            retry_failed: env_or("MIGRATION_RETRY_FAILED", true)?,
        })
    }
}

/// Redis persistence backend configuration (backs `gpuctl-queue` and
/// `gpuctl-cache`, spec §4.6/§4.8/§6).
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub connection_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub key_prefix: String,
    pub enable_fallback: bool,
}

impl RedisConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            url: env_opt("REDIS_URL"),
            token: env_opt("REDIS_TOKEN"),
            connection_timeout_ms: env_or("REDIS_CONNECTION_TIMEOUT_MS", 5_000u64)?,
            command_timeout_ms: env_or("REDIS_COMMAND_TIMEOUT_MS", 5_000u64)?,
            retry_attempts: env_or("REDIS_RETRY_ATTEMPTS", 3u32)?,
            retry_delay_ms: env_or("REDIS_RETRY_DELAY_MS", 500u64)?,
            key_prefix: env_or("REDIS_KEY_PREFIX", default_key_prefix())?,
            enable_fallback: env_or("REDIS_ENABLE_FALLBACK", true)?,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

/// Instance-startup tracking configuration (spec §3 "Startup Operation",
/// §6).
#[derive(Debug, Clone, Copy)]
pub struct StartupConfig {
    pub default_max_wait_ms: u64,
    pub enable_name_lookup: bool,
    pub operation_timeout_ms: u64,
}

impl StartupConfig {
    fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            default_max_wait_ms: env_or("INSTANCE_STARTUP_DEFAULT_MAX_WAIT_MS", 600_000u64)?,
            enable_name_lookup: env_or("INSTANCE_STARTUP_ENABLE_NAME_LOOKUP", true)?,
            operation_timeout_ms: env_or("INSTANCE_STARTUP_OPERATION_TIMEOUT_MS", 600_000u64)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub upstream: UpstreamConfig,
    pub health_check_defaults: HealthCheckDefaultsConfig,
    pub migration: MigrationConfig,
    pub redis: RedisConfig,
    pub startup: StartupConfig,
}

impl AppConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            upstream: UpstreamConfig::from_env()?,
            health_check_defaults: HealthCheckDefaultsConfig::from_env()?,
            migration: MigrationConfig::from_env()?,
            redis: RedisConfig::from_env()?,
            startup: StartupConfig::from_env()?,
        };
        tracing::info!(
            default_region = %config.upstream.default_region,
            redis_configured = config.redis.is_configured(),
            migration_enabled = config.migration.enabled,
            "loaded control plane configuration"
        );
        Ok(config)
    }
}
