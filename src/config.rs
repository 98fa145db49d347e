//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Pool orchestrator and safety policy configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum messages a single account may send per day.
    pub daily_message_cap: u32,
    /// Minimum spacing between two sends from the same account (zero disables).
    pub min_send_interval: Duration,
    /// Upper bound for every remote call (connect, auth, send).
    pub remote_timeout: Duration,
    /// Maximum number of live sessions kept in the cache.
    pub session_cache_capacity: usize,
    /// How long an enrollment may sit waiting for its authorization code.
    pub authorization_ttl: Duration,
    /// How many accounts `dispatch` tries before giving up.
    pub max_dispatch_attempts: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            daily_message_cap: 20,
            min_send_interval: Duration::from_secs(30),
            remote_timeout: Duration::from_secs(30),
            session_cache_capacity: 64,
            authorization_ttl: Duration::from_secs(600), // 10 minutes
            max_dispatch_attempts: 3,
        }
    }
}

impl PoolConfig {
    /// Build from `POOL_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            daily_message_cap: env_parse("POOL_DAILY_CAP").unwrap_or(defaults.daily_message_cap),
            min_send_interval: env_secs("POOL_MIN_SEND_INTERVAL_SECS")
                .unwrap_or(defaults.min_send_interval),
            remote_timeout: env_secs("POOL_REMOTE_TIMEOUT_SECS").unwrap_or(defaults.remote_timeout),
            session_cache_capacity: env_parse("POOL_SESSION_CACHE_CAPACITY")
                .unwrap_or(defaults.session_cache_capacity),
            authorization_ttl: env_secs("POOL_AUTH_TTL_SECS").unwrap_or(defaults.authorization_ttl),
            max_dispatch_attempts: env_parse("POOL_MAX_DISPATCH_ATTEMPTS")
                .unwrap_or(defaults.max_dispatch_attempts),
        }
    }
}

/// Health monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Consecutive transient failures before an account is disabled.
    pub failure_threshold: u32,
    /// Upper bound for connect and identity probe during a health check.
    pub probe_timeout: Duration,
    /// Cron expression (with seconds) for recurring sweeps.
    pub sweep_schedule: String,
    /// Accounts probed concurrently within one sweep.
    pub sweep_concurrency: usize,
    /// Random delay added before each scheduled sweep.
    pub max_start_jitter: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            probe_timeout: Duration::from_secs(30),
            sweep_schedule: "0 */30 * * * *".to_string(),
            sweep_concurrency: 4,
            max_start_jitter: Duration::from_secs(30),
        }
    }
}

impl MonitorConfig {
    /// Build from `MONITOR_*` environment variables, validating the schedule.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            failure_threshold: env_parse("MONITOR_FAILURE_THRESHOLD")
                .unwrap_or(defaults.failure_threshold)
                .max(1),
            probe_timeout: env_secs("MONITOR_PROBE_TIMEOUT_SECS").unwrap_or(defaults.probe_timeout),
            sweep_schedule: std::env::var("MONITOR_SWEEP_CRON").unwrap_or(defaults.sweep_schedule),
            sweep_concurrency: env_parse("MONITOR_SWEEP_CONCURRENCY")
                .unwrap_or(defaults.sweep_concurrency)
                .max(1),
            max_start_jitter: env_secs("MONITOR_JITTER_SECS").unwrap_or(defaults.max_start_jitter),
        };
        parse_schedule("MONITOR_SWEEP_CRON", &config.sweep_schedule)?;
        Ok(config)
    }
}

/// Session gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_token: Option<SecretString>,
    /// Upper bound for any single gateway HTTP request.
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("SESSION_GATEWAY_URL")
            .map_err(|_| ConfigError::MissingEnvVar("SESSION_GATEWAY_URL".to_string()))?;
        let api_token = std::env::var("SESSION_GATEWAY_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::from);
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            request_timeout: env_secs("SESSION_GATEWAY_TIMEOUT_SECS")
                .unwrap_or(Duration::from_secs(30)),
        })
    }
}

/// Telegram Bot API notifier settings.
#[derive(Debug, Clone)]
pub struct TelegramNotifierConfig {
    pub bot_token: SecretString,
    pub chat_ids: Vec<String>,
}

impl TelegramNotifierConfig {
    /// Returns `None` when no bot token is configured.
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("NOTIFY_TELEGRAM_BOT_TOKEN").ok()?;
        if bot_token.is_empty() {
            return None;
        }

        let chat_ids: Vec<String> = std::env::var("NOTIFY_TELEGRAM_CHAT_IDS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Some(Self {
            bot_token: SecretString::from(bot_token),
            chat_ids,
        })
    }
}

/// Parse a cron expression, mapping failures to a config error for `key`.
pub fn parse_schedule(key: &str, expr: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("invalid cron expression '{expr}': {e}"),
    })
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
