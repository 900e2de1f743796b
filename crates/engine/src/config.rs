use std::str::FromStr;
use std::time::Duration;

use renderq_core::scheduling::{DEFAULT_MAX_ATTEMPTS, MAX_ATTEMPTS_LIMIT};

use crate::reconnect::ReconnectConfig;

/// Scheduler timing and policy settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often queued jobs are paired with free nodes.
    pub tick_interval: Duration,
    /// How often active jobs' history is polled.
    pub reconcile_interval: Duration,
    /// How often the node map is checked against the store and registry.
    pub node_sync_interval: Duration,
    /// A rendering job with no activity for this long is failed. `None`
    /// disables the check.
    pub stall_timeout: Option<Duration>,
    /// `max_attempts` for jobs that do not set one.
    pub default_max_attempts: u32,
    /// Start the loops as soon as the scheduler is built.
    pub auto_start: bool,
    /// Backoff for push-channel reconnects.
    pub reconnect: ReconnectConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(2000),
            reconcile_interval: Duration::from_secs(10),
            node_sync_interval: Duration::from_secs(15),
            stall_timeout: Some(Duration::from_secs(30 * 60)),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            auto_start: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `SCHEDULER_TICK_MS`       | `2000`  |
    /// | `RECONCILE_INTERVAL_SECS` | `10`    |
    /// | `NODE_SYNC_INTERVAL_SECS` | `15`    |
    /// | `STALL_TIMEOUT_SECS`      | `1800` (`0` disables) |
    /// | `DEFAULT_MAX_ATTEMPTS`    | `3`     |
    /// | `SCHEDULER_AUTO_START`    | `true`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let tick_ms: u64 = env_or("SCHEDULER_TICK_MS", 2000)?;
        let reconcile_secs: u64 = env_or("RECONCILE_INTERVAL_SECS", 10)?;
        let sync_secs: u64 = env_or("NODE_SYNC_INTERVAL_SECS", 15)?;
        let stall_secs: u64 = env_or("STALL_TIMEOUT_SECS", 1800)?;
        let default_max_attempts: u32 = env_or("DEFAULT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let auto_start: bool = env_or("SCHEDULER_AUTO_START", true)?;

        for (key, value) in [
            ("SCHEDULER_TICK_MS", tick_ms),
            ("RECONCILE_INTERVAL_SECS", reconcile_secs),
            ("NODE_SYNC_INTERVAL_SECS", sync_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: "0".into(),
                    reason: "must be positive".into(),
                });
            }
        }
        if default_max_attempts == 0 || default_max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ConfigError::Invalid {
                key: "DEFAULT_MAX_ATTEMPTS",
                value: default_max_attempts.to_string(),
                reason: format!("must be between 1 and {MAX_ATTEMPTS_LIMIT}"),
            });
        }

        Ok(Self {
            tick_interval: Duration::from_millis(tick_ms),
            reconcile_interval: Duration::from_secs(reconcile_secs),
            node_sync_interval: Duration::from_secs(sync_secs),
            stall_timeout: (stall_secs > 0).then(|| Duration::from_secs(stall_secs)),
            default_max_attempts,
            auto_start,
            reconnect: defaults.reconnect,
        })
    }
}

/// Read `key`, falling back to `default` when unset.
pub fn env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid node entry '{entry}': {reason}")]
    InvalidNode { entry: String, reason: String },
}
