//! Runtime and entity configuration.
//!
//! Every struct has a `Default` suitable for local development and a
//! `from_env()` constructor. Unset or blank variables keep the default.

use std::time::Duration;

use chrono::Duration as TimeDelta;

#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Activation lifecycle settings shared by every entity.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Deactivate an actor after this long without calls or timer ticks.
    /// `None` disables idle deactivation.
    pub idle_timeout: Option<Duration>,
    /// How often each activation checks whether it has gone idle.
    pub idle_check_interval: Duration,
    /// Upper bound on a single state read or write.
    pub store_timeout: Duration,
    /// Upper bound on a call, measured from the caller. `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(15 * 60)),
            idle_check_interval: Duration::from_secs(60),
            store_timeout: Duration::from_secs(5),
            call_timeout: None,
        }
    }
}

impl RuntimeConfig {
    /// Reads `ACTOR_IDLE_TIMEOUT_SECS` (`0` disables), `ACTOR_IDLE_CHECK_SECS`,
    /// `ACTOR_STORE_TIMEOUT_MS` and `ACTOR_CALL_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(secs) = env_u64("ACTOR_IDLE_TIMEOUT_SECS")? {
            cfg.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = env_u64("ACTOR_IDLE_CHECK_SECS")? {
            cfg.idle_check_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = env_u64("ACTOR_STORE_TIMEOUT_MS")? {
            cfg.store_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("ACTOR_CALL_TIMEOUT_SECS")? {
            cfg.call_timeout = Some(Duration::from_secs(secs));
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone)]
pub struct TenantConfig {
    /// Lifetime of an invite token.
    pub invite_ttl: TimeDelta,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            invite_ttl: TimeDelta::days(7),
        }
    }
}

impl TenantConfig {
    /// Reads `TENANT_INVITE_TTL_HOURS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(hours) = env_u64("TENANT_INVITE_TTL_HOURS")? {
            cfg.invite_ttl = hours_to_delta("TENANT_INVITE_TTL_HOURS", hours)?;
        }
        Ok(cfg)
    }
}

/// PBKDF2 parameters for stored credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHashConfig {
    pub iterations: u32,
    pub hash_len: usize,
    pub salt_len: usize,
}

impl Default for PasswordHashConfig {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            hash_len: 32,
            salt_len: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserConfig {
    pub password_hash: PasswordHashConfig,
    /// Lifetime of a password-reset token.
    pub reset_token_ttl: TimeDelta,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            password_hash: PasswordHashConfig::default(),
            reset_token_ttl: TimeDelta::hours(24),
        }
    }
}

impl UserConfig {
    /// Reads `PASSWORD_HASH_ITERATIONS`, `PASSWORD_HASH_BYTES` and
    /// `PASSWORD_RESET_TTL_HOURS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(iterations) = env_u64("PASSWORD_HASH_ITERATIONS")? {
            cfg.password_hash.iterations = u32::try_from(iterations)
                .ok()
                .filter(|i| *i > 0)
                .ok_or_else(|| {
                    ConfigError(format!("PASSWORD_HASH_ITERATIONS={iterations} out of range"))
                })?;
        }
        if let Some(bytes) = env_u64("PASSWORD_HASH_BYTES")? {
            if !(16..=64).contains(&bytes) {
                return Err(ConfigError(format!(
                    "PASSWORD_HASH_BYTES={bytes} out of range (expected 16..=64)"
                )));
            }
            cfg.password_hash.hash_len = bytes as usize;
        }
        if let Some(hours) = env_u64("PASSWORD_RESET_TTL_HOURS")? {
            cfg.reset_token_ttl = hours_to_delta("PASSWORD_RESET_TTL_HOURS", hours)?;
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Interval of the `process-next` timer.
    pub poll_interval: Duration,
    /// How long a single processor invocation may run.
    pub job_timeout: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            job_timeout: Duration::from_secs(300),
        }
    }
}

impl JobQueueConfig {
    /// Reads `JOB_QUEUE_POLL_SECS` and `JOB_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(secs) = env_u64("JOB_QUEUE_POLL_SECS")? {
            cfg.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_u64("JOB_TIMEOUT_SECS")? {
            cfg.job_timeout = Duration::from_secs(secs.max(1));
        }
        Ok(cfg)
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_u64(var_name: &str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = std::env::var(var_name).ok().and_then(non_empty) else {
        return Ok(None);
    };
    raw.parse::<u64>()
        .map(Some)
        .map_err(|e| ConfigError(format!("invalid {var_name}={raw}: {e}")))
}

fn hours_to_delta(var_name: &str, hours: u64) -> Result<TimeDelta, ConfigError> {
    i64::try_from(hours)
        .ok()
        .filter(|h| *h > 0)
        .and_then(TimeDelta::try_hours)
        .ok_or_else(|| ConfigError(format!("{var_name}={hours} out of range")))
}
