use std::str::FromStr;
use std::time::Duration;

use easel_core::error::CoreError;
use easel_core::retry::ExponentialBackoff;

use crate::backoff::StoreBackoff;

/// Longest duration that is still added to a timestamp: 100 years.
const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identifies this process in `jobs.claimed_by`.
    pub replica_id: String,
    /// Maximum concurrent Worker Executions in this replica (default: `3`).
    pub concurrency: usize,
    /// Dispatcher tick (default: 2 s).
    pub poll_interval: Duration,
    /// `max_attempts` for submissions that do not set one (default: `3`).
    pub default_max_attempts: i32,
    /// Backoff curve for failed attempts.
    pub retry: ExponentialBackoff,
    /// Deadline for a single generation call (default: 5 min).
    pub generation_timeout: Duration,
    /// Claims older than this are recovered by the sweeper (default: 15 min).
    pub stale_claim_timeout: Duration,
    /// How often stale claims are looked for (default: 60 s).
    pub stale_sweep_interval: Duration,
    /// Terminal jobs are kept this long (default: 7 days).
    pub retention: Duration,
    /// How often terminal jobs are purged (default: 24 h).
    pub purge_interval: Duration,
    /// Drain time for in-flight executions on shutdown (default: 30 s).
    pub shutdown_timeout: Duration,
    /// Backoff for retrying failed store calls.
    pub store_backoff: StoreBackoff,
    /// Connection pool size (default: `20`).
    pub db_max_connections: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            replica_id: default_replica_id(None),
            concurrency: 3,
            poll_interval: Duration::from_millis(2000),
            default_max_attempts: 3,
            retry: ExponentialBackoff::default(),
            generation_timeout: Duration::from_secs(300),
            stale_claim_timeout: Duration::from_secs(900),
            stale_sweep_interval: Duration::from_secs(60),
            retention: Duration::from_secs(168 * 3600),
            purge_interval: Duration::from_secs(86_400),
            shutdown_timeout: Duration::from_secs(30),
            store_backoff: StoreBackoff::default(),
            db_max_connections: 20,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default  |
    /// |---------------------------------|----------|
    /// | `JOB_REPLICA_ID`                | `$HOSTNAME-<uuid>` |
    /// | `JOB_CONCURRENCY`               | `3`      |
    /// | `JOB_POLL_INTERVAL_MS`          | `2000`   |
    /// | `JOB_DEFAULT_MAX_ATTEMPTS`      | `3`      |
    /// | `JOB_RETRY_BASE`                | `2.0`    |
    /// | `JOB_RETRY_UNIT_MS`             | `1000`   |
    /// | `JOB_RETRY_MAX_DELAY_SECS`      | `300`    |
    /// | `JOB_GENERATION_TIMEOUT_SECS`   | `300`    |
    /// | `JOB_STALE_CLAIM_TIMEOUT_SECS`  | `900`    |
    /// | `JOB_STALE_SWEEP_INTERVAL_SECS` | `60`     |
    /// | `JOB_RETENTION_HOURS`           | `168`    |
    /// | `JOB_PURGE_INTERVAL_SECS`       | `86400`  |
    /// | `JOB_SHUTDOWN_TIMEOUT_SECS`     | `30`     |
    /// | `DB_MAX_CONNECTIONS`            | `20`     |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let replica_id = match lookup("JOB_REPLICA_ID") {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => default_replica_id(lookup("HOSTNAME")),
        };

        let retry = ExponentialBackoff::new(
            parse_var(&lookup, "JOB_RETRY_BASE", defaults.retry.base)?,
            Duration::from_millis(parse_var(&lookup, "JOB_RETRY_UNIT_MS", 1000)?),
            Duration::from_secs(parse_var(&lookup, "JOB_RETRY_MAX_DELAY_SECS", 300)?),
        )?;

        let config = Self {
            replica_id,
            concurrency: parse_var(&lookup, "JOB_CONCURRENCY", defaults.concurrency)?,
            poll_interval: Duration::from_millis(parse_var(&lookup, "JOB_POLL_INTERVAL_MS", 2000)?),
            default_max_attempts: parse_var(
                &lookup,
                "JOB_DEFAULT_MAX_ATTEMPTS",
                defaults.default_max_attempts,
            )?,
            retry,
            generation_timeout: Duration::from_secs(parse_var(
                &lookup,
                "JOB_GENERATION_TIMEOUT_SECS",
                300,
            )?),
            stale_claim_timeout: Duration::from_secs(parse_var(
                &lookup,
                "JOB_STALE_CLAIM_TIMEOUT_SECS",
                900,
            )?),
            stale_sweep_interval: Duration::from_secs(parse_var(
                &lookup,
                "JOB_STALE_SWEEP_INTERVAL_SECS",
                60,
            )?),
            retention: Duration::from_secs(
                parse_var::<u64, _>(&lookup, "JOB_RETENTION_HOURS", 168)?.saturating_mul(3600),
            ),
            purge_interval: Duration::from_secs(parse_var(
                &lookup,
                "JOB_PURGE_INTERVAL_SECS",
                86_400,
            )?),
            shutdown_timeout: Duration::from_secs(parse_var(
                &lookup,
                "JOB_SHUTDOWN_TIMEOUT_SECS",
                30,
            )?),
            store_backoff: defaults.store_backoff,
            db_max_connections: parse_var(
                &lookup,
                "DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.concurrency == 0 {
            return Err(CoreError::Validation(
                "JOB_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.default_max_attempts < 1 {
            return Err(CoreError::Validation(
                "JOB_DEFAULT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("JOB_POLL_INTERVAL_MS", self.poll_interval),
            ("JOB_GENERATION_TIMEOUT_SECS", self.generation_timeout),
            ("JOB_STALE_SWEEP_INTERVAL_SECS", self.stale_sweep_interval),
            ("JOB_PURGE_INTERVAL_SECS", self.purge_interval),
        ] {
            if value.is_zero() {
                return Err(CoreError::Validation(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        for (name, value) in [
            ("JOB_RETRY_UNIT_MS", self.retry.unit),
            ("JOB_RETRY_MAX_DELAY_SECS", self.retry.max_delay),
            ("JOB_STALE_CLAIM_TIMEOUT_SECS", self.stale_claim_timeout),
            ("JOB_RETENTION_HOURS", self.retention),
        ] {
            if value > MAX_DURATION {
                return Err(CoreError::Validation(format!(
                    "{name} must not exceed 100 years"
                )));
            }
        }
        // A claim must not be recovered while its attempt can still be running.
        if self.stale_claim_timeout <= self.generation_timeout {
            return Err(CoreError::Validation(format!(
                "JOB_STALE_CLAIM_TIMEOUT_SECS ({}s) must exceed JOB_GENERATION_TIMEOUT_SECS ({}s)",
                self.stale_claim_timeout.as_secs(),
                self.generation_timeout.as_secs()
            )));
        }
        if self.db_max_connections == 0 {
            return Err(CoreError::Validation(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse `key` if present, else return `default`.
fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            CoreError::Validation(format!("{key} has invalid value '{raw}': {e}"))
        }),
        None => Ok(default),
    }
}

fn default_replica_id(hostname: Option<String>) -> String {
    let host = hostname
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "easel-worker".to_string());
    format!("{host}-{}", uuid::Uuid::now_v7())
}
