//! Orchestrator configuration.
//!
//! Defaults mirror the behaviour of the hosted renewal service: a 10 second
//! DNS propagation delay and retriable activities retried every 5 seconds for
//! up to a minute. Values can be loaded from a JSON file and overridden with
//! `RENEWAL_*` environment variables:
//!
//! - `RENEWAL_PROPAGATION_DEFAULT_SECS`, `RENEWAL_PROPAGATION_MAX_SECS`
//! - `RENEWAL_<POLICY>_INTERVAL_SECS`, `RENEWAL_<POLICY>_MAX_ATTEMPTS` and
//!   `RENEWAL_<POLICY>_MAX_WAIT_SECS`, where `<POLICY>` is `RETRY`
//!   (`activity_retry`), `CHALLENGE`, `READY` or `VALID`.
//!
//! The effective configuration is recorded with each instance when it starts,
//! so changing these values only affects instances started afterwards.

use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use log::warn;
use serde::{Deserialize, Serialize};

const DEFAULT_PROPAGATION_SECS: u64 = 10;
const DEFAULT_MAX_PROPAGATION_SECS: u64 = 600;

/// Largest accepted value for any duration setting: ten years.
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// `seconds` as a chrono duration, or `None` when it does not fit.
pub(crate) fn try_duration_secs(seconds: u64) -> Option<Duration> {
    i64::try_from(seconds).ok().and_then(Duration::try_seconds)
}

fn saturating_secs(seconds: u64) -> Duration {
    try_duration_secs(seconds).unwrap_or(Duration::MAX)
}

/// Retry and bounded-wait policy for one class of activity calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub first_retry_interval_secs: u64,
    pub backoff_coefficient: f64,
    pub max_retry_interval_secs: u64,
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Upper bound on orchestration time spent retrying.
    pub max_wait_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            first_retry_interval_secs: 5,
            backoff_coefficient: 1.0,
            max_retry_interval_secs: 60,
            max_attempts: 12,
            max_wait_secs: 60,
        }
    }
}

impl RetryPolicy {
    pub fn first_interval(&self) -> Duration {
        saturating_secs(self.first_retry_interval_secs.max(1))
    }

    pub fn max_wait(&self) -> Duration {
        saturating_secs(self.max_wait_secs)
    }

    /// Interval after `current`, scaled by the backoff coefficient and capped.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let coefficient = if self.backoff_coefficient.is_finite() && self.backoff_coefficient >= 1.0
        {
            self.backoff_coefficient
        } else {
            1.0
        };
        let scaled = (current.num_milliseconds() as f64 * coefficient).round() as i64;
        let cap = saturating_secs(self.max_retry_interval_secs.max(1));
        Duration::try_milliseconds(scaled).unwrap_or(cap).min(cap)
    }

    fn validate(&self, name: &str) -> Result<()> {
        check_secs(&format!("{name}.first_retry_interval_secs"), self.first_retry_interval_secs)?;
        check_secs(&format!("{name}.max_retry_interval_secs"), self.max_retry_interval_secs)?;
        check_secs(&format!("{name}.max_wait_secs"), self.max_wait_secs)
    }

    fn apply_env(&mut self, prefix: &str) {
        if let Some(secs) = env_secs(&format!("{prefix}_INTERVAL_SECS")) {
            self.first_retry_interval_secs = secs;
            self.max_retry_interval_secs = self.max_retry_interval_secs.max(secs);
        }
        if let Some(attempts) = env_attempts(&format!("{prefix}_MAX_ATTEMPTS")) {
            self.max_attempts = attempts;
        }
        if let Some(secs) = env_secs(&format!("{prefix}_MAX_WAIT_SECS")) {
            self.max_wait_secs = secs;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Used when the DNS provider does not report a propagation delay.
    pub default_propagation_secs: u64,
    /// Provider-reported delays above this are treated as fatal.
    pub max_propagation_secs: u64,
    /// Applied to every activity without a dedicated policy below.
    pub activity_retry: RetryPolicy,
    /// CheckDnsChallenge / CheckHttpChallenge.
    pub challenge_check: RetryPolicy,
    /// CheckIsReady.
    pub ready_wait: RetryPolicy,
    /// CheckIsValid.
    pub valid_wait: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_propagation_secs: DEFAULT_PROPAGATION_SECS,
            max_propagation_secs: DEFAULT_MAX_PROPAGATION_SECS,
            activity_retry: RetryPolicy::default(),
            challenge_check: RetryPolicy::default(),
            ready_wait: RetryPolicy::default(),
            valid_wait: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Reads a JSON config file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env();
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Some(secs) = env_secs("RENEWAL_PROPAGATION_DEFAULT_SECS") {
            self.default_propagation_secs = secs;
        }
        if let Some(secs) = env_secs("RENEWAL_PROPAGATION_MAX_SECS") {
            self.max_propagation_secs = secs;
        }
        self.activity_retry.apply_env("RENEWAL_RETRY");
        self.challenge_check.apply_env("RENEWAL_CHALLENGE");
        self.ready_wait.apply_env("RENEWAL_READY");
        self.valid_wait.apply_env("RENEWAL_VALID");
    }

    /// Rejects duration settings above [`MAX_DURATION_SECS`].
    pub fn validate(&self) -> Result<()> {
        check_secs("default_propagation_secs", self.default_propagation_secs)?;
        check_secs("max_propagation_secs", self.max_propagation_secs)?;
        self.activity_retry.validate("activity_retry")?;
        self.challenge_check.validate("challenge_check")?;
        self.ready_wait.validate("ready_wait")?;
        self.valid_wait.validate("valid_wait")
    }
}

fn check_secs(field: &str, value: u64) -> Result<()> {
    if value > MAX_DURATION_SECS {
        return Err(anyhow!(
            "{field} is {value}s; the maximum is {MAX_DURATION_SECS}s"
        ));
    }
    Ok(())
}

fn env_value(name: &str, max: u64) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 && value <= max => Some(value),
        _ => {
            warn!("[config] invalid value for {name}: {raw:?}; using default");
            None
        }
    }
}

fn env_secs(name: &str) -> Option<u64> {
    env_value(name, MAX_DURATION_SECS)
}

fn env_attempts(name: &str) -> Option<u32> {
    env_value(name, u64::from(u32::MAX)).and_then(|value| u32::try_from(value).ok())
}
