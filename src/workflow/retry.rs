use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::task::FailureKind;

/// Retry policy attached to a dispatched task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "duration_ms")]
    pub initial_interval: Duration,

    /// Multiplier applied to the delay after every failed attempt
    pub backoff_coefficient: f64,

    /// Upper bound for a single delay
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_duration_ms")]
    pub maximum_interval: Option<Duration>,

    /// Whether a timed-out attempt is retried like an application error
    #[serde(default)]
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: None,
            retry_on_timeout: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Create a policy with the given attempts, initial interval and coefficient
    pub fn new(max_attempts: u32, initial_interval: Duration, backoff_coefficient: f64) -> Self {
        Self {
            max_attempts,
            initial_interval,
            backoff_coefficient,
            maximum_interval: None,
            retry_on_timeout: false,
        }
    }

    /// Cap every backoff delay
    pub fn with_maximum_interval(mut self, maximum: Duration) -> Self {
        self.maximum_interval = Some(maximum);
        self
    }

    /// Treat timeouts as retryable
    pub fn retrying_timeouts(mut self) -> Self {
        self.retry_on_timeout = true;
        self
    }

    /// Check the policy constraints
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(Error::InvalidOptions("max_attempts must be at least 1".into()));
        }
        if self.initial_interval.is_zero() {
            return Err(Error::InvalidOptions("initial_interval must be positive".into()));
        }
        if !(self.backoff_coefficient >= 1.0) {
            return Err(Error::InvalidOptions("backoff_coefficient must be >= 1.0".into()));
        }
        Ok(())
    }

    /// Delay slept after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);

        match self.maximum_interval {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Whether a failure of this kind on this attempt gets another attempt
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match kind {
            FailureKind::ApplicationError => true,
            FailureKind::Timeout => self.retry_on_timeout,
            FailureKind::Cancelled => false,
        }
    }
}

/// Errors the retry controller can classify
pub trait Retryable {
    /// The task failure kind, or `None` for errors that must never be retried
    fn failure_kind(&self) -> Option<FailureKind>;
}

/// Run `op` until it succeeds, the policy refuses another attempt, or the
/// error is not a classified task failure.
///
/// `op` receives the 1-based attempt number. The final error is returned
/// unchanged.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> std::result::Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Succeeded on attempt {}/{}", attempt, policy.max_attempts);
                }
                return Ok(value);
            }
            Err(err) => {
                let retry = err
                    .failure_kind()
                    .map(|kind| policy.should_retry(kind, attempt))
                    .unwrap_or(false);

                if !retry {
                    return Err(err);
                }

                let delay = policy.backoff(attempt);
                warn!(
                    "Attempt {}/{} failed, retrying in {:?}: {}",
                    attempt, policy.max_attempts, delay, err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
    }
}
