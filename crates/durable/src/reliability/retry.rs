use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activity::StepError;

/// How often, and how far apart, an action step is tried
///
/// `attempts` includes the first try. The wait before try `n` (from 2 on) is
/// `base * factor^(n - 2)`, capped at `cap`, then spread by up to `jitter`
/// in either direction and rounded to whole milliseconds.
///
/// ```
/// use std::time::Duration;
/// use waypoint_durable::RetryPolicy;
///
/// let policy = RetryPolicy::fixed(Duration::from_millis(100), 3);
/// assert_eq!(policy.backoff(2), Duration::from_millis(100));
/// assert_eq!(policy.backoff(3), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,

    #[serde(with = "duration_millis")]
    pub base: Duration,

    #[serde(with = "duration_millis")]
    pub cap: Duration,

    pub factor: f64,

    /// Fraction of the wait, 0.0 to 1.0
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Five tries, doubling from one second, at most a minute apart
    pub fn exponential() -> Self {
        Self {
            attempts: 5,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            factor: 2.0,
            jitter: 0.1,
        }
    }

    /// The same wait before every retry
    pub fn fixed(wait: Duration, attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            base: wait,
            cap: wait,
            factor: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Wait before try number `attempt` may be claimed
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let cap = self.cap.as_millis() as f64;
        let millis = (self.base.as_millis() as f64 * self.factor.powi(exponent))
            .min(cap)
            .max(0.0);

        let spread = millis * self.jitter;
        let millis = if spread > 0.0 {
            rand::thread_rng().gen_range(millis - spread..=millis + spread)
        } else {
            millis
        };

        let millis = millis.round();
        if millis.is_finite() && (0.0..=cap * 2.0).contains(&millis) {
            Duration::from_millis(millis as u64)
        } else {
            self.cap
        }
    }

    /// Whether a failure on try `attempt` earns another try
    pub fn allows_retry(&self, attempt: u32, error: &StepError) -> bool {
        error.retryable && attempt < self.attempts
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::ser::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis())
            .map_err(|_| S::Error::custom("duration does not fit in u64 milliseconds"))?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
