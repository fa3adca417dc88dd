//! # Backoff policy for pull retries.
//!
//! [`BackoffPolicy`] controls how long a consumption worker waits after
//! consecutive pull failures before pulling again. It is parameterized by:
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap;
//! - [`BackoffPolicy::jitter`] how much of the delay may be randomized away.
//!
//! The delay after `n` consecutive failures (0-indexed) is `first × factor^n`,
//! clamped to `max`, then scaled by a random factor in `[floor, 1]` where the
//! floor comes from the [`JitterPolicy`]. Jitter only ever shortens a delay, and
//! its output never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use topicvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! // 100ms × 2^10 = 102.4s → capped
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use rand::Rng;

/// How much of a computed delay may be randomized away.
///
/// Spreads the retries of workers whose pulls failed together (a broker outage
/// hits every topic at once).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Exact delays.
    #[default]
    None,
    /// Anywhere in `[0, delay]`.
    Full,
    /// Anywhere in `[delay / 2, delay]`.
    Equal,
}

impl JitterPolicy {
    /// Lowest fraction of the computed delay this policy may return.
    fn floor(self) -> f64 {
        match self {
            JitterPolicy::None => 1.0,
            JitterPolicy::Full => 0.0,
            JitterPolicy::Equal => 0.5,
        }
    }

    fn scale(self, delay: Duration) -> Duration {
        let floor = self.floor();
        if floor >= 1.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(floor..=1.0);
        delay.mul_f64(factor).min(delay)
    }
}

/// Pull retry backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to every computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `first = 100ms`;
    /// - `factor = 2.0`;
    /// - `max = 10s`;
    /// - `jitter = Equal`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Fixed delay without growth or jitter.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay after `failures` consecutive failures (0-indexed).
    ///
    /// # Notes
    /// - `factor < 1.0` makes delays shrink (not typical).
    /// - `factor == 1.0` keeps the delay at `first` (up to `max`).
    /// - Non-finite or overflowing products clamp to `max`.
    pub fn next(&self, failures: u32) -> Duration {
        self.jitter.scale(self.base(failures))
    }

    /// Delay used when retrying soon cannot help (the resource is gone or
    /// refused for good): the cap, jitter included.
    pub fn ceiling(&self) -> Duration {
        self.jitter.scale(self.max)
    }

    fn base(&self, failures: u32) -> Duration {
        let exp = i32::try_from(failures).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if secs.is_finite() && (0.0..=self.max.as_secs_f64()).contains(&secs) {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        }
    }
}
