//! Retry policies.
//!
//! Knobs controlling **how long** a consumption worker waits between pull
//! attempts after failures.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized retries
//!
//! ## Quick wiring
//! ```text
//! AggregatorConfig { pull_backoff: BackoffPolicy, .. }
//!      └─► core::worker::ConsumptionWorker uses:
//!           - pull_backoff.next(consecutive_failures) after a retryable pull failure
//!           - pull_backoff.ceiling() after a non-retryable one (e.g. subscription gone)
//!           - resets the failure count after a successful pull
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=100ms, factor=2.0, max=10s, jitter=Equal.

mod backoff;

pub use backoff::{BackoffPolicy, JitterPolicy};
