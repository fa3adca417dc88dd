//! Error types used by the topicvisor runtime and the broker surface.
//!
//! This module defines two main error enums:
//!
//! - [`BrokerError`] failures reported by a broker client (listing, subscription management, pulls).
//! - [`RuntimeError`] errors raised by the aggregator itself.
//!
//! Both types provide `as_label` for logs/metrics. [`BrokerError`] additionally
//! classifies conflicts ([`BrokerError::is_conflict`]) and transient failures
//! ([`BrokerError::is_retryable`]).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by a broker client.
///
/// A [`Broker`](crate::Broker) implementation maps its transport errors onto
/// these variants so the reconciler can tell a creation conflict (recoverable by
/// lookup) from a missing resource or an outage.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The resource already exists (e.g. a subscription with the same name).
    #[error("resource already exists: {resource}")]
    AlreadyExists {
        /// Name of the conflicting resource.
        resource: String,
    },

    /// The resource does not exist (anymore).
    #[error("resource not found: {resource}")]
    NotFound {
        /// Name of the missing resource.
        resource: String,
    },

    /// The broker could not be reached or refused the call; may succeed later.
    #[error("broker unavailable: {reason}")]
    Unavailable {
        /// Transport or service message.
        reason: String,
    },

    /// Any other broker failure.
    #[error("broker error: {reason}")]
    Other {
        /// The underlying error message.
        reason: String,
    },
}

impl BrokerError {
    /// Shorthand for [`BrokerError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        BrokerError::Unavailable {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`BrokerError::Other`].
    pub fn other(reason: impl Into<String>) -> Self {
        BrokerError::Other {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use topicvisor::BrokerError;
    ///
    /// let err = BrokerError::AlreadyExists { resource: "orders-aggregator".into() };
    /// assert_eq!(err.as_label(), "broker_already_exists");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::AlreadyExists { .. } => "broker_already_exists",
            BrokerError::NotFound { .. } => "broker_not_found",
            BrokerError::Unavailable { .. } => "broker_unavailable",
            BrokerError::Other { .. } => "broker_other",
        }
    }

    /// Indicates a creation conflict: the resource exists and can be looked up instead.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BrokerError::AlreadyExists { .. })
    }

    /// Indicates whether retrying the same call later may succeed.
    ///
    /// Returns `true` for [`BrokerError::Unavailable`] and [`BrokerError::Other`].
    ///
    /// # Example
    /// ```
    /// use topicvisor::BrokerError;
    ///
    /// assert!(BrokerError::unavailable("connection reset").is_retryable());
    /// assert!(!BrokerError::NotFound { resource: "x".into() }.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Unavailable { .. } | BrokerError::Other { .. }
        )
    }
}

/// # Errors produced by the aggregator runtime.
///
/// Returned by [`Aggregator`](crate::Aggregator) control operations. None of
/// these ever travel through the message stream.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// [`Aggregator::start`](crate::Aggregator::start) was called more than once.
    #[error("aggregator already started")]
    AlreadyStarted,

    /// The reconciler is not running (never started, or already stopped).
    #[error("aggregator is not running")]
    NotRunning,

    /// The broker client could not be built; the pass was skipped.
    #[error("connect failed: {source}")]
    Connect {
        /// The broker failure.
        source: BrokerError,
    },

    /// Topic discovery failed; the pass was skipped and the previous snapshot kept.
    #[error("topic discovery failed: {source}")]
    Discovery {
        /// The broker failure.
        source: BrokerError,
    },

    /// Shutdown grace period was exceeded; the listed workers had to be aborted.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; workers aborted")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Topics whose workers did not stop in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use topicvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::AlreadyStarted => "runtime_already_started",
            RuntimeError::NotRunning => "runtime_not_running",
            RuntimeError::Connect { .. } => "runtime_connect_failed",
            RuntimeError::Discovery { .. } => "runtime_discovery_failed",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::AlreadyStarted => "start called twice".to_string(),
            RuntimeError::NotRunning => "reconciler not running".to_string(),
            RuntimeError::Connect { source } => format!("connect: {source}"),
            RuntimeError::Discovery { source } => format!("discovery: {source}"),
            RuntimeError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck topics={stuck:?}")
            }
        }
    }
}
