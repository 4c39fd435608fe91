//! Typed error handling for tracker operations.
//!
//! The taxonomy matters to the engine: rate-limit denials defer the attempt,
//! credit exhaustion is recoverable per policy, invalid amounts are usage
//! errors and surface immediately.

use thiserror::Error;

/// Errors raised by rate and credit trackers.
#[derive(Debug, Error)]
pub enum LimitError {
    /// A sliding-window limit denied the consumption. Transient and expected;
    /// the caller defers the attempt until the window has advanced.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// The credit counter is exhausted.
    #[error("Out of credits: {0}")]
    OutOfCredits(String),

    /// An invalid credit amount was supplied. Usage error, never retried.
    #[error("Invalid credit amount: {0}")]
    InvalidAmount(String),

    /// Tracker storage failed (I/O on the backing store).
    #[error("Tracker storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl LimitError {
    /// Returns `true` if the error is expected to clear on its own as time
    /// passes (rate windows advance, credits get topped up).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimitExceeded(_) | Self::OutOfCredits(_))
    }

    /// Returns `true` for rate-limit denials specifically, which get a
    /// deferred retry rather than a failure record.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded(_))
    }
}

/// Specialized `Result` type for tracker operations.
pub type Result<T> = std::result::Result<T, LimitError>;
