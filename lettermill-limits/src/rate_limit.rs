//! Rate limit descriptors

use serde::{Deserialize, Serialize};

/// A single sending limit: at most `amount` operations per `period_secs`.
///
/// A tracker can carry several of these at once (e.g. 100/minute and
/// 2000/hour for the same sending server); all of them must hold for a
/// consumption to be granted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum operations allowed within the period.
    pub amount: u64,

    /// Window length in seconds.
    pub period_secs: u64,

    /// Human-readable label carried into denial log lines.
    #[serde(default)]
    pub description: Option<String>,
}

impl RateLimit {
    #[must_use]
    pub const fn new(amount: u64, period_secs: u64) -> Self {
        Self {
            amount,
            period_secs,
            description: None,
        }
    }

    #[must_use]
    pub const fn per_minute(amount: u64) -> Self {
        Self::new(amount, 60)
    }

    #[must_use]
    pub const fn per_hour(amount: u64) -> Self {
        Self::new(amount, 3600)
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Label used in denial messages.
    #[must_use]
    pub fn describe(&self) -> String {
        self.description.clone().unwrap_or_else(|| {
            format!("{} per {} seconds", self.amount, self.period_secs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_prefers_explicit_description() {
        let limit = RateLimit::per_minute(100).with_description("server send speed");
        assert_eq!(limit.describe(), "server send speed");

        let limit = RateLimit::per_hour(2000);
        assert_eq!(limit.describe(), "2000 per 3600 seconds");
    }
}
