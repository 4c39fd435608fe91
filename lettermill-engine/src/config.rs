//! Engine tuning knobs
//!
//! Everything deserializes with serde so a deployment can override any subset
//! of fields from its configuration file; the defaults are the values the
//! engine is tuned for in production.

use rand::Rng;
use serde::Deserialize;

const fn default_chunk_size() -> usize {
    100
}

const fn default_chunk_jitter() -> usize {
    9
}

const fn default_rate_limit_backoff_secs() -> u64 {
    60
}

const fn default_attempt_deadline_secs() -> u64 {
    // 12 hours: after this, a deferred attempt is recorded as failed rather
    // than retried again.
    43_200
}

const fn default_scan_interval_secs() -> u64 {
    60
}

const fn default_scan_lock_timeout_secs() -> u64 {
    5
}

const fn default_worker_count() -> usize {
    4
}

const fn default_worker_max_lifetime_secs() -> u64 {
    180
}

const fn default_run_request_budget_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Base number of recipients loaded per batch.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Random extra recipients added on top of `chunk_size` each load, so
    /// concurrent workers don't hammer the recipient source in lockstep.
    #[serde(default = "default_chunk_jitter")]
    pub chunk_jitter: usize,

    /// How long a rate-limited attempt sleeps before retrying.
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,

    /// Wall-clock ceiling on deferred retries for a single attempt.
    #[serde(default = "default_attempt_deadline_secs")]
    pub attempt_deadline_secs: u64,

    /// Interval between scans for due scheduled campaigns.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// How long a scan waits for the scan lock before skipping the cycle.
    #[serde(default = "default_scan_lock_timeout_secs")]
    pub scan_lock_timeout_secs: u64,

    /// Number of run-request workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Workers retire and are replaced after this long, bounding the damage
    /// of any slow leak in long-lived tasks.
    #[serde(default = "default_worker_max_lifetime_secs")]
    pub worker_max_lifetime_secs: u64,

    /// Time budget for handling a single run request.
    #[serde(default = "default_run_request_budget_secs")]
    pub run_request_budget_secs: u64,

    /// Simulate delivery without handing messages to the transport.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_jitter: default_chunk_jitter(),
            rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
            attempt_deadline_secs: default_attempt_deadline_secs(),
            scan_interval_secs: default_scan_interval_secs(),
            scan_lock_timeout_secs: default_scan_lock_timeout_secs(),
            worker_count: default_worker_count(),
            worker_max_lifetime_secs: default_worker_max_lifetime_secs(),
            run_request_budget_secs: default_run_request_budget_secs(),
            dry_run: false,
        }
    }
}

impl EngineConfig {
    /// Batch size for the next chunk: `chunk_size` plus a fresh roll of the
    /// jitter.
    pub(crate) fn chunk_limit(&self) -> usize {
        self.chunk_size + rand::rng().random_range(0..=self.chunk_jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_limit_stays_in_band() {
        let config = EngineConfig::default();
        for _ in 0..100 {
            let limit = config.chunk_limit();
            assert!((100..=109).contains(&limit), "limit {limit} out of band");
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let config = EngineConfig {
            chunk_jitter: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.chunk_limit(), 100);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"worker_count": 2}"#).unwrap();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.chunk_size, 100);
        assert!(!config.dry_run);
    }
}
