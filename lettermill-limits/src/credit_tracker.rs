//! Durable credit counters
//!
//! A credit tracker is a single persisted integer: the remaining allowance for
//! a metered entity. Non-metered entities carry the [`UNLIMITED`] sentinel,
//! which decrement semantics preserve as-is so an unlimited entity can never
//! reach the exhausted state through normal consumption.

use std::sync::Arc;

use lettermill_common::lock::KeyedLock;

use crate::{
    error::{LimitError, Result},
    storage::CounterStore,
};

/// Sentinel disabling metering for an entity.
pub const UNLIMITED: i64 = -1;

/// Durable remaining-credits counter for one tracked entity.
#[derive(Debug)]
pub struct CreditTracker {
    key: String,
    store: Arc<dyn CounterStore>,
    locks: Arc<KeyedLock>,
}

impl CreditTracker {
    /// Open the tracker for `key`, initializing absent storage to `UNLIMITED`.
    pub async fn load(
        key: impl Into<String>,
        store: Arc<dyn CounterStore>,
        locks: Arc<KeyedLock>,
    ) -> Result<Self> {
        let tracker = Self {
            key: key.into(),
            store,
            locks,
        };

        let _guard = tracker.locks.acquire(&tracker.key).await;
        if tracker.store.read(&tracker.key).await?.is_none() {
            tracker.persist(UNLIMITED).await?;
        }
        Ok(tracker)
    }

    /// The storage/lock key identifying this tracker.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replace the stored allowance.
    ///
    /// # Errors
    /// `InvalidAmount` for any value below `UNLIMITED` (-1); the stored value
    /// is left untouched.
    pub async fn set_credits(&self, amount: i64) -> Result<()> {
        if amount < UNLIMITED {
            return Err(LimitError::InvalidAmount(format!(
                "credits must be an integer >= -1, got {amount}"
            )));
        }

        let _guard = self.locks.acquire(&self.key).await;
        self.persist(amount).await
    }

    /// Current remaining credits. Empty or corrupt storage reads as `0`.
    pub async fn remaining_credits(&self) -> Result<i64> {
        let payload = self.store.read(&self.key).await?;
        Ok(payload
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }

    /// Consume one credit.
    ///
    /// Under the tracker's exclusive lock: an `UNLIMITED` value is left
    /// untouched, a zero value fails with `OutOfCredits` without mutating,
    /// anything else is decremented and persisted.
    pub async fn count(&self) -> Result<()> {
        let _guard = self.locks.acquire(&self.key).await;

        let remaining = self.remaining_credits().await?;
        if remaining == UNLIMITED {
            return Ok(());
        }
        if remaining == 0 {
            return Err(LimitError::OutOfCredits(format!(
                "{}: credits exceeded",
                self.key
            )));
        }

        self.persist(remaining - 1).await
    }

    /// Return one consumed-but-unused credit. Best-effort compensation with
    /// no precondition check; an `UNLIMITED` value stays `UNLIMITED` since
    /// nothing was actually deducted from it.
    pub async fn rollback(&self) -> Result<()> {
        let _guard = self.locks.acquire(&self.key).await;

        let remaining = self.remaining_credits().await?;
        if remaining == UNLIMITED {
            return Ok(());
        }
        self.persist(remaining + 1).await
    }

    async fn persist(&self, value: i64) -> Result<()> {
        self.store.write(&self.key, &value.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCounterStore;

    async fn tracker() -> CreditTracker {
        CreditTracker::load(
            "plan:test",
            Arc::new(MemoryCounterStore::new()) as Arc<dyn CounterStore>,
            Arc::new(KeyedLock::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn defaults_to_unlimited() {
        let tracker = tracker().await;
        assert_eq!(tracker.remaining_credits().await.unwrap(), UNLIMITED);
    }

    #[tokio::test]
    async fn counts_down_to_exhaustion() {
        let tracker = tracker().await;
        tracker.set_credits(2).await.unwrap();

        tracker.count().await.unwrap();
        assert_eq!(tracker.remaining_credits().await.unwrap(), 1);

        tracker.count().await.unwrap();
        assert_eq!(tracker.remaining_credits().await.unwrap(), 0);

        // Exhausted: fails without going negative.
        let err = tracker.count().await.unwrap_err();
        assert!(matches!(err, LimitError::OutOfCredits(_)));
        assert_eq!(tracker.remaining_credits().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unlimited_is_never_consumed() {
        let tracker = tracker().await;

        for _ in 0..5 {
            tracker.count().await.unwrap();
        }
        assert_eq!(tracker.remaining_credits().await.unwrap(), UNLIMITED);
    }

    #[tokio::test]
    async fn rejects_invalid_amounts_without_mutating() {
        let tracker = tracker().await;
        tracker.set_credits(7).await.unwrap();

        let err = tracker.set_credits(-2).await.unwrap_err();
        assert!(matches!(err, LimitError::InvalidAmount(_)));
        assert_eq!(tracker.remaining_credits().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn rollback_returns_a_credit() {
        let tracker = tracker().await;
        tracker.set_credits(1).await.unwrap();

        tracker.count().await.unwrap();
        assert_eq!(tracker.remaining_credits().await.unwrap(), 0);

        tracker.rollback().await.unwrap();
        assert_eq!(tracker.remaining_credits().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rollback_preserves_unlimited() {
        let tracker = tracker().await;
        tracker.rollback().await.unwrap();
        assert_eq!(tracker.remaining_credits().await.unwrap(), UNLIMITED);
    }

    #[tokio::test]
    async fn empty_storage_reads_as_zero() {
        let store = Arc::new(MemoryCounterStore::new());
        store.write("plan:test", "  ").await.unwrap();

        let tracker = CreditTracker::load(
            "plan:test",
            Arc::clone(&store) as Arc<dyn CounterStore>,
            Arc::new(KeyedLock::new()),
        )
        .await
        .unwrap();

        assert_eq!(tracker.remaining_credits().await.unwrap(), 0);
    }
}
