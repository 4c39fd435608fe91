//! All-or-nothing permit acquisition across a set of trackers
//!
//! A delivery attempt is typically throttled by more than one tracker at once
//! (the sending server's rate tracker and the subscription plan's). Either
//! every tracker grants a unit or none is left consumed: a denial part-way
//! through rolls back whatever was already taken before the error propagates.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{CreditTracker, RateTracker, error::Result};

/// Consume one unit from every tracker in the set, or none.
///
/// Rate trackers are consulted first, then credit trackers. On denial, every
/// tracker already consumed is rolled back before the denial is returned; a
/// rollback failure is logged but does not mask the original denial.
pub async fn acquire_permits(
    rate_trackers: &[Arc<RateTracker>],
    credit_trackers: &[Arc<CreditTracker>],
    now: DateTime<Utc>,
) -> Result<()> {
    let mut consumed_rate: Vec<&Arc<RateTracker>> = Vec::new();
    let mut consumed_credit: Vec<&Arc<CreditTracker>> = Vec::new();

    for tracker in rate_trackers {
        if let Err(denied) = tracker.try_consume(now).await {
            undo(&consumed_rate, &consumed_credit).await;
            return Err(denied);
        }
        consumed_rate.push(tracker);
    }

    for tracker in credit_trackers {
        if let Err(denied) = tracker.count().await {
            undo(&consumed_rate, &consumed_credit).await;
            return Err(denied);
        }
        consumed_credit.push(tracker);
    }

    Ok(())
}

async fn undo(rate: &[&Arc<RateTracker>], credit: &[&Arc<CreditTracker>]) {
    for tracker in rate {
        if let Err(e) = tracker.rollback().await {
            tracing::warn!(tracker = tracker.key(), error = %e, "permit rollback failed");
        }
    }
    for tracker in credit {
        if let Err(e) = tracker.rollback().await {
            tracing::warn!(tracker = tracker.key(), error = %e, "permit rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use lettermill_common::lock::KeyedLock;

    use super::*;
    use crate::{
        RateLimit,
        storage::{CounterStore, MemoryCounterStore},
    };

    fn rate_tracker(key: &str, store: &Arc<MemoryCounterStore>, limit: RateLimit) -> Arc<RateTracker> {
        Arc::new(
            RateTracker::new(
                key,
                Arc::clone(store) as Arc<dyn CounterStore>,
                Arc::new(KeyedLock::new()),
            )
            .with_limit(limit),
        )
    }

    #[tokio::test]
    async fn grants_when_all_trackers_allow() {
        let store = Arc::new(MemoryCounterStore::new());
        let server = rate_tracker("server:1", &store, RateLimit::per_minute(10));
        let plan = rate_tracker("plan:1", &store, RateLimit::per_minute(10));

        let now = Utc::now();
        acquire_permits(&[Arc::clone(&server), Arc::clone(&plan)], &[], now)
            .await
            .unwrap();

        assert_eq!(server.credits_used(now, now).await.unwrap(), 1);
        assert_eq!(plan.credits_used(now, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn denial_leaves_no_tracker_partially_consumed() {
        let store = Arc::new(MemoryCounterStore::new());
        let server = rate_tracker("server:1", &store, RateLimit::per_minute(10));
        // The plan tracker denies immediately.
        let plan = rate_tracker("plan:1", &store, RateLimit::per_minute(0));

        let now = Utc::now();
        let denied = acquire_permits(&[Arc::clone(&server), Arc::clone(&plan)], &[], now)
            .await
            .unwrap_err();
        assert!(denied.is_rate_limited());

        // The server tracker's optimistic consumption was rolled back.
        assert_eq!(server.credits_used(now, now).await.unwrap(), 0);
        assert_eq!(plan.credits_used(now, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn credit_denial_rolls_back_rate_trackers() {
        let store = Arc::new(MemoryCounterStore::new());
        let server = rate_tracker("server:1", &store, RateLimit::per_minute(10));

        let credits = Arc::new(
            CreditTracker::load(
                "plan:credits",
                Arc::clone(&store) as Arc<dyn CounterStore>,
                Arc::new(KeyedLock::new()),
            )
            .await
            .unwrap(),
        );
        credits.set_credits(0).await.unwrap();

        let now = Utc::now();
        let denied = acquire_permits(&[Arc::clone(&server)], &[Arc::clone(&credits)], now)
            .await
            .unwrap_err();
        assert!(matches!(denied, crate::LimitError::OutOfCredits(_)));

        assert_eq!(server.credits_used(now, now).await.unwrap(), 0);
        assert_eq!(credits.remaining_credits().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn consumes_credits_alongside_rate() {
        let store = Arc::new(MemoryCounterStore::new());
        let server = rate_tracker("server:1", &store, RateLimit::per_minute(10));

        let credits = Arc::new(
            CreditTracker::load(
                "plan:credits",
                Arc::clone(&store) as Arc<dyn CounterStore>,
                Arc::new(KeyedLock::new()),
            )
            .await
            .unwrap(),
        );
        credits.set_credits(3).await.unwrap();

        acquire_permits(&[Arc::clone(&server)], &[Arc::clone(&credits)], Utc::now())
            .await
            .unwrap();

        assert_eq!(credits.remaining_credits().await.unwrap(), 2);
    }
}
