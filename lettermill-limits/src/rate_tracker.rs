//! Sliding-window rate tracking over fixed time buckets
//!
//! Each tracked entity (a sending server, a subscription plan) gets one
//! tracker keyed by its identity. Consumption events are counted into
//! fixed-width buckets persisted as ordered `bucket_start:count` records, one
//! line per bucket; window queries sum every bucket whose start falls inside
//! the window, inclusive at bucket granularity. Buckets too old for any
//! attached limit window are dropped when the tracker saves, so the payload
//! stays proportional to the longest window.
//!
//! Mutations hold an exclusive lock on the tracker's key for the duration of
//! the read-modify-write. Independent trackers never contend.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use lettermill_common::lock::KeyedLock;

use crate::{
    error::{LimitError, Result},
    rate_limit::RateLimit,
    storage::CounterStore,
};

const DEFAULT_BUCKET_WIDTH_SECS: i64 = 60;

/// Retention for trackers with no limits attached (callers querying
/// `credits_used` directly still get a day of history).
const DEFAULT_RETENTION_SECS: i64 = 86_400;

/// Sliding-window consumption counter for one tracked entity.
#[derive(Debug)]
pub struct RateTracker {
    key: String,
    bucket_width_secs: i64,
    limits: Vec<RateLimit>,
    store: Arc<dyn CounterStore>,
    locks: Arc<KeyedLock>,
}

impl RateTracker {
    #[must_use]
    pub fn new(key: impl Into<String>, store: Arc<dyn CounterStore>, locks: Arc<KeyedLock>) -> Self {
        Self {
            key: key.into(),
            bucket_width_secs: DEFAULT_BUCKET_WIDTH_SECS,
            limits: Vec::new(),
            store,
            locks,
        }
    }

    /// Override the bucket width (default one minute).
    #[must_use]
    pub fn with_bucket_width(mut self, width: Duration) -> Self {
        self.bucket_width_secs = i64::try_from(width.as_secs().max(1)).unwrap_or(i64::MAX);
        self
    }

    /// Attach a limit this tracker enforces. May be called repeatedly; all
    /// attached limits must hold for a consumption to be granted.
    #[must_use]
    pub fn with_limit(mut self, limit: RateLimit) -> Self {
        self.limits.push(limit);
        self
    }

    /// The storage/lock key identifying this tracker.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record one consumption event at `at`.
    pub async fn count(&self, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.locks.acquire(&self.key).await;

        let mut records = self.load().await?;
        self.increment(&mut records, at);
        self.save(&records).await
    }

    /// Undo the most recent consumption.
    ///
    /// Decrements the last written bucket, which stays correct even when the
    /// rollback lands just after a tick boundary (the current wall-clock
    /// bucket may differ from the one the consumption went into). A bucket
    /// drained to zero is dropped from storage.
    pub async fn rollback(&self) -> Result<()> {
        let _guard = self.locks.acquire(&self.key).await;

        let mut records = self.load().await?;
        if let Some(last) = records.last_mut() {
            last.1 = last.1.saturating_sub(1);
            if last.1 == 0 {
                records.pop();
            }
            self.save(&records).await?;
        }
        Ok(())
    }

    /// Sum of consumption over `[from, to]`, inclusive at bucket granularity.
    ///
    /// Read-only; safe to call concurrently with [`count`](Self::count).
    pub async fn credits_used(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<u64> {
        let records = self.load().await?;
        Ok(self.used_between(&records, from, to))
    }

    /// Check every attached limit against the window ending at `now`, without
    /// consuming.
    pub async fn check(&self, now: DateTime<Utc>) -> Result<()> {
        let records = self.load().await?;
        self.check_records(&records, now)
    }

    /// Check all attached limits and, if they hold, record one consumption --
    /// all under a single hold of the tracker's lock.
    pub async fn try_consume(&self, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.locks.acquire(&self.key).await;

        let mut records = self.load().await?;
        self.check_records(&records, now)?;
        self.increment(&mut records, now);
        self.save(&records).await
    }

    fn bucket_for(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.bucket_width_secs) * self.bucket_width_secs
    }

    fn increment(&self, records: &mut Vec<(i64, u64)>, at: DateTime<Utc>) {
        let bucket = self.bucket_for(at);
        match records.binary_search_by_key(&bucket, |(start, _)| *start) {
            Ok(i) => records[i].1 += 1,
            Err(i) => records.insert(i, (bucket, 1)),
        }
    }

    fn used_between(&self, records: &[(i64, u64)], from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
        let from_bucket = self.bucket_for(from);
        let to_bucket = self.bucket_for(to);
        records
            .iter()
            .filter(|(start, _)| (from_bucket..=to_bucket).contains(start))
            .map(|(_, count)| count)
            .sum()
    }

    fn check_records(&self, records: &[(i64, u64)], now: DateTime<Utc>) -> Result<()> {
        for limit in &self.limits {
            let from = now
                - chrono::Duration::seconds(i64::try_from(limit.period_secs).unwrap_or(i64::MAX));
            let used = self.used_between(records, from, now);
            if used >= limit.amount {
                tracing::debug!(
                    tracker = %self.key,
                    used,
                    limit = limit.amount,
                    "rate limit denied consumption"
                );
                return Err(LimitError::RateLimitExceeded(format!(
                    "{}: {} ({used} used)",
                    self.key,
                    limit.describe()
                )));
            }
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<(i64, u64)>> {
        let Some(payload) = self.store.read(&self.key).await? else {
            return Ok(Vec::new());
        };

        // Malformed lines count as no usage rather than an error.
        let mut records: Vec<(i64, u64)> = payload
            .lines()
            .filter_map(|line| {
                let (start, count) = line.trim().split_once(':')?;
                Some((start.parse().ok()?, count.parse().ok()?))
            })
            .collect();
        records.sort_unstable_by_key(|(start, _)| *start);
        Ok(records)
    }

    /// How far back a bucket can still influence a window query.
    fn retention_secs(&self) -> i64 {
        self.limits
            .iter()
            .map(|limit| i64::try_from(limit.period_secs).unwrap_or(i64::MAX))
            .max()
            .unwrap_or(DEFAULT_RETENTION_SECS)
            .max(self.bucket_width_secs)
    }

    async fn save(&self, records: &[(i64, u64)]) -> Result<()> {
        // Buckets no window can reach any more are dropped here rather than
        // on load, so a read-only tracker never rewrites storage.
        let cutoff = self
            .bucket_for(Utc::now())
            .saturating_sub(self.retention_secs());
        let payload: String = records
            .iter()
            .filter(|(start, _)| *start >= cutoff)
            .map(|(start, count)| format!("{start}:{count}\n"))
            .collect();
        self.store.write(&self.key, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCounterStore;

    fn tracker(store: &Arc<MemoryCounterStore>) -> RateTracker {
        RateTracker::new(
            "server:test",
            Arc::clone(store) as Arc<dyn CounterStore>,
            Arc::new(KeyedLock::new()),
        )
    }

    async fn stored_lines(store: &MemoryCounterStore) -> usize {
        store
            .read("server:test")
            .await
            .unwrap()
            .map_or(0, |payload| payload.lines().count())
    }

    #[tokio::test]
    async fn windowing_and_rollback() {
        let store = Arc::new(MemoryCounterStore::new());
        let tracker = tracker(&store);

        let now = Utc::now();
        let one_minute_ago = now - chrono::Duration::minutes(1);

        tracker.count(one_minute_ago).await.unwrap();
        tracker.count(one_minute_ago).await.unwrap();
        tracker.count(now).await.unwrap();
        tracker.count(now).await.unwrap();

        // Two buckets, four events.
        assert_eq!(tracker.credits_used(one_minute_ago, now).await.unwrap(), 4);
        assert_eq!(stored_lines(&store).await, 2);

        // One rollback takes a unit off the most recent bucket.
        tracker.rollback().await.unwrap();
        assert_eq!(tracker.credits_used(one_minute_ago, now).await.unwrap(), 3);
        assert_eq!(stored_lines(&store).await, 2);

        // A second rollback drains that bucket; its record is dropped.
        tracker.rollback().await.unwrap();
        assert_eq!(tracker.credits_used(one_minute_ago, now).await.unwrap(), 2);
        assert_eq!(stored_lines(&store).await, 1);
    }

    #[tokio::test]
    async fn window_excludes_older_buckets() {
        let store = Arc::new(MemoryCounterStore::new());
        let tracker = tracker(&store);

        let now = Utc::now();
        let five_minutes_ago = now - chrono::Duration::minutes(5);

        tracker.count(five_minutes_ago).await.unwrap();
        tracker.count(now).await.unwrap();

        assert_eq!(tracker.credits_used(five_minutes_ago, now).await.unwrap(), 2);
        assert_eq!(
            tracker
                .credits_used(now - chrono::Duration::minutes(1), now)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn try_consume_enforces_limits() {
        let store = Arc::new(MemoryCounterStore::new());
        let tracker = tracker(&store).with_limit(RateLimit::per_minute(2));

        let now = Utc::now();
        tracker.try_consume(now).await.unwrap();
        tracker.try_consume(now).await.unwrap();

        let denied = tracker.try_consume(now).await.unwrap_err();
        assert!(denied.is_rate_limited());

        // The denied attempt consumed nothing.
        assert_eq!(tracker.credits_used(now, now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn multiple_limits_must_all_hold() {
        let store = Arc::new(MemoryCounterStore::new());
        let tracker = tracker(&store)
            .with_limit(RateLimit::per_minute(100))
            .with_limit(RateLimit::new(1, 3600).with_description("hourly cap"));

        let now = Utc::now();
        tracker.try_consume(now).await.unwrap();

        let denied = tracker.try_consume(now).await.unwrap_err();
        assert!(denied.to_string().contains("hourly cap"));
    }

    #[tokio::test]
    async fn saving_prunes_buckets_no_window_can_reach() {
        let store = Arc::new(MemoryCounterStore::new());
        let now = Utc::now();

        // History left over from before a restart, far outside the window.
        let stale_bucket = (now - chrono::Duration::hours(2)).timestamp() / 60 * 60;
        store
            .write("server:test", &format!("{stale_bucket}:5\n"))
            .await
            .unwrap();

        let tracker = tracker(&store).with_limit(RateLimit::per_minute(10));
        tracker.count(now).await.unwrap();

        assert_eq!(stored_lines(&store).await, 1);
        assert_eq!(
            tracker
                .credits_used(now - chrono::Duration::hours(3), now)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn corrupt_storage_reads_as_zero_usage() {
        let store = Arc::new(MemoryCounterStore::new());
        store
            .write("server:test", "not-a-bucket\n::\n")
            .await
            .unwrap();

        let tracker = tracker(&store);
        let now = Utc::now();
        assert_eq!(tracker.credits_used(now, now).await.unwrap(), 0);

        // And counting still works afterwards.
        tracker.count(now).await.unwrap();
        assert_eq!(tracker.credits_used(now, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rollback_on_empty_tracker_is_a_noop() {
        let store = Arc::new(MemoryCounterStore::new());
        let tracker = tracker(&store);

        tracker.rollback().await.unwrap();
        let now = Utc::now();
        assert_eq!(tracker.credits_used(now, now).await.unwrap(), 0);
    }
}
