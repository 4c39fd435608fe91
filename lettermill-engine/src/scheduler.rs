//! Scheduled-campaign trigger
//!
//! Periodically scans for campaigns whose `run_at` has arrived and executes
//! them. Scans across the deployment are serialized by a shared lock; a scan
//! that cannot take the lock within the timeout skips its cycle quietly,
//! since the holder is doing the same work.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use lettermill_common::{Signal, internal};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::engine::Engine;

const SCAN_LOCK_KEY: &str = "scheduler:due-scan";

/// Periodic trigger for scheduled campaigns.
#[derive(Debug)]
pub struct Scheduler {
    engine: Arc<Engine>,
}

impl Scheduler {
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Scan once and execute every due campaign.
    pub async fn check_and_execute_due(&self) {
        let timeout = Duration::from_secs(self.engine.config().scan_lock_timeout_secs);
        let Some(_guard) = self
            .engine
            .scan_locks
            .try_acquire(SCAN_LOCK_KEY, timeout)
            .await
        else {
            debug!("another scan holds the lock; skipping this cycle");
            return;
        };

        let now = Utc::now();
        for id in self.engine.due_campaigns(now) {
            info!(campaign = %id, "scheduled campaign is due");
            if let Err(e) = self.engine.execute(&id) {
                warn!(campaign = %id, error = %e, "could not execute due campaign");
            }
        }
    }

    /// Scan on the configured interval until `shutdown` fires.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.engine.config().scan_interval_secs));
        // The first tick fires immediately; scheduled campaigns are not due
        // at startup by definition of the scan interval, skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_and_execute_due().await,
                _ = shutdown.recv() => {
                    internal!("scheduler stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        campaign::{Campaign, CampaignStatus},
        recipients::MemoryRecipientSource,
        transport::DryRunTransport,
    };

    fn engine() -> Arc<Engine> {
        Engine::builder()
            .recipients(Arc::new(MemoryRecipientSource::new()))
            .transport(Arc::new(DryRunTransport::new()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn scan_executes_only_due_campaigns() {
        let engine = engine();
        let now = Utc::now();
        let due = engine.add_campaign(Campaign::scheduled(
            "due",
            now - chrono::Duration::minutes(1),
        ));
        let future = engine.add_campaign(Campaign::scheduled(
            "future",
            now + chrono::Duration::hours(1),
        ));

        Scheduler::new(Arc::clone(&engine))
            .check_and_execute_due()
            .await;

        assert_eq!(
            engine.campaign(&due).unwrap().status(),
            CampaignStatus::Queuing
        );
        assert_eq!(
            engine.campaign(&future).unwrap().status(),
            CampaignStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn contended_scan_skips_quietly() {
        let engine = Engine::builder()
            .config(crate::config::EngineConfig {
                scan_lock_timeout_secs: 0,
                ..crate::config::EngineConfig::default()
            })
            .recipients(Arc::new(MemoryRecipientSource::new()))
            .transport(Arc::new(DryRunTransport::new()))
            .build()
            .unwrap();
        let due = engine.add_campaign(Campaign::scheduled(
            "due",
            Utc::now() - chrono::Duration::minutes(1),
        ));

        // Hold the scan lock so the cycle cannot take it.
        let _guard = engine.scan_locks.acquire(SCAN_LOCK_KEY).await;

        let scheduler = Scheduler::new(Arc::clone(&engine));
        let scan = tokio::time::timeout(
            Duration::from_secs(10),
            scheduler.check_and_execute_due(),
        );
        scan.await.unwrap();

        // Nothing was executed.
        assert_eq!(
            engine.campaign(&due).unwrap().status(),
            CampaignStatus::Scheduled
        );
    }
}
