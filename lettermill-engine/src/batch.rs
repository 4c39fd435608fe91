//! In-flight batch tracking
//!
//! A batch is one chunk of delivery attempts running concurrently. The
//! cancellation flags are cooperative: attempts check them at their own
//! checkpoints, so an attempt already past its last checkpoint finishes
//! normally even after cancellation. Counters are diagnostics, not control
//! flow.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::ids::{BatchId, CampaignId};

/// Counter snapshot for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// One dispatched chunk of delivery attempts.
#[derive(Debug)]
pub struct Batch {
    id: BatchId,
    campaign: CampaignId,
    /// Set once the chunk is loaded; the batch is registered (and
    /// cancellable) before its recipients are known.
    total: AtomicUsize,
    /// Cancelled by the user (pause) or superseded by a newer run.
    cancelled: AtomicBool,
    /// Aborted by a stop-on-error failure inside the batch.
    aborted: AtomicBool,
    sent: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl Batch {
    #[must_use]
    pub fn new(campaign: CampaignId) -> Self {
        Self {
            id: BatchId::generate(),
            campaign,
            total: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    #[must_use]
    pub const fn id(&self) -> BatchId {
        self.id
    }

    #[must_use]
    pub const fn campaign(&self) -> CampaignId {
        self.campaign
    }

    /// Cancel on behalf of the user or a superseding run. Outstanding
    /// attempts skip at their next checkpoint; completion callbacks do not
    /// fire.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Abort after a stop-on-error failure. Outstanding attempts skip, but
    /// the failure callback still fires.
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Whether attempts should short-circuit.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.aborted.load(Ordering::SeqCst)
    }

    /// Whether the cancellation came from outside (pause or supersede)
    /// rather than from a failure inside the batch.
    #[must_use]
    pub(crate) fn is_user_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn note_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats(&self) -> BatchStats {
        BatchStats {
            total: self.total.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_and_abort_are_distinguished() {
        let batch = Batch::new(CampaignId::generate());
        assert!(!batch.is_cancelled());

        batch.abort();
        assert!(batch.is_cancelled());
        assert!(!batch.is_user_cancelled());

        batch.cancel();
        assert!(batch.is_user_cancelled());
    }

    #[test]
    fn stats_reflect_counters() {
        let batch = Batch::new(CampaignId::generate());
        batch.set_total(3);
        batch.note_sent();
        batch.note_failed();
        batch.note_skipped();

        assert_eq!(
            batch.stats(),
            BatchStats {
                total: 3,
                sent: 1,
                failed: 1,
                skipped: 1,
            }
        );
    }
}
