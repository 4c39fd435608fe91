//! Campaign lifecycle state machine
//!
//! A campaign moves through a fixed set of statuses from creation to
//! completion. Status is only ever changed through the transition methods
//! here, which keep the associated bookkeeping (delivery timestamp, running
//! worker, last error) consistent with the status they set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::CampaignId;

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Created, not yet handed to the engine.
    New,
    /// Waiting for its `run_at` time to arrive.
    Scheduled,
    /// A run request has been enqueued but no worker has picked it up yet.
    Queuing,
    /// A worker holds the campaign; a batch is in flight or about to be.
    Queued,
    /// Delivery attempts for the current chunk are executing.
    Sending,
    /// Stopped by a failure; `last_error` carries the reason.
    Error,
    /// Every pending recipient has been attempted.
    Done,
    /// Suspended by the user; resumable.
    Paused,
}

impl CampaignStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Scheduled => "scheduled",
            Self::Queuing => "queuing",
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Error => "error",
            Self::Done => "done",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mail campaign tracked by the engine.
#[derive(Debug, Clone)]
pub struct Campaign {
    id: CampaignId,
    pub name: String,
    status: CampaignStatus,
    /// Earliest time the campaign may run. `None` means immediately eligible.
    pub run_at: Option<DateTime<Utc>>,
    /// Abort the whole run on the first delivery failure instead of recording
    /// it and continuing.
    pub stop_on_error: bool,
    last_error: Option<String>,
    delivery_at: Option<DateTime<Utc>>,
    running_worker: Option<String>,
    cached_pending: u64,
    run_generation: u64,
}

impl Campaign {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CampaignId::generate(),
            name: name.into(),
            status: CampaignStatus::New,
            run_at: None,
            stop_on_error: false,
            last_error: None,
            delivery_at: None,
            running_worker: None,
            cached_pending: 0,
            run_generation: 0,
        }
    }

    /// A campaign waiting for `run_at` before it becomes eligible.
    #[must_use]
    pub fn scheduled(name: impl Into<String>, run_at: DateTime<Utc>) -> Self {
        let mut campaign = Self::new(name);
        campaign.status = CampaignStatus::Scheduled;
        campaign.run_at = Some(run_at);
        campaign
    }

    #[must_use]
    pub const fn id(&self) -> CampaignId {
        self.id
    }

    #[must_use]
    pub const fn status(&self) -> CampaignStatus {
        self.status
    }

    /// The failure that stopped the campaign, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// First line of `last_error`, for terse display surfaces.
    #[must_use]
    pub fn extract_error_message(&self) -> Option<&str> {
        self.last_error.as_deref().and_then(|e| e.lines().next())
    }

    /// When delivery of the current (or last) run started.
    #[must_use]
    pub const fn delivery_at(&self) -> Option<DateTime<Utc>> {
        self.delivery_at
    }

    /// The worker that most recently held the campaign.
    #[must_use]
    pub fn running_worker(&self) -> Option<&str> {
        self.running_worker.as_deref()
    }

    /// Last refreshed count of recipients still pending delivery. May lag the
    /// recipient source between refreshes.
    #[must_use]
    pub const fn cached_pending(&self) -> u64 {
        self.cached_pending
    }

    #[must_use]
    pub(crate) const fn run_generation(&self) -> u64 {
        self.run_generation
    }

    /// Invalidate every run request enqueued so far. Requests carry the
    /// generation they were enqueued under and are dropped on mismatch.
    pub(crate) const fn bump_run_generation(&mut self) {
        self.run_generation += 1;
    }

    pub(crate) const fn set_cached_pending(&mut self, pending: u64) {
        self.cached_pending = pending;
    }

    pub(crate) fn set_scheduled(&mut self, run_at: DateTime<Utc>) {
        self.status = CampaignStatus::Scheduled;
        self.run_at = Some(run_at);
    }

    pub(crate) fn set_queuing(&mut self) {
        self.status = CampaignStatus::Queuing;
    }

    pub(crate) fn set_queued(&mut self) {
        self.status = CampaignStatus::Queued;
    }

    /// Delivery of a chunk is starting: stamp the time and the worker.
    pub(crate) fn set_sending(&mut self, worker: &str) {
        self.status = CampaignStatus::Sending;
        self.delivery_at = Some(Utc::now());
        self.running_worker = Some(worker.to_string());
    }

    /// Successful completion clears any stale error from earlier runs.
    pub(crate) fn set_done(&mut self) {
        self.status = CampaignStatus::Done;
        self.last_error = None;
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.status = CampaignStatus::Error;
        self.last_error = Some(message.into());
    }

    pub(crate) fn set_paused(&mut self) {
        self.status = CampaignStatus::Paused;
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        matches!(self.status, CampaignStatus::Paused)
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.status, CampaignStatus::Done)
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, CampaignStatus::Error)
    }

    #[must_use]
    pub const fn is_sending(&self) -> bool {
        matches!(self.status, CampaignStatus::Sending)
    }

    /// Eligible for the scheduler's due-campaign scan at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, CampaignStatus::Scheduled)
            && self.run_at.is_none_or(|run_at| run_at <= now)
    }
}
