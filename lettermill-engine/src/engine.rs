//! Campaign orchestration
//!
//! The engine owns the campaign registry and the run-request queue. A run
//! request is one unit of work: load the next chunk of recipients, dispatch
//! them as a batch, and hand off. When a batch finishes with recipients still
//! pending, its supervisor enqueues a fresh run request instead of looping,
//! so a campaign's chunks interleave fairly with other campaigns on the same
//! worker pool.
//!
//! Run requests carry the generation they were enqueued under; any operation
//! that must invalidate queued work (re-execute, pause) bumps the campaign's
//! generation and stale requests are dropped at dequeue.

use std::sync::{
    Arc, Mutex as StdMutex,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lettermill_common::{Signal, lock::KeyedLock};
use lettermill_limits::{CreditTracker, RateTracker};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinSet,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    batch::Batch,
    campaign::{Campaign, CampaignStatus},
    config::EngineConfig,
    dispatcher,
    error::{EngineError, Result},
    ids::CampaignId,
    message::{MessageComposer, StaticComposer},
    outcome::{MemoryOutcomeSink, OutcomeSink},
    recipients::{Recipient, RecipientSource},
    transport::Transport,
    worker,
};

/// Published whenever a campaign's status changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignEvent {
    pub campaign: CampaignId,
    pub status: CampaignStatus,
}

/// One queued request to run (or continue running) a campaign.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunRequest {
    pub campaign: CampaignId,
    pub generation: u64,
}

/// The campaign delivery engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    campaigns: DashMap<CampaignId, Campaign>,
    batches: DashMap<CampaignId, Arc<Batch>>,
    recipients: Arc<dyn RecipientSource>,
    composer: Arc<dyn MessageComposer>,
    transport: Arc<dyn Transport>,
    outcomes: Arc<dyn OutcomeSink>,
    rate_trackers: Vec<Arc<RateTracker>>,
    credit_trackers: Vec<Arc<CreditTracker>>,
    run_tx: mpsc::UnboundedSender<RunRequest>,
    run_rx: StdMutex<Option<mpsc::UnboundedReceiver<RunRequest>>>,
    pub(crate) scan_locks: KeyedLock,
    events: broadcast::Sender<CampaignEvent>,
    dispatched_batches: AtomicU64,
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Register a campaign with the engine, returning its id.
    pub fn add_campaign(&self, campaign: Campaign) -> CampaignId {
        let id = campaign.id();
        self.campaigns.insert(id, campaign);
        id
    }

    /// Snapshot of a campaign's current state.
    #[must_use]
    pub fn campaign(&self, id: &CampaignId) -> Option<Campaign> {
        self.campaigns.get(id).map(|entry| entry.clone())
    }

    /// Subscribe to campaign status changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CampaignEvent> {
        self.events.subscribe()
    }

    /// Total batches dispatched since startup.
    #[must_use]
    pub fn dispatched_batches(&self) -> u64 {
        self.dispatched_batches.load(Ordering::Relaxed)
    }

    /// Start (or restart) a campaign's delivery.
    ///
    /// Refuses quietly when `run_at` is still in the future. Otherwise bumps
    /// the campaign's generation, which cancels any queued run requests from
    /// earlier executions, and enqueues a fresh one.
    pub fn execute(&self, id: &CampaignId) -> Result<()> {
        let snapshot = self
            .campaign(id)
            .ok_or(EngineError::CampaignNotFound(*id))?;

        let now = Utc::now();
        if let Some(run_at) = snapshot.run_at
            && run_at > now
        {
            warn!(campaign = %id, %run_at, "campaign not due yet; refusing to run");
            return Ok(());
        }

        let generation = self.update_campaign(id, |campaign| {
            campaign.bump_run_generation();
            campaign.set_queuing();
            campaign.run_generation()
        })?;

        self.enqueue_run(*id, generation);
        Ok(())
    }

    /// Suspend a campaign: cancel its in-flight batch, invalidate queued run
    /// requests, and mark it paused. Outcomes already recorded are kept.
    pub fn pause(&self, id: &CampaignId) -> Result<()> {
        if let Some(batch) = self.batches.get(id) {
            batch.cancel();
        }
        self.update_campaign(id, |campaign| {
            campaign.bump_run_generation();
            campaign.set_paused();
        })?;
        info!(campaign = %id, "campaign paused");
        Ok(())
    }

    /// Resume a paused campaign from where it left off.
    pub fn resume(&self, id: &CampaignId) -> Result<()> {
        self.execute(id)
    }

    /// Move a campaign back to waiting for a (new) `run_at`.
    pub fn reschedule(&self, id: &CampaignId, run_at: DateTime<Utc>) -> Result<()> {
        self.update_campaign(id, |campaign| {
            campaign.bump_run_generation();
            campaign.set_scheduled(run_at);
        })
    }

    /// Run the worker pool until `shutdown` fires. Consumes the run-request
    /// receiver; a second call fails.
    pub async fn serve(self: Arc<Self>, shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        worker::serve(self, shutdown).await
    }

    /// Campaigns whose scheduled time has arrived.
    #[must_use]
    pub fn due_campaigns(&self, now: DateTime<Utc>) -> Vec<CampaignId> {
        self.campaigns
            .iter()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.id())
            .collect()
    }

    pub(crate) const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn composer(&self) -> &dyn MessageComposer {
        self.composer.as_ref()
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn outcomes(&self) -> &dyn OutcomeSink {
        self.outcomes.as_ref()
    }

    pub(crate) fn rate_trackers(&self) -> &[Arc<RateTracker>] {
        &self.rate_trackers
    }

    pub(crate) fn credit_trackers(&self) -> &[Arc<CreditTracker>] {
        &self.credit_trackers
    }

    pub(crate) fn take_run_receiver(&self) -> Result<mpsc::UnboundedReceiver<RunRequest>> {
        self.run_rx
            .lock()
            .map_err(|_| EngineError::Internal("run receiver lock poisoned".into()))?
            .take()
            .ok_or_else(|| EngineError::Internal("engine is already serving".into()))
    }

    /// Validate and execute one dequeued run request.
    pub(crate) async fn handle_run_request(self: Arc<Self>, request: RunRequest, worker: &str) {
        let Some(campaign) = self.campaign(&request.campaign) else {
            warn!(campaign = %request.campaign, "run request for unknown campaign; dropping");
            return;
        };
        if campaign.run_generation() != request.generation {
            debug!(campaign = %request.campaign, "stale run request; dropping");
            return;
        }
        if campaign.is_paused() {
            debug!(campaign = %request.campaign, "campaign paused; dropping run request");
            return;
        }

        let span = info_span!("run", campaign = %request.campaign, worker);
        if let Err(e) = Arc::clone(&self).run(request, worker).instrument(span).await {
            self.fail_campaign(&request.campaign, &format!("Campaign stopped. {e}"));
        }
    }

    /// One run: cancel the previous batch, load the next chunk, dispatch it.
    async fn run(self: Arc<Self>, request: RunRequest, worker: &str) -> Result<()> {
        let id = request.campaign;

        // A batch from a previous run may still be in flight; it must not
        // race this one for recipients or permits.
        if let Some(previous) = self.batches.get(&id)
            && !previous.is_cancelled()
        {
            info!(batch = %previous.id(), "cancelling outstanding batch from a previous run");
            previous.cancel();
        }

        let started = self.update_campaign(&id, |campaign| {
            if campaign.run_generation() != request.generation || campaign.is_paused() {
                return false;
            }
            campaign.set_queued();
            true
        })?;
        if !started {
            debug!(campaign = %id, "run superseded before start");
            return Ok(());
        }

        // Registered before loading so a concurrent pause cancels this batch
        // rather than only its predecessor.
        let batch = Arc::new(Batch::new(id));
        self.batches.insert(id, Arc::clone(&batch));

        let limit = self.config.chunk_limit();
        info!("Loading contacts to shoot (up to {limit})");
        let loaded = self.recipients.load_pending(&id, limit).await?;
        batch.set_total(loaded.len());

        let sending = self.update_campaign(&id, |campaign| {
            if campaign.run_generation() != request.generation || campaign.is_paused() {
                return false;
            }
            campaign.set_sending(worker);
            true
        })?;
        if !sending {
            batch.cancel();
            debug!(campaign = %id, "run superseded while loading; chunk abandoned");
            return Ok(());
        }

        self.dispatched_batches.fetch_add(1, Ordering::Relaxed);
        info!(batch = %batch.id(), attempts = loaded.len(), "dispatching batch");

        tokio::spawn(async move {
            self.supervise_batch(batch, loaded, request.generation).await;
        });
        Ok(())
    }

    /// Drive a batch's attempts to completion and fire the right follow-up.
    async fn supervise_batch(
        self: Arc<Self>,
        batch: Arc<Batch>,
        recipients: Vec<Recipient>,
        generation: u64,
    ) {
        let id = batch.campaign();
        let mut attempts = JoinSet::new();
        for recipient in recipients {
            let engine = Arc::clone(&self);
            let batch = Arc::clone(&batch);
            attempts.spawn(async move { dispatcher::attempt(&engine, &batch, recipient).await });
        }

        let mut first_error: Option<EngineError> = None;
        while let Some(joined) = attempts.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(EngineError::Internal(format!(
                    "delivery attempt task failed: {e}"
                )))
            });
            if let Err(e) = outcome
                && first_error.is_none()
            {
                batch.abort();
                first_error = Some(e);
            }
        }

        let stats = batch.stats();
        if batch.is_user_cancelled() {
            // Attempts past their last checkpoint finished anyway; their
            // outcomes stay recorded.
            info!(batch = %batch.id(), ?stats, "batch cancelled; skipping follow-ups");
            return;
        }

        info!(batch = %batch.id(), ?stats, "batch settled");
        match first_error {
            None => self.on_batch_complete(id, generation).await,
            Some(e) => self.fail_campaign(&id, &format!("Campaign stopped. {e}")),
        }

        // Runs whether the batch succeeded or failed.
        self.refresh_cached_pending(&id).await;
    }

    /// Batch finished cleanly: finish the campaign or chain the next chunk.
    async fn on_batch_complete(&self, id: CampaignId, generation: u64) {
        let Some(snapshot) = self.campaign(&id) else {
            return;
        };
        if snapshot.is_paused() {
            info!("Campaign is paused by user");
            return;
        }

        match self.recipients.count_pending(&id).await {
            Ok(0) => {
                info!("No contact left, campaign finishes successfully!");
                if let Err(e) = self.update_campaign(&id, Campaign::set_done) {
                    warn!(campaign = %id, error = %e, "could not mark campaign done");
                }
            }
            Ok(remaining) => {
                info!("Load another batch, {remaining} contact(s) left");
                self.enqueue_run(id, generation);
            }
            Err(e) => {
                self.fail_campaign(&id, &format!("Campaign stopped. {e}"));
            }
        }
    }

    async fn refresh_cached_pending(&self, id: &CampaignId) {
        match self.recipients.count_pending(id).await {
            Ok(pending) => {
                if let Err(e) =
                    self.update_campaign(id, |campaign| campaign.set_cached_pending(pending))
                {
                    warn!(campaign = %id, error = %e, "could not refresh cached pending count");
                }
            }
            Err(e) => warn!(campaign = %id, error = %e, "could not count pending recipients"),
        }
    }

    fn fail_campaign(&self, id: &CampaignId, message: &str) {
        error!("{message}");
        if let Err(e) = self.update_campaign(id, |campaign| campaign.set_error(message)) {
            warn!(campaign = %id, error = %e, "could not mark campaign errored");
        }
    }

    fn enqueue_run(&self, id: CampaignId, generation: u64) {
        let request = RunRequest {
            campaign: id,
            generation,
        };
        if self.run_tx.send(request).is_err() {
            warn!(campaign = %id, "run queue closed; request dropped");
        }
    }

    /// Mutate a campaign under the registry lock, publishing a status event
    /// if the mutation changed it.
    fn update_campaign<R>(
        &self,
        id: &CampaignId,
        mutate: impl FnOnce(&mut Campaign) -> R,
    ) -> Result<R> {
        let mut entry = self
            .campaigns
            .get_mut(id)
            .ok_or(EngineError::CampaignNotFound(*id))?;
        let before = entry.status();
        let result = mutate(entry.value_mut());
        let after = entry.status();
        drop(entry);

        if before != after {
            debug!(campaign = %id, from = %before, to = %after, "campaign status changed");
            let _ = self.events.send(CampaignEvent {
                campaign: *id,
                status: after,
            });
        }
        Ok(result)
    }
}

/// Assembles an [`Engine`] from its collaborators.
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    recipients: Option<Arc<dyn RecipientSource>>,
    composer: Option<Arc<dyn MessageComposer>>,
    transport: Option<Arc<dyn Transport>>,
    outcomes: Option<Arc<dyn OutcomeSink>>,
    rate_trackers: Vec<Arc<RateTracker>>,
    credit_trackers: Vec<Arc<CreditTracker>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn recipients(mut self, recipients: Arc<dyn RecipientSource>) -> Self {
        self.recipients = Some(recipients);
        self
    }

    #[must_use]
    pub fn composer(mut self, composer: Arc<dyn MessageComposer>) -> Self {
        self.composer = Some(composer);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn outcomes(mut self, outcomes: Arc<dyn OutcomeSink>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    /// Attach a rate tracker every delivery attempt must clear.
    #[must_use]
    pub fn rate_tracker(mut self, tracker: Arc<RateTracker>) -> Self {
        self.rate_trackers.push(tracker);
        self
    }

    /// Attach a credit tracker every delivery attempt consumes from.
    #[must_use]
    pub fn credit_tracker(mut self, tracker: Arc<CreditTracker>) -> Self {
        self.credit_trackers.push(tracker);
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    /// `Configuration` when the recipient source or transport is missing.
    pub fn build(self) -> Result<Arc<Engine>> {
        let recipients = self
            .recipients
            .ok_or_else(|| EngineError::Configuration("recipient source is required".into()))?;
        let transport = self
            .transport
            .ok_or_else(|| EngineError::Configuration("transport is required".into()))?;

        let (run_tx, run_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        Ok(Arc::new(Engine {
            config: self.config.unwrap_or_default(),
            campaigns: DashMap::new(),
            batches: DashMap::new(),
            recipients,
            composer: self
                .composer
                .unwrap_or_else(|| Arc::new(StaticComposer::default())),
            transport,
            outcomes: self
                .outcomes
                .unwrap_or_else(|| Arc::new(MemoryOutcomeSink::new())),
            rate_trackers: self.rate_trackers,
            credit_trackers: self.credit_trackers,
            run_tx,
            run_rx: StdMutex::new(Some(run_rx)),
            scan_locks: KeyedLock::new(),
            events,
            dispatched_batches: AtomicU64::new(0),
        }))
    }
}
