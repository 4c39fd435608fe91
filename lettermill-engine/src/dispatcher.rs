//! Per-recipient delivery attempts
//!
//! One attempt per recipient per batch. The sequence is fixed: cancellation
//! check, compose, acquire throttling permits, hand to the transport, record
//! the outcome. A rate-limit denial defers the attempt with a backoff instead
//! of failing it, up to a wall-clock deadline.

use std::time::Duration;

use chrono::Utc;
use lettermill_limits::acquire_permits;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    batch::Batch,
    campaign::Campaign,
    engine::Engine,
    error::{EngineError, Result},
    ids::MessageId,
    outcome::DeliveryOutcome,
    recipients::Recipient,
};

/// Deliver the campaign's message to one recipient.
///
/// Returns `Err` only when the failure must abort the batch (stop-on-error
/// campaigns). All other failures are recorded as outcomes and swallowed so
/// the rest of the batch keeps going.
pub(crate) async fn attempt(engine: &Engine, batch: &Batch, recipient: Recipient) -> Result<()> {
    if batch.is_cancelled() {
        batch.note_skipped();
        debug!(recipient = %recipient.address, "batch cancelled before attempt started; skipping");
        return Ok(());
    }

    let campaign = engine
        .campaign(&batch.campaign())
        .ok_or_else(|| EngineError::CampaignNotFound(batch.campaign()))?;

    let message = match engine.composer().compose(&campaign, &recipient) {
        Ok(message) => message,
        Err(e) => return record_failure(engine, batch, &campaign, &recipient, None, e),
    };

    let backoff = Duration::from_secs(engine.config().rate_limit_backoff_secs);
    let deadline = Instant::now() + Duration::from_secs(engine.config().attempt_deadline_secs);

    loop {
        // An attempt that sat out a backoff may find its batch gone.
        if batch.is_cancelled() {
            batch.note_skipped();
            debug!(recipient = %recipient.address, "batch cancelled while attempt was deferred; skipping");
            return Ok(());
        }

        match acquire_permits(engine.rate_trackers(), engine.credit_trackers(), Utc::now()).await {
            Ok(()) => break,
            Err(denied) if denied.is_rate_limited() => {
                if Instant::now() + backoff >= deadline {
                    return record_failure(
                        engine,
                        batch,
                        &campaign,
                        &recipient,
                        Some(message.id),
                        EngineError::Internal(format!("retry deadline exhausted: {denied}")),
                    );
                }
                warn!(
                    recipient = %recipient.address,
                    "Delaying for {}s: {denied}",
                    backoff.as_secs()
                );
                tokio::time::sleep(backoff).await;
            }
            Err(denied) => {
                return record_failure(
                    engine,
                    batch,
                    &campaign,
                    &recipient,
                    Some(message.id),
                    denied.into(),
                );
            }
        }
    }

    let sent = if engine.config().dry_run {
        engine.transport().dryrun(&message).await
    } else {
        engine.transport().send(&message).await
    };

    match sent {
        Ok(receipt) => {
            info!(
                "Sent to {} [server \"{}\"]",
                recipient.address, receipt.server
            );
            engine.outcomes().record(DeliveryOutcome::sent(
                campaign.id(),
                recipient,
                receipt.server,
                receipt.message_id,
            ));
            batch.note_sent();
            Ok(())
        }
        Err(e) => record_failure(engine, batch, &campaign, &recipient, Some(message.id), e),
    }
}

fn record_failure(
    engine: &Engine,
    batch: &Batch,
    campaign: &Campaign,
    recipient: &Recipient,
    message_id: Option<MessageId>,
    error: EngineError,
) -> Result<()> {
    error!("Error sending to [{}]. Error: {error}", recipient.address);
    batch.note_failed();

    if campaign.stop_on_error {
        return Err(error);
    }

    engine.outcomes().record(DeliveryOutcome::failed(
        campaign.id(),
        recipient.clone(),
        engine.transport().name(),
        message_id,
        error.to_string(),
    ));
    Ok(())
}
