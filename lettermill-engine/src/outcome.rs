//! Per-recipient delivery records
//!
//! Every attempt that reaches a terminal state leaves exactly one record in
//! the sink. Records survive batch cancellation: an attempt that completed
//! just before its batch was cancelled keeps its record, so the audit trail
//! reflects what actually went out.

use chrono::{DateTime, Utc};

use crate::{
    ids::{CampaignId, MessageId},
    recipients::Recipient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Sent,
    Failed,
}

/// The audit record of one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub campaign: CampaignId,
    pub recipient: Recipient,
    /// Name of the server the attempt went through.
    pub server: String,
    pub message_id: Option<MessageId>,
    /// Automation trigger that caused this delivery, when not a plain
    /// campaign run.
    pub trigger: Option<String>,
    pub status: OutcomeStatus,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DeliveryOutcome {
    #[must_use]
    pub fn sent(
        campaign: CampaignId,
        recipient: Recipient,
        server: impl Into<String>,
        message_id: MessageId,
    ) -> Self {
        Self {
            campaign,
            recipient,
            server: server.into(),
            message_id: Some(message_id),
            trigger: None,
            status: OutcomeStatus::Sent,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn failed(
        campaign: CampaignId,
        recipient: Recipient,
        server: impl Into<String>,
        message_id: Option<MessageId>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            campaign,
            recipient,
            server: server.into(),
            message_id,
            trigger: None,
            status: OutcomeStatus::Failed,
            error: Some(error.into()),
            recorded_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }
}

/// Destination for delivery records.
pub trait OutcomeSink: std::fmt::Debug + Send + Sync {
    fn record(&self, outcome: DeliveryOutcome);
}

/// Sink that keeps records in memory, used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryOutcomeSink {
    records: parking_lot::Mutex<Vec<DeliveryOutcome>>,
}

impl MemoryOutcomeSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<DeliveryOutcome> {
        self.records.lock().clone()
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.count_with(OutcomeStatus::Sent)
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count_with(OutcomeStatus::Failed)
    }

    fn count_with(&self, status: OutcomeStatus) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| record.status == status)
            .count()
    }
}

impl OutcomeSink for MemoryOutcomeSink {
    fn record(&self, outcome: DeliveryOutcome) {
        self.records.lock().push(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_counts_by_status() {
        let sink = MemoryOutcomeSink::new();
        let campaign = CampaignId::generate();
        let recipient = Recipient::new("1", "a@example.com");

        sink.record(DeliveryOutcome::sent(
            campaign,
            recipient.clone(),
            "server-1",
            MessageId::generate(),
        ));
        sink.record(DeliveryOutcome::failed(
            campaign,
            recipient,
            "server-1",
            None,
            "mailbox unavailable",
        ));

        assert_eq!(sink.sent_count(), 1);
        assert_eq!(sink.failed_count(), 1);
        assert_eq!(sink.snapshot().len(), 2);
    }
}
