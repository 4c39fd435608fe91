//! Delivery transports
//!
//! The transport is the seam between the engine and whatever actually moves
//! mail. `dryrun` goes through the full dispatch path (permits included) but
//! stops short of handing the message over, which is how deliverability
//! rehearsals run against production throttling.

use async_trait::async_trait;

use crate::{
    error::Result,
    ids::MessageId,
    message::OutboundMessage,
};

/// Proof of a completed (or simulated) hand-off.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: MessageId,
    /// Name of the server the message went through.
    pub server: String,
}

#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    /// Human-readable name used in logs and delivery records.
    fn name(&self) -> &str;

    /// Hand the message to the underlying carrier.
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt>;

    /// Simulate a send without touching the carrier.
    async fn dryrun(&self, message: &OutboundMessage) -> Result<SendReceipt> {
        Ok(SendReceipt {
            message_id: message.id,
            server: self.name().to_string(),
        })
    }
}

/// Transport that accepts everything without delivering anything.
#[derive(Debug, Default)]
pub struct DryRunTransport {
    accepted: std::sync::atomic::AtomicUsize,
}

impl DryRunTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages accepted so far.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
        self.accepted
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.dryrun(message).await
    }
}
