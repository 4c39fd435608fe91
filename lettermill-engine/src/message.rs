//! Message composition
//!
//! Composition happens once per attempt, before any throttling permit is
//! taken, so a broken template fails the attempt without burning quota.

use crate::{
    campaign::Campaign,
    error::Result,
    ids::{CampaignId, MessageId},
    recipients::Recipient,
};

/// A fully rendered message ready for the transport.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub campaign: CampaignId,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Renders a campaign's content for one recipient.
pub trait MessageComposer: std::fmt::Debug + Send + Sync {
    fn compose(&self, campaign: &Campaign, recipient: &Recipient) -> Result<OutboundMessage>;
}

/// Composer that sends the same subject and body to every recipient.
#[derive(Debug, Clone, Default)]
pub struct StaticComposer {
    pub subject: String,
    pub body: String,
}

impl StaticComposer {
    #[must_use]
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

impl MessageComposer for StaticComposer {
    fn compose(&self, campaign: &Campaign, recipient: &Recipient) -> Result<OutboundMessage> {
        Ok(OutboundMessage {
            id: MessageId::generate(),
            campaign: campaign.id(),
            to: recipient.address.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
        })
    }
}
