//! Recipient sourcing
//!
//! The engine never owns the subscriber list; it pulls pending recipients
//! through this seam chunk by chunk. `load_pending` advances the source's
//! cursor, so a recipient handed out once is not handed out again even if the
//! batch that took it is later cancelled.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{error::Result, ids::CampaignId};

/// One deliverable recipient of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id: String,
    pub address: String,
}

impl Recipient {
    #[must_use]
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Where a campaign's pending recipients come from.
#[async_trait]
pub trait RecipientSource: std::fmt::Debug + Send + Sync {
    /// Number of recipients still pending for `campaign`.
    async fn count_pending(&self, campaign: &CampaignId) -> Result<u64>;

    /// Take up to `limit` pending recipients, advancing the cursor past them.
    async fn load_pending(&self, campaign: &CampaignId, limit: usize) -> Result<Vec<Recipient>>;
}

/// In-memory recipient source, used by tests and small deployments.
#[derive(Debug, Default)]
pub struct MemoryRecipientSource {
    pending: DashMap<CampaignId, VecDeque<Recipient>>,
}

impl MemoryRecipientSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append recipients to a campaign's pending queue.
    pub fn seed(&self, campaign: CampaignId, recipients: impl IntoIterator<Item = Recipient>) {
        self.pending
            .entry(campaign)
            .or_default()
            .extend(recipients);
    }
}

#[async_trait]
impl RecipientSource for MemoryRecipientSource {
    async fn count_pending(&self, campaign: &CampaignId) -> Result<u64> {
        Ok(self
            .pending
            .get(campaign)
            .map_or(0, |queue| queue.len() as u64))
    }

    async fn load_pending(&self, campaign: &CampaignId, limit: usize) -> Result<Vec<Recipient>> {
        let Some(mut queue) = self.pending.get_mut(campaign) else {
            return Ok(Vec::new());
        };
        let take = limit.min(queue.len());
        Ok(queue.drain(..take).collect())
    }
}
