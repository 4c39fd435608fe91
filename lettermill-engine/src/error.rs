use lettermill_limits::LimitError;

use crate::ids::CampaignId;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Limit(#[from] LimitError),

    #[error("Failed to load recipients: {0}")]
    RecipientLoad(String),

    #[error("Failed to compose message: {0}")]
    Compose(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No such campaign: {0}")]
    CampaignNotFound(CampaignId),

    #[error("Invalid engine configuration: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this error is a throttling denial worth retrying after a
    /// backoff, as opposed to a permanent failure.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Limit(limit) if limit.is_rate_limited())
    }
}
