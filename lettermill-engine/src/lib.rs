//! Campaign delivery engine
//!
//! Orchestrates bulk mail campaigns from schedule to completion: a lifecycle
//! state machine per campaign, chunked batch dispatch over a worker pool, and
//! per-attempt throttling through the trackers in `lettermill-limits`.
//!
//! The engine is storage-agnostic at every seam: recipients come from a
//! [`RecipientSource`], messages are rendered by a [`MessageComposer`],
//! delivery goes through a [`Transport`], and per-recipient records land in
//! an [`OutcomeSink`].

pub mod batch;
pub mod campaign;
pub mod config;
mod dispatcher;
pub mod engine;
pub mod error;
pub mod ids;
pub mod message;
pub mod outcome;
pub mod recipients;
pub mod scheduler;
pub mod transport;
mod worker;

pub use batch::{Batch, BatchStats};
pub use campaign::{Campaign, CampaignStatus};
pub use config::EngineConfig;
pub use engine::{CampaignEvent, Engine, EngineBuilder};
pub use error::{EngineError, Result};
pub use ids::{BatchId, CampaignId, MessageId};
pub use message::{MessageComposer, OutboundMessage, StaticComposer};
pub use outcome::{DeliveryOutcome, MemoryOutcomeSink, OutcomeSink, OutcomeStatus};
pub use recipients::{MemoryRecipientSource, Recipient, RecipientSource};
pub use scheduler::Scheduler;
pub use transport::{DryRunTransport, SendReceipt, Transport};
