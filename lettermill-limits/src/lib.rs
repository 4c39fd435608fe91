//! Rate and credit tracking for throttled bulk delivery
//!
//! This crate provides the consumption-tracking primitives the delivery engine
//! consults before every outbound attempt:
//! - Sliding-window rate tracking over fixed time buckets, persisted per
//!   tracked entity (sending server, subscription plan)
//! - Durable credit counters with an "unlimited" sentinel
//! - All-or-nothing permit acquisition across a set of trackers

mod credit_tracker;
mod error;
mod permit;
mod rate_limit;
mod rate_tracker;
pub mod storage;

pub use credit_tracker::{CreditTracker, UNLIMITED};
pub use error::{LimitError, Result};
pub use permit::acquire_permits;
pub use rate_limit::RateLimit;
pub use rate_tracker::RateTracker;
pub use storage::{CounterStore, FileCounterStore, MemoryCounterStore};
