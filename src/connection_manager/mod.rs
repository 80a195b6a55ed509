//! Registry of live push connections
//!
//! This module provides:
//! - Structured connection ids with a subscriber secondary index
//! - Push handles with replay-aware, in-order delivery
//! - Exactly-once terminal transitions
//! - Connection statistics

mod registry;
mod stats;
mod types;

pub use registry::{ConnectionRegistry, RegistryError};
pub use stats::ConnectionStats;
pub use types::{
    ConnectionId, ParseConnectionIdError, PushError, PushHandle, PushOutcome, TerminationReason,
};
