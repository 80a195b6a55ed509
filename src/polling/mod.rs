//! Long-polling comment feed.
//!
//! A poll runs on a dedicated bounded worker pool, re-querying storage at a
//! fixed interval until new comments appear or the timeout elapses. Every
//! call ends in exactly one `PollOutcome`.

mod engine;
mod pool;

pub use engine::{LongPollEngine, PollError, PollOutcome, PollRequest, POLL_POOL_NAME};
pub use pool::{PoolExhausted, WorkerPool};
