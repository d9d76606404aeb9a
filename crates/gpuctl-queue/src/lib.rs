//! Job Queue (C6, spec §4.6).
//!
//! Grounded on two patterns from the wider workspace:
//! `claw-commander::route_to_specialist`
//! for dispatch-by-type (here, `JobType` to a registered [`JobHandler`]
//! instead of `OperatorIntent` to a `SpecialistAction`), and
//! `claw-health::FailoverStateMachine`'s tick-and-transition loop for the
//! worker's poll/execute/reschedule cycle.

#![forbid(unsafe_code)]

mod error;
mod queue;
mod redis_store;
mod store;

pub use error::{QueueError, Result};
pub use queue::{JobHandler, JobQueue, QueueConfig};
pub use redis_store::RedisQueueStore;
pub use store::{MemoryQueueStore, QueueStore};
