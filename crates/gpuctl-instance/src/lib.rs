//! Instance Service (C8, spec §4.1): the authoritative owner of instance
//! state, wiring the product/template resolvers, upstream client, cache, and
//! job queue into the eight operations exposed to callers and job handlers.
//!
//! Grounded on `clawnode::persist`'s `VpsInstanceStore`: a `HashMap` of
//! instance records behind a single lock with one mutation path, widened
//! here with a name index, a startup-operation tracker, and job-queue side
//! effects that store never needed (it persisted to disk directly; this
//! one is purely in-memory, the job queue being the durable record of
//! pending work).

#![forbid(unsafe_code)]

mod error;
mod operations;
mod service;
mod store;

pub use error::{InstanceServiceError, Result};
pub use operations::StartupOperationTracker;
pub use service::{InstanceService, InstanceServiceConfig, ListInstancesOptions, StartInstanceResult};
pub use store::InstanceStore;
