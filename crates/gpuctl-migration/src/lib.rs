//! Migration Scheduler (C9, spec §4.9) and Startup Sync (C10, spec §4.10).
//!
//! Grounded on `gpuctl-queue`'s own maintenance loop for the ticker's
//! spawn/sleep/check-running shape; Startup Sync's adopt/remove
//! reconciliation has no analogue elsewhere in this workspace and is
//! built directly from the
//! `handleInstanceNotFound`/cache-invalidation pattern already established
//! in `gpuctl-instance`.

#![forbid(unsafe_code)]

mod scheduler;
mod startup_sync;

pub use scheduler::{MigrationScheduler, MigrationSchedulerConfig};
pub use startup_sync::{StartupSync, SyncReport};
