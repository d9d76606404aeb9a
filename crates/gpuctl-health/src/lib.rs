//! Health Checker (C5, spec §4.5/§4.5.1).
//!
//! Grounded on `claw-health`'s fleet health-scoring loop
//! (`FailoverStateMachine`, threshold-driven alerting), narrowed from
//! "score a VPS node across CPU/disk/agent-heartbeat signals" to "probe
//! a fixed set of HTTP endpoints and classify failures into a fixed
//! taxonomy".

#![forbid(unsafe_code)]

mod checker;
mod classify;
mod probe;

pub use checker::HealthChecker;
pub use probe::{EndpointProber, HttpProber, ProbeOutcome};
