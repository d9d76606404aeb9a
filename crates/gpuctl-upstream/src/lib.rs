//! Typed wrapper over the upstream GPU cloud API (C2, spec §4.2).
//!
//! Grounded on `HetznerProvider`'s construction pattern
//! (`reqwest::Client::builder().timeout(..)`), generalized from "one
//! provider among several" to "the single upstream GPU API", with a circuit
//! breaker shaped like `claw-health`'s `FailoverStateMachine`.

#![forbid(unsafe_code)]

mod circuit;
mod client;
mod error;
mod wire;

pub use circuit::{CircuitBreaker, CircuitDecision, CircuitState};
pub use client::{CreateInstanceRequest, HttpUpstreamClient, MigrationOutcome, SharedUpstreamClient, UpstreamClient};
pub use error::{Result, UpstreamError};
pub use wire::NormalizedInstance;
