//! Webhook delivery (external collaborator, spec §2/§6): "a black box that
//! either resolves or rejects." Delivery is at-least-once with no internal
//! retry — `SEND_WEBHOOK` (spec §4.7) is itself a queued job, so retries on
//! failure are the job queue's concern, not this client's.
//!
//! Grounded on `claw-provision`'s `build_client` (an HTTP collaborator
//! built once as a timeout-bounded `reqwest::Client` and reused),
//! narrowed to the single POST-and-check-status operation this contract
//! needs.

#![forbid(unsafe_code)]

mod client;
mod error;
mod recording;

pub use client::{HttpWebhookClient, WebhookClient};
pub use error::{Result, WebhookError};
pub use recording::RecordingWebhookClient;
