use thiserror::Error;

/// Spec §2 treats webhook HTTP delivery as "a black box that either resolves
/// or rejects": callers only need to know whether the attempt succeeded, not
/// why. This stays a single variant deliberately; do not grow a status-code
/// taxonomy here, `SEND_WEBHOOK`'s caller (spec §4.7) never inspects it.
#[derive(Debug, Error, Clone)]
#[error("webhook delivery to {url} failed: {reason}")]
pub struct WebhookError {
    pub url: String,
    pub reason: String,
}

pub type Result<T> = std::result::Result<T, WebhookError>;
