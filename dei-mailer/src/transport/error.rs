//! Send failure classification
//!
//! Permanent failures (bad address, bad credentials, rejected payload) fail
//! fast; everything else is retried with backoff by the transport.

use std::time::Duration;
use thiserror::Error;

/// Message fragments that mark a provider failure as permanent
const NON_RETRYABLE_MARKERS: [&str; 3] = ["invalid email", "unauthorized", "validation"];

#[derive(Debug, Error)]
pub enum SendError {
    /// Message rejected locally before reaching the provider
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local rate limit still exhausted after waiting out the window once
    #[error("Rate limit exceeded, next slot in {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    /// Provider answered with a non-success status
    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    /// Provider accepted the request but the response was unreadable
    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SendError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SendError::Validation(_) | SendError::Config(_) => false,
            // The transport already waited out one window
            SendError::RateLimited { .. } => false,
            // A 2xx was received; resending could deliver twice
            SendError::Decode(_) => false,
            SendError::Provider { status, message } => {
                if is_permanent_message(message) {
                    return false;
                }
                *status == 408 || *status == 429 || *status >= 500
            }
            SendError::Network(message) => !is_permanent_message(message),
        }
    }
}

fn is_permanent_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    NON_RETRYABLE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}
