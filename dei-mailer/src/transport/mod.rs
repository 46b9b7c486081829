//! Email Transport
//!
//! Wraps an [`EmailProvider`] with local validation, sliding-window rate
//! limiting and retry with exponential backoff.
//!
//! # Send algorithm
//! 1. Validate recipient, subject and body; reject without calling the provider
//! 2. Take a rate-limit slot; if exhausted, sleep for the remaining window
//!    once, then fail with [`SendError::RateLimited`] if still exhausted
//! 3. Call the provider
//! 4. On a retryable failure, back off (1s, 2s, 4s, capped at 10s) and go to 2,
//!    up to `max_retries` times

pub mod error;
pub mod rate_limit;
pub mod resend;
pub mod retry;

pub use error::SendError;
pub use rate_limit::{RateLimit, SlidingWindowLimiter};
pub use resend::ResendProvider;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outbound message as handed to a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
}

impl EmailMessage {
    /// Check the fields every provider requires
    pub fn validate(&self) -> Result<(), SendError> {
        if self.to.is_empty() || self.to.iter().any(|r| r.trim().is_empty()) {
            return Err(SendError::Validation("Missing required field: to".to_string()));
        }
        if self.subject.trim().is_empty() {
            return Err(SendError::Validation(
                "Missing required field: subject".to_string(),
            ));
        }
        let has_body = |body: &Option<String>| body.as_deref().is_some_and(|b| !b.trim().is_empty());
        if !has_body(&self.html) && !has_body(&self.text) {
            return Err(SendError::Validation(
                "Either html or text content is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Provider acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider-assigned message id
    pub id: String,
}

/// A third-party email API
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Deliver one message; a single attempt, no retries
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, SendError>;

    /// Short provider name for logs
    fn name(&self) -> &'static str;
}

/// Stand-in for commands that never send; every send fails with
/// [`SendError::Config`]
pub struct UnconfiguredProvider;

#[async_trait]
impl EmailProvider for UnconfiguredProvider {
    async fn send(&self, _message: &EmailMessage) -> Result<SendReceipt, SendError> {
        Err(SendError::Config("No email provider configured".to_string()))
    }

    fn name(&self) -> &'static str {
        "unconfigured"
    }
}

/// Rate-limited, retrying sender
#[derive(Clone)]
pub struct Transport {
    provider: Arc<dyn EmailProvider>,
    limiter: Arc<dyn RateLimit>,
    retry: RetryPolicy,
}

impl Transport {
    pub fn new(
        provider: Arc<dyn EmailProvider>,
        limiter: Arc<dyn RateLimit>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            limiter,
            retry,
        }
    }

    /// Send a message, returning the provider id on success
    pub async fn send_email(&self, message: &EmailMessage) -> Result<SendReceipt, SendError> {
        message.validate()?;

        let mut retry = 0;
        loop {
            self.acquire_slot().await?;

            match self.provider.send(message).await {
                Ok(receipt) => {
                    debug!(
                        provider = self.provider.name(),
                        id = %receipt.id,
                        attempts = retry + 1,
                        "Email accepted by provider"
                    );
                    return Ok(receipt);
                }
                Err(err) if !err.is_retryable() => {
                    warn!(
                        provider = self.provider.name(),
                        error = %err,
                        "Email send failed with non-retryable error"
                    );
                    return Err(err);
                }
                Err(err) if retry >= self.retry.max_retries => {
                    warn!(
                        provider = self.provider.name(),
                        error = %err,
                        attempts = retry + 1,
                        "Email send failed: retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.retry.delay_for(retry);
                    warn!(
                        provider = self.provider.name(),
                        error = %err,
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Email send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }

    /// One wait-and-recheck on exhaustion, then give up
    async fn acquire_slot(&self) -> Result<(), SendError> {
        let wait = match self.limiter.try_acquire().await {
            Ok(()) => return Ok(()),
            Err(wait) => wait,
        };

        warn!(
            wait_ms = wait.as_millis() as u64,
            "Rate limit reached, waiting for window to slide"
        );
        tokio::time::sleep(wait).await;

        self.limiter
            .try_acquire()
            .await
            .map_err(|retry_after| SendError::RateLimited { retry_after })
    }
}
