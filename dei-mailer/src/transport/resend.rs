//! Resend HTTP provider
//!
//! # API Reference
//! - Endpoint: `POST {base_url}/emails`
//! - Auth: `Authorization: Bearer <api key>`
//! - Success: `200 {"id": "..."}`
//! - Failure: `4xx/5xx {"name": "...", "message": "..."}`

use super::{EmailMessage, EmailProvider, SendError, SendReceipt};
use async_trait::async_trait;
use dei_common::config::ResendConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("dei-mailer/", env!("CARGO_PKG_VERSION"));

/// Request body for `POST /emails`
#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    #[serde(skip_serializing_if = "is_empty")]
    cc: &'a [String],
    #[serde(skip_serializing_if = "is_empty")]
    bcc: &'a [String],
}

fn is_empty(list: &&[String]) -> bool {
    list.is_empty()
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResendErrorBody {
    #[serde(default)]
    name: Option<String>,
    message: String,
}

pub struct ResendProvider {
    http_client: Client,
    api_key: String,
    base_url: String,
    from: String,
    reply_to: Option<String>,
}

impl ResendProvider {
    /// Build a client from configuration; the API key is required
    pub fn new(config: &ResendConfig) -> Result<Self, SendError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SendError::Config(
                    "Resend API key not configured (set [resend].api_key or DEI_RESEND_API_KEY)"
                        .to_string(),
                )
            })?;

        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SendError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_key,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            from: config.from.clone(),
            reply_to: config.reply_to.clone(),
        })
    }
}

#[async_trait]
impl EmailProvider for ResendProvider {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, SendError> {
        let body = ResendRequest {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            html: message.html.as_deref(),
            text: message.text.as_deref(),
            reply_to: message.reply_to.as_deref().or(self.reply_to.as_deref()),
            cc: &message.cc,
            bcc: &message.bcc,
        };

        debug!(recipients = message.to.len(), "Posting email to Resend");

        let response = self
            .http_client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Network(format!("Resend request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let parsed: ResendResponse = response
                .json()
                .await
                .map_err(|e| SendError::Decode(e.to_string()))?;
            return Ok(SendReceipt { id: parsed.id });
        }

        let raw = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ResendErrorBody>(&raw) {
            Ok(ResendErrorBody {
                name: Some(name),
                message,
            }) => format!("{}: {}", name, message),
            Ok(ResendErrorBody { name: None, message }) => message,
            Err(_) if raw.is_empty() => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
            Err(_) => raw,
        };

        Err(SendError::Provider {
            status: status.as_u16(),
            message,
        })
    }

    fn name(&self) -> &'static str {
        "resend"
    }
}
