//! Scheduler/Processor
//!
//! Owns the `scheduled_emails` lifecycle:
//!
//! ```text
//! pending ──claim──► processing ──► sent
//!    │                    └───────► failed ──retry──► (new pending row)
//!    └──cancel──► cancelled
//! ```
//!
//! A processing pass claims due rows in one atomic update, sends each one
//! through the [`Transport`], and records the outcome per row. One row's
//! failure never aborts the rest of the batch.

use crate::store::{emails, sequences, NewScheduledEmail};
use crate::transport::{EmailMessage, Transport};
use chrono::{DateTime, Utc};
use dei_common::db::{EmailStatus, ScheduledEmail, SchedulerStats};
use dei_common::{time, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A standalone email to send later (or now)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub to: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Defaults to now
    #[serde(default)]
    pub send_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Outcome of one processing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    /// Rows claimed
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    /// `"<email id>: <message>"` per failed row
    pub errors: Vec<String>,
}

enum Outcome {
    Sent,
    Failed(String),
}

#[derive(Clone)]
pub struct Scheduler {
    pool: SqlitePool,
    transport: Transport,
    batch_size: u32,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, transport: Transport, batch_size: u32) -> Self {
        Self {
            pool,
            transport,
            batch_size,
        }
    }

    /// Validate and insert a `pending` row
    pub async fn schedule_email(&self, request: ScheduleRequest) -> Result<ScheduledEmail> {
        let now = time::now();

        let message = EmailMessage {
            to: request.to.iter().map(|r| r.trim().to_string()).collect(),
            subject: request.subject.clone(),
            html: request.html.clone(),
            text: request.text.clone(),
            ..Default::default()
        };
        message
            .validate()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;

        let send_at = request.send_at.unwrap_or(now);
        if send_at < now {
            return Err(Error::InvalidInput(format!(
                "send_at {} is in the past",
                time::to_db(send_at)
            )));
        }

        let email = emails::insert_email(
            &self.pool,
            &NewScheduledEmail {
                lead_id: request.lead_id,
                to: message.to,
                subject: message.subject,
                html_content: message.html,
                text_content: message.text,
                scheduled_for: send_at,
                metadata: request.metadata,
                ..Default::default()
            },
            now,
        )
        .await?;

        info!(
            email_id = %email.id,
            scheduled_for = %time::to_db(email.scheduled_for),
            "Scheduled email"
        );
        Ok(email)
    }

    pub async fn process_scheduled_emails(&self) -> Result<ProcessReport> {
        self.process_due_at(time::now()).await
    }

    /// Send every row due at `now`, up to the batch size
    pub async fn process_due_at(&self, now: DateTime<Utc>) -> Result<ProcessReport> {
        let claimed = emails::claim_due(&self.pool, now, self.batch_size).await?;
        let mut report = ProcessReport {
            processed: claimed.len(),
            ..Default::default()
        };

        if claimed.is_empty() {
            debug!("No scheduled emails due");
            return Ok(report);
        }

        for email in &claimed {
            match self.process_one(email).await {
                Outcome::Sent => report.sent += 1,
                Outcome::Failed(message) => {
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", email.id, message));
                }
            }
        }

        info!(
            processed = report.processed,
            sent = report.sent,
            failed = report.failed,
            "Processed scheduled emails"
        );
        Ok(report)
    }

    async fn process_one(&self, email: &ScheduledEmail) -> Outcome {
        let message = EmailMessage {
            to: email.recipients(),
            subject: email.subject.clone(),
            html: email.html_content.clone(),
            text: email.text_content.clone(),
            ..Default::default()
        };

        match self.transport.send_email(&message).await {
            Ok(receipt) => {
                if let Err(e) = self.record_sent(email, &receipt.id).await {
                    // Delivered, but the row stays `processing` until stale recovery
                    error!(email_id = %email.id, resend_id = %receipt.id, error = %e, "Failed to record sent email");
                    return Outcome::Failed(e.to_string());
                }
                debug!(email_id = %email.id, resend_id = %receipt.id, "Email sent");
                Outcome::Sent
            }
            Err(send_error) => {
                let message = send_error.to_string();
                warn!(email_id = %email.id, error = %message, "Email send failed");
                if let Err(e) = emails::mark_failed(&self.pool, &email.id, &message, time::now()).await
                {
                    error!(email_id = %email.id, error = %e, "Failed to record failed email");
                }
                Outcome::Failed(message)
            }
        }
    }

    async fn record_sent(&self, email: &ScheduledEmail, resend_id: &str) -> Result<()> {
        let now = time::now();
        if !emails::mark_sent(&self.pool, &email.id, resend_id, now).await? {
            warn!(email_id = %email.id, "Email was no longer processing when marked sent");
        }

        if let (Some(sequence_id), Some(step)) = (&email.sequence_id, email.step_number) {
            if let Some(sequence) = sequences::advance(&self.pool, sequence_id, step, now).await? {
                debug!(
                    sequence_id = %sequence.id,
                    current_step = sequence.current_step,
                    status = %sequence.status,
                    "Advanced sequence"
                );
            }
        }
        Ok(())
    }

    /// `pending -> cancelled`; any other status is an error
    pub async fn cancel_scheduled_email(&self, id: &str) -> Result<ScheduledEmail> {
        if !emails::cancel_pending(&self.pool, id, time::now()).await? {
            let email = self.scheduled_email_status(id).await?;
            return Err(Error::InvalidState(format!(
                "Email {} is {}; only pending emails can be cancelled",
                id, email.status
            )));
        }

        info!(email_id = %id, "Cancelled scheduled email");
        self.scheduled_email_status(id).await
    }

    pub async fn scheduled_email_status(&self, id: &str) -> Result<ScheduledEmail> {
        emails::get_email(&self.pool, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Scheduled email {}", id)))
    }

    /// Queue a copy of a failed email for immediate sending.
    ///
    /// The failed row is left as is; the new row references it via `retry_of`.
    pub async fn retry_failed_email(&self, id: &str) -> Result<ScheduledEmail> {
        let failed = self.scheduled_email_status(id).await?;
        if failed.status != EmailStatus::Failed {
            return Err(Error::InvalidState(format!(
                "Email {} is {}; only failed emails can be retried",
                id, failed.status
            )));
        }

        let now = time::now();
        let retry = emails::insert_email(
            &self.pool,
            &NewScheduledEmail {
                sequence_id: failed.sequence_id.clone(),
                lead_id: failed.lead_id.clone(),
                to: failed.recipients(),
                subject: failed.subject.clone(),
                html_content: failed.html_content.clone(),
                text_content: failed.text_content.clone(),
                scheduled_for: now,
                step_number: failed.step_number,
                metadata: failed.metadata.clone(),
                retry_of: Some(failed.id.clone()),
            },
            now,
        )
        .await?;

        info!(email_id = %retry.id, retry_of = %failed.id, "Queued retry of failed email");
        Ok(retry)
    }

    pub async fn scheduler_stats(&self) -> Result<SchedulerStats> {
        emails::count_by_status(&self.pool).await
    }

    /// Fail rows stuck in `processing` for longer than `older_than`
    pub async fn recover_stale(&self, older_than: Duration) -> Result<Vec<String>> {
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| Error::InvalidInput(format!("Invalid stale threshold: {}", e)))?;
        let now = time::now();

        let ids = emails::fail_stale_processing(&self.pool, now - older_than, now).await?;
        if !ids.is_empty() {
            warn!(count = ids.len(), "Marked stale processing emails as failed");
        }
        Ok(ids)
    }
}
