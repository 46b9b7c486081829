//! Database models

use crate::{time, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a scheduled email.
///
/// `pending -> processing -> {sent | failed}`; `cancelled` only from `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Processing => "processing",
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
            EmailStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(EmailStatus::Pending),
            "processing" => Ok(EmailStatus::Processing),
            "sent" => Ok(EmailStatus::Sent),
            "failed" => Ok(EmailStatus::Failed),
            "cancelled" => Ok(EmailStatus::Cancelled),
            other => Err(Error::Internal(format!("Unknown email status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceStatus {
    Active,
    Paused,
    Completed,
}

impl SequenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceStatus::Active => "active",
            SequenceStatus::Paused => "paused",
            SequenceStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SequenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SequenceStatus::Active),
            "paused" => Ok(SequenceStatus::Paused),
            "completed" => Ok(SequenceStatus::Completed),
            other => Err(Error::Internal(format!("Unknown sequence status: {}", other))),
        }
    }
}

/// A single queued send (`scheduled_emails` row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEmail {
    pub id: String,
    pub sequence_id: Option<String>,
    pub lead_id: Option<String>,
    /// Recipients, comma-separated as stored
    pub to: String,
    pub subject: String,
    pub html_content: Option<String>,
    pub text_content: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub status: EmailStatus,
    pub resend_id: Option<String>,
    pub error: Option<String>,
    pub step_number: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    /// Failed row this one re-sends
    pub retry_of: Option<String>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledEmail {
    /// Recipient list split out of the stored column
    pub fn recipients(&self) -> Vec<String> {
        self.to
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.try_get("status")?;
        let metadata: Option<String> = row.try_get("metadata")?;
        let metadata = metadata
            .map(|m| serde_json::from_str(&m))
            .transpose()
            .map_err(|e| Error::Internal(format!("Failed to deserialize metadata: {}", e)))?;
        let scheduled_for: String = row.try_get("scheduled_for")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            sequence_id: row.try_get("sequence_id")?,
            lead_id: row.try_get("lead_id")?,
            to: row.try_get("to_address")?,
            subject: row.try_get("subject")?,
            html_content: row.try_get("html_content")?,
            text_content: row.try_get("text_content")?,
            scheduled_for: time::from_db(&scheduled_for)?,
            status: status.parse()?,
            resend_id: row.try_get("resend_id")?,
            error: row.try_get("error")?,
            step_number: row.try_get("step_number")?,
            metadata,
            retry_of: row.try_get("retry_of")?,
            attempted_at: time::from_db_opt(row.try_get("attempted_at")?)?,
            sent_at: time::from_db_opt(row.try_get("sent_at")?)?,
            created_at: time::from_db(&created_at)?,
            updated_at: time::from_db(&updated_at)?,
        })
    }
}

/// An ordered set of time-delayed emails for one lead (`email_sequences` row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSequence {
    pub id: String,
    pub lead_id: String,
    pub sequence_type: String,
    pub current_step: i64,
    pub total_steps: i64,
    pub status: SequenceStatus,
    pub metadata: Option<serde_json::Value>,
    pub last_email_sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailSequence {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.try_get("status")?;
        let metadata: Option<String> = row.try_get("metadata")?;
        let metadata = metadata
            .map(|m| serde_json::from_str(&m))
            .transpose()
            .map_err(|e| Error::Internal(format!("Failed to deserialize metadata: {}", e)))?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            lead_id: row.try_get("lead_id")?,
            sequence_type: row.try_get("sequence_type")?,
            current_step: row.try_get("current_step")?,
            total_steps: row.try_get("total_steps")?,
            status: status.parse()?,
            metadata,
            last_email_sent_at: time::from_db_opt(row.try_get("last_email_sent_at")?)?,
            completed_at: time::from_db_opt(row.try_get("completed_at")?)?,
            created_at: time::from_db(&created_at)?,
            updated_at: time::from_db(&updated_at)?,
        })
    }
}

/// Row counts per email status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
    pub cancelled: i64,
}
