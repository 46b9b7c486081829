//! `email_sequences` queries

use chrono::{DateTime, Utc};
use dei_common::db::{EmailSequence, SequenceStatus};
use dei_common::{time, Error, Result};
use sqlx::{Executor, Sqlite, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewEmailSequence {
    pub lead_id: String,
    pub sequence_type: String,
    pub total_steps: i64,
    pub metadata: Option<serde_json::Value>,
}

/// Insert an `active` sequence at step 0
pub async fn insert_sequence<'e, E>(
    executor: E,
    new: &NewEmailSequence,
    now: DateTime<Utc>,
) -> Result<EmailSequence>
where
    E: Executor<'e, Database = Sqlite>,
{
    let metadata = new
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize metadata: {}", e)))?;
    let now = time::to_db(now);

    let row = sqlx::query(
        r#"
        INSERT INTO email_sequences (
            id, lead_id, sequence_type, current_step, total_steps, status, metadata,
            created_at, updated_at
        ) VALUES (?, ?, ?, 0, ?, 'active', ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&new.lead_id)
    .bind(&new.sequence_type)
    .bind(new.total_steps)
    .bind(&metadata)
    .bind(&now)
    .bind(&now)
    .fetch_one(executor)
    .await?;

    EmailSequence::from_row(&row)
}

/// Most recently started sequence for a lead
pub async fn latest_for_lead(pool: &SqlitePool, lead_id: &str) -> Result<Option<EmailSequence>> {
    let row = sqlx::query(
        "SELECT * FROM email_sequences WHERE lead_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
    )
    .bind(lead_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(EmailSequence::from_row).transpose()
}

/// Active or paused sequence for a lead, if any
pub async fn open_for_lead<'e, E>(executor: E, lead_id: &str) -> Result<Option<EmailSequence>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT * FROM email_sequences WHERE lead_id = ? AND status IN ('active', 'paused') LIMIT 1",
    )
    .bind(lead_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(EmailSequence::from_row).transpose()
}

/// Move a lead's sequences from `from` to `to`; returns the updated rows
pub async fn transition_for_lead(
    pool: &SqlitePool,
    lead_id: &str,
    from: SequenceStatus,
    to: SequenceStatus,
    now: DateTime<Utc>,
) -> Result<Vec<EmailSequence>> {
    let rows = sqlx::query(
        "UPDATE email_sequences SET status = ?, updated_at = ? WHERE lead_id = ? AND status = ? RETURNING *",
    )
    .bind(to.as_str())
    .bind(time::to_db(now))
    .bind(lead_id)
    .bind(from.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(EmailSequence::from_row).collect()
}

/// Mark a lead's unfinished sequences completed
pub async fn complete_for_lead(
    pool: &SqlitePool,
    lead_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<EmailSequence>> {
    let now = time::to_db(now);
    let rows = sqlx::query(
        r#"
        UPDATE email_sequences
        SET status = 'completed', completed_at = ?, updated_at = ?
        WHERE lead_id = ? AND status != 'completed'
        RETURNING *
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(lead_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(EmailSequence::from_row).collect()
}

/// Record that `step` was sent; completes the sequence after its last step.
///
/// `current_step` never moves backwards.
pub async fn advance(
    pool: &SqlitePool,
    sequence_id: &str,
    step: i64,
    now: DateTime<Utc>,
) -> Result<Option<EmailSequence>> {
    let now = time::to_db(now);
    let row = sqlx::query(
        r#"
        UPDATE email_sequences
        SET current_step = MAX(current_step, ?),
            last_email_sent_at = ?,
            status = CASE WHEN MAX(current_step, ?) >= total_steps THEN 'completed' ELSE status END,
            completed_at = CASE
                WHEN MAX(current_step, ?) >= total_steps AND completed_at IS NULL THEN ?
                ELSE completed_at
            END,
            updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(step)
    .bind(&now)
    .bind(step)
    .bind(step)
    .bind(&now)
    .bind(&now)
    .bind(sequence_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(EmailSequence::from_row).transpose()
}
