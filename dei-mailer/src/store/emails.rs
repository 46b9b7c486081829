//! `scheduled_emails` queries
//!
//! Every status change is a conditional update on the expected current
//! status, so a row can only move along
//! `pending -> processing -> {sent | failed}` or `pending -> cancelled`.

use chrono::{DateTime, Utc};
use dei_common::db::{EmailStatus, ScheduledEmail, SchedulerStats};
use dei_common::{time, Error, Result};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;

/// Values for a new `pending` row
#[derive(Debug, Clone, Default)]
pub struct NewScheduledEmail {
    pub sequence_id: Option<String>,
    pub lead_id: Option<String>,
    pub to: Vec<String>,
    pub subject: String,
    pub html_content: Option<String>,
    pub text_content: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub step_number: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub retry_of: Option<String>,
}

/// Insert a `pending` row
pub async fn insert_email<'e, E>(
    executor: E,
    new: &NewScheduledEmail,
    now: DateTime<Utc>,
) -> Result<ScheduledEmail>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = Uuid::new_v4().to_string();
    let metadata = new
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize metadata: {}", e)))?;
    let now = time::to_db(now);

    let row = sqlx::query(
        r#"
        INSERT INTO scheduled_emails (
            id, sequence_id, lead_id, to_address, subject, html_content, text_content,
            scheduled_for, status, step_number, metadata, retry_of, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(&new.sequence_id)
    .bind(&new.lead_id)
    .bind(new.to.join(","))
    .bind(&new.subject)
    .bind(&new.html_content)
    .bind(&new.text_content)
    .bind(time::to_db(new.scheduled_for))
    .bind(new.step_number)
    .bind(&metadata)
    .bind(&new.retry_of)
    .bind(&now)
    .bind(&now)
    .fetch_one(executor)
    .await?;

    ScheduledEmail::from_row(&row)
}

pub async fn get_email(pool: &SqlitePool, id: &str) -> Result<Option<ScheduledEmail>> {
    let row = sqlx::query("SELECT * FROM scheduled_emails WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(ScheduledEmail::from_row).transpose()
}

/// Atomically move up to `limit` due rows from `pending` to `processing`.
///
/// Selection and status change happen in one statement, so concurrent
/// processors never claim the same row. Sequence status is not consulted:
/// every due `pending` row is claimed.
pub async fn claim_due(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<ScheduledEmail>> {
    let now = time::to_db(now);

    let rows = sqlx::query(
        r#"
        UPDATE scheduled_emails
        SET status = 'processing', attempted_at = ?, updated_at = ?
        WHERE status = 'pending'
          AND id IN (
            SELECT id
            FROM scheduled_emails
            WHERE status = 'pending' AND scheduled_for <= ?
            ORDER BY scheduled_for, rowid
            LIMIT ?
          )
        RETURNING *
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    let mut claimed = rows
        .iter()
        .map(ScheduledEmail::from_row)
        .collect::<Result<Vec<_>>>()?;
    // RETURNING order is unspecified
    claimed.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for));
    Ok(claimed)
}

/// `processing -> sent`. Returns false if the row was not processing.
pub async fn mark_sent(
    pool: &SqlitePool,
    id: &str,
    resend_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let now = time::to_db(now);
    let result = sqlx::query(
        r#"
        UPDATE scheduled_emails
        SET status = 'sent', resend_id = ?, sent_at = ?, error = NULL, updated_at = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(resend_id)
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `processing -> failed`. Returns false if the row was not processing.
pub async fn mark_failed(
    pool: &SqlitePool,
    id: &str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE scheduled_emails
        SET status = 'failed', error = ?, updated_at = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(error)
    .bind(time::to_db(now))
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `pending -> cancelled`. Returns false if the row was not pending.
pub async fn cancel_pending(pool: &SqlitePool, id: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scheduled_emails SET status = 'cancelled', updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(time::to_db(now))
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Fail rows claimed at or before `claimed_before` that never finished
pub async fn fail_stale_processing(
    pool: &SqlitePool,
    claimed_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        UPDATE scheduled_emails
        SET status = 'failed', error = 'processing timed out', updated_at = ?
        WHERE status = 'processing' AND attempted_at <= ?
        RETURNING id
        "#,
    )
    .bind(time::to_db(now))
    .bind(time::to_db(claimed_before))
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

pub async fn list_for_sequence(pool: &SqlitePool, sequence_id: &str) -> Result<Vec<ScheduledEmail>> {
    let rows = sqlx::query(
        "SELECT * FROM scheduled_emails WHERE sequence_id = ? ORDER BY scheduled_for, step_number",
    )
    .bind(sequence_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(ScheduledEmail::from_row).collect()
}

pub async fn count_by_status(pool: &SqlitePool) -> Result<SchedulerStats> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM scheduled_emails GROUP BY status")
        .fetch_all(pool)
        .await?;

    let mut stats = SchedulerStats::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let count: i64 = row.try_get("n")?;
        match status.parse::<EmailStatus>()? {
            EmailStatus::Pending => stats.pending = count,
            EmailStatus::Processing => stats.processing = count,
            EmailStatus::Sent => stats.sent = count,
            EmailStatus::Failed => stats.failed = count,
            EmailStatus::Cancelled => stats.cancelled = count,
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dei_common::db::init_memory_database;

    fn new_email(scheduled_for: DateTime<Utc>) -> NewScheduledEmail {
        NewScheduledEmail {
            to: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            subject: "Hello".to_string(),
            text_content: Some("Body".to_string()),
            scheduled_for,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let pool = init_memory_database().await.unwrap();
        let now = Utc::now();

        let email = insert_email(&pool, &new_email(now), now).await.unwrap();
        assert_eq!(email.status, EmailStatus::Pending);
        assert_eq!(email.recipients(), vec!["a@example.com", "b@example.com"]);

        let fetched = get_email(&pool, &email.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, email.id);
        assert!(get_email(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_only_due_rows() {
        let pool = init_memory_database().await.unwrap();
        let now = Utc::now();

        let due = insert_email(&pool, &new_email(now - Duration::minutes(5)), now).await.unwrap();
        let future = insert_email(&pool, &new_email(now + Duration::hours(1)), now).await.unwrap();

        let claimed = claim_due(&pool, now, 100).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due.id);
        assert_eq!(claimed[0].status, EmailStatus::Processing);

        // Second claim finds nothing: the due row is no longer pending
        assert!(claim_due(&pool, now, 100).await.unwrap().is_empty());
        let future = get_email(&pool, &future.id).await.unwrap().unwrap();
        assert_eq!(future.status, EmailStatus::Pending);
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_order() {
        let pool = init_memory_database().await.unwrap();
        let now = Utc::now();

        for minutes in [3, 1, 2] {
            insert_email(&pool, &new_email(now - Duration::minutes(minutes)), now)
                .await
                .unwrap();
        }

        let claimed = claim_due(&pool, now, 2).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed[0].scheduled_for < claimed[1].scheduled_for);
        assert_eq!(claimed[0].scheduled_for.timestamp(), (now - Duration::minutes(3)).timestamp());
    }

    #[tokio::test]
    async fn test_status_updates_are_conditional() {
        let pool = init_memory_database().await.unwrap();
        let now = Utc::now();
        let email = insert_email(&pool, &new_email(now), now).await.unwrap();

        // Not processing yet
        assert!(!mark_sent(&pool, &email.id, "re_1", now).await.unwrap());

        claim_due(&pool, now, 10).await.unwrap();
        assert!(mark_sent(&pool, &email.id, "re_1", now).await.unwrap());
        assert!(!mark_failed(&pool, &email.id, "late", now).await.unwrap());
        assert!(!cancel_pending(&pool, &email.id, now).await.unwrap());

        let sent = get_email(&pool, &email.id).await.unwrap().unwrap();
        assert_eq!(sent.status, EmailStatus::Sent);
        assert_eq!(sent.resend_id.as_deref(), Some("re_1"));
        assert!(sent.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_processing_rows_fail() {
        let pool = init_memory_database().await.unwrap();
        let claimed_at = Utc::now() - Duration::hours(1);
        let email = insert_email(&pool, &new_email(claimed_at), claimed_at).await.unwrap();
        claim_due(&pool, claimed_at, 10).await.unwrap();

        let now = Utc::now();
        let ids = fail_stale_processing(&pool, now - Duration::minutes(15), now)
            .await
            .unwrap();
        assert_eq!(ids, vec![email.id.clone()]);

        let failed = get_email(&pool, &email.id).await.unwrap().unwrap();
        assert_eq!(failed.status, EmailStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("processing timed out"));
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let pool = init_memory_database().await.unwrap();
        let now = Utc::now();
        let a = insert_email(&pool, &new_email(now), now).await.unwrap();
        insert_email(&pool, &new_email(now + Duration::days(1)), now).await.unwrap();
        cancel_pending(&pool, &a.id, now).await.unwrap();

        let stats = count_by_status(&pool).await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.sent, 0);
    }
}
