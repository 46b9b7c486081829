//! Database initialization
//!
//! Creates the database file on first run, creates tables idempotently and
//! then runs versioned migrations. Connection pragmas are part of the
//! connect options so every pooled connection carries them.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on a locked database before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL allows readers alongside the single writer (processor + API)
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    prepare_schema(&pool).await?;

    Ok(pool)
}

/// Initialize a private in-memory database.
///
/// Limited to one connection: every SQLite in-memory connection is its own
/// database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    prepare_schema(&pool).await?;

    Ok(pool)
}

async fn prepare_schema(pool: &SqlitePool) -> Result<()> {
    // Idempotent - safe to call multiple times
    create_schema_version_table(pool).await?;
    create_email_sequences_table(pool).await?;
    create_scheduled_emails_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the email_sequences table
///
/// One row per enrollment of a lead into a nurture sequence.
pub async fn create_email_sequences_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_sequences (
            id TEXT PRIMARY KEY,
            lead_id TEXT NOT NULL,
            sequence_type TEXT NOT NULL,
            current_step INTEGER NOT NULL DEFAULT 0,
            total_steps INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'paused', 'completed')),
            metadata TEXT,
            last_email_sent_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_email_sequences_lead ON email_sequences(lead_id, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the scheduled_emails table
///
/// Rows are never deleted; terminal statuses are `sent`, `failed`, `cancelled`.
pub async fn create_scheduled_emails_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_emails (
            id TEXT PRIMARY KEY,
            sequence_id TEXT REFERENCES email_sequences(id),
            lead_id TEXT,
            to_address TEXT NOT NULL,
            subject TEXT NOT NULL,
            html_content TEXT,
            text_content TEXT,
            scheduled_for TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'sent', 'failed', 'cancelled')),
            resend_id TEXT,
            error TEXT,
            step_number INTEGER,
            metadata TEXT,
            attempted_at TEXT,
            sent_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scheduled_emails_due ON scheduled_emails(status, scheduled_for)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scheduled_emails_sequence ON scheduled_emails(sequence_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
