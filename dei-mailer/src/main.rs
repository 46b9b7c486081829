//! DEI Mailer (dei-mailer) - Main entry point
//!
//! Email scheduling and nurture-sequence service. `serve` runs the polling
//! worker and the operational HTTP API; the other subcommands perform one
//! operator action against the database and exit.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dei_common::config::{resolve_config_path, TomlConfig};
use dei_common::db::init_database;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dei_mailer::scheduler::{ScheduleRequest, Scheduler};
use dei_mailer::sequences::{SequenceOrchestrator, SequenceRegistry, StartSequence};
use dei_mailer::transport::{EmailProvider, ResendProvider, UnconfiguredProvider};
use dei_mailer::worker::Worker;
use dei_mailer::{build_router, build_transport, AppState, APP_NAME};

/// Command-line arguments for dei-mailer
#[derive(Parser, Debug)]
#[command(name = "dei-mailer")]
#[command(about = "Email scheduling and nurture sequences for Daily Event Insurance")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(short, long, global = true, env = "DEI_DATABASE_PATH")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the polling worker and HTTP API
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long, env = "DEI_MAILER_PORT")]
        port: Option<u16>,
    },

    /// Send everything currently due, then exit
    Process,

    /// Schedule a standalone email
    Schedule {
        /// Recipient; repeat or comma-separate for several
        #[arg(long, required = true, value_delimiter = ',')]
        to: Vec<String>,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        html: Option<String>,
        #[arg(long)]
        text: Option<String>,
        /// RFC 3339 send time; now when omitted
        #[arg(long)]
        send_at: Option<DateTime<Utc>>,
        #[arg(long)]
        lead_id: Option<String>,
    },

    /// Enroll a lead in a nurture sequence
    StartSequence {
        lead_id: String,
        /// Sequence id or vertical (gym, wellness, ski-resort, fitness)
        #[arg(long)]
        sequence: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        contact_name: String,
        #[arg(long)]
        company_name: String,
        /// Estimated monthly revenue in dollars
        #[arg(long, default_value_t = 0.0)]
        estimated_revenue: f64,
    },

    PauseSequence {
        lead_id: String,
    },

    ResumeSequence {
        lead_id: String,
    },

    /// Complete a lead's sequence and cancel its unsent emails
    CompleteSequence {
        lead_id: String,
    },

    /// Show a lead's latest sequence and its emails
    SequenceStatus {
        lead_id: String,
    },

    /// Cancel a pending email
    Cancel {
        id: String,
    },

    /// Queue a failed email again
    Retry {
        id: String,
    },

    /// Show one scheduled email
    Status {
        id: String,
    },

    /// Email counts per status
    Stats,

    /// Fail emails stuck in processing
    Recover {
        /// Threshold in seconds (defaults to scheduler.stale_after_secs)
        #[arg(long)]
        older_than_secs: Option<u64>,
    },

    /// List the sequence catalog
    Sequences,
}

impl Command {
    fn sends_email(&self) -> bool {
        matches!(self, Command::Serve { .. } | Command::Process)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), APP_NAME);
    let mut config = TomlConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;
    config.apply_env_overrides();

    // Initialize tracing; RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        build_timestamp = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting dei-mailer"
    );
    match &config_path {
        Some(path) if path.exists() => info!("Configuration: {}", path.display()),
        Some(path) => warn!("Config file {} not found, using defaults", path.display()),
        None => warn!("No config file found, using defaults"),
    }

    let registry = Arc::new(
        SequenceRegistry::load_or_builtin(config.sequences_file.as_deref())
            .context("Failed to load sequence catalog")?,
    );

    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| config.database_path(APP_NAME));
    info!("Database: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let provider: Arc<dyn EmailProvider> = match ResendProvider::new(&config.resend) {
        Ok(provider) => Arc::new(provider),
        Err(e) if args.command.sends_email() => bail!("{}", e),
        Err(_) => Arc::new(UnconfiguredProvider),
    };
    let scheduler = Scheduler::new(
        pool.clone(),
        build_transport(&config, provider),
        config.scheduler.batch_size,
    );
    let orchestrator = SequenceOrchestrator::new(pool.clone(), registry);

    run_command(args.command, &config, pool, scheduler, orchestrator).await
}

async fn run_command(
    command: Command,
    config: &TomlConfig,
    pool: SqlitePool,
    scheduler: Scheduler,
    orchestrator: SequenceOrchestrator,
) -> Result<()> {
    match command {
        Command::Serve { port } => serve(config, port, scheduler).await?,
        Command::Process => print_json(&scheduler.process_scheduled_emails().await?)?,
        Command::Schedule {
            to,
            subject,
            html,
            text,
            send_at,
            lead_id,
        } => {
            let email = scheduler
                .schedule_email(ScheduleRequest {
                    to,
                    subject,
                    html,
                    text,
                    send_at,
                    lead_id,
                    metadata: None,
                })
                .await?;
            print_json(&email)?;
        }
        Command::StartSequence {
            lead_id,
            sequence,
            email,
            contact_name,
            company_name,
            estimated_revenue,
        } => {
            let view = orchestrator
                .start_sequence(&StartSequence {
                    lead_id,
                    sequence,
                    email,
                    contact_name,
                    company_name,
                    estimated_revenue,
                })
                .await?;
            print_json(&view)?;
        }
        Command::PauseSequence { lead_id } => {
            print_json(&orchestrator.pause_sequence(&lead_id).await?)?
        }
        Command::ResumeSequence { lead_id } => {
            print_json(&orchestrator.resume_sequence(&lead_id).await?)?
        }
        Command::CompleteSequence { lead_id } => {
            print_json(&orchestrator.complete_sequence(&lead_id).await?)?
        }
        Command::SequenceStatus { lead_id } => {
            print_json(&orchestrator.sequence_status(&lead_id).await?)?
        }
        Command::Cancel { id } => print_json(&scheduler.cancel_scheduled_email(&id).await?)?,
        Command::Retry { id } => print_json(&scheduler.retry_failed_email(&id).await?)?,
        Command::Status { id } => print_json(&scheduler.scheduled_email_status(&id).await?)?,
        Command::Stats => print_json(&scheduler.scheduler_stats().await?)?,
        Command::Recover { older_than_secs } => {
            let secs = older_than_secs.unwrap_or(config.scheduler.stale_after_secs);
            let ids = scheduler.recover_stale(Duration::from_secs(secs)).await?;
            print_json(&serde_json::json!({ "failed": ids }))?;
        }
        Command::Sequences => print_json(&orchestrator.registry().list())?,
    }

    pool.close().await;
    Ok(())
}

async fn serve(config: &TomlConfig, port: Option<u16>, scheduler: Scheduler) -> Result<()> {
    let cancel_token = CancellationToken::new();

    let worker = Worker::new(
        scheduler.clone(),
        Duration::from_secs(config.scheduler.poll_interval_secs),
        Duration::from_secs(config.scheduler.stale_after_secs),
    );
    let worker_handle = tokio::spawn(worker.run(cancel_token.clone()));

    let app = build_router(AppState::new(scheduler, config));

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.port)));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    let shutdown_token = cancel_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_token.cancel();
        })
        .await
        .context("Server error")?;

    cancel_token.cancel();
    worker_handle.await.context("Worker task panicked")?;

    info!("Shutdown complete");
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
