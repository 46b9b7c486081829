//! dei-mailer library interface
//!
//! Email scheduling and nurture sequencing for Daily Event Insurance
//! partner leads. Exposes the pipeline pieces for the binary and for
//! integration testing.

pub mod api;
pub mod error;
pub mod scheduler;
pub mod sequences;
pub mod store;
pub mod transport;
pub mod worker;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use dei_common::config::TomlConfig;
use scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use transport::{EmailProvider, RetryPolicy, SlidingWindowLimiter, Transport};

/// Name used for config and data directories
pub const APP_NAME: &str = "dei-mailer";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    /// Required bearer token for `POST /api/process`
    pub cron_secret: Option<String>,
    /// Threshold for stale `processing` recovery before each triggered pass
    pub stale_after: Duration,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(scheduler: Scheduler, config: &TomlConfig) -> Self {
        Self {
            scheduler,
            cron_secret: config.scheduler.cron_secret.clone(),
            stale_after: Duration::from_secs(config.scheduler.stale_after_secs),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::process_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wrap `provider` with the configured rate limit and retry policy
pub fn build_transport(config: &TomlConfig, provider: Arc<dyn EmailProvider>) -> Transport {
    Transport::new(
        provider,
        Arc::new(SlidingWindowLimiter::from_config(&config.rate_limit)),
        RetryPolicy::from_config(&config.retry),
    )
}
