//! Processing trigger and statistics

use axum::{
    extract::State,
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use dei_common::db::SchedulerStats;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::scheduler::ProcessReport;
use crate::AppState;

/// POST /api/process
///
/// Runs one processing pass. When a cron secret is configured the request
/// must carry `Authorization: Bearer <secret>`.
pub async fn process_now(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ProcessReport>> {
    if let Some(secret) = state.cron_secret.as_deref() {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if !presented.is_some_and(|token| secret_matches(token, secret)) {
            warn!("Unauthorized processing trigger");
            return Err(ApiError::Unauthorized(
                "Invalid or missing cron secret".to_string(),
            ));
        }
    }

    state.scheduler.recover_stale(state.stale_after).await?;
    let report = state.scheduler.process_scheduled_emails().await?;
    info!(
        processed = report.processed,
        sent = report.sent,
        failed = report.failed,
        "Processing triggered via API"
    );
    Ok(Json(report))
}

/// Constant-time for equal-length inputs
fn secret_matches(presented: &str, secret: &str) -> bool {
    presented.as_bytes().ct_eq(secret.as_bytes()).into()
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<SchedulerStats>> {
    Ok(Json(state.scheduler.scheduler_stats().await?))
}

pub fn process_routes() -> Router<AppState> {
    Router::new()
        .route("/api/process", post(process_now))
        .route("/api/stats", get(stats))
}
