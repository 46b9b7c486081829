//! Background polling loop
//!
//! Each tick fails rows left in `processing` by a crashed run, then sends
//! whatever is due. Runs until the cancellation token fires.

use crate::scheduler::Scheduler;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct Worker {
    scheduler: Scheduler,
    poll_interval: Duration,
    stale_after: Duration,
}

impl Worker {
    pub fn new(scheduler: Scheduler, poll_interval: Duration, stale_after: Duration) -> Self {
        Self {
            scheduler,
            poll_interval,
            stale_after,
        }
    }

    pub async fn run(self, cancel_token: CancellationToken) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Email worker started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }

        info!("Email worker stopped");
    }

    /// One recovery + processing pass; errors are logged, never fatal
    pub async fn tick(&self) {
        if let Err(e) = self.scheduler.recover_stale(self.stale_after).await {
            error!(error = %e, "Stale email recovery failed");
        }
        if let Err(e) = self.scheduler.process_scheduled_emails().await {
            error!(error = %e, "Scheduled email processing failed");
        }
    }
}
