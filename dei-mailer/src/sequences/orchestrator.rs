//! Sequence Orchestrator
//!
//! Enrolls leads into nurture sequences and drives the sequence lifecycle:
//!
//! ```text
//! start ──► active ◄──► paused
//!              │           │
//!              └──► completed ◄┘
//! ```
//!
//! Enrollment renders every step up front and inserts the sequence row and
//! all of its scheduled emails in one transaction. Sending is left to the
//! scheduler. Pause, resume and complete only change the sequence status;
//! they never touch scheduled emails, which an operator cancels one by one.

use super::registry::SequenceRegistry;
use super::template::TemplateData;
use crate::store::{emails, sequences, NewEmailSequence, NewScheduledEmail};
use chrono::{DateTime, Utc};
use dei_common::db::{EmailSequence, ScheduledEmail, SequenceStatus};
use dei_common::{time, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// Enrollment request for one lead
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSequence {
    pub lead_id: String,
    /// Sequence id (`gym-nurture`) or vertical (`gym`)
    pub sequence: String,
    pub email: String,
    pub contact_name: String,
    pub company_name: String,
    pub estimated_revenue: f64,
}

/// A sequence with its scheduled emails
#[derive(Debug, Clone, Serialize)]
pub struct SequenceStatusView {
    pub sequence: EmailSequence,
    pub emails: Vec<ScheduledEmail>,
}

#[derive(Clone)]
pub struct SequenceOrchestrator {
    pool: SqlitePool,
    registry: Arc<SequenceRegistry>,
}

impl SequenceOrchestrator {
    pub fn new(pool: SqlitePool, registry: Arc<SequenceRegistry>) -> Self {
        Self { pool, registry }
    }

    pub fn registry(&self) -> &SequenceRegistry {
        &self.registry
    }

    pub async fn start_sequence(&self, request: &StartSequence) -> Result<SequenceStatusView> {
        self.start_sequence_at(request, time::now()).await
    }

    /// Enroll a lead with step delays counted from `now`
    pub async fn start_sequence_at(
        &self,
        request: &StartSequence,
        now: DateTime<Utc>,
    ) -> Result<SequenceStatusView> {
        if request.lead_id.trim().is_empty() {
            return Err(Error::InvalidInput("lead_id is required".to_string()));
        }
        if request.email.trim().is_empty() {
            return Err(Error::InvalidInput("email is required".to_string()));
        }

        let definition = self.registry.resolve(&request.sequence).ok_or_else(|| {
            Error::InvalidInput(format!("Unknown sequence or vertical: {}", request.sequence))
        })?;

        let data = TemplateData {
            contact_name: request.contact_name.clone(),
            company_name: request.company_name.clone(),
            estimated_revenue: request.estimated_revenue,
            vertical: definition.vertical.clone(),
        };
        let steps = definition
            .render(&data)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let metadata = serde_json::to_value(&data)
            .map_err(|e| Error::Internal(format!("Failed to serialize metadata: {}", e)))?;

        let mut tx = self.pool.begin().await?;

        if let Some(open) = sequences::open_for_lead(&mut *tx, &request.lead_id).await? {
            return Err(Error::InvalidState(format!(
                "Lead {} already has a {} sequence ({})",
                request.lead_id, open.status, open.sequence_type
            )));
        }

        let sequence = sequences::insert_sequence(
            &mut *tx,
            &NewEmailSequence {
                lead_id: request.lead_id.clone(),
                sequence_type: definition.id.clone(),
                total_steps: definition.total_steps() as i64,
                metadata: Some(metadata),
            },
            now,
        )
        .await?;

        let mut scheduled = Vec::with_capacity(steps.len());
        for step in steps {
            let new = NewScheduledEmail {
                sequence_id: Some(sequence.id.clone()),
                lead_id: Some(request.lead_id.clone()),
                to: vec![request.email.trim().to_string()],
                subject: step.subject,
                html_content: step.html,
                text_content: step.text,
                scheduled_for: now + chrono::Duration::days(i64::from(step.delay_days)),
                step_number: Some(i64::from(step.step_number)),
                metadata: Some(json!({
                    "vertical": definition.vertical,
                    "step_number": step.step_number,
                })),
                retry_of: None,
            };
            scheduled.push(emails::insert_email(&mut *tx, &new, now).await?);
        }

        tx.commit().await?;

        info!(
            lead_id = %request.lead_id,
            sequence_id = %sequence.id,
            sequence_type = %sequence.sequence_type,
            steps = scheduled.len(),
            "Started email sequence"
        );

        Ok(SequenceStatusView {
            sequence,
            emails: scheduled,
        })
    }

    /// active → paused
    pub async fn pause_sequence(&self, lead_id: &str) -> Result<EmailSequence> {
        self.transition(lead_id, SequenceStatus::Active, SequenceStatus::Paused)
            .await
    }

    /// paused → active
    pub async fn resume_sequence(&self, lead_id: &str) -> Result<EmailSequence> {
        self.transition(lead_id, SequenceStatus::Paused, SequenceStatus::Active)
            .await
    }

    /// active or paused → completed, stamping `completed_at`
    pub async fn complete_sequence(&self, lead_id: &str) -> Result<EmailSequence> {
        let completed = sequences::complete_for_lead(&self.pool, lead_id, time::now()).await?;

        match completed.into_iter().next() {
            Some(sequence) => {
                info!(lead_id, sequence_id = %sequence.id, "Completed email sequence");
                Ok(sequence)
            }
            None => Err(self.transition_error(lead_id, "complete").await),
        }
    }

    /// The lead's most recent sequence and its emails
    pub async fn sequence_status(&self, lead_id: &str) -> Result<SequenceStatusView> {
        let sequence = sequences::latest_for_lead(&self.pool, lead_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No sequence for lead {}", lead_id)))?;
        let emails = emails::list_for_sequence(&self.pool, &sequence.id).await?;

        Ok(SequenceStatusView { sequence, emails })
    }

    async fn transition(
        &self,
        lead_id: &str,
        from: SequenceStatus,
        to: SequenceStatus,
    ) -> Result<EmailSequence> {
        let updated =
            sequences::transition_for_lead(&self.pool, lead_id, from, to, time::now()).await?;

        match updated.into_iter().next() {
            Some(sequence) => {
                info!(lead_id, sequence_id = %sequence.id, status = %to, "Sequence status changed");
                Ok(sequence)
            }
            None => Err(self.transition_error(lead_id, verb(to)).await),
        }
    }

    /// NotFound when the lead never had a sequence, InvalidState otherwise
    async fn transition_error(&self, lead_id: &str, action: &str) -> Error {
        match sequences::latest_for_lead(&self.pool, lead_id).await {
            Ok(Some(latest)) => Error::InvalidState(format!(
                "Cannot {} sequence for lead {}: sequence is {}",
                action, lead_id, latest.status
            )),
            Ok(None) => Error::NotFound(format!("No sequence for lead {}", lead_id)),
            Err(e) => e,
        }
    }
}

fn verb(to: SequenceStatus) -> &'static str {
    match to {
        SequenceStatus::Active => "resume",
        SequenceStatus::Paused => "pause",
        SequenceStatus::Completed => "complete",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dei_common::db::{init_memory_database, EmailStatus};

    async fn orchestrator() -> SequenceOrchestrator {
        let pool = init_memory_database().await.unwrap();
        let registry = Arc::new(SequenceRegistry::builtin().unwrap());
        SequenceOrchestrator::new(pool, registry)
    }

    fn request(lead_id: &str, sequence: &str) -> StartSequence {
        StartSequence {
            lead_id: lead_id.to_string(),
            sequence: sequence.to_string(),
            email: "owner@irontemple.example".to_string(),
            contact_name: "Dana".to_string(),
            company_name: "Iron Temple".to_string(),
            estimated_revenue: 1800.0,
        }
    }

    #[tokio::test]
    async fn test_start_schedules_every_step() {
        let orchestrator = orchestrator().await;
        let now = time::now();
        let view = orchestrator
            .start_sequence_at(&request("lead-1", "gym-nurture"), now)
            .await
            .unwrap();

        assert_eq!(view.sequence.total_steps, 4);
        assert_eq!(view.sequence.status, SequenceStatus::Active);
        assert_eq!(view.emails.len(), 4);
        assert!(view
            .emails
            .windows(2)
            .all(|pair| pair[0].scheduled_for < pair[1].scheduled_for));
        assert_eq!(view.emails[0].scheduled_for, time::from_db(&time::to_db(now)).unwrap());
        assert_eq!(view.emails[3].step_number, Some(4));
        assert!(view.emails.iter().all(|e| e.status == EmailStatus::Pending));
    }

    #[tokio::test]
    async fn test_start_by_vertical() {
        let orchestrator = orchestrator().await;
        let view = orchestrator
            .start_sequence(&request("lead-1", "wellness"))
            .await
            .unwrap();
        assert_eq!(view.sequence.sequence_type, "wellness-nurture");
        assert_eq!(view.emails[0].metadata.as_ref().unwrap()["vertical"], "wellness");
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_sequence() {
        let orchestrator = orchestrator().await;
        let err = orchestrator
            .start_sequence(&request("lead-1", "bowling"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_second_open_sequence() {
        let orchestrator = orchestrator().await;
        orchestrator.start_sequence(&request("lead-1", "gym")).await.unwrap();

        let err = orchestrator
            .start_sequence(&request("lead-1", "fitness"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // a completed sequence does not block a new one
        orchestrator.complete_sequence("lead-1").await.unwrap();
        orchestrator.start_sequence(&request("lead-1", "fitness")).await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_resume() {
        let orchestrator = orchestrator().await;
        orchestrator.start_sequence(&request("lead-1", "gym")).await.unwrap();

        let paused = orchestrator.pause_sequence("lead-1").await.unwrap();
        assert_eq!(paused.status, SequenceStatus::Paused);
        assert!(matches!(
            orchestrator.pause_sequence("lead-1").await,
            Err(Error::InvalidState(_))
        ));

        let resumed = orchestrator.resume_sequence("lead-1").await.unwrap();
        assert_eq!(resumed.status, SequenceStatus::Active);
    }

    #[tokio::test]
    async fn test_unknown_lead_is_not_found() {
        let orchestrator = orchestrator().await;
        assert!(matches!(
            orchestrator.pause_sequence("nobody").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.complete_sequence("nobody").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.sequence_status("nobody").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_only_changes_status() {
        let orchestrator = orchestrator().await;
        orchestrator.start_sequence(&request("lead-1", "gym")).await.unwrap();
        orchestrator.pause_sequence("lead-1").await.unwrap();

        let sequence = orchestrator.complete_sequence("lead-1").await.unwrap();
        assert_eq!(sequence.status, SequenceStatus::Completed);
        assert!(sequence.completed_at.is_some());

        let view = orchestrator.sequence_status("lead-1").await.unwrap();
        assert!(view.emails.iter().all(|e| e.status == EmailStatus::Pending));

        assert!(matches!(
            orchestrator.complete_sequence("lead-1").await,
            Err(Error::InvalidState(_))
        ));
    }
}
