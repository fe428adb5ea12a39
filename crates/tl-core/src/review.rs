//! # Review Outcome Processor
//!
//! Resolves a claimed queue item. Inside the item's critical section it
//! archives the resolution, drops the item from the live stores and updates
//! the tipster's reputation. The archive write comes first so that a failed
//! write leaves nothing half-applied; once it succeeds the resolution stands,
//! and later repository writes only log on failure. Lead creation happens
//! after the lock is dropped, on its own task, and never affects the decision.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{EngineConfig, LeadConfig};
use crate::error::{AppError, Result};
use crate::models::{
    CaseId, LeadId, LeadRequest, QueueStatus, ResolutionRecord, ReviewDecision, ReviewOutcome,
    ReviewSubmission, ScoreTarget, Sighting, Tip,
};
use crate::queue::QueueManager;
use crate::reputation::TipsterLedger;
use crate::store::{SightingLog, TipStore, VerificationStore};
use crate::traits::{DecisionArchive, LeadSink, TriageRepository};

/// Best-effort lead creation with bounded exponential backoff.
#[derive(Clone)]
pub struct LeadDispatcher {
    sink: Arc<dyn LeadSink>,
    config: LeadConfig,
}

impl LeadDispatcher {
    pub fn new(sink: Arc<dyn LeadSink>, config: LeadConfig) -> Self {
        Self { sink, config }
    }

    /// Fires the request on a background task. The handle is only useful to tests.
    pub fn dispatch(&self, case_id: CaseId, request: LeadRequest) -> JoinHandle<Option<LeadId>> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.deliver(case_id, &request).await.ok() })
    }

    /// `base * 2^(attempt - 1)`, saturating instead of overflowing.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.config.base_backoff_ms.saturating_mul(factor))
    }

    /// Retries only `DownstreamUnavailable`; anything else is final.
    pub async fn deliver(&self, case_id: CaseId, request: &LeadRequest) -> Result<LeadId> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.sink.create_lead(case_id, &request.title, &request.description).await {
                Ok(lead_id) => {
                    info!("lead {} created for case {} (attempt {})", lead_id, case_id, attempts);
                    return Ok(lead_id);
                }
                Err(err @ AppError::DownstreamUnavailable(_)) if attempts < max_attempts => {
                    warn!(
                        "lead creation for case {} failed (attempt {}/{}): {}",
                        case_id, attempts, max_attempts, err
                    );
                }
                Err(err) => {
                    error!("giving up on lead for case {} after {} attempts: {}", case_id, attempts, err);
                    return Err(err);
                }
            }

            tokio::time::sleep(self.backoff(attempts)).await;
        }
    }
}

pub struct ReviewProcessor {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) queue: Arc<QueueManager>,
    pub(crate) tips: Arc<TipStore>,
    pub(crate) verifications: Arc<VerificationStore>,
    pub(crate) ledger: Arc<TipsterLedger>,
    pub(crate) sightings: Arc<SightingLog>,
    pub(crate) archive: Arc<dyn DecisionArchive>,
    pub(crate) repository: Arc<dyn TriageRepository>,
    pub(crate) leads: LeadDispatcher,
}

impl ReviewProcessor {
    fn validate(&self, submission: &ReviewSubmission) -> Result<()> {
        if submission.reviewer_id.trim().is_empty() {
            return Err(AppError::Validation("reviewer id is required".into()));
        }
        if submission.override_score.is_some_and(|score| score > 100) {
            return Err(AppError::Validation("override score must be between 0 and 100".into()));
        }
        let max_notes = self.config.intake.max_notes_chars;
        if submission.notes.as_deref().is_some_and(|n| n.chars().count() > max_notes) {
            return Err(AppError::Validation(format!("notes exceed {max_notes} characters")));
        }
        if submission.partial && submission.outcome != ReviewOutcome::Verified {
            return Err(AppError::Validation("only a verified outcome can be partial".into()));
        }
        Ok(())
    }

    fn lead_request(submission: &ReviewSubmission, tip: &Tip) -> Option<LeadRequest> {
        if !submission.create_lead || submission.outcome != ReviewOutcome::Verified {
            return None;
        }
        let title = submission
            .lead_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Verified tip {}", tip.id));
        let mut description = tip.content.clone();
        if let Some(notes) = submission.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            description.push_str("\n\nReviewer notes: ");
            description.push_str(notes);
        }
        Some(LeadRequest { title, description })
    }

    /// Resolves the item once. Later calls return the stored decision.
    pub async fn process(&self, submission: ReviewSubmission, now: DateTime<Utc>) -> Result<ReviewDecision> {
        self.validate(&submission)?;
        let item_id = submission.queue_item_id;

        let mut slot = match self.queue.lock(item_id).await {
            Ok(slot) => slot,
            Err(AppError::NotFound(..)) => {
                let record = self
                    .archive
                    .find_by_item(item_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("queue item", item_id))?;
                debug!("queue item {} is archived; returning decision {}", item_id, record.decision.id);
                return Ok(record.decision);
            }
            Err(err) => return Err(err),
        };
        if let Some(prior) = &slot.decision {
            debug!("queue item {} already resolved; returning decision {}", item_id, prior.id);
            return Ok(prior.clone());
        }
        match slot.item.claimed_by.as_deref() {
            Some(claimant) if claimant == submission.reviewer_id => {}
            Some(claimant) => {
                return Err(AppError::Conflict(format!(
                    "queue item {item_id} is claimed by {claimant}"
                )))
            }
            None => {
                return Err(AppError::Conflict(format!(
                    "queue item {item_id} must be claimed before review"
                )))
            }
        }

        let tip = self.tips.get(slot.item.tip_id)?;
        let mut verification = self.verifications.get(tip.id)?;
        if let Some(score) = submission.override_score {
            verification.apply_override(ScoreTarget::Credibility, score, &submission.reviewer_id, now);
        }

        let decision = ReviewDecision {
            id: Uuid::now_v7(),
            queue_item_id: item_id,
            tip_id: tip.id,
            reviewer_id: submission.reviewer_id.clone(),
            outcome: submission.outcome,
            override_score: submission.override_score,
            notes: submission.notes.clone(),
            partial: submission.partial,
            lead_request: Self::lead_request(&submission, &tip),
            decided_at: now,
        };

        let mut archived_item = slot.item.clone();
        archived_item.sla_breached = archived_item.is_breached_at(now);
        archived_item.status = QueueStatus::Resolved;
        archived_item.resolved_at = Some(now);
        archived_item.credibility_score = verification.credibility_score;
        let record = ResolutionRecord {
            item: archived_item,
            decision: decision.clone(),
            verification: verification.clone(),
        };
        if let Err(err) = self.archive.archive(&record).await {
            error!("archiving resolution of queue item {} failed: {}", item_id, err);
            return Err(err);
        }

        if let Err(err) = self.repository.remove_open_item(item_id).await {
            // Startup drops open rows that are already archived.
            error!("dropping open queue item {} from the repository failed: {}", item_id, err);
        }

        let tipster_id = slot.item.tipster_id.clone();
        self.verifications.remove(tip.id);
        self.tips.close(tip.id);
        self.queue.resolve(&mut slot, decision.clone(), now);
        self.ledger.apply_outcome(
            &tipster_id,
            tip.id,
            decision.outcome,
            decision.partial,
            verification.high_risk_case,
            now,
        );
        if decision.outcome == ReviewOutcome::Verified {
            let sighting = Sighting {
                tip_id: tip.id,
                point: tip.point(),
                at: tip.observed_at(),
            };
            if self.sightings.record(tip.case_id, sighting.clone()) {
                if let Err(err) = self.repository.record_sighting(tip.case_id, &sighting).await {
                    error!("saving sighting from tip {} failed: {}", tip.id, err);
                }
            }
        }
        drop(slot);

        if let Err(err) = self.ledger.persist(&tipster_id, self.repository.as_ref()).await {
            error!("saving tipster {} failed: {}", tipster_id, err);
        }

        info!(
            "queue item {} resolved as {:?} by {}",
            item_id, decision.outcome, decision.reviewer_id
        );
        if let Some(request) = decision.lead_request.clone() {
            self.leads.dispatch(tip.case_id, request);
        }
        Ok(decision)
    }
}
