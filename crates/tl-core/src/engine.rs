//! # Triage Engine
//!
//! Facade over the pipeline: intake validation, signal extraction,
//! aggregation, duplicate/hoax detection, classification and queueing, plus
//! the reviewer, moderation and dashboard operations. Every public method
//! returns a typed [`AppError`] instead of panicking.
//!
//! Live state is mirrored to a [`TriageRepository`] and rebuilt from it by
//! [`TriageEngine::restore`]. Resolved items live only in the
//! [`DecisionArchive`]; lookups that miss the live queue fall back to it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::classifier::{self, ClassificationInput};
use crate::config::EngineConfig;
use crate::detector;
use crate::error::{AppError, Result};
use crate::models::{
    CaseId, CaseRiskProfile, OpenItem, QueueItem, QueueItemId, QueueQuery, QueueStats, QueueStatus,
    ReviewDecision, ReviewOutcome, ReviewSubmission, ScoreField, ScoreTarget, Tip, TipId, TipVerification,
    TipsterAction, TipsterId, TipsterProfile, TipsterQuery,
};
use crate::queue::{QueueManager, Slot};
use crate::reputation::TipsterLedger;
use crate::review::{LeadDispatcher, ReviewProcessor};
use crate::scoring;
use crate::signals::{self, SignalContext};
use crate::store::{SightingLog, TipStore, VerificationStore};
use crate::traits::{CaseDirectory, DecisionArchive, LeadSink, TipsterIdentity, TriageRepository};

/// External collaborators the engine talks to.
pub struct EnginePorts {
    pub cases: Arc<dyn CaseDirectory>,
    pub leads: Arc<dyn LeadSink>,
    pub identity: Arc<dyn TipsterIdentity>,
    pub archive: Arc<dyn DecisionArchive>,
    pub repository: Arc<dyn TriageRepository>,
}

/// What [`TriageEngine::restore`] brought back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreSummary {
    pub tipsters: usize,
    pub open_items: usize,
    /// Open rows whose resolution was archived before the row was dropped.
    pub already_resolved: usize,
    pub sightings: usize,
}

pub struct TriageEngine {
    config: Arc<EngineConfig>,
    queue: Arc<QueueManager>,
    tips: Arc<TipStore>,
    verifications: Arc<VerificationStore>,
    ledger: Arc<TipsterLedger>,
    sightings: Arc<SightingLog>,
    cases: Arc<dyn CaseDirectory>,
    identity: Arc<dyn TipsterIdentity>,
    archive: Arc<dyn DecisionArchive>,
    repository: Arc<dyn TriageRepository>,
    review: ReviewProcessor,
}

impl TriageEngine {
    /// Builds an engine. Fails if the configuration is inconsistent.
    pub fn new(config: EngineConfig, ports: EnginePorts) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let queue = Arc::new(QueueManager::new());
        let tips = Arc::new(TipStore::new(config.duplicate.lookback));
        let verifications = Arc::new(VerificationStore::default());
        let ledger = Arc::new(TipsterLedger::new(config.reputation.clone()));
        let sightings = Arc::new(SightingLog::default());

        let review = ReviewProcessor {
            config: Arc::clone(&config),
            queue: Arc::clone(&queue),
            tips: Arc::clone(&tips),
            verifications: Arc::clone(&verifications),
            ledger: Arc::clone(&ledger),
            sightings: Arc::clone(&sightings),
            archive: Arc::clone(&ports.archive),
            repository: Arc::clone(&ports.repository),
            leads: LeadDispatcher::new(ports.leads, config.leads.clone()),
        };

        Ok(Self {
            config,
            queue,
            tips,
            verifications,
            ledger,
            sightings,
            cases: ports.cases,
            identity: ports.identity,
            archive: ports.archive,
            repository: ports.repository,
            review,
        })
    }

    /// Rebuilds live state from the repository. Call once, before serving.
    ///
    /// Claims are not durable: restored items come back pending. Items whose
    /// resolution reached the archive are dropped from the repository instead.
    pub async fn restore(&self) -> Result<RestoreSummary> {
        let snapshot = self.repository.load().await?;
        let mut summary = RestoreSummary {
            tipsters: snapshot.tipsters.len(),
            ..RestoreSummary::default()
        };
        for profile in snapshot.tipsters {
            self.ledger.restore(profile);
        }
        for (case_id, sighting) in snapshot.sightings {
            if self.sightings.record(case_id, sighting) {
                summary.sightings += 1;
            }
        }

        let mut open_items = snapshot.open_items;
        open_items.sort_by_key(|open| (open.item.created_at, open.item.id));
        for OpenItem { mut item, tip, verification } in open_items {
            if self.archive.find_by_item(item.id).await?.is_some() {
                self.repository.remove_open_item(item.id).await?;
                summary.already_resolved += 1;
                continue;
            }
            item.status = QueueStatus::Pending;
            item.claimed_by = None;
            item.claimed_at = None;
            item.resolved_at = None;
            self.tips.insert(tip)?;
            self.verifications.insert(verification);
            self.queue.enqueue(item)?;
            summary.open_items += 1;
        }
        self.queue.restore_resolved_count(self.archive.count().await?);

        info!(
            "restored {} tipsters, {} open items and {} sightings ({} open rows were already resolved)",
            summary.tipsters, summary.open_items, summary.sightings, summary.already_resolved
        );
        Ok(summary)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn validate_tip(&self, tip: &Tip, now: DateTime<Utc>) -> Result<()> {
        let limits = &self.config.intake;
        let skew = Duration::minutes(limits.clock_skew_minutes);

        if tip.content.trim().is_empty() {
            return Err(AppError::Validation("tip content is empty".into()));
        }
        if tip.content.chars().count() > limits.max_content_chars {
            return Err(AppError::Validation(format!(
                "tip content exceeds {} characters",
                limits.max_content_chars
            )));
        }
        if tip.tipster.value.trim().is_empty() {
            return Err(AppError::Validation("tipster contact is empty".into()));
        }
        if tip.point().is_some_and(|p| !p.is_valid()) {
            return Err(AppError::Validation("tip coordinates are out of range".into()));
        }
        if tip.submitted_at > now + skew {
            return Err(AppError::Validation("submission time is in the future".into()));
        }
        if tip.sighted_at.is_some_and(|seen| seen > tip.submitted_at + skew) {
            return Err(AppError::Validation("sighting time is after submission".into()));
        }
        if tip.photos.len() > limits.max_photos {
            return Err(AppError::Validation(format!(
                "at most {} photos per tip",
                limits.max_photos
            )));
        }
        let bad_photo_point = tip
            .photos
            .iter()
            .filter_map(|p| p.metadata.as_ref().and_then(|m| m.point))
            .any(|p| !p.is_valid());
        if bad_photo_point {
            return Err(AppError::Validation("photo coordinates are out of range".into()));
        }
        Ok(())
    }

    /// Looks up the case, falling back to a high-risk stand-in when the
    /// directory errors or does not answer in time.
    async fn case_profile(&self, case_id: CaseId) -> CaseRiskProfile {
        let timeout = StdDuration::from_millis(self.config.intake.case_lookup_timeout_ms);
        match tokio::time::timeout(timeout, self.cases.get_case_risk_profile(case_id)).await {
            Ok(Ok(profile)) => profile,
            Ok(Err(err)) => {
                warn!("case lookup for {} failed, classifying as high risk: {}", case_id, err);
                CaseRiskProfile::fail_safe(case_id)
            }
            Err(_) => {
                warn!("case lookup for {} timed out after {:?}, classifying as high risk", case_id, timeout);
                CaseRiskProfile::fail_safe(case_id)
            }
        }
    }

    /// Scores, classifies and queues a stored tip.
    pub async fn submit_tip(&self, tip: Tip) -> Result<TipId> {
        let now = Utc::now();
        self.validate_tip(&tip, now)?;
        self.tips.insert(tip.clone())?;

        match self.accept(&tip, now).await {
            Ok(item) => {
                info!(
                    "tip {} accepted: score {} -> {:?} (item {}, due {})",
                    tip.id, item.credibility_score, item.queue_type, item.id, item.sla_deadline
                );
                Ok(tip.id)
            }
            Err(err) => {
                self.tips.remove(tip.id);
                Err(err)
            }
        }
    }

    /// Runs once the tip id is reserved. Nothing is queued until the open
    /// item is saved.
    async fn accept(&self, tip: &Tip, now: DateTime<Utc>) -> Result<QueueItem> {
        let tipster_id = self.identity.resolve(&tip.tipster);
        let profile = self.ledger.ensure_profile(&tipster_id, now);
        let case = self.case_profile(tip.case_id).await;
        let priors = self
            .tips
            .recent_for_case(tip.case_id, tip.id, self.config.duplicate.lookback);
        let verified_sightings = self.sightings.for_case(tip.case_id);

        let ctx = SignalContext {
            config: &self.config,
            case: &case,
            profile: &profile,
            case_tips: &priors,
            verified_sightings: &verified_sightings,
        };
        let extraction = signals::extract(tip, &ctx).await;
        let duplicate_of = detector::find_duplicate(tip, &priors, &self.config);
        let indicators = detector::hoax_indicators(&extraction.indicators, &profile, &self.config, now);
        let credibility_score = scoring::aggregate(&extraction.scores, &self.config.weights);

        let classification = classifier::classify(
            &ClassificationInput {
                credibility_score,
                indicators: &indicators,
                case: &case,
                tipster_blocked: profile.is_blocked,
                created_at: now,
            },
            &self.config.classifier,
        );

        if let Some(original) = duplicate_of {
            info!("tip {} duplicates tip {}", tip.id, original);
        }
        if !indicators.is_empty() {
            warn!("tip {} raised hoax indicators {:?}", tip.id, indicators);
        }

        let verification = TipVerification {
            tip_id: tip.id,
            case_id: tip.case_id,
            tipster_id: tipster_id.clone(),
            scores: extraction.scores,
            credibility_score,
            priority_bucket: classification.bucket,
            is_duplicate: duplicate_of.is_some(),
            duplicate_of,
            hoax_indicators: indicators.clone(),
            high_risk_case: classifier::is_high_risk(&case, &self.config.classifier),
            ai_summary: None,
            ai_recommendations: Vec::new(),
            original_scores: extraction.scores,
            original_credibility_score: credibility_score,
            overrides: Vec::new(),
            created_at: now,
        };
        let item = QueueItem {
            id: Uuid::now_v7(),
            tip_id: tip.id,
            case_id: tip.case_id,
            tipster_id,
            queue_type: classification.queue_type,
            status: QueueStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            credibility_score,
            sla_deadline: classification.sla_deadline,
            sla_breached: false,
            created_at: now,
            resolved_at: None,
        };

        let open = OpenItem {
            item,
            tip: tip.clone(),
            verification,
        };
        self.repository.save_open_item(&open).await?;

        let OpenItem { item, verification, .. } = open;
        self.verifications.insert(verification);
        self.ledger
            .record_submission(&item.tipster_id, tip.id, !indicators.is_empty(), now);
        let item = self.queue.enqueue(item)?;
        if let Err(err) = self.ledger.persist(&item.tipster_id, self.repository.as_ref()).await {
            error!("saving tipster {} failed: {}", item.tipster_id, err);
        }
        Ok(item)
    }

    pub fn tip(&self, tip_id: TipId) -> Result<Tip> {
        self.tips.get(tip_id)
    }

    /// Open tips are served from memory, resolved ones from the archive.
    pub async fn verification(&self, tip_id: TipId) -> Result<TipVerification> {
        match self.verifications.get(tip_id) {
            Err(AppError::NotFound(..)) => self
                .archive
                .find_by_tip(tip_id)
                .await?
                .map(|record| record.verification)
                .ok_or_else(|| AppError::not_found("verification", tip_id)),
            found => found,
        }
    }

    pub async fn queue_item_for_tip(&self, tip_id: TipId) -> Result<QueueItem> {
        if let Some(id) = self.queue.item_id_for_tip(tip_id) {
            match self.queue.get(id, Utc::now()).await {
                Err(AppError::NotFound(..)) => {}
                found => return found,
            }
        }
        self.archive
            .find_by_tip(tip_id)
            .await?
            .map(|record| record.item)
            .ok_or_else(|| AppError::not_found("queue item for tip", tip_id))
    }

    pub async fn get_queue_item(&self, id: QueueItemId) -> Result<QueueItem> {
        match self.queue.get(id, Utc::now()).await {
            Err(AppError::NotFound(..)) => self
                .archive
                .find_by_item(id)
                .await?
                .map(|record| record.item)
                .ok_or_else(|| AppError::not_found("queue item", id)),
            found => found,
        }
    }

    /// Turns a queue miss on an archived item into the conflict a live
    /// resolved item would have produced.
    async fn resolved_conflict<T>(&self, id: QueueItemId, result: Result<T>) -> Result<T> {
        match result {
            Err(AppError::NotFound(..)) if self.archive.find_by_item(id).await?.is_some() => {
                Err(AppError::Conflict(format!("queue item {id} is already resolved")))
            }
            other => other,
        }
    }

    pub async fn claim(&self, id: QueueItemId, reviewer_id: &str) -> Result<QueueItem> {
        let result = self.queue.claim(id, reviewer_id, Utc::now()).await;
        self.resolved_conflict(id, result).await
    }

    pub async fn release(&self, id: QueueItemId, reviewer_id: &str) -> Result<QueueItem> {
        let result = self.queue.release(id, reviewer_id, Utc::now()).await;
        self.resolved_conflict(id, result).await
    }

    /// Enters the critical section of the tip's open item.
    async fn lock_open_item(&self, tip_id: TipId) -> Result<OwnedMutexGuard<Slot>> {
        let locked = match self.queue.item_id_for_tip(tip_id) {
            Some(id) => self.queue.lock(id).await,
            None => Err(AppError::not_found("queue item for tip", tip_id)),
        };
        match locked {
            Ok(slot) if slot.item.status != QueueStatus::Resolved => Ok(slot),
            Ok(_) => Err(AppError::Conflict(format!("tip {tip_id} has already been reviewed"))),
            Err(AppError::NotFound(..)) => match self.archive.find_by_tip(tip_id).await? {
                Some(_) => Err(AppError::Conflict(format!("tip {tip_id} has already been reviewed"))),
                None => Err(AppError::not_found("queue item for tip", tip_id)),
            },
            Err(err) => Err(err),
        }
    }

    pub async fn list_queue(&self, query: &QueueQuery) -> Result<Vec<QueueItem>> {
        self.queue.list(query, Utc::now()).await
    }

    pub async fn submit_review(&self, submission: ReviewSubmission) -> Result<ReviewDecision> {
        self.review.process(submission, Utc::now()).await
    }

    /// Replaces individual sub-scores and reprocesses the tip.
    ///
    /// The aggregate is recomputed and the classifier re-run against the
    /// item's original creation time, so the deadline only moves if the
    /// queue does.
    pub async fn override_subscores(
        &self,
        tip_id: TipId,
        reviewer_id: &str,
        overrides: &BTreeMap<ScoreField, u8>,
    ) -> Result<TipVerification> {
        if reviewer_id.trim().is_empty() {
            return Err(AppError::Validation("reviewer id is required".into()));
        }
        if overrides.is_empty() {
            return Err(AppError::Validation("no overrides given".into()));
        }
        if let Some((field, value)) = overrides.iter().find(|(_, v)| **v > 100) {
            return Err(AppError::Validation(format!("{field:?} override {value} is out of range")));
        }

        // The case lookup may be slow; do not hold the item across it.
        let case_id = self.lock_open_item(tip_id).await?.item.case_id;
        let case = self.case_profile(case_id).await;
        let now = Utc::now();

        let mut slot = self.lock_open_item(tip_id).await?;
        // Read under the lock so concurrent overrides do not lose each other.
        let mut verification = self.verifications.get(tip_id)?;
        for (field, value) in overrides {
            verification.apply_override(ScoreTarget::Subscore(*field), *value, reviewer_id, now);
        }
        verification.credibility_score = scoring::aggregate(&verification.scores, &self.config.weights);

        let classification = classifier::classify(
            &ClassificationInput {
                credibility_score: verification.credibility_score,
                indicators: &verification.hoax_indicators,
                case: &case,
                tipster_blocked: self.ledger.is_blocked(&verification.tipster_id),
                created_at: slot.item.created_at,
            },
            &self.config.classifier,
        );
        verification.priority_bucket = classification.bucket;
        verification.high_risk_case = classifier::is_high_risk(&case, &self.config.classifier);

        let mut projected = slot.item.clone();
        projected.queue_type = classification.queue_type;
        projected.sla_deadline = classification.sla_deadline;
        projected.credibility_score = verification.credibility_score;
        self.repository
            .save_open_item(&OpenItem {
                item: projected,
                tip: self.tips.get(tip_id)?,
                verification: verification.clone(),
            })
            .await?;
        self.verifications.insert(verification.clone());

        let previous = slot.item.queue_type;
        self.queue.reclassify(
            &mut slot,
            classification.queue_type,
            classification.sla_deadline,
            verification.credibility_score,
            now,
        );
        info!(
            "tip {} reprocessed by {}: score {} ({:?} -> {:?})",
            tip_id, reviewer_id, verification.credibility_score, previous, classification.queue_type
        );
        Ok(verification)
    }

    /// Attaches externally produced analysis to an open tip's verification.
    /// Resolved tips are archived as reviewed and reject the merge.
    pub async fn merge_ai_analysis(
        &self,
        tip_id: TipId,
        summary: Option<String>,
        recommendations: Vec<String>,
    ) -> Result<TipVerification> {
        let slot = self.lock_open_item(tip_id).await?;
        let mut verification = self.verifications.get(tip_id)?;
        verification.merge_ai_analysis(summary, recommendations);
        self.repository
            .save_open_item(&OpenItem {
                item: slot.item.clone(),
                tip: self.tips.get(tip_id)?,
                verification: verification.clone(),
            })
            .await?;
        self.verifications.insert(verification.clone());
        Ok(verification)
    }

    /// Credits the tipster of a verified tip that led to the case being resolved.
    /// Each tip is credited at most once.
    pub async fn record_case_resolution(&self, tip_id: TipId) -> Result<TipsterProfile> {
        let record = match self.archive.find_by_tip(tip_id).await? {
            Some(record) => record,
            None if self.queue.item_id_for_tip(tip_id).is_some() => {
                return Err(AppError::Validation(format!("tip {tip_id} has not been verified")))
            }
            None => return Err(AppError::not_found("tip", tip_id)),
        };
        if record.decision.outcome != ReviewOutcome::Verified {
            return Err(AppError::Validation(format!("tip {tip_id} has not been verified")));
        }
        let tipster_id = record.verification.tipster_id;

        if !self.repository.mark_resolution_credited(tip_id).await? {
            return Err(AppError::Conflict(format!(
                "tip {tip_id} was already credited with a resolution"
            )));
        }
        let profile = self.ledger.credit_resolution(&tipster_id)?;
        info!("tipster {} credited for resolution via tip {}", tipster_id, tip_id);
        if let Err(err) = self.ledger.persist(&tipster_id, self.repository.as_ref()).await {
            error!("saving tipster {} failed: {}", tipster_id, err);
        }
        Ok(profile)
    }

    /// The action takes effect in memory first; an error means the saved
    /// profile does not reflect it yet.
    pub async fn tipster_action(&self, id: &TipsterId, action: TipsterAction) -> Result<TipsterProfile> {
        self.ledger.moderate(id, action, Utc::now())?;
        self.ledger.persist(id, self.repository.as_ref()).await
    }

    pub fn list_tipsters(&self, query: &TipsterQuery) -> Vec<TipsterProfile> {
        self.ledger.list(query)
    }

    pub fn get_tipster(&self, id: &TipsterId) -> Result<TipsterProfile> {
        self.ledger.get(id)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        let pending_by_queue = self.queue.pending_by_queue();
        QueueStats {
            total_pending: pending_by_queue.values().sum(),
            in_review: self.queue.in_review_count(),
            pending_by_queue,
            sla_breached: self.queue.breached_count(now),
            resolved: self.queue.resolved_count(),
            tipster_tiers: self.ledger.tier_counts(),
            blocked_tipsters: self.ledger.blocked_count(),
        }
    }

    /// One SLA monitor pass. Returns how many items were newly flagged.
    pub async fn sweep_breaches(&self, now: DateTime<Utc>) -> usize {
        let newly = self.queue.mark_breaches(now).await;
        for id in &newly {
            warn!("queue item {} breached its SLA", id);
        }
        newly.len()
    }

    /// One reaper pass over claims older than the configured timeout.
    pub async fn release_stale_claims(&self, now: DateTime<Utc>) -> usize {
        let timeout = Duration::minutes(self.config.monitor.claim_timeout_minutes);
        let released = self.queue.release_stale_claims(now, timeout).await;
        if !released.is_empty() {
            debug!("released {} stale claims", released.len());
        }
        released.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{LogLeadSink, MemoryArchive, MemoryRepository, PlainIdentity, StaticCaseDirectory};
    use crate::models::{
        ContactKind, GeoPoint, PriorityBucket, QueueType, ReliabilityTier, TipLocation,
        TipsterContact,
    };
    use crate::traits::{MockCaseDirectory, MockDecisionArchive, MockLeadSink, MockTriageRepository};

    fn high_risk_case(case_id: CaseId) -> CaseRiskProfile {
        CaseRiskProfile {
            case_id,
            is_minor: true,
            suspected_abduction: true,
            response_window_minutes: Some(120),
            last_seen: None,
            degraded: false,
        }
    }

    fn low_risk_case(case_id: CaseId) -> CaseRiskProfile {
        CaseRiskProfile {
            case_id,
            is_minor: false,
            suspected_abduction: false,
            response_window_minutes: None,
            last_seen: None,
            degraded: false,
        }
    }

    struct Harness {
        engine: TriageEngine,
        archive: Arc<MemoryArchive>,
        repository: Arc<MemoryRepository>,
    }

    fn directory(cases: Vec<CaseRiskProfile>) -> Arc<StaticCaseDirectory> {
        let directory = StaticCaseDirectory::new();
        for case in cases {
            directory.insert(case);
        }
        Arc::new(directory)
    }

    fn harness(cases: Vec<CaseRiskProfile>) -> Harness {
        harness_over(cases, Arc::new(MemoryArchive::new()), Arc::new(MemoryRepository::new()))
    }

    /// An engine over existing storage, as after a restart.
    fn harness_over(
        cases: Vec<CaseRiskProfile>,
        archive: Arc<MemoryArchive>,
        repository: Arc<MemoryRepository>,
    ) -> Harness {
        let engine = TriageEngine::new(
            EngineConfig::default(),
            EnginePorts {
                cases: directory(cases),
                leads: Arc::new(LogLeadSink),
                identity: Arc::new(PlainIdentity),
                archive: archive.clone(),
                repository: repository.clone(),
            },
        )
        .unwrap();
        Harness {
            engine,
            archive,
            repository,
        }
    }

    fn tip(case_id: CaseId, from: &str, content: &str) -> Tip {
        Tip {
            id: Uuid::now_v7(),
            case_id,
            content: content.into(),
            location: None,
            sighted_at: None,
            photos: Vec::new(),
            is_anonymous: false,
            tipster: TipsterContact {
                kind: ContactKind::Email,
                value: from.into(),
            },
            submitted_at: Utc::now(),
        }
    }

    fn example_overrides() -> BTreeMap<ScoreField, u8> {
        BTreeMap::from([
            (ScoreField::Photo, 90),
            (ScoreField::Location, 85),
            (ScoreField::TimePlausibility, 80),
            (ScoreField::TextAnalysis, 70),
            (ScoreField::CrossReference, 60),
            (ScoreField::TipsterReliability, 95),
        ])
    }

    fn review(item: QueueItemId, reviewer: &str, outcome: ReviewOutcome) -> ReviewSubmission {
        ReviewSubmission {
            queue_item_id: item,
            reviewer_id: reviewer.into(),
            outcome,
            notes: None,
            override_score: None,
            partial: false,
            create_lead: false,
            lead_title: None,
        }
    }

    #[tokio::test]
    async fn high_risk_example_lands_in_critical_with_one_hour_sla() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![high_risk_case(case_id)]);
        let tip_id = h
            .engine
            .submit_tip(tip(case_id, "a@example.org", "Saw a girl in a red jacket near the harbour"))
            .await
            .unwrap();

        let verification = h
            .engine
            .override_subscores(tip_id, "rev-1", &example_overrides())
            .await
            .unwrap();
        assert_eq!(verification.credibility_score, 80);
        assert_eq!(verification.priority_bucket, PriorityBucket::Critical);
        assert_eq!(verification.overrides.len(), 6);
        assert_ne!(verification.original_scores, verification.scores);

        let item = h.engine.queue_item_for_tip(tip_id).await.unwrap();
        assert_eq!(item.queue_type, QueueType::Critical);
        assert_eq!(item.sla_deadline - item.created_at, Duration::hours(1));
    }

    #[tokio::test]
    async fn identical_tip_nearby_is_flagged_duplicate_of_first() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);
        let t0 = Utc::now() - Duration::minutes(15);
        let here = TipLocation {
            point: Some(GeoPoint::new(51.5074, -0.1278)),
            description: None,
        };
        let mut first = tip(case_id, "a@example.org", "Man with a blue backpack at the bus stop");
        first.location = Some(here.clone());
        first.submitted_at = t0;
        let mut second = tip(case_id, "b@example.org", "Man with a blue backpack at the bus stop");
        second.location = Some(TipLocation {
            point: Some(GeoPoint::new(51.50785, -0.1278)),
            description: None,
        });
        second.submitted_at = t0 + Duration::minutes(10);

        let first_id = h.engine.submit_tip(first).await.unwrap();
        let second_id = h.engine.submit_tip(second).await.unwrap();

        let v = h.engine.verification(second_id).await.unwrap();
        assert!(v.is_duplicate);
        assert_eq!(v.duplicate_of, Some(first_id));
        assert!(!h.engine.verification(first_id).await.unwrap().is_duplicate);
        // Duplicates are still queued.
        assert!(h.engine.queue_item_for_tip(second_id).await.is_ok());
    }

    #[tokio::test]
    async fn blocked_tipster_is_routed_to_low_priority_until_unblocked() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![high_risk_case(case_id)]);
        let first = h
            .engine
            .submit_tip(tip(case_id, "noisy@example.org", "first report"))
            .await
            .unwrap();
        let tipster = h.engine.verification(first).await.unwrap().tipster_id;
        h.engine.tipster_action(&tipster, TipsterAction::Block).await.unwrap();

        let blocked_tip = h
            .engine
            .submit_tip(tip(case_id, "noisy@example.org", "second report"))
            .await
            .unwrap();
        let all_high: BTreeMap<_, _> = ScoreField::ALL.iter().map(|f| (*f, 95)).collect();
        let v = h.engine.override_subscores(blocked_tip, "rev-1", &all_high).await.unwrap();
        assert_eq!(v.credibility_score, 95);
        assert_eq!(v.priority_bucket, PriorityBucket::Spam);
        let item = h.engine.queue_item_for_tip(blocked_tip).await.unwrap();
        assert_eq!(item.queue_type, QueueType::LowPriority);

        h.engine.tipster_action(&tipster, TipsterAction::Unblock).await.unwrap();
        let v = h.engine.override_subscores(blocked_tip, "rev-1", &all_high).await.unwrap();
        assert_eq!(v.priority_bucket, PriorityBucket::Critical);
    }

    #[tokio::test]
    async fn second_review_returns_original_decision_without_double_counting() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);
        let tip_id = h
            .engine
            .submit_tip(tip(case_id, "a@example.org", "Seen at the petrol station on Route 9"))
            .await
            .unwrap();
        let item = h.engine.queue_item_for_tip(tip_id).await.unwrap();

        let unclaimed = h.engine.submit_review(review(item.id, "rev-1", ReviewOutcome::Verified)).await;
        assert!(matches!(unclaimed, Err(AppError::Conflict(_))));

        h.engine.claim(item.id, "rev-1").await.unwrap();
        let first = h
            .engine
            .submit_review(review(item.id, "rev-1", ReviewOutcome::Verified))
            .await
            .unwrap();
        let again = h
            .engine
            .submit_review(review(item.id, "rev-1", ReviewOutcome::Rejected))
            .await
            .unwrap();
        assert_eq!(first, again);

        let profile = h.engine.get_tipster(&item.tipster_id).unwrap();
        assert_eq!(profile.reviewed_tips, 1);
        assert_eq!(profile.verified_tips, 1);
        assert_eq!(profile.reliability_tier, ReliabilityTier::Unrated);
        assert_eq!(h.archive.len(), 1);

        let resolved = h.engine.get_queue_item(item.id).await.unwrap();
        assert_eq!(resolved.status, QueueStatus::Resolved);
        assert!(matches!(h.engine.claim(item.id, "rev-2").await, Err(AppError::Conflict(_))));

        let stats = h.engine.stats(Utc::now());
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.total_pending, 0);
    }

    #[tokio::test]
    async fn only_the_claimant_may_review() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);
        let tip_id = h.engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        let item = h.engine.queue_item_for_tip(tip_id).await.unwrap();
        h.engine.claim(item.id, "rev-1").await.unwrap();
        let err = h
            .engine
            .submit_review(review(item.id, "rev-2", ReviewOutcome::Rejected))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn archive_failure_aborts_resolution() {
        let case_id = Uuid::now_v7();
        let directory = StaticCaseDirectory::new();
        directory.insert(low_risk_case(case_id));
        let mut archive = MockDecisionArchive::new();
        archive
            .expect_archive()
            .returning(|_| Err(AppError::Internal("disk full".into())));
        let engine = TriageEngine::new(
            EngineConfig::default(),
            EnginePorts {
                cases: Arc::new(directory),
                leads: Arc::new(LogLeadSink),
                identity: Arc::new(PlainIdentity),
                archive: Arc::new(archive),
                repository: Arc::new(MemoryRepository::new()),
            },
        )
        .unwrap();

        let tip_id = engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        let item = engine.queue_item_for_tip(tip_id).await.unwrap();
        engine.claim(item.id, "rev-1").await.unwrap();
        let err = engine
            .submit_review(review(item.id, "rev-1", ReviewOutcome::Rejected))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let after = engine.get_queue_item(item.id).await.unwrap();
        assert_eq!(after.status, QueueStatus::InReview);
        assert_eq!(engine.get_tipster(&item.tipster_id).unwrap().reviewed_tips, 0);
    }

    #[tokio::test]
    async fn verified_review_dispatches_lead_without_blocking() {
        let case_id = Uuid::now_v7();
        let directory = StaticCaseDirectory::new();
        directory.insert(low_risk_case(case_id));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut leads = MockLeadSink::new();
        leads.expect_create_lead().times(1).returning(move |case, title, _| {
            let _ = tx.send((case, title.to_string()));
            Ok("lead-1".to_string())
        });
        let engine = TriageEngine::new(
            EngineConfig::default(),
            EnginePorts {
                cases: Arc::new(directory),
                leads: Arc::new(leads),
                identity: Arc::new(PlainIdentity),
                archive: Arc::new(MemoryArchive::new()),
                repository: Arc::new(MemoryRepository::new()),
            },
        )
        .unwrap();

        let tip_id = engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        let item = engine.queue_item_for_tip(tip_id).await.unwrap();
        engine.claim(item.id, "rev-1").await.unwrap();
        let mut submission = review(item.id, "rev-1", ReviewOutcome::Verified);
        submission.create_lead = true;
        submission.lead_title = Some("Check harbour CCTV".into());
        let decision = engine.submit_review(submission).await.unwrap();
        assert!(decision.lead_request.is_some());

        let (lead_case, title) = tokio::time::timeout(StdDuration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lead_case, case_id);
        assert_eq!(title, "Check harbour CCTV");
    }

    #[tokio::test]
    async fn case_lookup_failure_falls_back_to_high_risk() {
        let mut cases = MockCaseDirectory::new();
        cases
            .expect_get_case_risk_profile()
            .returning(|_| Err(AppError::DownstreamUnavailable("case service down".into())));
        let engine = TriageEngine::new(
            EngineConfig::default(),
            EnginePorts {
                cases: Arc::new(cases),
                leads: Arc::new(LogLeadSink),
                identity: Arc::new(PlainIdentity),
                archive: Arc::new(MemoryArchive::new()),
                repository: Arc::new(MemoryRepository::new()),
            },
        )
        .unwrap();

        let tip_id = engine
            .submit_tip(tip(Uuid::now_v7(), "a@example.org", "seen"))
            .await
            .unwrap();
        assert!(engine.verification(tip_id).await.unwrap().high_risk_case);
    }

    #[tokio::test]
    async fn invalid_tips_are_rejected_before_any_state_change() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);

        let empty = tip(case_id, "a@example.org", "   ");
        let empty_id = empty.id;
        assert!(matches!(h.engine.submit_tip(empty).await, Err(AppError::Validation(_))));
        assert!(h.engine.tip(empty_id).is_err());

        let mut off_map = tip(case_id, "a@example.org", "seen");
        off_map.location = Some(TipLocation {
            point: Some(GeoPoint::new(123.0, 0.0)),
            description: None,
        });
        assert!(matches!(h.engine.submit_tip(off_map).await, Err(AppError::Validation(_))));

        let mut from_future = tip(case_id, "a@example.org", "seen");
        from_future.sighted_at = Some(from_future.submitted_at + Duration::hours(2));
        assert!(matches!(h.engine.submit_tip(from_future).await, Err(AppError::Validation(_))));

        let once = tip(case_id, "a@example.org", "seen");
        h.engine.submit_tip(once.clone()).await.unwrap();
        assert!(matches!(h.engine.submit_tip(once).await, Err(AppError::Conflict(_))));

        assert_eq!(h.engine.stats(Utc::now()).total_pending, 1);
    }

    #[tokio::test]
    async fn resolution_credit_requires_verified_tip_and_counts_once() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);
        let tip_id = h.engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        assert!(matches!(
            h.engine.record_case_resolution(tip_id).await,
            Err(AppError::Validation(_))
        ));

        let item = h.engine.queue_item_for_tip(tip_id).await.unwrap();
        h.engine.claim(item.id, "rev-1").await.unwrap();
        h.engine
            .submit_review(review(item.id, "rev-1", ReviewOutcome::Verified))
            .await
            .unwrap();

        let profile = h.engine.record_case_resolution(tip_id).await.unwrap();
        assert_eq!(profile.tips_leading_to_resolution, 1);
        assert!(matches!(
            h.engine.record_case_resolution(tip_id).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn overrides_after_resolution_conflict() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);
        let tip_id = h.engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        let item = h.engine.queue_item_for_tip(tip_id).await.unwrap();
        h.engine.claim(item.id, "rev-1").await.unwrap();
        h.engine
            .submit_review(review(item.id, "rev-1", ReviewOutcome::Rejected))
            .await
            .unwrap();

        let err = h
            .engine
            .override_subscores(tip_id, "rev-1", &example_overrides())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn ai_analysis_is_merged_without_touching_scores() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);
        let tip_id = h.engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        let before = h.engine.verification(tip_id).await.unwrap();
        let after = h
            .engine
            .merge_ai_analysis(tip_id, Some("Consistent with CCTV".into()), vec!["Canvass area".into()])
            .await
            .unwrap();
        assert_eq!(after.ai_summary.as_deref(), Some("Consistent with CCTV"));
        assert_eq!(after.ai_recommendations, vec!["Canvass area".to_string()]);
        assert_eq!(after.credibility_score, before.credibility_score);
    }

    #[tokio::test]
    async fn monitor_passes_flag_breaches_and_reap_claims() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);
        let tip_id = h.engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        let item = h.engine.queue_item_for_tip(tip_id).await.unwrap();
        h.engine.claim(item.id, "rev-1").await.unwrap();

        let later = item.sla_deadline + Duration::minutes(1);
        assert_eq!(h.engine.sweep_breaches(later).await, 1);
        assert_eq!(h.engine.stats(later).sla_breached, 1);
        assert_eq!(h.engine.release_stale_claims(later).await, 1);
        let reverted = h.engine.get_queue_item(item.id).await.unwrap();
        assert_eq!(reverted.status, QueueStatus::Pending);
        assert_eq!(reverted.queue_type, item.queue_type);
    }

    #[tokio::test]
    async fn lead_failures_never_undo_the_resolution() {
        let case_id = Uuid::now_v7();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut leads = MockLeadSink::new();
        leads.expect_create_lead().times(2).returning(move |_, _, _| {
            let _ = tx.send(());
            Err(AppError::DownstreamUnavailable("case service down".into()))
        });
        let mut config = EngineConfig::default();
        config.leads.max_attempts = 2;
        config.leads.base_backoff_ms = 1;
        let engine = TriageEngine::new(
            config,
            EnginePorts {
                cases: directory(vec![low_risk_case(case_id)]),
                leads: Arc::new(leads),
                identity: Arc::new(PlainIdentity),
                archive: Arc::new(MemoryArchive::new()),
                repository: Arc::new(MemoryRepository::new()),
            },
        )
        .unwrap();

        let tip_id = engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        let item = engine.queue_item_for_tip(tip_id).await.unwrap();
        engine.claim(item.id, "rev-1").await.unwrap();
        let mut submission = review(item.id, "rev-1", ReviewOutcome::Verified);
        submission.create_lead = true;
        let decision = engine.submit_review(submission).await.unwrap();
        assert_eq!(decision.outcome, ReviewOutcome::Verified);

        for _ in 0..2 {
            tokio::time::timeout(StdDuration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
        let resolved = engine.get_queue_item(item.id).await.unwrap();
        assert_eq!(resolved.status, QueueStatus::Resolved);
        assert_eq!(engine.get_tipster(&item.tipster_id).unwrap().verified_tips, 1);
        assert_eq!(engine.stats(Utc::now()).resolved, 1);
    }

    #[tokio::test]
    async fn archived_item_carries_the_override_score() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);
        let tip_id = h.engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        let item = h.engine.queue_item_for_tip(tip_id).await.unwrap();
        assert_ne!(item.credibility_score, 91);

        h.engine.claim(item.id, "rev-1").await.unwrap();
        let mut submission = review(item.id, "rev-1", ReviewOutcome::Verified);
        submission.override_score = Some(91);
        h.engine.submit_review(submission).await.unwrap();

        let record = h.archive.get(item.id).unwrap();
        assert_eq!(record.item.credibility_score, 91);
        assert_eq!(record.verification.credibility_score, 91);
        assert_eq!(record.verification.original_credibility_score, item.credibility_score);
        assert_eq!(h.engine.get_queue_item(item.id).await.unwrap().credibility_score, 91);
    }

    #[tokio::test]
    async fn restart_restores_reputation_blocks_and_open_items() {
        let case_id = Uuid::now_v7();
        let first = harness(vec![low_risk_case(case_id)]);

        let kept = first
            .engine
            .submit_tip(tip(case_id, "a@example.org", "Seen near the ferry terminal"))
            .await
            .unwrap();
        let reviewed = first
            .engine
            .submit_tip(tip(case_id, "a@example.org", "Seen at the library"))
            .await
            .unwrap();
        let reviewed_item = first.engine.queue_item_for_tip(reviewed).await.unwrap();
        first.engine.claim(reviewed_item.id, "rev-1").await.unwrap();
        first
            .engine
            .submit_review(review(reviewed_item.id, "rev-1", ReviewOutcome::Verified))
            .await
            .unwrap();

        let noisy = first.engine.submit_tip(tip(case_id, "noisy@example.org", "report")).await.unwrap();
        let noisy_tipster = first.engine.verification(noisy).await.unwrap().tipster_id;
        first.engine.tipster_action(&noisy_tipster, TipsterAction::Block).await.unwrap();

        let kept_item = first.engine.queue_item_for_tip(kept).await.unwrap();
        first.engine.claim(kept_item.id, "rev-2").await.unwrap();
        let kept_verification = first.engine.verification(kept).await.unwrap();
        assert_eq!(first.repository.open_item_count(), 2);

        let second = harness_over(vec![low_risk_case(case_id)], first.archive.clone(), first.repository.clone());
        let summary = second.engine.restore().await.unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                tipsters: 2,
                open_items: 2,
                already_resolved: 0,
                sightings: 1,
            }
        );

        let profile = second.engine.get_tipster(&reviewed_item.tipster_id).unwrap();
        assert_eq!(profile.total_tips, 2);
        assert_eq!(profile.verified_tips, 1);
        assert!(second.engine.get_tipster(&noisy_tipster).unwrap().is_blocked);

        // Claims do not survive; the SLA clock does.
        let restored = second.engine.get_queue_item(kept_item.id).await.unwrap();
        assert_eq!(restored.status, QueueStatus::Pending);
        assert_eq!(restored.claimed_by, None);
        assert_eq!(restored.sla_deadline, kept_item.sla_deadline);
        assert_eq!(second.engine.verification(kept).await.unwrap(), kept_verification);

        let archived = second.engine.get_queue_item(reviewed_item.id).await.unwrap();
        assert_eq!(archived.status, QueueStatus::Resolved);
        let again = second
            .engine
            .submit_review(review(reviewed_item.id, "rev-1", ReviewOutcome::Rejected))
            .await
            .unwrap();
        assert_eq!(again.outcome, ReviewOutcome::Verified);
        assert_eq!(second.engine.verification(reviewed).await.unwrap().tip_id, reviewed);

        let stats = second.engine.stats(Utc::now());
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.total_pending, 2);
        assert_eq!(stats.blocked_tipsters, 1);

        let credited = second.engine.record_case_resolution(reviewed).await.unwrap();
        assert_eq!(credited.tips_leading_to_resolution, 1);
        let third = harness_over(vec![low_risk_case(case_id)], first.archive.clone(), first.repository.clone());
        third.engine.restore().await.unwrap();
        assert!(matches!(
            third.engine.record_case_resolution(reviewed).await,
            Err(AppError::Conflict(_))
        ));
        let profile = third.engine.get_tipster(&reviewed_item.tipster_id).unwrap();
        assert_eq!(profile.tips_leading_to_resolution, 1);
    }

    #[tokio::test]
    async fn restore_drops_open_rows_that_were_already_archived() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);
        let tip_id = h.engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        let item = h.engine.queue_item_for_tip(tip_id).await.unwrap();
        h.engine.claim(item.id, "rev-1").await.unwrap();
        h.engine
            .submit_review(review(item.id, "rev-1", ReviewOutcome::Rejected))
            .await
            .unwrap();
        assert_eq!(h.repository.open_item_count(), 0);

        // As if the process died between the archive write and the row removal.
        let record = h.archive.get(item.id).unwrap();
        h.repository
            .save_open_item(&OpenItem {
                item: item.clone(),
                tip: h.engine.tip(tip_id).unwrap(),
                verification: record.verification,
            })
            .await
            .unwrap();

        let restarted = harness_over(vec![low_risk_case(case_id)], h.archive.clone(), h.repository.clone());
        let summary = restarted.engine.restore().await.unwrap();
        assert_eq!(summary.already_resolved, 1);
        assert_eq!(summary.open_items, 0);
        assert_eq!(h.repository.open_item_count(), 0);
        assert_eq!(restarted.engine.stats(Utc::now()).total_pending, 0);
    }

    #[tokio::test]
    async fn resolved_items_are_served_from_the_archive() {
        let case_id = Uuid::now_v7();
        let h = harness(vec![low_risk_case(case_id)]);
        let tip_id = h.engine.submit_tip(tip(case_id, "a@example.org", "seen")).await.unwrap();
        let item = h.engine.queue_item_for_tip(tip_id).await.unwrap();
        h.engine.claim(item.id, "rev-1").await.unwrap();
        h.engine
            .submit_review(review(item.id, "rev-1", ReviewOutcome::Verified))
            .await
            .unwrap();

        assert_eq!(h.engine.queue.open_count(), 0);
        assert_eq!(h.engine.queue_item_for_tip(tip_id).await.unwrap().status, QueueStatus::Resolved);
        assert_eq!(h.engine.verification(tip_id).await.unwrap().tip_id, tip_id);
        assert!(matches!(h.engine.release(item.id, "rev-1").await, Err(AppError::Conflict(_))));
        assert!(matches!(
            h.engine.merge_ai_analysis(tip_id, Some("late".into()), Vec::new()).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            h.engine.get_queue_item(Uuid::now_v7()).await,
            Err(AppError::NotFound(..))
        ));
    }

    #[tokio::test]
    async fn intake_leaves_no_state_when_the_repository_fails() {
        let case_id = Uuid::now_v7();
        let mut repository = MockTriageRepository::new();
        repository
            .expect_save_open_item()
            .times(1)
            .returning(|_| Err(AppError::Internal("disk full".into())));
        let engine = TriageEngine::new(
            EngineConfig::default(),
            EnginePorts {
                cases: directory(vec![low_risk_case(case_id)]),
                leads: Arc::new(LogLeadSink),
                identity: Arc::new(PlainIdentity),
                archive: Arc::new(MemoryArchive::new()),
                repository: Arc::new(repository),
            },
        )
        .unwrap();

        let t = tip(case_id, "a@example.org", "seen");
        let tip_id = t.id;
        assert!(matches!(engine.submit_tip(t).await, Err(AppError::Internal(_))));
        assert!(engine.tip(tip_id).is_err());
        assert!(matches!(engine.queue_item_for_tip(tip_id).await, Err(AppError::NotFound(..))));
        assert_eq!(engine.stats(Utc::now()).total_pending, 0);
    }
}
