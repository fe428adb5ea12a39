//! # Tipster Reputation Ledger
//!
//! Profiles live in a sharded map; every read-modify-write goes through
//! `get_mut`/`entry`, which holds the shard lock for that tipster, so
//! concurrent decisions for one tipster serialize while different tipsters
//! proceed in parallel.
//!
//! Writes to the repository go through [`TipsterLedger::persist`], which
//! serializes per tipster and always saves the latest profile, so a slow
//! save can never overwrite a newer one.
//!
//! Scoring-driven tier moves are limited to one step per decision, and a
//! downward step also needs the score to sit more than `hysteresis` below
//! the current tier's floor. `verified_source` is the exception: it is
//! dropped to `high` as soon as the tipster stops qualifying.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::info;
use tokio::sync::Mutex;

use crate::config::ReputationConfig;
use crate::error::{AppError, Result};
use crate::models::{
    RecentTip, ReliabilityTier, ReviewOutcome, TipId, TipsterAction, TipsterId, TipsterProfile,
    TipsterQuery, TipsterSort,
};
use crate::traits::TriageRepository;

/// Bounded history kept per tipster for rate and hoax-window rules.
const RECENT_TIPS_CAP: usize = 64;

/// Score and tier before and after an update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReputationChange {
    pub previous_score: f64,
    pub score: f64,
    pub previous_tier: ReliabilityTier,
    pub tier: ReliabilityTier,
}

#[derive(Debug)]
pub struct TipsterLedger {
    profiles: DashMap<TipsterId, TipsterProfile>,
    write_locks: DashMap<TipsterId, Arc<Mutex<()>>>,
    config: ReputationConfig,
}

impl TipsterLedger {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            profiles: DashMap::new(),
            write_locks: DashMap::new(),
            config,
        }
    }

    /// Loads a stored profile at startup, replacing any in-memory copy.
    pub fn restore(&self, profile: TipsterProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Saves the tipster's current profile.
    pub async fn persist(&self, id: &TipsterId, repository: &dyn TriageRepository) -> Result<TipsterProfile> {
        let lock = Arc::clone(self.write_locks.entry(id.clone()).or_default().value());
        let _writer = lock.lock().await;
        let profile = self.get(id)?;
        repository.save_tipster(&profile).await?;
        Ok(profile)
    }

    /// Returns the profile, creating it on first contact.
    pub fn ensure_profile(&self, id: &TipsterId, now: DateTime<Utc>) -> TipsterProfile {
        self.profiles
            .entry(id.clone())
            .or_insert_with(|| TipsterProfile::new(id.clone(), self.config.initial_score, now))
            .clone()
    }

    pub fn get(&self, id: &TipsterId) -> Result<TipsterProfile> {
        self.profiles
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| AppError::not_found("tipster", id))
    }

    pub fn is_blocked(&self, id: &TipsterId) -> bool {
        self.profiles.get(id).is_some_and(|p| p.is_blocked)
    }

    pub fn record_submission(&self, id: &TipsterId, tip_id: TipId, hoax_flagged: bool, now: DateTime<Utc>) {
        let mut profile = self
            .profiles
            .entry(id.clone())
            .or_insert_with(|| TipsterProfile::new(id.clone(), self.config.initial_score, now));
        profile.total_tips += 1;
        profile.last_tip_at = Some(now);
        profile.recent_tips.push_back(RecentTip {
            tip_id,
            submitted_at: now,
            hoax_flagged,
        });
        while profile.recent_tips.len() > RECENT_TIPS_CAP.max(self.config.verified_source_window) {
            profile.recent_tips.pop_front();
        }
    }

    /// Applies a review outcome. `high_risk_case` scales a verified increment.
    pub fn apply_outcome(
        &self,
        id: &TipsterId,
        tip_id: TipId,
        outcome: ReviewOutcome,
        partial: bool,
        high_risk_case: bool,
        now: DateTime<Utc>,
    ) -> ReputationChange {
        let config = &self.config;
        let mut profile = self
            .profiles
            .entry(id.clone())
            .or_insert_with(|| TipsterProfile::new(id.clone(), config.initial_score, now));
        let previous_score = profile.reliability_score;
        let previous_tier = profile.reliability_tier;

        let delta = match outcome {
            ReviewOutcome::Verified => {
                let mut gain = config.verified_increment;
                if high_risk_case {
                    gain *= config.severity_multiplier;
                }
                if partial {
                    gain *= config.partial_factor;
                    profile.partially_verified_tips += 1;
                } else {
                    profile.verified_tips += 1;
                }
                if let Some(recent) = profile.recent_tips.iter_mut().find(|r| r.tip_id == tip_id) {
                    recent.hoax_flagged = false;
                }
                gain.min(config.max_step)
            }
            ReviewOutcome::Rejected => {
                profile.false_tips += 1;
                -config.rejected_penalty.min(config.max_step)
            }
            ReviewOutcome::NeedsMoreInfo | ReviewOutcome::Escalated => 0.0,
        };
        profile.reviewed_tips += 1;
        profile.reliability_score = (previous_score + delta).clamp(0.0, 100.0);
        profile.reliability_tier = next_tier(&profile, config);

        let change = ReputationChange {
            previous_score,
            score: profile.reliability_score,
            previous_tier,
            tier: profile.reliability_tier,
        };
        if change.tier != change.previous_tier {
            info!(
                "tipster {} moved {:?} -> {:?} (score {:.1})",
                id, change.previous_tier, change.tier, change.score
            );
        }
        change
    }

    /// Credits a verified tip that led to a case resolution.
    pub fn credit_resolution(&self, id: &TipsterId) -> Result<TipsterProfile> {
        let mut profile = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| AppError::not_found("tipster", id))?;
        profile.tips_leading_to_resolution += 1;
        let bonus = self.config.resolution_bonus.min(self.config.max_step);
        profile.reliability_score = (profile.reliability_score + bonus).clamp(0.0, 100.0);
        profile.reliability_tier = next_tier(&profile, &self.config);
        Ok(profile.clone())
    }

    /// Administrative override. Bypasses the scoring-driven path.
    pub fn moderate(&self, id: &TipsterId, action: TipsterAction, now: DateTime<Utc>) -> Result<TipsterProfile> {
        let mut profile = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| AppError::not_found("tipster", id))?;
        match action {
            TipsterAction::Block => {
                if !profile.is_blocked {
                    profile.is_blocked = true;
                    profile.blocked_at = Some(now);
                }
            }
            TipsterAction::Unblock => {
                profile.is_blocked = false;
                profile.blocked_at = None;
            }
            TipsterAction::UpgradeTier => {
                profile.reliability_tier = profile.reliability_tier.up().ok_or_else(|| {
                    AppError::Validation(format!("tipster {id} is already at the highest tier"))
                })?;
            }
            TipsterAction::DowngradeTier => {
                profile.reliability_tier = profile.reliability_tier.down().ok_or_else(|| {
                    AppError::Validation(format!("tipster {id} is already at the lowest tier"))
                })?;
            }
        }
        info!("moderation {:?} applied to tipster {}", action, id);
        Ok(profile.clone())
    }

    pub fn list(&self, query: &TipsterQuery) -> Vec<TipsterProfile> {
        let mut profiles: Vec<TipsterProfile> = self
            .profiles
            .iter()
            .filter(|p| query.tier.map_or(true, |tier| p.reliability_tier == tier))
            .filter(|p| query.include_blocked || !p.is_blocked)
            .map(|p| p.clone())
            .collect();

        profiles.sort_by(|a, b| {
            let primary = match query.sort_by {
                TipsterSort::ReliabilityScore => b.reliability_score.total_cmp(&a.reliability_score),
                TipsterSort::TotalTips => b.total_tips.cmp(&a.total_tips),
                TipsterSort::VerifiedTips => b.verified_tips.cmp(&a.verified_tips),
                TipsterSort::FalseTips => b.false_tips.cmp(&a.false_tips),
                TipsterSort::LastTip => b.last_tip_at.cmp(&a.last_tip_at),
            };
            primary.then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = query.limit {
            profiles.truncate(limit);
        }
        profiles
    }

    pub fn tier_counts(&self) -> std::collections::BTreeMap<ReliabilityTier, usize> {
        let mut counts: std::collections::BTreeMap<_, _> =
            ReliabilityTier::ALL.iter().map(|tier| (*tier, 0)).collect();
        for profile in self.profiles.iter() {
            *counts.entry(profile.reliability_tier).or_insert(0) += 1;
        }
        counts
    }

    pub fn blocked_count(&self) -> usize {
        self.profiles.iter().filter(|p| p.is_blocked).count()
    }
}

fn tier_floor(tier: ReliabilityTier, config: &ReputationConfig) -> f64 {
    match tier {
        ReliabilityTier::New | ReliabilityTier::Unrated | ReliabilityTier::Low => 0.0,
        ReliabilityTier::Moderate => config.moderate_threshold,
        ReliabilityTier::High => config.high_threshold,
        ReliabilityTier::VerifiedSource => config.verified_source_threshold,
    }
}

fn has_unresolved_hoax(profile: &TipsterProfile, window: usize) -> bool {
    profile
        .recent_tips
        .iter()
        .rev()
        .take(window)
        .any(|recent| recent.hoax_flagged)
}

fn qualifies_for_verified_source(profile: &TipsterProfile, config: &ReputationConfig) -> bool {
    profile.reliability_score >= config.verified_source_threshold
        && profile.verified_tips >= config.verified_source_min_verified
        && !has_unresolved_hoax(profile, config.verified_source_window)
}

/// The tier the score alone would earn, ignoring hysteresis.
pub fn target_tier(profile: &TipsterProfile, config: &ReputationConfig) -> ReliabilityTier {
    if profile.reviewed_tips == 0 {
        return ReliabilityTier::New;
    }
    if profile.reviewed_tips < config.min_reviewed_tips {
        return ReliabilityTier::Unrated;
    }
    let score = profile.reliability_score;
    if qualifies_for_verified_source(profile, config) {
        ReliabilityTier::VerifiedSource
    } else if score >= config.high_threshold {
        ReliabilityTier::High
    } else if score >= config.moderate_threshold {
        ReliabilityTier::Moderate
    } else {
        ReliabilityTier::Low
    }
}

/// Applies one-step movement and hysteresis to the target tier.
pub fn next_tier(profile: &TipsterProfile, config: &ReputationConfig) -> ReliabilityTier {
    let current = profile.reliability_tier;
    let target = target_tier(profile, config);
    if !current.is_rated() || !target.is_rated() {
        // Entering (or not yet reaching) the rated tiers is decided by review count.
        return if current.is_rated() { current } else { target };
    }
    if target > current {
        return current.up().unwrap_or(current);
    }
    if target < current {
        // Verified source holds only while eligible; hysteresis never keeps it.
        if current == ReliabilityTier::VerifiedSource {
            return ReliabilityTier::High;
        }
        if profile.reliability_score < tier_floor(current, config) - config.hysteresis {
            return current.down().unwrap_or(current);
        }
    }
    current
}
