//! # Domain Models
//!
//! These structs represent the core entities of Tipline.
//! We use UUID v7 for time-ordered, globally unique identification.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TipId = Uuid;
pub type CaseId = Uuid;
pub type QueueItemId = Uuid;
pub type ReviewerId = String;
pub type LeadId = String;

/// Pseudonymous identity of a tip source (hashed email/phone/anonymous id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipsterId(pub String);

impl fmt::Display for TipsterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle (haversine) distance in meters.
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Where the tipster says the sighting happened.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipLocation {
    pub point: Option<GeoPoint>,
    pub description: Option<String>,
}

/// Metadata extracted from an uploaded photo by the intake collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub point: Option<GeoPoint>,
    /// Software tag found in the image headers, if any
    pub software: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRef {
    pub uri: String,
    /// Hex SHA-256 of the original bytes
    pub sha256: Option<String>,
    pub metadata: Option<PhotoMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Email,
    Phone,
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipsterContact {
    pub kind: ContactKind,
    pub value: String,
}

/// Immutable tip submission. Stored once by the intake collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tip {
    pub id: TipId,
    pub case_id: CaseId,
    pub content: String,
    pub location: Option<TipLocation>,
    pub sighted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub photos: Vec<PhotoRef>,
    #[serde(default)]
    pub is_anonymous: bool,
    pub tipster: TipsterContact,
    pub submitted_at: DateTime<Utc>,
}

impl Tip {
    pub fn point(&self) -> Option<GeoPoint> {
        self.location.as_ref().and_then(|l| l.point)
    }

    /// Sighting time when given, submission time otherwise.
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.sighted_at.unwrap_or(self.submitted_at)
    }
}

/// The six independently extracted credibility signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreField {
    Photo,
    Location,
    TimePlausibility,
    TextAnalysis,
    CrossReference,
    TipsterReliability,
}

impl ScoreField {
    pub const ALL: [ScoreField; 6] = [
        ScoreField::Photo,
        ScoreField::Location,
        ScoreField::TimePlausibility,
        ScoreField::TextAnalysis,
        ScoreField::CrossReference,
        ScoreField::TipsterReliability,
    ];
}

/// Sub-scores in 0..=100. `None` means the signal was not available for this tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubScores {
    pub photo: Option<u8>,
    pub location: Option<u8>,
    pub time_plausibility: Option<u8>,
    pub text_analysis: Option<u8>,
    pub cross_reference: Option<u8>,
    pub tipster_reliability: Option<u8>,
}

impl SubScores {
    pub fn get(&self, field: ScoreField) -> Option<u8> {
        match field {
            ScoreField::Photo => self.photo,
            ScoreField::Location => self.location,
            ScoreField::TimePlausibility => self.time_plausibility,
            ScoreField::TextAnalysis => self.text_analysis,
            ScoreField::CrossReference => self.cross_reference,
            ScoreField::TipsterReliability => self.tipster_reliability,
        }
    }

    pub fn set(&mut self, field: ScoreField, value: Option<u8>) {
        let slot = match field {
            ScoreField::Photo => &mut self.photo,
            ScoreField::Location => &mut self.location,
            ScoreField::TimePlausibility => &mut self.time_plausibility,
            ScoreField::TextAnalysis => &mut self.text_analysis,
            ScoreField::CrossReference => &mut self.cross_reference,
            ScoreField::TipsterReliability => &mut self.tipster_reliability,
        };
        *slot = value.map(|v| v.min(100));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoaxIndicator {
    KnownScamPattern,
    SuspiciousMetadata,
    ImpossibleTimeline,
    ConflictingLocation,
    RepeatedFalseReports,
    SpamSignature,
    AiGeneratedContent,
    StockPhotoDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBucket {
    Critical,
    High,
    Medium,
    Low,
    Spam,
}

/// What a human override replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTarget {
    Subscore(ScoreField),
    Credibility,
}

/// Audit entry for a human-overwritten score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreOverride {
    pub target: ScoreTarget,
    pub previous: Option<u8>,
    pub value: u8,
    pub reviewer_id: ReviewerId,
    pub at: DateTime<Utc>,
}

/// One-to-one with a [`Tip`]. Extracted scores are kept in `original_*`
/// and are never touched after creation; overrides only move the live values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipVerification {
    pub tip_id: TipId,
    pub case_id: CaseId,
    pub tipster_id: TipsterId,
    pub scores: SubScores,
    pub credibility_score: u8,
    pub priority_bucket: PriorityBucket,
    pub is_duplicate: bool,
    pub duplicate_of: Option<TipId>,
    pub hoax_indicators: BTreeSet<HoaxIndicator>,
    /// Case risk was high when the tip was classified
    pub high_risk_case: bool,
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub ai_recommendations: Vec<String>,
    pub original_scores: SubScores,
    pub original_credibility_score: u8,
    #[serde(default)]
    pub overrides: Vec<ScoreOverride>,
    pub created_at: DateTime<Utc>,
}

impl TipVerification {
    /// Overwrites a live score and appends the audit entry.
    pub fn apply_override(
        &mut self,
        target: ScoreTarget,
        value: u8,
        reviewer_id: &str,
        at: DateTime<Utc>,
    ) {
        let value = value.min(100);
        let previous = match target {
            ScoreTarget::Subscore(field) => {
                let previous = self.scores.get(field);
                self.scores.set(field, Some(value));
                previous
            }
            ScoreTarget::Credibility => {
                let previous = self.credibility_score;
                self.credibility_score = value;
                Some(previous)
            }
        };
        self.overrides.push(ScoreOverride {
            target,
            previous,
            value,
            reviewer_id: reviewer_id.to_string(),
            at,
        });
    }

    pub fn merge_ai_analysis(&mut self, summary: Option<String>, recommendations: Vec<String>) {
        if summary.is_some() {
            self.ai_summary = summary;
        }
        for rec in recommendations {
            if !self.ai_recommendations.contains(&rec) {
                self.ai_recommendations.push(rec);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    Critical,
    HighPriority,
    Standard,
    LowPriority,
}

impl QueueType {
    /// Highest priority first.
    pub const ALL: [QueueType; 4] = [
        QueueType::Critical,
        QueueType::HighPriority,
        QueueType::Standard,
        QueueType::LowPriority,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InReview,
    Resolved,
}

/// A tip awaiting triage. Only the queue manager mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: QueueItemId,
    pub tip_id: TipId,
    pub case_id: CaseId,
    pub tipster_id: TipsterId,
    pub queue_type: QueueType,
    pub status: QueueStatus,
    pub claimed_by: Option<ReviewerId>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub credibility_score: u8,
    pub sla_deadline: DateTime<Utc>,
    /// Derived from `sla_deadline`; refreshed on every read.
    pub sla_breached: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn is_breached_at(&self, now: DateTime<Utc>) -> bool {
        self.status != QueueStatus::Resolved && now > self.sla_deadline
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityTier {
    New,
    Unrated,
    Low,
    Moderate,
    High,
    VerifiedSource,
}

impl ReliabilityTier {
    pub const ALL: [ReliabilityTier; 6] = [
        ReliabilityTier::New,
        ReliabilityTier::Unrated,
        ReliabilityTier::Low,
        ReliabilityTier::Moderate,
        ReliabilityTier::High,
        ReliabilityTier::VerifiedSource,
    ];

    pub fn up(self) -> Option<Self> {
        match self {
            ReliabilityTier::New => Some(ReliabilityTier::Unrated),
            ReliabilityTier::Unrated => Some(ReliabilityTier::Low),
            ReliabilityTier::Low => Some(ReliabilityTier::Moderate),
            ReliabilityTier::Moderate => Some(ReliabilityTier::High),
            ReliabilityTier::High => Some(ReliabilityTier::VerifiedSource),
            ReliabilityTier::VerifiedSource => None,
        }
    }

    pub fn down(self) -> Option<Self> {
        match self {
            ReliabilityTier::New => None,
            ReliabilityTier::Unrated => Some(ReliabilityTier::New),
            ReliabilityTier::Low => Some(ReliabilityTier::Unrated),
            ReliabilityTier::Moderate => Some(ReliabilityTier::Low),
            ReliabilityTier::High => Some(ReliabilityTier::Moderate),
            ReliabilityTier::VerifiedSource => Some(ReliabilityTier::High),
        }
    }

    /// Whether the tier is assigned from score (as opposed to review count).
    pub fn is_rated(self) -> bool {
        !matches!(self, ReliabilityTier::New | ReliabilityTier::Unrated)
    }
}

/// A tip recently submitted by a tipster, used for rate and hoax-history rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTip {
    pub tip_id: TipId,
    pub submitted_at: DateTime<Utc>,
    /// Raised a hoax indicator that no verified review has cleared yet
    pub hoax_flagged: bool,
}

/// Aggregate over every tip from one identity. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipsterProfile {
    pub id: TipsterId,
    pub total_tips: u32,
    pub reviewed_tips: u32,
    pub verified_tips: u32,
    pub partially_verified_tips: u32,
    pub false_tips: u32,
    pub tips_leading_to_resolution: u32,
    pub reliability_score: f64,
    pub reliability_tier: ReliabilityTier,
    pub is_blocked: bool,
    pub blocked_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub last_tip_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub recent_tips: VecDeque<RecentTip>,
}

impl TipsterProfile {
    pub fn new(id: TipsterId, initial_score: f64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            total_tips: 0,
            reviewed_tips: 0,
            verified_tips: 0,
            partially_verified_tips: 0,
            false_tips: 0,
            tips_leading_to_resolution: 0,
            reliability_score: initial_score.clamp(0.0, 100.0),
            reliability_tier: ReliabilityTier::New,
            is_blocked: false,
            blocked_at: None,
            first_seen_at: now,
            last_tip_at: None,
            recent_tips: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Verified,
    Rejected,
    NeedsMoreInfo,
    Escalated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRequest {
    pub title: String,
    pub description: String,
}

/// Reviewer input for resolving a queue item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSubmission {
    pub queue_item_id: QueueItemId,
    pub reviewer_id: ReviewerId,
    pub outcome: ReviewOutcome,
    pub notes: Option<String>,
    pub override_score: Option<u8>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub create_lead: bool,
    pub lead_title: Option<String>,
}

/// Outcome record. Created exactly once per queue item resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDecision {
    pub id: Uuid,
    pub queue_item_id: QueueItemId,
    pub tip_id: TipId,
    pub reviewer_id: ReviewerId,
    pub outcome: ReviewOutcome,
    pub override_score: Option<u8>,
    pub notes: Option<String>,
    pub partial: bool,
    pub lead_request: Option<LeadRequest>,
    pub decided_at: DateTime<Utc>,
}

/// Everything written to the audit archive when an item is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRecord {
    pub item: QueueItem,
    pub decision: ReviewDecision,
    pub verification: TipVerification,
}

/// A queue item that has not been resolved yet, with the tip and
/// verification it carries. This is what survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenItem {
    pub item: QueueItem,
    pub tip: Tip,
    pub verification: TipVerification,
}

/// Live state read back at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriageSnapshot {
    pub tipsters: Vec<TipsterProfile>,
    pub open_items: Vec<OpenItem>,
    pub sightings: Vec<(CaseId, Sighting)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSeen {
    pub point: Option<GeoPoint>,
    pub at: DateTime<Utc>,
}

/// Read-only case attributes supplied by case management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRiskProfile {
    pub case_id: CaseId,
    #[serde(default)]
    pub is_minor: bool,
    #[serde(default)]
    pub suspected_abduction: bool,
    /// Remaining response window in minutes, if the case has one
    pub response_window_minutes: Option<i64>,
    pub last_seen: Option<LastSeen>,
    /// Set when the lookup failed and this profile is a stand-in.
    /// A degraded profile is always treated as high risk.
    #[serde(default)]
    pub degraded: bool,
}

impl CaseRiskProfile {
    /// Profile used when case management cannot be reached.
    pub fn fail_safe(case_id: CaseId) -> Self {
        Self {
            case_id,
            is_minor: false,
            suspected_abduction: false,
            response_window_minutes: None,
            last_seen: None,
            degraded: true,
        }
    }
}

/// A tip location that a reviewer confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sighting {
    pub tip_id: TipId,
    pub point: Option<GeoPoint>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipsterAction {
    Block,
    Unblock,
    UpgradeTier,
    DowngradeTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipsterSort {
    #[default]
    ReliabilityScore,
    TotalTips,
    VerifiedTips,
    FalseTips,
    LastTip,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TipsterQuery {
    pub tier: Option<ReliabilityTier>,
    pub sort_by: TipsterSort,
    pub include_blocked: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueQuery {
    pub queue_type: Option<QueueType>,
    pub status: QueueStatus,
    pub breached_only: bool,
    pub limit: Option<usize>,
}

impl Default for QueueQuery {
    fn default() -> Self {
        Self {
            queue_type: None,
            status: QueueStatus::Pending,
            breached_only: false,
            limit: None,
        }
    }
}

/// Dashboard counters. Purely derived.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_pending: usize,
    pub in_review: usize,
    pub pending_by_queue: BTreeMap<QueueType, usize>,
    pub sla_breached: usize,
    pub resolved: usize,
    pub tipster_tiers: BTreeMap<ReliabilityTier, usize>,
    pub blocked_tipsters: usize,
}
