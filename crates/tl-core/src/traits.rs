//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    CaseId, CaseRiskProfile, LeadId, OpenItem, QueueItemId, ResolutionRecord, Sighting, TipId,
    TipsterContact, TipsterId, TipsterProfile, TriageSnapshot,
};

/// Read-only case lookup provided by case management.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CaseDirectory: Send + Sync {
    /// Fails with `DownstreamUnavailable` when case management is unreachable.
    async fn get_case_risk_profile(&self, case_id: CaseId) -> Result<CaseRiskProfile>;
}

/// Lead creation in case management. Called fire-and-forget.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LeadSink: Send + Sync {
    async fn create_lead(&self, case_id: CaseId, title: &str, description: &str) -> Result<LeadId>;
}

/// Maps raw contact details to a stable pseudonymous tipster id.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait TipsterIdentity: Send + Sync {
    fn resolve(&self, contact: &TipsterContact) -> TipsterId;
}

/// Audit sink for resolved queue items, and the only place resolved items
/// can be read back from once they leave the live queue.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DecisionArchive: Send + Sync {
    /// Must be durable before returning `Ok`.
    async fn archive(&self, record: &ResolutionRecord) -> Result<()>;

    async fn find_by_item(&self, item_id: QueueItemId) -> Result<Option<ResolutionRecord>>;

    async fn find_by_tip(&self, tip_id: TipId) -> Result<Option<ResolutionRecord>>;

    /// Number of archived resolutions.
    async fn count(&self) -> Result<usize>;
}

/// Durable copy of the live triage state: tipster profiles, open queue
/// items, confirmed sightings and resolution credits.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TriageRepository: Send + Sync {
    /// Insert or replace, keyed by tipster id.
    async fn save_tipster(&self, profile: &TipsterProfile) -> Result<()>;

    /// Insert or replace, keyed by queue item id.
    async fn save_open_item(&self, open: &OpenItem) -> Result<()>;

    /// Removing an unknown item is not an error.
    async fn remove_open_item(&self, item_id: QueueItemId) -> Result<()>;

    async fn record_sighting(&self, case_id: CaseId, sighting: &Sighting) -> Result<()>;

    /// Returns `false` if the tip was already credited.
    async fn mark_resolution_credited(&self, tip_id: TipId) -> Result<bool>;

    async fn load(&self) -> Result<TriageSnapshot>;
}
