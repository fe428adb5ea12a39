//! In-process port implementations.
//!
//! Used by the binary when a plugin feature is disabled, and by the engine
//! tests. None of these persist anything across restarts, but the archive
//! and repository outlive any engine that shares them.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use log::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    CaseId, CaseRiskProfile, ContactKind, LeadId, OpenItem, QueueItemId, ResolutionRecord,
    Sighting, TipId, TipsterContact, TipsterId, TipsterProfile, TriageSnapshot,
};
use crate::traits::{CaseDirectory, DecisionArchive, LeadSink, TipsterIdentity, TriageRepository};

/// Case profiles registered up front. Unknown cases are `NotFound`.
#[derive(Debug, Default)]
pub struct StaticCaseDirectory {
    cases: DashMap<CaseId, CaseRiskProfile>,
}

impl StaticCaseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: CaseRiskProfile) {
        self.cases.insert(profile.case_id, profile);
    }
}

#[async_trait]
impl CaseDirectory for StaticCaseDirectory {
    async fn get_case_risk_profile(&self, case_id: CaseId) -> Result<CaseRiskProfile> {
        self.cases
            .get(&case_id)
            .map(|p| p.clone())
            .ok_or_else(|| AppError::not_found("case", case_id))
    }
}

/// Writes leads to the log instead of a case-management service.
#[derive(Debug, Default)]
pub struct LogLeadSink;

#[async_trait]
impl LeadSink for LogLeadSink {
    async fn create_lead(&self, case_id: CaseId, title: &str, _description: &str) -> Result<LeadId> {
        let lead_id = format!("local-{}", Uuid::now_v7());
        info!("lead {} for case {}: {}", lead_id, case_id, title);
        Ok(lead_id)
    }
}

/// Unsalted identity mapping: lowercased contact value, prefixed by kind.
#[derive(Debug, Default)]
pub struct PlainIdentity;

impl TipsterIdentity for PlainIdentity {
    fn resolve(&self, contact: &TipsterContact) -> TipsterId {
        let kind = match contact.kind {
            ContactKind::Email => "email",
            ContactKind::Phone => "phone",
            ContactKind::Anonymous => "anon",
        };
        TipsterId(format!("{kind}:{}", contact.value.trim().to_lowercase()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryArchive {
    records: DashMap<QueueItemId, ResolutionRecord>,
    by_tip: DashMap<TipId, QueueItemId>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, item_id: QueueItemId) -> Option<ResolutionRecord> {
        self.records.get(&item_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl DecisionArchive for MemoryArchive {
    async fn archive(&self, record: &ResolutionRecord) -> Result<()> {
        match self.records.entry(record.item.id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "queue item {} is already archived",
                record.item.id
            ))),
            Entry::Vacant(slot) => {
                self.by_tip.insert(record.item.tip_id, record.item.id);
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn find_by_item(&self, item_id: QueueItemId) -> Result<Option<ResolutionRecord>> {
        Ok(self.get(item_id))
    }

    async fn find_by_tip(&self, tip_id: TipId) -> Result<Option<ResolutionRecord>> {
        let item_id = self.by_tip.get(&tip_id).map(|id| *id);
        Ok(item_id.and_then(|id| self.get(id)))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    tipsters: DashMap<TipsterId, TipsterProfile>,
    open_items: DashMap<QueueItemId, OpenItem>,
    sightings: DashMap<TipId, (CaseId, Sighting)>,
    credited: DashSet<TipId>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_item_count(&self) -> usize {
        self.open_items.len()
    }

    pub fn tipster(&self, id: &TipsterId) -> Option<TipsterProfile> {
        self.tipsters.get(id).map(|p| p.clone())
    }
}

#[async_trait]
impl TriageRepository for MemoryRepository {
    async fn save_tipster(&self, profile: &TipsterProfile) -> Result<()> {
        self.tipsters.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn save_open_item(&self, open: &OpenItem) -> Result<()> {
        self.open_items.insert(open.item.id, open.clone());
        Ok(())
    }

    async fn remove_open_item(&self, item_id: QueueItemId) -> Result<()> {
        self.open_items.remove(&item_id);
        Ok(())
    }

    async fn record_sighting(&self, case_id: CaseId, sighting: &Sighting) -> Result<()> {
        self.sightings
            .entry(sighting.tip_id)
            .or_insert_with(|| (case_id, sighting.clone()));
        Ok(())
    }

    async fn mark_resolution_credited(&self, tip_id: TipId) -> Result<bool> {
        Ok(self.credited.insert(tip_id))
    }

    async fn load(&self) -> Result<TriageSnapshot> {
        let mut sightings: Vec<(CaseId, Sighting)> = self.sightings.iter().map(|s| s.value().clone()).collect();
        sightings.sort_by_key(|(_, s)| s.at);
        Ok(TriageSnapshot {
            tipsters: self.tipsters.iter().map(|p| p.value().clone()).collect(),
            open_items: self.open_items.iter().map(|o| o.value().clone()).collect(),
            sightings,
        })
    }
}
