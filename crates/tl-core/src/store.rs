//! # In-memory stores
//!
//! Tips, their verifications and the confirmed sightings per case. All are
//! sharded maps; nothing here holds a lock across an `.await`.
//!
//! Resolved work leaves these stores: verifications move to the archive,
//! and a case keeps only the tips it still needs for duplicate lookback
//! plus any that are still open.
//!
//! Lock order: `by_case` before `tips`.

use std::collections::VecDeque;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{AppError, Result};
use crate::models::{CaseId, Sighting, Tip, TipId, TipVerification};

/// Confirmed sightings kept per case, newest last.
const SIGHTINGS_PER_CASE: usize = 256;

#[derive(Debug)]
struct StoredTip {
    tip: Tip,
    open: bool,
}

/// Intake record of accepted tips, plus a per-case arrival order.
#[derive(Debug)]
pub struct TipStore {
    tips: DashMap<TipId, StoredTip>,
    by_case: DashMap<CaseId, VecDeque<TipId>>,
    /// Closed tips beyond this many per case are dropped.
    per_case: usize,
}

impl TipStore {
    pub fn new(per_case: usize) -> Self {
        Self {
            tips: DashMap::new(),
            by_case: DashMap::new(),
            per_case: per_case.max(1),
        }
    }

    /// Stores a new open tip. A repeated id is a conflict.
    pub fn insert(&self, tip: Tip) -> Result<()> {
        let (id, case_id) = (tip.id, tip.case_id);
        match self.tips.entry(id) {
            Entry::Occupied(_) => return Err(AppError::Conflict(format!("tip {id} was already submitted"))),
            Entry::Vacant(slot) => {
                slot.insert(StoredTip { tip, open: true });
            }
        }
        let mut ids = self.by_case.entry(case_id).or_default();
        ids.push_back(id);
        self.prune(&mut ids);
        Ok(())
    }

    /// Drops closed tips from the front while the case is over its bound.
    /// An open tip at the front stops the pass.
    fn prune(&self, ids: &mut VecDeque<TipId>) {
        while ids.len() > self.per_case {
            let Some(&oldest) = ids.front() else { break };
            let closed = self.tips.get(&oldest).map_or(true, |t| !t.open);
            if !closed {
                break;
            }
            ids.pop_front();
            self.tips.remove(&oldest);
        }
    }

    /// Marks the tip resolved, making it eligible for eviction.
    pub fn close(&self, id: TipId) {
        if let Some(mut stored) = self.tips.get_mut(&id) {
            stored.open = false;
        }
    }

    /// Undoes an insert whose intake did not complete.
    pub fn remove(&self, id: TipId) {
        let Some(case_id) = self.tips.get(&id).map(|t| t.tip.case_id) else { return };
        if let Some(mut ids) = self.by_case.get_mut(&case_id) {
            ids.retain(|tip_id| *tip_id != id);
        }
        self.tips.remove(&id);
    }

    pub fn get(&self, id: TipId) -> Result<Tip> {
        self.tips
            .get(&id)
            .map(|t| t.tip.clone())
            .ok_or_else(|| AppError::not_found("tip", id))
    }

    pub fn contains(&self, id: TipId) -> bool {
        self.tips.contains_key(&id)
    }

    /// Up to `lookback` most recent tips for the case, oldest first,
    /// excluding `except`.
    pub fn recent_for_case(&self, case_id: CaseId, except: TipId, lookback: usize) -> Vec<Tip> {
        let ids: Vec<TipId> = match self.by_case.get(&case_id) {
            Some(ids) => ids.iter().rev().filter(|id| **id != except).take(lookback).copied().collect(),
            None => return Vec::new(),
        };
        let mut tips: Vec<Tip> = ids
            .into_iter()
            .filter_map(|id| self.tips.get(&id).map(|t| t.tip.clone()))
            .collect();
        tips.reverse();
        tips
    }
}

#[derive(Debug, Default)]
pub struct VerificationStore {
    records: DashMap<TipId, TipVerification>,
}

impl VerificationStore {
    pub fn insert(&self, verification: TipVerification) {
        self.records.insert(verification.tip_id, verification);
    }

    pub fn get(&self, tip_id: TipId) -> Result<TipVerification> {
        self.records
            .get(&tip_id)
            .map(|v| v.clone())
            .ok_or_else(|| AppError::not_found("verification", tip_id))
    }

    pub fn remove(&self, tip_id: TipId) {
        self.records.remove(&tip_id);
    }
}

/// Tip locations confirmed by a verified review, per case.
#[derive(Debug, Default)]
pub struct SightingLog {
    by_case: DashMap<CaseId, VecDeque<Sighting>>,
}

impl SightingLog {
    /// Returns `false` if the tip was already recorded.
    pub fn record(&self, case_id: CaseId, sighting: Sighting) -> bool {
        let mut sightings = self.by_case.entry(case_id).or_default();
        if sightings.iter().any(|s| s.tip_id == sighting.tip_id) {
            return false;
        }
        sightings.push_back(sighting);
        while sightings.len() > SIGHTINGS_PER_CASE {
            sightings.pop_front();
        }
        true
    }

    pub fn for_case(&self, case_id: CaseId) -> Vec<Sighting> {
        self.by_case
            .get(&case_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContactKind, GeoPoint, TipsterContact};
    use chrono::Utc;
    use uuid::Uuid;

    fn tip(case_id: CaseId, content: &str) -> Tip {
        Tip {
            id: Uuid::now_v7(),
            case_id,
            content: content.into(),
            location: None,
            sighted_at: None,
            photos: Vec::new(),
            is_anonymous: false,
            tipster: TipsterContact {
                kind: ContactKind::Phone,
                value: "+15550100".into(),
            },
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_tip_id_conflicts() {
        let store = TipStore::new(8);
        let t = tip(Uuid::nil(), "first");
        store.insert(t.clone()).unwrap();
        assert!(matches!(store.insert(t), Err(AppError::Conflict(_))));
    }

    #[test]
    fn case_history_is_bounded_and_ordered() {
        let store = TipStore::new(8);
        let case = Uuid::now_v7();
        let tips: Vec<Tip> = (0..5).map(|n| tip(case, &format!("tip {n}"))).collect();
        for t in &tips {
            store.insert(t.clone()).unwrap();
        }
        store.insert(tip(Uuid::now_v7(), "other case")).unwrap();

        let recent = store.recent_for_case(case, tips[4].id, 2);
        let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["tip 2", "tip 3"]);
    }

    #[test]
    fn closed_tips_beyond_the_bound_are_evicted() {
        let store = TipStore::new(2);
        let case = Uuid::now_v7();
        let tips: Vec<Tip> = (0..4).map(|n| tip(case, &format!("tip {n}"))).collect();

        store.insert(tips[0].clone()).unwrap();
        store.insert(tips[1].clone()).unwrap();
        store.insert(tips[2].clone()).unwrap();
        // Still open, so nothing may go.
        assert!(store.contains(tips[0].id));

        store.close(tips[0].id);
        store.insert(tips[3].clone()).unwrap();
        assert!(!store.contains(tips[0].id));
        // tips[1] is open and now at the front; it blocks further eviction.
        assert!(store.contains(tips[1].id));
        assert_eq!(store.recent_for_case(case, Uuid::nil(), 10).len(), 3);
    }

    #[test]
    fn removed_tip_leaves_no_trace() {
        let store = TipStore::new(8);
        let case = Uuid::now_v7();
        let t = tip(case, "abandoned");
        store.insert(t.clone()).unwrap();
        store.remove(t.id);
        assert!(store.get(t.id).is_err());
        assert!(store.recent_for_case(case, Uuid::nil(), 10).is_empty());
        store.insert(t).unwrap();
    }

    #[test]
    fn sightings_are_recorded_once_per_tip() {
        let log = SightingLog::default();
        let case = Uuid::now_v7();
        let sighting = Sighting {
            tip_id: Uuid::now_v7(),
            point: Some(GeoPoint::new(40.0, -74.0)),
            at: Utc::now(),
        };
        assert!(log.record(case, sighting.clone()));
        assert!(!log.record(case, sighting));
        assert_eq!(log.for_case(case).len(), 1);
        assert!(log.for_case(Uuid::now_v7()).is_empty());
    }
}
