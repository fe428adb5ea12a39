//! # Queue Manager
//!
//! Four ordered queues over one item store.
//!
//! Each item sits behind its own async mutex: claim, release and review on
//! the same item are serialized, operations on different items never wait on
//! each other. Listing goes through an index keyed by `(queue, status)` whose
//! entries are ordered by SLA deadline, so breach queries only walk the
//! overdue prefix of each queue.
//!
//! Resolution is terminal: the item leaves every map here and can only be
//! read back from the decision archive.
//!
//! Lock order: an item mutex may be held while touching the index, never
//! the other way round.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{AppError, Result};
use crate::models::{
    QueueItem, QueueItemId, QueueQuery, QueueStatus, QueueType, ReviewDecision, TipId,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IndexKey {
    deadline: DateTime<Utc>,
    score: Reverse<u8>,
    created_at: DateTime<Utc>,
    id: QueueItemId,
}

impl IndexKey {
    fn of(item: &QueueItem) -> Self {
        Self {
            deadline: item.sla_deadline,
            score: Reverse(item.credibility_score),
            created_at: item.created_at,
            id: item.id,
        }
    }
}

/// An item plus the decision that resolved it, if any. The decision is only
/// seen by callers that were already waiting on the lock at resolution.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) item: QueueItem,
    pub(crate) decision: Option<ReviewDecision>,
}

/// Returns a copy with `sla_breached` recomputed against `now`.
fn view(item: &QueueItem, now: DateTime<Utc>) -> QueueItem {
    let mut out = item.clone();
    if out.status != QueueStatus::Resolved {
        out.sla_breached = item.is_breached_at(now);
    }
    out
}

const OPEN: [QueueStatus; 2] = [QueueStatus::Pending, QueueStatus::InReview];

#[derive(Debug, Default)]
pub struct QueueManager {
    slots: DashMap<QueueItemId, Arc<Mutex<Slot>>>,
    by_tip: DashMap<TipId, QueueItemId>,
    index: DashMap<(QueueType, QueueStatus), BTreeSet<IndexKey>>,
    resolved: AtomicUsize,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a freshly classified item. One item per tip.
    pub fn enqueue(&self, item: QueueItem) -> Result<QueueItem> {
        match self.by_tip.entry(item.tip_id) {
            Entry::Occupied(existing) => {
                return Err(AppError::Conflict(format!(
                    "tip {} is already queued as {}",
                    item.tip_id,
                    existing.get()
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(item.id);
            }
        }
        self.slots.insert(
            item.id,
            Arc::new(Mutex::new(Slot {
                item: item.clone(),
                decision: None,
            })),
        );
        self.index_insert(&item);
        debug!("queued item {} in {:?} (deadline {})", item.id, item.queue_type, item.sla_deadline);
        Ok(item)
    }

    pub fn item_id_for_tip(&self, tip_id: TipId) -> Option<QueueItemId> {
        self.by_tip.get(&tip_id).map(|id| *id)
    }

    fn slot(&self, id: QueueItemId) -> Result<Arc<Mutex<Slot>>> {
        self.slots
            .get(&id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| AppError::not_found("queue item", id))
    }

    /// Enters the per-item critical section.
    pub(crate) async fn lock(&self, id: QueueItemId) -> Result<OwnedMutexGuard<Slot>> {
        let slot = self.slot(id)?;
        Ok(slot.lock_owned().await)
    }

    pub async fn get(&self, id: QueueItemId, now: DateTime<Utc>) -> Result<QueueItem> {
        let guard = self.lock(id).await?;
        Ok(view(&guard.item, now))
    }

    /// Atomic compare-and-swap of `claimed_by` from nobody to `reviewer`.
    /// Re-claiming by the current claimant is a no-op.
    pub async fn claim(&self, id: QueueItemId, reviewer: &str, now: DateTime<Utc>) -> Result<QueueItem> {
        if reviewer.trim().is_empty() {
            return Err(AppError::Validation("reviewer id is required".into()));
        }
        let mut guard = self.lock(id).await?;
        if guard.item.status == QueueStatus::Resolved {
            return Err(AppError::Conflict(format!("queue item {id} is already resolved")));
        }
        match guard.item.claimed_by.as_deref() {
            Some(current) if current == reviewer => return Ok(view(&guard.item, now)),
            Some(current) => {
                return Err(AppError::Conflict(format!(
                    "queue item {id} is already claimed by {current}"
                )))
            }
            None => {}
        }

        self.update(&mut guard, |item| {
            item.status = QueueStatus::InReview;
            item.claimed_by = Some(reviewer.to_string());
            item.claimed_at = Some(now);
        });
        info!("queue item {} claimed by {}", id, reviewer);
        Ok(view(&guard.item, now))
    }

    /// Explicit unclaim. Only the current claimant may release.
    pub async fn release(&self, id: QueueItemId, reviewer: &str, now: DateTime<Utc>) -> Result<QueueItem> {
        let mut guard = self.lock(id).await?;
        if guard.item.status == QueueStatus::Resolved {
            return Err(AppError::Conflict(format!("queue item {id} is already resolved")));
        }
        if guard.item.claimed_by.as_deref() != Some(reviewer) {
            return Err(AppError::Conflict(format!("queue item {id} is not claimed by {reviewer}")));
        }
        self.update(&mut guard, Self::unclaim);
        info!("queue item {} released by {}", id, reviewer);
        Ok(view(&guard.item, now))
    }

    fn unclaim(item: &mut QueueItem) {
        item.status = QueueStatus::Pending;
        item.claimed_by = None;
        item.claimed_at = None;
    }

    /// Reverts claims older than `timeout` to pending.
    pub async fn release_stale_claims(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<QueueItemId> {
        let mut released = Vec::new();
        for id in self.ids_with_status(QueueStatus::InReview) {
            let Ok(mut guard) = self.lock(id).await else { continue };
            let stale = guard.item.status == QueueStatus::InReview
                && guard.item.claimed_at.is_some_and(|at| now - at > timeout);
            if stale {
                let reviewer = guard.item.claimed_by.clone().unwrap_or_default();
                self.update(&mut guard, Self::unclaim);
                warn!("claim on queue item {} by {} timed out; back to pending", id, reviewer);
                released.push(id);
            }
        }
        released
    }

    /// Moves an open item to a new queue/deadline after reclassification.
    pub(crate) fn reclassify(
        &self,
        slot: &mut Slot,
        queue_type: QueueType,
        sla_deadline: DateTime<Utc>,
        credibility_score: u8,
        now: DateTime<Utc>,
    ) {
        self.update(slot, |item| {
            item.queue_type = queue_type;
            item.sla_deadline = sla_deadline;
            item.credibility_score = credibility_score;
            item.sla_breached = item.is_breached_at(now);
        });
    }

    /// Terminal transition. Removes the item from every index and map.
    pub(crate) fn resolve(&self, slot: &mut Slot, decision: ReviewDecision, now: DateTime<Utc>) {
        self.update(slot, |item| {
            item.sla_breached = item.is_breached_at(now);
            item.status = QueueStatus::Resolved;
            item.resolved_at = Some(now);
        });
        slot.decision = Some(decision);
        self.slots.remove(&slot.item.id);
        self.by_tip.remove(&slot.item.tip_id);
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Seeds the resolved counter from the archive at startup.
    pub(crate) fn restore_resolved_count(&self, count: usize) {
        self.resolved.store(count, Ordering::Relaxed);
    }

    pub fn open_count(&self) -> usize {
        self.slots.len()
    }

    /// Applies `change` and moves the item's index entry to match.
    fn update(&self, slot: &mut Slot, change: impl FnOnce(&mut QueueItem)) {
        let before = (slot.item.queue_type, slot.item.status, IndexKey::of(&slot.item));
        change(&mut slot.item);
        if let Some(mut keys) = self.index.get_mut(&(before.0, before.1)) {
            keys.remove(&before.2);
        }
        if slot.item.status != QueueStatus::Resolved {
            self.index_insert(&slot.item);
        }
    }

    fn index_insert(&self, item: &QueueItem) {
        self.index
            .entry((item.queue_type, item.status))
            .or_default()
            .insert(IndexKey::of(item));
    }

    fn ids_with_status(&self, status: QueueStatus) -> Vec<QueueItemId> {
        QueueType::ALL
            .iter()
            .filter_map(|queue| self.index.get(&(*queue, status)))
            .flat_map(|keys| keys.iter().map(|k| k.id).collect::<Vec<_>>())
            .collect()
    }

    fn overdue_ids(&self, now: DateTime<Utc>) -> Vec<QueueItemId> {
        let mut ids = Vec::new();
        for queue in QueueType::ALL {
            for status in OPEN {
                if let Some(keys) = self.index.get(&(queue, status)) {
                    ids.extend(keys.iter().take_while(|k| k.deadline < now).map(|k| k.id));
                }
            }
        }
        ids
    }

    /// Highest-priority queue first; within a queue, earliest deadline
    /// (i.e. most breached) first, then higher credibility.
    pub async fn list(&self, query: &QueueQuery, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        if query.status == QueueStatus::Resolved {
            return Err(AppError::Validation(
                "resolved items are archived and cannot be listed from the queue".into(),
            ));
        }
        let queues: Vec<QueueType> = match query.queue_type {
            Some(queue) => vec![queue],
            None => QueueType::ALL.to_vec(),
        };
        let limit = query.limit.unwrap_or(usize::MAX);

        let mut ids = Vec::new();
        for queue in queues {
            if ids.len() >= limit {
                break;
            }
            if let Some(keys) = self.index.get(&(queue, query.status)) {
                let remaining = limit - ids.len();
                ids.extend(
                    keys.iter()
                        .take_while(|k| !query.breached_only || k.deadline < now)
                        .take(remaining)
                        .map(|k| k.id),
                );
            }
        }

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(guard) = self.lock(id).await else { continue };
            // The item may have moved between the index read and the lock.
            if guard.item.status == query.status {
                items.push(view(&guard.item, now));
            }
        }
        Ok(items)
    }

    /// Sets the derived breach flag on newly overdue items. Never changes status.
    pub async fn mark_breaches(&self, now: DateTime<Utc>) -> Vec<QueueItemId> {
        let mut newly = Vec::new();
        for id in self.overdue_ids(now) {
            let Ok(mut guard) = self.lock(id).await else { continue };
            if !guard.item.sla_breached && guard.item.is_breached_at(now) {
                guard.item.sla_breached = true;
                newly.push(id);
            }
        }
        newly
    }

    pub fn breached_count(&self, now: DateTime<Utc>) -> usize {
        self.overdue_ids(now).len()
    }

    pub fn pending_by_queue(&self) -> BTreeMap<QueueType, usize> {
        QueueType::ALL
            .iter()
            .map(|queue| {
                let count = self
                    .index
                    .get(&(*queue, QueueStatus::Pending))
                    .map_or(0, |keys| keys.len());
                (*queue, count)
            })
            .collect()
    }

    pub fn in_review_count(&self) -> usize {
        QueueType::ALL
            .iter()
            .filter_map(|queue| self.index.get(&(*queue, QueueStatus::InReview)))
            .map(|keys| keys.len())
            .sum()
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.load(Ordering::Relaxed)
    }
}
