//! In-process record store.
//!
//! Backs local development (`STORE_BACKEND=memory`) and the test suites. Writes
//! are published on the change feed directly instead of through a database
//! trigger.

use crate::error::{Result, StoreError};
use crate::store::{RecordStore, CHANGE_FEED_CAPACITY};
use async_trait::async_trait;
use chrono::Utc;
use otpgate_models::{ApprovalRecord, NewApprovalRecord, RecordChange, RecordPatch};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Internal entry with an insertion sequence used to break `created_at` ties.
struct Entry {
    seq: u64,
    record: ApprovalRecord,
}

pub struct MemoryRecordStore {
    inner: RwLock<HashMap<Uuid, Entry>>,
    next_seq: AtomicU64,
    changes: broadcast::Sender<RecordChange>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            changes,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    fn publish(&self, change: RecordChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, new: &NewApprovalRecord) -> Result<ApprovalRecord> {
        check_single_identity(new)?;

        let record = ApprovalRecord::from_new(Uuid::new_v4(), new, Utc::now());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        {
            let mut inner = self.inner.write().await;
            inner.insert(
                record.id,
                Entry {
                    seq,
                    record: record.clone(),
                },
            );
        }

        self.publish(RecordChange::Inserted(record.clone()));
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ApprovalRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.get(&id).map(|e| e.record.clone()))
    }

    async fn update(&self, id: Uuid, patch: &RecordPatch) -> Result<ApprovalRecord> {
        let (record, changed) = {
            let mut inner = self.inner.write().await;
            let entry = inner
                .get_mut(&id)
                .ok_or_else(|| StoreError::record_not_found(id))?;
            let changed = entry.record.apply(patch);
            (entry.record.clone(), changed)
        };

        if changed {
            self.publish(RecordChange::Updated(record.clone()));
        }
        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let removed = self.inner.write().await.remove(&id).is_some();
        if removed {
            self.publish(RecordChange::Deleted(id));
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<ApprovalRecord>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Entry> = inner.values().collect();
        entries.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(entries.into_iter().map(|e| e.record.clone()).collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.changes.subscribe()
    }
}

/// Mirror of the table's single-identity CHECK constraint.
fn check_single_identity(new: &NewApprovalRecord) -> Result<()> {
    if new.identity.value().is_empty() {
        return Err(StoreError::InvalidInput(
            "exactly one identity column must be non-empty".to_string(),
        ));
    }
    Ok(())
}
