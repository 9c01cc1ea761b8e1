//! Administrator side of the approval handshake.
//!
//! The console keeps a cached copy of every approval record, refetched
//! whenever the store reports a change, and exposes the three administrator
//! actions. Each action is a single store write; the client session learns
//! about it on its next poll.

use crate::error::{GateError, Result};
use chrono::{DateTime, Utc};
use otpgate_database::RecordStore;
use otpgate_models::{
    ApprovalRecord, Identity, RecordPatch, RecordStatus, StatusCounts, StatusFilter,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Placeholder shown instead of a hidden secret.
pub const MASKED_SECRET: &str = "••••••••";

#[derive(Default)]
struct ConsoleState {
    records: Vec<ApprovalRecord>,
    loading: bool,
    revealed: HashSet<Uuid>,
}

/// One record as the administrator sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleRow {
    pub id: Uuid,
    pub identity: Option<Identity>,
    pub secret: String,
    pub secret_visible: bool,
    pub status: RecordStatus,
    pub status_label: &'static str,
    pub user_entered_otp: Option<String>,
    pub otp_submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,

    // Which actions the row offers. The actions themselves accept any record.
    pub can_enable_otp: bool,
    pub can_approve: bool,
    pub can_reject: bool,
}

impl ConsoleRow {
    fn new(record: &ApprovalRecord, revealed: bool) -> Self {
        let status = record.status();
        let granted = record.is_granted();

        Self {
            id: record.id,
            identity: record.identity(),
            secret: if revealed {
                record.password.clone()
            } else {
                MASKED_SECRET.to_string()
            },
            secret_visible: revealed,
            status,
            status_label: status.label(),
            user_entered_otp: record.user_entered_otp.clone(),
            otp_submitted_at: record.otp_submitted_at,
            approved_at: record.approved_at,
            created_at: record.created_at,
            can_enable_otp: status == RecordStatus::Pending,
            can_approve: record.user_entered_otp.is_some() && !granted,
            can_reject: !granted,
        }
    }
}

/// Filtered snapshot of the console.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleView {
    pub loading: bool,
    pub filter: StatusFilter,
    pub counts: StatusCounts,
    pub rows: Vec<ConsoleRow>,
}

/// Live change subscription started by [`AdminConsole::start`].
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone)]
pub struct AdminConsole {
    store: Arc<dyn RecordStore>,
    state: Arc<RwLock<ConsoleState>>,
    updates: watch::Sender<u64>,
}

impl AdminConsole {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            store,
            state: Arc::new(RwLock::new(ConsoleState::default())),
            updates,
        }
    }

    /// Subscribe to the change feed and load the initial list.
    ///
    /// The subscription is taken before the first fetch so that no change
    /// between the two is missed.
    pub async fn start(&self) -> Result<Subscription> {
        let mut changes = self.store.subscribe();
        self.refresh().await?;

        let console = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => match change.record_id() {
                        Some(id) => tracing::debug!("Record {} changed, refreshing", id),
                        None => tracing::info!("Change feed resynced, refreshing"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Console lagged behind {} record changes", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }

                if let Err(e) = console.refresh().await {
                    tracing::error!("Failed to refresh approval records: {}", e);
                }
            }
        });

        tracing::info!("Admin console subscribed to record changes");
        Ok(Subscription { task: Some(task) })
    }

    /// Refetch the full list, newest first.
    pub async fn refresh(&self) -> Result<()> {
        self.state.write().await.loading = true;

        let fetched = self.store.list().await;

        let mut state = self.state.write().await;
        state.loading = false;
        let records = fetched.map_err(|e| GateError::StoreRead(e.to_string()))?;

        // Forget reveal toggles for records that are gone
        let ids: HashSet<Uuid> = records.iter().map(|r| r.id).collect();
        state.revealed.retain(|id| ids.contains(id));
        state.records = records;
        drop(state);

        self.notify();
        Ok(())
    }

    /// Receiver ticked after every refresh or reveal toggle.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    /// Open the OTP gate for `id`.
    pub async fn enable_otp_input(&self, id: Uuid) -> Result<ApprovalRecord> {
        let record = self
            .write(id, &RecordPatch::enable_otp_input())
            .await?;
        tracing::info!("OTP input enabled for record {}", id);
        Ok(record)
    }

    /// Grant `id`.
    pub async fn approve(&self, id: Uuid) -> Result<ApprovalRecord> {
        let record = self.write(id, &RecordPatch::approve(Utc::now())).await?;
        tracing::info!("Record {} approved", id);
        Ok(record)
    }

    /// Reject `id` by deleting it.
    pub async fn reject(&self, id: Uuid) -> Result<()> {
        let removed = self
            .store
            .delete(id)
            .await
            .map_err(|e| GateError::StoreWrite(e.to_string()))?;

        if !removed {
            return Err(GateError::NotFound(id));
        }

        tracing::info!("Record {} rejected", id);
        Ok(())
    }

    /// Flip whether the secret of `id` is shown. Returns the new visibility.
    pub async fn toggle_secret_visibility(&self, id: Uuid) -> bool {
        let visible = {
            let mut state = self.state.write().await;
            if state.revealed.remove(&id) {
                false
            } else {
                state.revealed.insert(id);
                true
            }
        };
        self.notify();
        visible
    }

    pub async fn view(&self, filter: StatusFilter) -> ConsoleView {
        let state = self.state.read().await;

        let rows = state
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| ConsoleRow::new(r, state.revealed.contains(&r.id)))
            .collect();

        ConsoleView {
            loading: state.loading,
            filter,
            counts: StatusCounts::tally(&state.records),
            rows,
        }
    }

    async fn write(&self, id: Uuid, patch: &RecordPatch) -> Result<ApprovalRecord> {
        self.store.update(id, patch).await.map_err(|e| {
            tracing::warn!("Update of record {} failed: {}", id, e);
            GateError::from_write(Some(id), e)
        })
    }

    fn notify(&self) {
        self.updates.send_modify(|n| *n = n.wrapping_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use otpgate_database::{MemoryRecordStore, StoreError};
    use otpgate_models::{NewApprovalRecord, RecordChange};
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Store whose change feed is driven by the test rather than by writes.
    struct QuietStore {
        inner: MemoryRecordStore,
        changes: broadcast::Sender<RecordChange>,
    }

    #[async_trait]
    impl RecordStore for QuietStore {
        async fn insert(
            &self,
            new: &NewApprovalRecord,
        ) -> std::result::Result<ApprovalRecord, StoreError> {
            self.inner.insert(new).await
        }

        async fn get(&self, id: Uuid) -> std::result::Result<Option<ApprovalRecord>, StoreError> {
            self.inner.get(id).await
        }

        async fn update(
            &self,
            id: Uuid,
            patch: &RecordPatch,
        ) -> std::result::Result<ApprovalRecord, StoreError> {
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: Uuid) -> std::result::Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn list(&self) -> std::result::Result<Vec<ApprovalRecord>, StoreError> {
            self.inner.list().await
        }

        fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
            self.changes.subscribe()
        }
    }

    async fn seeded() -> (Arc<MemoryRecordStore>, AdminConsole, Uuid) {
        let store = Arc::new(MemoryRecordStore::new());
        let record = store
            .insert(&NewApprovalRecord::new(
                Identity::email_or_username("a@b.com"),
                "hunter2",
            ))
            .await
            .unwrap();
        let console = AdminConsole::new(store.clone());
        (store, console, record.id)
    }

    #[tokio::test]
    async fn test_view_masks_secret_until_revealed() {
        let (_store, console, id) = seeded().await;
        console.refresh().await.unwrap();

        let view = console.view(StatusFilter::All).await;
        assert!(!view.loading);
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].secret, MASKED_SECRET);
        assert!(!view.rows[0].secret_visible);

        assert!(console.toggle_secret_visibility(id).await);
        let view = console.view(StatusFilter::All).await;
        assert_eq!(view.rows[0].secret, "hunter2");

        assert!(!console.toggle_secret_visibility(id).await);
        let view = console.view(StatusFilter::All).await;
        assert_eq!(view.rows[0].secret, MASKED_SECRET);
    }

    #[tokio::test]
    async fn test_actions_and_row_hints() {
        let (store, console, id) = seeded().await;
        console.refresh().await.unwrap();

        let row = &console.view(StatusFilter::All).await.rows[0];
        assert!(row.can_enable_otp);
        assert!(!row.can_approve);
        assert!(row.can_reject);

        let record = console.enable_otp_input(id).await.unwrap();
        assert!(record.show_otp_input);

        store
            .update(id, &RecordPatch::submit_otp("123456", Utc::now()))
            .await
            .unwrap();
        console.refresh().await.unwrap();
        let row = &console.view(StatusFilter::All).await.rows[0];
        assert_eq!(row.status, RecordStatus::OtpSubmitted);
        assert!(!row.can_enable_otp);
        assert!(row.can_approve);

        let record = console.approve(id).await.unwrap();
        assert!(record.is_verified);
        assert!(record.is_approved);
        assert!(record.approved_at.is_some());

        console.refresh().await.unwrap();
        let view = console.view(StatusFilter::Only(RecordStatus::Approved)).await;
        assert_eq!(view.rows.len(), 1);
        assert!(!view.rows[0].can_approve);
        assert!(!view.rows[0].can_reject);
        assert_eq!(view.counts.approved, 1);
        assert_eq!(view.counts.all, 1);
    }

    #[tokio::test]
    async fn test_actions_on_missing_record() {
        let (_store, console, _id) = seeded().await;
        let missing = Uuid::new_v4();

        assert!(matches!(
            console.enable_otp_input(missing).await,
            Err(GateError::NotFound(id)) if id == missing
        ));
        assert!(matches!(
            console.approve(missing).await,
            Err(GateError::NotFound(_))
        ));
        assert!(matches!(
            console.reject(missing).await,
            Err(GateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_tracks_changes() {
        let (store, console, id) = seeded().await;
        let subscription = console.start().await.unwrap();
        assert!(subscription.is_active());
        assert_eq!(console.view(StatusFilter::All).await.rows.len(), 1);

        let mut updates = console.updates();
        console.reject(id).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                updates.changed().await.unwrap();
                if console.view(StatusFilter::All).await.rows.is_empty() {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert!(store.get(id).await.unwrap().is_none());

        subscription.unsubscribe();
        store
            .insert(&NewApprovalRecord::new(Identity::Username("bob".into()), "pw"))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(console.view(StatusFilter::All).await.rows.is_empty());
    }

    #[tokio::test]
    async fn test_resync_refetches_missed_changes() {
        let (changes, _) = broadcast::channel(8);
        let store = Arc::new(QuietStore {
            inner: MemoryRecordStore::new(),
            changes: changes.clone(),
        });
        let console = AdminConsole::new(store.clone());
        let _subscription = console.start().await.unwrap();
        let mut updates = console.updates();
        updates.borrow_and_update();

        // Written while the feed was down, so no change was published
        store
            .insert(&NewApprovalRecord::new(Identity::Username("bob".into()), "pw"))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(console.view(StatusFilter::All).await.rows.is_empty());

        changes.send(RecordChange::Resynced).unwrap();
        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .unwrap()
            .unwrap();
        let view = console.view(StatusFilter::All).await;
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].identity, Some(Identity::Username("bob".into())));
    }
}
