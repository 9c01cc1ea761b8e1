//! Record store contract shared by the client session and the admin console.
//!
//! The store is the only channel between the two sides: the client inserts a
//! row and polls it, the administrator mutates or deletes it and watches the
//! change feed.

use crate::error::Result;
use async_trait::async_trait;
use otpgate_models::{ApprovalRecord, NewApprovalRecord, RecordChange, RecordPatch};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of the change feed. Slow subscribers observe a lag error and are
/// expected to refetch the full list.
pub const CHANGE_FEED_CAPACITY: usize = 256;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a row, returning it with its generated id and timestamps.
    async fn insert(&self, new: &NewApprovalRecord) -> Result<ApprovalRecord>;

    /// Point read by id. A missing row is `Ok(None)`, not an error.
    async fn get(&self, id: Uuid) -> Result<Option<ApprovalRecord>>;

    /// Apply a forward-only field update. Fails with `NotFound` if the row is gone.
    async fn update(&self, id: Uuid, patch: &RecordPatch) -> Result<ApprovalRecord>;

    /// Hard delete. Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Every row, newest first.
    async fn list(&self) -> Result<Vec<ApprovalRecord>>;

    /// Subscribe to insert/update/delete notifications.
    fn subscribe(&self) -> broadcast::Receiver<RecordChange>;
}
