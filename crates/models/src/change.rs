use crate::record::ApprovalRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of the record change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "record", rename_all = "snake_case")]
pub enum RecordChange {
    Inserted(ApprovalRecord),
    Updated(ApprovalRecord),
    Deleted(Uuid),
    /// Changes may have been missed. Subscribers should refetch everything.
    Resynced,
}

impl RecordChange {
    /// The record this change is about. `None` for [`RecordChange::Resynced`].
    pub fn record_id(&self) -> Option<Uuid> {
        match self {
            Self::Inserted(record) | Self::Updated(record) => Some(record.id),
            Self::Deleted(id) => Some(*id),
            Self::Resynced => None,
        }
    }
}
