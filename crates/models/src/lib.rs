pub mod change;
pub mod identity;
pub mod record;
pub mod status;

// Re-export commonly used types
pub use change::RecordChange;
pub use identity::{Identity, LoginMethod, DEFAULT_COUNTRY_CODE};
pub use record::{ApprovalRecord, NewApprovalRecord, RecordPatch};
pub use status::{RecordStatus, StatusCounts, StatusFilter};
