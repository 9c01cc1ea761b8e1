pub mod connection;
pub mod error;
pub mod memory;
pub mod repositories;
pub mod store;

pub use connection::{Database, DatabaseConfig};
pub use error::{Result, StoreError};
pub use memory::MemoryRecordStore;
pub use repositories::approval_records::ApprovalRecordRepository;
pub use store::{RecordStore, CHANGE_FEED_CAPACITY};
