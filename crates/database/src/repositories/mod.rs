pub mod approval_records;
