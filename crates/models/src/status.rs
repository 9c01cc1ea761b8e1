use crate::record::ApprovalRecord;
use serde::{Deserialize, Serialize};

/// Derived progress of a record. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    OtpEnabled,
    OtpSubmitted,
    Approved,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 4] = [
        RecordStatus::Pending,
        RecordStatus::OtpEnabled,
        RecordStatus::OtpSubmitted,
        RecordStatus::Approved,
    ];

    /// Precedence: approved > otp submitted > otp enabled > pending.
    pub fn of(record: &ApprovalRecord) -> Self {
        if record.is_granted() {
            Self::Approved
        } else if record.user_entered_otp.is_some() {
            Self::OtpSubmitted
        } else if record.show_otp_input {
            Self::OtpEnabled
        } else {
            Self::Pending
        }
    }

    /// Badge text shown next to a record.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::OtpEnabled => "OTP Input Enabled",
            Self::OtpSubmitted => "OTP Submitted",
            Self::Approved => "Approved",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::OtpEnabled => write!(f, "otp_enabled"),
            Self::OtpSubmitted => write!(f, "otp_submitted"),
            Self::Approved => write!(f, "approved"),
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "otp_enabled" => Ok(Self::OtpEnabled),
            "otp_submitted" => Ok(Self::OtpSubmitted),
            "approved" => Ok(Self::Approved),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// Administrator list filter (the console tabs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StatusFilter {
    #[default]
    All,
    Only(RecordStatus),
}

impl StatusFilter {
    pub fn matches(&self, record: &ApprovalRecord) -> bool {
        match self {
            Self::All => true,
            Self::Only(status) => record.status() == *status,
        }
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(Self::All),
            other => other.parse().map(Self::Only),
        }
    }
}

impl TryFrom<String> for StatusFilter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StatusFilter> for String {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::All => "all".to_string(),
            StatusFilter::Only(status) => status.to_string(),
        }
    }
}

/// Per-tab record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub all: usize,
    pub pending: usize,
    pub otp_enabled: usize,
    pub otp_submitted: usize,
    pub approved: usize,
}

impl StatusCounts {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a ApprovalRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.all += 1;
            match record.status() {
                RecordStatus::Pending => counts.pending += 1,
                RecordStatus::OtpEnabled => counts.otp_enabled += 1,
                RecordStatus::OtpSubmitted => counts.otp_submitted += 1,
                RecordStatus::Approved => counts.approved += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::record::{NewApprovalRecord, RecordPatch};
    use chrono::Utc;
    use uuid::Uuid;

    fn record() -> ApprovalRecord {
        let new = NewApprovalRecord::new(Identity::Username("alice".to_string()), "pw");
        ApprovalRecord::from_new(Uuid::new_v4(), &new, Utc::now())
    }

    #[test]
    fn test_status_precedence() {
        let mut record = record();
        assert_eq!(record.status(), RecordStatus::Pending);

        record.apply(&RecordPatch::enable_otp_input());
        assert_eq!(record.status(), RecordStatus::OtpEnabled);

        record.apply(&RecordPatch::submit_otp("123456", Utc::now()));
        assert_eq!(record.status(), RecordStatus::OtpSubmitted);

        record.apply(&RecordPatch::approve(Utc::now()));
        assert_eq!(record.status(), RecordStatus::Approved);
    }

    #[test]
    fn test_approved_wins_regardless_of_other_fields() {
        // Approved straight from pending, without the OTP steps
        let mut record = record();
        record.is_approved = true;
        assert_eq!(record.status(), RecordStatus::Approved);

        let mut record = self::record();
        record.is_verified = true;
        assert_eq!(record.status(), RecordStatus::Approved);
    }

    #[test]
    fn test_otp_submitted_without_gate_flag() {
        let mut record = record();
        record.user_entered_otp = Some("000000".to_string());
        assert_eq!(record.status(), RecordStatus::OtpSubmitted);
    }

    #[test]
    fn test_filter_parse_and_match() {
        assert_eq!("all".parse::<StatusFilter>().unwrap(), StatusFilter::All);
        assert_eq!(
            "otp_enabled".parse::<StatusFilter>().unwrap(),
            StatusFilter::Only(RecordStatus::OtpEnabled)
        );
        assert!("archived".parse::<StatusFilter>().is_err());

        let record = record();
        assert!(StatusFilter::All.matches(&record));
        assert!(StatusFilter::Only(RecordStatus::Pending).matches(&record));
        assert!(!StatusFilter::Only(RecordStatus::Approved).matches(&record));
    }

    #[test]
    fn test_tally() {
        let pending = record();
        let mut enabled = record();
        enabled.apply(&RecordPatch::enable_otp_input());
        let mut approved = record();
        approved.apply(&RecordPatch::approve(Utc::now()));

        let counts = StatusCounts::tally([&pending, &enabled, &approved]);
        assert_eq!(counts.all, 3);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.otp_enabled, 1);
        assert_eq!(counts.otp_submitted, 0);
        assert_eq!(counts.approved, 1);
    }
}
