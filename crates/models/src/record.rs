use crate::identity::Identity;
use crate::status::RecordStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// One login attempt waiting on an administrator decision.
///
/// Rows are only ever moved forward: flags go from false to true and nullable
/// columns from NULL to a value. See [`RecordPatch`] for the allowed writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ApprovalRecord {
    pub id: Uuid,

    // Exactly one identity channel is populated
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,

    /// Submitted credential, stored verbatim.
    pub password: String,

    pub show_otp_input: bool,
    pub user_entered_otp: Option<String>,
    pub otp_submitted_at: Option<DateTime<Utc>>,

    pub is_approved: bool,
    pub approved_at: Option<DateTime<Utc>>,

    /// Canonical approval signal; the client session polls this column.
    pub is_verified: bool,

    pub created_at: DateTime<Utc>,
}

impl ApprovalRecord {
    /// Build a fresh row from a submission. Used by stores that generate
    /// ids themselves rather than delegating to the database.
    pub fn from_new(id: Uuid, new: &NewApprovalRecord, created_at: DateTime<Utc>) -> Self {
        let (email, username, phone) = new.identity.columns();

        Self {
            id,
            email,
            username,
            phone,
            password: new.password.clone(),
            show_otp_input: false,
            user_entered_otp: None,
            otp_submitted_at: None,
            is_approved: false,
            approved_at: None,
            is_verified: false,
            created_at,
        }
    }

    /// The identity channel this record was created with.
    ///
    /// Returns `None` only for rows that break the single-identity invariant.
    pub fn identity(&self) -> Option<Identity> {
        Identity::from_columns(
            self.email.as_deref(),
            self.username.as_deref(),
            self.phone.as_deref(),
        )
    }

    pub fn status(&self) -> RecordStatus {
        RecordStatus::of(self)
    }

    /// Whether the administrator has granted the final approval.
    pub fn is_granted(&self) -> bool {
        self.is_verified || self.is_approved
    }

    /// Apply a patch in place, never rewinding a field that is already set.
    ///
    /// Returns true when at least one column changed.
    pub fn apply(&mut self, patch: &RecordPatch) -> bool {
        let mut changed = false;

        if patch.show_otp_input == Some(true) && !self.show_otp_input {
            self.show_otp_input = true;
            changed = true;
        }

        if let Some(ref otp) = patch.user_entered_otp {
            if self.user_entered_otp.as_deref() != Some(otp.as_str()) {
                self.user_entered_otp = Some(otp.clone());
                changed = true;
            }
        }

        if let Some(at) = patch.otp_submitted_at {
            if self.otp_submitted_at != Some(at) {
                self.otp_submitted_at = Some(at);
                changed = true;
            }
        }

        if patch.is_approved == Some(true) && !self.is_approved {
            self.is_approved = true;
            changed = true;
        }

        if let Some(at) = patch.approved_at {
            if self.approved_at.is_none() {
                self.approved_at = Some(at);
                changed = true;
            }
        }

        if patch.is_verified == Some(true) && !self.is_verified {
            self.is_verified = true;
            changed = true;
        }

        changed
    }
}

/// Row to insert on login form submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewApprovalRecord {
    #[validate(custom(function = "validate_identity"))]
    pub identity: Identity,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

impl NewApprovalRecord {
    pub fn new(identity: Identity, password: impl Into<String>) -> Self {
        Self {
            identity,
            password: password.into(),
        }
    }
}

fn validate_identity(identity: &Identity) -> Result<(), ValidationError> {
    if identity.value().trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some(format!("{} is required", identity.kind_label()).into());
        return Err(err);
    }
    Ok(())
}

/// Partial update of an approval record.
///
/// Only forward-moving writes can be expressed: there is no way to clear a
/// flag or null out a column through a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    pub show_otp_input: Option<bool>,
    pub user_entered_otp: Option<String>,
    pub otp_submitted_at: Option<DateTime<Utc>>,
    pub is_approved: Option<bool>,
    pub approved_at: Option<DateTime<Utc>>,
    pub is_verified: Option<bool>,
}

impl RecordPatch {
    /// Administrator opened the one-time code gate.
    pub fn enable_otp_input() -> Self {
        Self {
            show_otp_input: Some(true),
            ..Default::default()
        }
    }

    /// Client submitted the code it received.
    pub fn submit_otp(code: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user_entered_otp: Some(code.into()),
            otp_submitted_at: Some(at),
            ..Default::default()
        }
    }

    /// Administrator's final accept. Sets the polled column together with the
    /// approval bookkeeping so both sides observe the same decision.
    pub fn approve(at: DateTime<Utc>) -> Self {
        Self {
            is_approved: Some(true),
            approved_at: Some(at),
            is_verified: Some(true),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ApprovalRecord {
        let new = NewApprovalRecord::new(Identity::Email("a@b.com".to_string()), "pw1");
        ApprovalRecord::from_new(Uuid::new_v4(), &new, Utc::now())
    }

    #[test]
    fn test_from_new_populates_single_identity() {
        let record = record();
        assert_eq!(record.email.as_deref(), Some("a@b.com"));
        assert!(record.username.is_none());
        assert!(record.phone.is_none());
        assert_eq!(record.password, "pw1");
        assert!(!record.show_otp_input);
        assert!(!record.is_verified);
        assert_eq!(record.identity(), Some(Identity::Email("a@b.com".to_string())));
    }

    #[test]
    fn test_apply_is_forward_only() {
        let mut record = record();
        assert!(record.apply(&RecordPatch::enable_otp_input()));
        assert!(record.show_otp_input);

        // Re-enabling is a no-op
        assert!(!record.apply(&RecordPatch::enable_otp_input()));

        // A patch carrying `false` never rewinds the flag
        let rewind = RecordPatch {
            show_otp_input: Some(false),
            ..Default::default()
        };
        assert!(!record.apply(&rewind));
        assert!(record.show_otp_input);
    }

    #[test]
    fn test_approve_sets_polled_column() {
        let mut record = record();
        let at = Utc::now();
        record.apply(&RecordPatch::approve(at));

        assert!(record.is_verified);
        assert!(record.is_approved);
        assert_eq!(record.approved_at, Some(at));
        assert!(record.is_granted());
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let new = NewApprovalRecord::new(Identity::Username("   ".to_string()), "pw");
        assert!(new.validate().is_err());

        let new = NewApprovalRecord::new(Identity::Username("alice".to_string()), "");
        assert!(new.validate().is_err());

        let new = NewApprovalRecord::new(Identity::Username("alice".to_string()), "pw");
        assert!(new.validate().is_ok());
    }

    #[test]
    fn test_empty_patch() {
        assert!(RecordPatch::default().is_empty());
        assert!(!RecordPatch::enable_otp_input().is_empty());
    }
}
