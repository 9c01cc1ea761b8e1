use crate::state::Stage;
use otpgate_database::StoreError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    /// Incomplete login form or OTP. Nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Insert or update rejected by the record store.
    #[error("Store write failed: {0}")]
    StoreWrite(String),

    /// Point read or list failed.
    #[error("Store read failed: {0}")]
    StoreRead(String),

    /// The approval record no longer exists (rejected by the administrator).
    #[error("Approval record not found: {0}")]
    NotFound(Uuid),

    #[error("'{action}' is not accepted while {stage}")]
    InvalidStage { action: &'static str, stage: Stage },

    #[error("Session closed")]
    SessionClosed,
}

impl GateError {
    /// Map a failed write, keeping missing rows distinguishable.
    pub(crate) fn from_write(id: Option<Uuid>, err: StoreError) -> Self {
        match id {
            Some(id) if err.is_not_found() => Self::NotFound(id),
            _ => Self::StoreWrite(err.to_string()),
        }
    }

    /// Text for the inline error line under a form.
    pub fn inline_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::StoreWrite(_) | Self::StoreRead(_) => {
                "Something went wrong. Please try again.".to_string()
            }
            Self::NotFound(_) => "Your sign-in request was declined.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for GateError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = err.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let messages: Vec<String> = fields
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| match e.message {
                    Some(ref m) => m.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();

        if messages.is_empty() {
            GateError::Validation(err.to_string())
        } else {
            GateError::Validation(messages.join("; "))
        }
    }
}
