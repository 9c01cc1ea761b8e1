use crate::form::LoginForm;
use crate::otp::OtpBuffer;
use crate::poller::PollField;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Route the client is sent back to after a completed flow.
pub const ENTRY_ROUTE: &str = "/";

/// Client-side stages of the approval handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Login,
    WaitingForOtpGate,
    OtpEntry,
    WaitingForVerification,
    Approved,
    /// The record was deleted by the administrator.
    Rejected,
}

impl Stage {
    /// The record field a waiting stage polls for.
    pub fn poll_field(&self) -> Option<PollField> {
        match self {
            Self::WaitingForOtpGate => Some(PollField::ShowOtpInput),
            Self::WaitingForVerification => Some(PollField::IsVerified),
            _ => None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.poll_field().is_some()
    }

    /// Status line shown while in this stage.
    pub fn status_message(&self) -> Option<&'static str> {
        match self {
            Self::WaitingForOtpGate => Some("Waiting for a stable network connection"),
            Self::WaitingForVerification => Some("OTP received! Logging in ..."),
            Self::Approved => Some("Approved! Redirecting ..."),
            Self::Rejected => Some("Your sign-in request was declined"),
            Self::Login | Self::OtpEntry => None,
        }
    }

    /// Secondary line under the status message.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::WaitingForOtpGate | Self::WaitingForVerification => {
                Some("You'll be redirected once verified")
            }
            Self::Approved => Some("You will be redirected to login"),
            Self::Rejected => Some("Start again to submit a new request"),
            Self::Login | Self::OtpEntry => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::WaitingForOtpGate => write!(f, "waiting_for_otp_gate"),
            Self::OtpEntry => write!(f, "otp_entry"),
            Self::WaitingForVerification => write!(f, "waiting_for_verification"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Everything a client session shows, as one serializable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub stage: Stage,
    pub form: LoginForm,
    pub otp: OtpBuffer,
    pub pending_record_id: Option<Uuid>,

    /// Inline error under the active form.
    pub error: Option<String>,
    /// Non-blocking notice after repeated failed reads.
    pub banner: Option<String>,

    pub message: Option<String>,
    pub hint: Option<String>,
}

impl SessionState {
    pub fn new(default_country_code: &str) -> Self {
        Self {
            stage: Stage::Login,
            form: LoginForm::new(default_country_code),
            otp: OtpBuffer::new(),
            pending_record_id: None,
            error: None,
            banner: None,
            message: None,
            hint: None,
        }
    }

    pub(crate) fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.message = stage.status_message().map(str::to_string);
        self.hint = stage.hint().map(str::to_string);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_fields() {
        assert_eq!(Stage::WaitingForOtpGate.poll_field(), Some(PollField::ShowOtpInput));
        assert_eq!(Stage::WaitingForVerification.poll_field(), Some(PollField::IsVerified));
        assert!(!Stage::Login.is_waiting());
        assert!(!Stage::OtpEntry.is_waiting());
        assert!(!Stage::Approved.is_waiting());
        assert!(!Stage::Rejected.is_waiting());
    }

    #[test]
    fn test_initial_state() {
        let state = SessionState::new("+1264");
        assert_eq!(state.stage, Stage::Login);
        assert_eq!(state.form.country_code, "+1264");
        assert!(state.pending_record_id.is_none());
        assert!(state.message.is_none());
    }

    #[test]
    fn test_serializes_stage_snake_case() {
        let json = serde_json::to_value(SessionState::new("+1")).unwrap();
        assert_eq!(json["stage"], "login");
        assert_eq!(
            serde_json::to_value(Stage::WaitingForOtpGate).unwrap(),
            "waiting_for_otp_gate"
        );
    }
}
