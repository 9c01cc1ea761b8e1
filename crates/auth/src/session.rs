//! Client side of the approval handshake.
//!
//! A [`ClientSession`] owns the [`SessionState`] of one login attempt, the
//! poller of the current wait and the reset timer of the approved stage.
//! User input arrives through the `submit_*`/`digit_entered`/`backspace`
//! methods; timer output is consumed with [`ClientSession::next_event`].

use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::form::LoginForm;
use crate::poller::{PollField, PollOutcome, PollResult, Poller};
use crate::state::{SessionState, Stage, ENTRY_ROUTE};
use chrono::Utc;
use otpgate_database::RecordStore;
use otpgate_models::RecordPatch;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Input forwarded by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    SubmitLogin { form: LoginForm },
    DigitEntered { index: usize, value: String },
    Backspace { index: usize },
    SubmitOtp,
    /// Leave the rejected (or approved) screen early.
    Restart,
}

/// Something a timer changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Advanced(Stage),
    Banner(Option<String>),
    /// Full reset after approval; the client should navigate to `redirect_to`.
    Reset { redirect_to: &'static str },
}

enum Wake {
    Poll(PollResult),
    ResetDue,
}

const POLL_RESULT_BUFFER: usize = 16;

pub struct ClientSession {
    store: Arc<dyn RecordStore>,
    config: GateConfig,
    state: SessionState,

    poller: Option<Poller>,
    generation: u64,
    poll_tx: mpsc::Sender<PollResult>,
    poll_rx: mpsc::Receiver<PollResult>,
    read_failures: u32,

    reset_at: Option<Instant>,
}

impl ClientSession {
    pub fn new(store: Arc<dyn RecordStore>, config: GateConfig) -> Self {
        let (poll_tx, poll_rx) = mpsc::channel(POLL_RESULT_BUFFER);
        let state = SessionState::new(&config.default_country_code);

        Self {
            store,
            config,
            state,
            poller: None,
            generation: 0,
            poll_tx,
            poll_rx,
            read_failures: 0,
            reset_at: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    /// Whether a poller is currently running.
    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.is_cancelled())
    }

    /// Dispatch one presentation event.
    pub async fn handle(&mut self, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::SubmitLogin { form } => self.submit_login(form).await.map(|_| ()),
            ClientEvent::DigitEntered { index, value } => self.digit_entered(index, &value),
            ClientEvent::Backspace { index } => self.backspace(index),
            ClientEvent::SubmitOtp => self.submit_otp().await,
            ClientEvent::Restart => self.restart(),
        }
    }

    /// Create the approval record and start waiting for the OTP gate.
    pub async fn submit_login(&mut self, form: LoginForm) -> Result<Uuid> {
        self.expect_stage(Stage::Login, "submit_login")?;

        self.state.form = form;
        self.state.error = None;

        let new = self.state.form.to_new_record().inspect_err(|e| {
            self.state.error = Some(e.inline_message());
        })?;

        let record = match self.store.insert(&new).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Failed to create approval record: {}", e);
                let err = GateError::from_write(None, e);
                self.state.error = Some(err.inline_message());
                return Err(err);
            }
        };

        tracing::info!(
            "Approval record {} created via {} login",
            record.id,
            new.identity.method()
        );

        self.state.pending_record_id = Some(record.id);
        self.enter_wait(Stage::WaitingForOtpGate, record.id);
        Ok(record.id)
    }

    pub fn digit_entered(&mut self, index: usize, value: &str) -> Result<()> {
        self.expect_stage(Stage::OtpEntry, "digit_entered")?;
        self.state.otp.enter(index, value)
    }

    pub fn backspace(&mut self, index: usize) -> Result<()> {
        self.expect_stage(Stage::OtpEntry, "backspace")?;
        self.state.otp.backspace(index)
    }

    /// Write the entered code to the record and wait for verification.
    pub async fn submit_otp(&mut self) -> Result<()> {
        self.expect_stage(Stage::OtpEntry, "submit_otp")?;

        let Some(code) = self.state.otp.code() else {
            let err = GateError::Validation("Please enter all 6 digits".to_string());
            self.state.error = Some(err.inline_message());
            return Err(err);
        };
        let id = self.pending_record_id()?;
        self.state.error = None;

        if let Err(e) = self
            .store
            .update(id, &RecordPatch::submit_otp(code, Utc::now()))
            .await
        {
            let err = GateError::from_write(Some(id), e);
            if let GateError::NotFound(_) = err {
                self.reject();
            } else {
                tracing::warn!("OTP submission for record {} failed: {}", id, err);
                // Buffer kept so the user can retry as-is
                self.state.error = Some("Failed to submit OTP. Please try again.".to_string());
            }
            return Err(err);
        }

        tracing::info!("OTP submitted for record {}", id);
        self.enter_wait(Stage::WaitingForVerification, id);
        Ok(())
    }

    /// Return to a blank login form from a terminal screen.
    pub fn restart(&mut self) -> Result<()> {
        match self.state.stage {
            Stage::Rejected | Stage::Approved => {
                self.reset();
                Ok(())
            }
            stage => Err(GateError::InvalidStage {
                action: "restart",
                stage,
            }),
        }
    }

    /// Wait for the next timer-driven change.
    ///
    /// Cancel safe: nothing is mutated until a poll result or the reset
    /// deadline has actually been received. Results from cancelled waits are
    /// skipped. Pending forever while no wait or reset is active.
    pub async fn next_event(&mut self) -> SessionUpdate {
        loop {
            let reset_at = self.reset_at;
            let wake = tokio::select! {
                Some(result) = self.poll_rx.recv() => Wake::Poll(result),
                _ = sleep_until(reset_at) => Wake::ResetDue,
            };

            match wake {
                Wake::Poll(result) => {
                    if let Some(update) = self.apply_poll(result) {
                        return update;
                    }
                }
                Wake::ResetDue => {
                    self.reset();
                    return SessionUpdate::Reset {
                        redirect_to: ENTRY_ROUTE,
                    };
                }
            }
        }
    }

    /// Cancel every timer. Called on abrupt teardown.
    pub fn teardown(&mut self) {
        self.stop_polling();
        self.reset_at = None;
    }

    fn apply_poll(&mut self, result: PollResult) -> Option<SessionUpdate> {
        if result.generation != self.generation || self.poller.is_none() {
            tracing::debug!(
                "Discarding stale poll result for record {} (generation {})",
                result.record_id,
                result.generation
            );
            return None;
        }

        match result.outcome {
            PollOutcome::Pending => self.clear_read_failures(),
            PollOutcome::Satisfied => match (result.field, self.state.stage) {
                (PollField::ShowOtpInput, Stage::WaitingForOtpGate) => {
                    self.stop_polling();
                    self.state.banner = None;
                    self.state.otp.clear();
                    self.state.enter(Stage::OtpEntry);
                    tracing::info!("OTP input enabled for record {}", result.record_id);
                    Some(SessionUpdate::Advanced(Stage::OtpEntry))
                }
                (PollField::IsVerified, Stage::WaitingForVerification) => {
                    self.stop_polling();
                    self.state.banner = None;
                    self.state.enter(Stage::Approved);
                    self.reset_at = Some(Instant::now() + self.config.reset_delay);
                    tracing::info!("Record {} approved", result.record_id);
                    Some(SessionUpdate::Advanced(Stage::Approved))
                }
                _ => None,
            },
            PollOutcome::Missing => {
                tracing::info!("Record {} no longer exists", result.record_id);
                self.reject();
                Some(SessionUpdate::Advanced(Stage::Rejected))
            }
            PollOutcome::Failed(reason) => {
                self.read_failures += 1;
                tracing::warn!(
                    "Poll read for record {} failed ({} in a row): {}",
                    result.record_id,
                    self.read_failures,
                    reason
                );

                if self.read_failures >= self.config.read_failure_banner_threshold
                    && self.state.banner.is_none()
                {
                    let banner = "Connection unstable, still waiting ...".to_string();
                    self.state.banner = Some(banner.clone());
                    return Some(SessionUpdate::Banner(Some(banner)));
                }
                None
            }
        }
    }

    fn clear_read_failures(&mut self) -> Option<SessionUpdate> {
        self.read_failures = 0;
        self.state
            .banner
            .take()
            .map(|_| SessionUpdate::Banner(None))
    }

    fn enter_wait(&mut self, stage: Stage, record_id: Uuid) {
        // A new wait always replaces the previous poller
        self.stop_polling();
        self.state.enter(stage);

        let Some(field) = stage.poll_field() else {
            return;
        };

        self.poller = Some(Poller::start(
            Arc::clone(&self.store),
            record_id,
            field,
            self.config.poll_interval,
            self.generation,
            self.poll_tx.clone(),
        ));
    }

    fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        self.generation += 1;
        self.read_failures = 0;
    }

    fn reject(&mut self) {
        self.stop_polling();
        self.state.enter(Stage::Rejected);
        self.state.banner = None;
        if let Some(id) = self.state.pending_record_id {
            self.state.error = Some(GateError::NotFound(id).inline_message());
            tracing::info!("Approval request {} was rejected", id);
        }
    }

    fn reset(&mut self) {
        self.teardown();
        self.state = SessionState::new(&self.config.default_country_code);
        tracing::debug!("Client session reset");
    }

    fn pending_record_id(&self) -> Result<Uuid> {
        self.state.pending_record_id.ok_or(GateError::InvalidStage {
            action: "submit_otp",
            stage: self.state.stage,
        })
    }

    fn expect_stage(&self, stage: Stage, action: &'static str) -> Result<()> {
        if self.state.stage != stage {
            return Err(GateError::InvalidStage {
                action,
                stage: self.state.stage,
            });
        }
        Ok(())
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
