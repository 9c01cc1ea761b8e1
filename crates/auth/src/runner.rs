//! Background task owning one [`ClientSession`].
//!
//! The HTTP layer never touches a session directly. It talks to a
//! [`SessionHandle`], which forwards events over a channel and reads the
//! latest published [`SessionState`] from a watch channel. A session that
//! nobody has touched for `session_idle_timeout` closes itself.

use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::session::{ClientEvent, ClientSession, SessionUpdate};
use crate::state::SessionState;
use otpgate_database::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const COMMAND_BUFFER: usize = 32;

struct Command {
    event: ClientEvent,
    reply: oneshot::Sender<Result<SessionState>>,
}

#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::Sender<Command>,
    state: Arc<watch::Sender<SessionState>>,
    activity: Arc<Notify>,
    token: CancellationToken,
}

impl SessionHandle {
    /// Start a fresh session in the login stage.
    pub fn spawn(store: Arc<dyn RecordStore>, config: GateConfig) -> Self {
        let id = Uuid::new_v4();
        let idle_timeout = config.session_idle_timeout;
        let session = ClientSession::new(store, config);
        let (state_tx, _) = watch::channel(session.state().clone());
        let state = Arc::new(state_tx);
        let activity = Arc::new(Notify::new());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let token = CancellationToken::new();

        tokio::spawn(run(Runner {
            id,
            session,
            commands: commands_rx,
            state: state.clone(),
            activity: activity.clone(),
            token: token.clone(),
            idle_timeout,
        }));
        tracing::debug!("Client session {} started", id);

        Self {
            id,
            commands: commands_tx,
            state,
            activity,
            token,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Forward an event and wait for the resulting state.
    pub async fn send(&self, event: ClientEvent) -> Result<SessionState> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command { event, reply })
            .await
            .map_err(|_| GateError::SessionClosed)?;

        response.await.map_err(|_| GateError::SessionClosed)?
    }

    /// Latest published state. Counts as activity.
    pub fn state(&self) -> SessionState {
        self.activity.notify_one();
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every state change. The session stays
    /// open while any receiver is alive.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.activity.notify_one();
        self.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Tear the session down. Pending timers are cancelled immediately.
    pub fn close(&self) {
        self.token.cancel();
    }
}

struct Runner {
    id: Uuid,
    session: ClientSession,
    commands: mpsc::Receiver<Command>,
    state: Arc<watch::Sender<SessionState>>,
    activity: Arc<Notify>,
    token: CancellationToken,
    idle_timeout: Duration,
}

async fn run(runner: Runner) {
    let Runner {
        id,
        mut session,
        mut commands,
        state,
        activity,
        token,
        idle_timeout,
    } = runner;

    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = activity.notified() => {
                idle.as_mut().reset(Instant::now() + idle_timeout);
            }
            command = commands.recv() => {
                let Some(Command { event, reply }) = command else {
                    // Every handle is gone
                    break;
                };

                idle.as_mut().reset(Instant::now() + idle_timeout);
                let result = session.handle(event).await;
                state.send_replace(session.state().clone());
                let _ = reply.send(result.map(|_| session.state().clone()));
            }
            update = session.next_event() => {
                if let SessionUpdate::Reset { redirect_to } = update {
                    tracing::info!("Client session {} reset, redirecting to {}", id, redirect_to);
                }
                state.send_replace(session.state().clone());
            }
            _ = &mut idle => {
                if state.receiver_count() > 0 {
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                    continue;
                }
                tracing::info!("Client session {} idle for {:?}, closing", id, idle_timeout);
                break;
            }
        }
    }

    token.cancel();
    session.teardown();
    tracing::debug!("Client session {} closed", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::LoginForm;
    use crate::state::Stage;
    use otpgate_database::MemoryRecordStore;
    use otpgate_models::RecordPatch;

    fn login() -> ClientEvent {
        let mut form = LoginForm::new("+1264");
        form.email_or_username = "alice".to_string();
        form.password = "pw1".to_string();
        ClientEvent::SubmitLogin { form }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_and_watch() {
        let store = Arc::new(MemoryRecordStore::new());
        let handle = SessionHandle::spawn(store.clone(), GateConfig::default());
        let mut watcher = handle.watch();

        let state = handle.send(login()).await.unwrap();
        assert_eq!(state.stage, Stage::WaitingForOtpGate);
        let id = state.pending_record_id.unwrap();

        store
            .update(id, &RecordPatch::enable_otp_input())
            .await
            .unwrap();

        watcher
            .wait_for(|s| s.stage == Stage::OtpEntry)
            .await
            .unwrap();
        assert_eq!(handle.state().stage, Stage::OtpEntry);
    }

    #[tokio::test]
    async fn test_errors_are_returned_to_sender() {
        let store = Arc::new(MemoryRecordStore::new());
        let handle = SessionHandle::spawn(store, GateConfig::default());

        let err = handle.send(ClientEvent::SubmitOtp).await.unwrap_err();
        assert!(matches!(err, GateError::InvalidStage { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_session_refuses_events() {
        let store = Arc::new(MemoryRecordStore::new());
        let handle = SessionHandle::spawn(store, GateConfig::default());

        handle.close();
        assert!(handle.is_closed());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(
            handle.send(login()).await,
            Err(GateError::SessionClosed)
        ));
    }

    fn idle_after(timeout: Duration) -> GateConfig {
        GateConfig {
            session_idle_timeout: timeout,
            ..GateConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_closes_itself() {
        let store = Arc::new(MemoryRecordStore::new());
        let handle = SessionHandle::spawn(store, idle_after(Duration::from_secs(60)));
        handle.send(login()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(!handle.is_closed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(ClientEvent::Restart).await,
            Err(GateError::SessionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_reads_keep_session_open() {
        let store = Arc::new(MemoryRecordStore::new());
        let handle = SessionHandle::spawn(store, idle_after(Duration::from_secs(60)));

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(40)).await;
            assert_eq!(handle.state().stage, Stage::Login);
        }
        assert!(!handle.is_closed());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attached_watcher_keeps_session_open() {
        let store = Arc::new(MemoryRecordStore::new());
        let handle = SessionHandle::spawn(store, idle_after(Duration::from_secs(60)));
        let watcher = handle.watch();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(!handle.is_closed());

        drop(watcher);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.is_closed());
    }
}
