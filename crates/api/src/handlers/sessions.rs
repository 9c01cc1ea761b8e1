use super::{gate_error, ApiError, ErrorResponse};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use otpgate_auth::{ClientEvent, LoginForm, SessionHandle, SessionState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub state: SessionState,
}

#[derive(Debug, Deserialize)]
pub struct DigitRequest {
    pub value: String,
}

fn session_not_found(id: Uuid) -> ApiError {
    tracing::warn!("Client session not found: {}", id);
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("session_not_found", "Session not found")),
    )
}

async fn lookup(state: &AppState, id: Uuid) -> Result<SessionHandle, ApiError> {
    let handle = state.sessions.read().await.get(&id).cloned();
    match handle {
        Some(handle) if !handle.is_closed() => Ok(handle),
        Some(_) => {
            state.sessions.write().await.remove(&id);
            tracing::info!("Client session {} expired", id);
            Err(session_not_found(id))
        }
        None => Err(session_not_found(id)),
    }
}

async fn dispatch(
    state: &AppState,
    id: Uuid,
    event: ClientEvent,
) -> Result<Json<SessionResponse>, ApiError> {
    let handle = lookup(state, id).await?;
    let session_state = handle.send(event).await.map_err(gate_error)?;

    Ok(Json(SessionResponse {
        id,
        state: session_state,
    }))
}

/// Open a new client session on the login form
pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SessionResponse>) {
    state.evict_closed_sessions().await;
    let handle = SessionHandle::spawn(state.store.clone(), state.gate.clone());
    let id = handle.id();
    let session_state = handle.state();

    state.sessions.write().await.insert(id, handle);
    tracing::info!("Client session {} opened", id);

    (
        StatusCode::CREATED,
        Json(SessionResponse {
            id,
            state: session_state,
        }),
    )
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let handle = lookup(&state, id).await?;
    Ok(Json(SessionResponse {
        id,
        state: handle.state(),
    }))
}

/// Tear a session down, cancelling its timers
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let handle = state
        .sessions
        .write()
        .await
        .remove(&id)
        .ok_or_else(|| session_not_found(id))?;

    handle.close();
    tracing::info!("Client session {} closed", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_login(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(form): Json<LoginForm>,
) -> Result<Json<SessionResponse>, ApiError> {
    dispatch(&state, id, ClientEvent::SubmitLogin { form }).await
}

pub async fn enter_digit(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(request): Json<DigitRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    dispatch(
        &state,
        id,
        ClientEvent::DigitEntered {
            index,
            value: request.value,
        },
    )
    .await
}

pub async fn backspace(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<SessionResponse>, ApiError> {
    dispatch(&state, id, ClientEvent::Backspace { index }).await
}

pub async fn submit_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    dispatch(&state, id, ClientEvent::SubmitOtp).await
}

pub async fn restart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    dispatch(&state, id, ClientEvent::Restart).await
}

/// Stream the session state, starting with the current one
pub async fn session_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let handle = lookup(&state, id).await?;
    let receiver = handle.watch();

    let events = stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first && receiver.changed().await.is_err() {
            return None;
        }
        let snapshot = receiver.borrow_and_update().clone();
        let event = Event::default().event("state").json_data(&snapshot);
        Some((event, (receiver, false)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
