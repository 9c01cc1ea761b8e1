use super::{gate_error, ApiError, ErrorResponse};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use otpgate_auth::{AdminConsole, ConsoleView};
use otpgate_models::{ApprovalRecord, RecordStatus, StatusFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub status: Option<String>,
}

impl RecordsQuery {
    fn filter(&self) -> Result<StatusFilter, ApiError> {
        let raw = self.status.as_deref().unwrap_or_default();
        raw.parse().map_err(|_| {
            tracing::warn!("Invalid status filter: {}", raw);
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "invalid_filter",
                    &format!("Unknown status filter '{}'", raw),
                )),
            )
        })
    }
}

/// Result of an administrator action
#[derive(Debug, Serialize)]
pub struct RecordActionResponse {
    pub id: Uuid,
    pub status: RecordStatus,
}

impl From<ApprovalRecord> for RecordActionResponse {
    fn from(record: ApprovalRecord) -> Self {
        Self {
            id: record.id,
            status: record.status(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RevealResponse {
    pub id: Uuid,
    pub visible: bool,
}

/// List approval records, optionally filtered by status tab
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordsQuery>,
) -> Result<Json<ConsoleView>, ApiError> {
    let filter = query.filter()?;
    Ok(Json(state.console.view(filter).await))
}

pub async fn enable_otp_input(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RecordActionResponse>, ApiError> {
    let record = state.console.enable_otp_input(id).await.map_err(gate_error)?;
    Ok(Json(record.into()))
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RecordActionResponse>, ApiError> {
    let record = state.console.approve(id).await.map_err(gate_error)?;
    Ok(Json(record.into()))
}

/// Reject a request by deleting its record
pub async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.console.reject(id).await.map_err(gate_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_secret(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<RevealResponse> {
    let visible = state.console.toggle_secret_visibility(id).await;
    Json(RevealResponse { id, visible })
}

/// Stream the filtered console view on every refresh
pub async fn live_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let filter = query.filter()?;
    let console: AdminConsole = state.console.clone();
    let updates = console.updates();

    let events = stream::unfold(
        (console, updates, true),
        move |(console, mut updates, first)| async move {
            if !first && updates.changed().await.is_err() {
                return None;
            }

            let view = console.view(filter).await;
            let event = Event::default().event("records").json_data(&view);
            Some((event, (console, updates, false)))
        },
    );

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
