//! Monitor status and event injection

use crate::error::{ApiError, ApiResult};
use crate::models::suppliers::SupplierInfo;
use crate::monitor::retention::RetentionResult;
use crate::monitor::MonitorEvent;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use haven_common::events::{MonitorState, RebuilderState};
use haven_common::BackupId;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: MonitorState,
    pub rebuilder_state: RebuilderState,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub last_trigger: Option<String>,
    pub cycles_completed: u64,
    pub candidates: usize,
    pub queued: Vec<BackupId>,
    pub suppliers: Vec<SupplierInfo>,
    pub last_retention: Option<RetentionResult>,
    pub last_error: Option<String>,
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.status.snapshot().await;
    let suppliers = state.inventory.read().await.suppliers.infos().to_vec();

    Json(StatusResponse {
        state: status.state,
        rebuilder_state: state.rebuilder.state(),
        last_transition_at: status.last_transition_at,
        last_trigger: status.last_trigger,
        cycles_completed: status.cycles_completed,
        candidates: status.candidates,
        queued: state.rebuilder.queued(),
        suppliers,
        last_retention: status.last_retention,
        last_error: status.last_error,
    })
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub arg: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventAccepted {
    pub accepted: String,
}

/// POST /api/events/:name
///
/// Queues a named event for the monitor. The transition happens
/// asynchronously; poll `/api/status` or watch the SSE stream for it.
pub async fn post_event(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<EventQuery>,
) -> ApiResult<(StatusCode, Json<EventAccepted>)> {
    let event = MonitorEvent::parse(&name, query.arg.as_deref()).map_err(ApiError::BadRequest)?;
    info!("Event {} posted over HTTP", event);

    if !state.monitor.post(event) {
        return Err(ApiError::Internal("backup monitor is not running".to_string()));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted {
            accepted: event.to_string(),
        }),
    ))
}
