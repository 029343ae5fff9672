//! `/api/whiteboard/*` (§6): HTTP front for the Whiteboard Session Manager
//! (C8). A session's draw log travels over this bridge the same way the
//! `WHITEBOARD_*` TCP frames do, for clients that never open the chat port.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{NexusError, NexusResult};
use crate::state::AppState;
use crate::whiteboard::{DrawCommand, WhiteboardError};

fn whiteboard_err(e: WhiteboardError) -> NexusError {
    match e {
        WhiteboardError::NotFound => NexusError::NotFound("whiteboard session".into()),
        WhiteboardError::Forbidden => NexusError::Authorization("not a participant of this session".into()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    initiator: String,
    participant: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    session_id: u64,
}

pub async fn create(State(state): State<Arc<AppState>>, Json(body): Json<CreateRequest>) -> Json<CreateResponse> {
    let session_id = state.whiteboard.create(&body.initiator, &body.participant);
    Json(CreateResponse { session_id })
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum DrawKind {
    Draw,
    Clear,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawRequest {
    session_id: u64,
    username: String,
    #[serde(rename = "type")]
    kind: DrawKind,
    #[serde(default)]
    x1: f64,
    #[serde(default)]
    y1: f64,
    #[serde(default)]
    x2: f64,
    #[serde(default)]
    y2: f64,
    #[serde(default)]
    color: String,
    #[serde(default)]
    thickness: f64,
}

pub async fn draw(State(state): State<Arc<AppState>>, Json(body): Json<DrawRequest>) -> NexusResult<StatusCode> {
    match body.kind {
        DrawKind::Draw => state
            .whiteboard
            .draw(body.session_id, &body.username, body.x1, body.y1, body.x2, body.y2, body.color, body.thickness)
            .map_err(whiteboard_err)?,
        DrawKind::Clear => state.whiteboard.clear(body.session_id, &body.username).map_err(whiteboard_err)?,
    };
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    username: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    commands: Vec<DrawCommand>,
    count: usize,
}

pub async fn session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    axum::extract::Query(query): axum::extract::Query<SessionQuery>,
) -> NexusResult<Json<SessionResponse>> {
    let commands = state.whiteboard.commands(id, &query.username).map_err(whiteboard_err)?;
    let count = commands.len();
    Ok(Json(SessionResponse { commands, count }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    session_id: u64,
    username: String,
}

pub async fn close(State(state): State<Arc<AppState>>, Json(body): Json<CloseRequest>) -> NexusResult<StatusCode> {
    state.whiteboard.close(body.session_id, &body.username).map_err(whiteboard_err)?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSession {
    session_id: u64,
    with: String,
    created_at: u64,
    last_activity: u64,
}

pub async fn pending(State(state): State<Arc<AppState>>, Path(user): Path<String>) -> Json<Vec<PendingSession>> {
    Json(
        state
            .whiteboard
            .pending_for(&user)
            .into_iter()
            .map(|(session_id, with, created_at, last_activity)| PendingSession {
                session_id,
                with,
                created_at,
                last_activity,
            })
            .collect(),
    )
}
