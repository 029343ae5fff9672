//! `/api/filetransfer/*` (§6): HTTP front for chunked file transfer (C6).
//! `send` pushes a local file to a peer's receive listener; `download`
//! streams a completed transfer back out of the downloads sink.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::error::{NexusError, NexusResult};
use crate::filetransfer::{DownloadEntry, ProgressSnapshot, SendOutcome};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    peer_ip: String,
    peer_port: u16,
    file_path: String,
    sender_username: String,
}

pub async fn send(State(state): State<Arc<AppState>>, Json(body): Json<SendRequest>) -> NexusResult<Json<SendOutcome>> {
    let outcome = state
        .filetransfer
        .send((body.peer_ip, body.peer_port), &body.file_path, &body.sender_username)
        .await?;
    Ok(Json(outcome))
}

pub async fn transfers(State(state): State<Arc<AppState>>, Path(user): Path<String>) -> Json<Vec<ProgressSnapshot>> {
    Json(state.filetransfer.progress_for(&user))
}

pub async fn downloads(State(state): State<Arc<AppState>>) -> NexusResult<Json<Vec<DownloadEntry>>> {
    let listing = state
        .filetransfer
        .downloads_listing()
        .await
        .map_err(|e| NexusError::Transport(e.to_string()))?;
    Ok(Json(listing))
}

pub async fn download(State(state): State<Arc<AppState>>, Path(filename): Path<String>) -> NexusResult<Response> {
    let path = state
        .filetransfer
        .download_path(&filename)
        .ok_or_else(|| NexusError::NotFound(format!("download {filename}")))?;

    let file = File::open(&path).await.map_err(|e| NexusError::Transport(e.to_string()))?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let disposition = format!("attachment; filename=\"{filename}\"");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
