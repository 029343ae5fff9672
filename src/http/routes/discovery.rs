//! `/api/discovery/*` (§6): HTTP front for the LAN Discovery cache (C12).
//! `broadcast` fires one `NEXUS_DISCOVER` datagram on demand, for clients
//! that want a refresh without waiting on another peer's own probe.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tokio::net::UdpSocket;

use crate::discovery::DiscoveredPeer;
use crate::error::{NexusError, NexusResult};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    username: String,
    #[serde(default)]
    additional_info: String,
}

pub async fn broadcast(State(state): State<Arc<AppState>>, Json(body): Json<BroadcastRequest>) -> NexusResult<StatusCode> {
    if !state.config.discovery.enabled {
        return Err(NexusError::State("discovery is disabled by configuration".into()));
    }

    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .map_err(|e| NexusError::Transport(e.to_string()))?;
    socket.set_broadcast(true).map_err(|e| NexusError::Transport(e.to_string()))?;

    let message = format!("NEXUS_DISCOVER:{}:{}", body.username, body.additional_info);
    let target = ("255.255.255.255", state.config.discovery.listen.port());
    socket
        .send_to(message.as_bytes(), target)
        .await
        .map_err(|e| NexusError::Transport(e.to_string()))?;

    Ok(StatusCode::OK)
}

pub async fn peers(State(state): State<Arc<AppState>>) -> Json<Vec<DiscoveredPeer>> {
    Json(state.discovery.snapshot())
}
