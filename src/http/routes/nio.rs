//! `/api/nio/*` (§6): the HTTP mirror of the TCP chat port — login,
//! message, roster and peer lookup, backed by the same C2/C3 instances the
//! TCP hub uses (§4.5).

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::error::{NexusError, NexusResult};
use crate::http::AuthUser;
use crate::presence::{next_http_anchor, Anchor, PresenceEntry};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub username: String,
    pub ip: IpAddr,
    pub file_tcp: i32,
    pub voice_udp: i32,
    pub via_nio: bool,
}

impl From<PresenceEntry> for OnlineUser {
    fn from(e: PresenceEntry) -> Self {
        Self {
            username: e.username,
            ip: e.ip,
            file_tcp: e.file_tcp,
            voice_udp: e.voice_udp,
            via_nio: e.via_nio,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// present only for the legacy password path; absent for the trusted
    /// bearer-token path (§4.5).
    username: Option<String>,
    password: Option<String>,
    file_tcp: Option<u16>,
    voice_udp: Option<u16>,
    ip_override: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    success: bool,
    user: OnlineUser,
    users: Vec<OnlineUser>,
    messages: Vec<ChatMessage>,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> NexusResult<Json<LoginResponse>> {
    let username = match (&body.username, &body.password) {
        (Some(username), Some(password)) => {
            if !state.credentials.verify(username, password) {
                return Err(NexusError::Authentication("invalid credentials".into()));
            }
            username.clone()
        }
        _ => bearer_username(&state, &headers)?,
    };

    let ip: IpAddr = body
        .ip_override
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]));

    let anchor = Anchor::Http(next_http_anchor());
    let outcome = state
        .presence
        .login(&username, ip, body.file_tcp, body.voice_udp, false, anchor);

    if let Some(evicted) = outcome.evicted {
        if let Some(Anchor::Tcp(previous)) = evicted.anchor {
            previous.disconnect();
        }
    }

    if let Some(port) = body.file_tcp {
        state
            .filetransfer
            .start_receiver(username.clone(), port, state.statistics.clone());
    }

    state
        .sessions
        .broadcast(&format!("USER_JOINED:{username}:http"), None);
    state
        .sessions
        .broadcast(&crate::events::format_user_list(state.presence.snapshot()), None);

    Ok(Json(LoginResponse {
        success: true,
        user: outcome.installed.into(),
        users: state.presence.snapshot().into_iter().map(Into::into).collect(),
        messages: state.chat.recent(),
    }))
}

pub async fn logout(State(state): State<Arc<AppState>>, AuthUser(username): AuthUser) -> NexusResult<StatusCode> {
    let Some(anchor) = state
        .presence
        .find(&username)
        .and_then(|e| e.anchor)
        .filter(|a| matches!(a, Anchor::Http(_)))
    else {
        return Ok(StatusCode::NO_CONTENT);
    };

    if state.presence.logout(&username, &anchor).is_some() {
        state.filetransfer.stop_receiver(&username);
        state.sessions.broadcast(&format!("USER_LEFT:{username}"), None);
        state
            .sessions
            .broadcast(&crate::events::format_user_list(state.presence.snapshot()), None);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct MessageRequest {
    text: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    accepted: bool,
    message: ChatMessage,
}

pub async fn message(
    State(state): State<Arc<AppState>>,
    AuthUser(username): AuthUser,
    Json(body): Json<MessageRequest>,
) -> NexusResult<(StatusCode, Json<MessageResponse>)> {
    let message = state
        .chat
        .broadcast(&username, &body.text)
        .map_err(|reason| NexusError::State(reason.to_string()))?;
    state.statistics.chat_messages.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    Ok((StatusCode::ACCEPTED, Json(MessageResponse { accepted: true, message })))
}

pub async fn users(State(state): State<Arc<AppState>>) -> Json<Vec<OnlineUser>> {
    Json(state.presence.snapshot().into_iter().map(Into::into).collect())
}

pub async fn messages(State(state): State<Arc<AppState>>) -> Json<Vec<ChatMessage>> {
    Json(state.chat.recent())
}

pub async fn peer(State(state): State<Arc<AppState>>, Path(user): Path<String>) -> NexusResult<Json<OnlineUser>> {
    state
        .presence
        .find(&user)
        .map(|entry| Json(entry.into()))
        .ok_or_else(|| NexusError::NotFound(format!("{user} is offline")))
}

fn bearer_username(state: &AppState, headers: &HeaderMap) -> Result<String, NexusError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| NexusError::Authentication("missing bearer token".into()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| NexusError::Authentication("Authorization header must be a bearer token".into()))?;
    state.tokens.verify(token)
}
