//! `/api/voice/*` (§6): HTTP mirror of the Voice Session Manager (C7) used
//! by clients that prefer polling over the `/ws/signaling` fabric.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{NexusError, NexusResult};
use crate::state::AppState;
use crate::voice::{VoiceError, VoiceSession, VoiceState};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    session_id: i64,
    initiator: String,
    target: String,
    initiator_addr: Option<SocketAddr>,
    target_addr: Option<SocketAddr>,
    state: VoiceState,
    created_at: u64,
    accepted_at: Option<u64>,
    initiator_sdp_offer: Option<String>,
    target_sdp_answer: Option<String>,
}

impl From<VoiceSession> for SessionDescriptor {
    fn from(s: VoiceSession) -> Self {
        Self {
            session_id: s.session_id,
            initiator: s.initiator,
            target: s.target,
            initiator_addr: s.initiator_addr,
            target_addr: s.target_addr,
            state: s.state,
            created_at: s.created_at,
            accepted_at: s.accepted_at,
            initiator_sdp_offer: s.initiator_sdp_offer,
            target_sdp_answer: s.target_sdp_answer,
        }
    }
}

fn voice_err(e: VoiceError) -> NexusError {
    match e {
        VoiceError::IllegalArgument(reason) => NexusError::Protocol(reason),
        VoiceError::IllegalState(reason) => NexusError::State(reason),
        VoiceError::NotFound => NexusError::NotFound("voice session".into()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    initiator: String,
    target: String,
    local_udp_port: u16,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    success: bool,
    target_ip: String,
    target_port: i32,
    session_id: i64,
}

pub async fn initiate(State(state): State<Arc<AppState>>, Json(body): Json<InitiateRequest>) -> NexusResult<Json<InitiateResponse>> {
    let initiator_presence = state
        .presence
        .find(&body.initiator)
        .ok_or_else(|| NexusError::Authentication("initiator is not logged in".into()))?;
    let addr = SocketAddr::new(initiator_presence.ip, body.local_udp_port);

    let session = state.voice.initiate(&body.initiator, &body.target, addr).map_err(voice_err)?;
    let target_presence = state
        .presence
        .find(&body.target)
        .ok_or_else(|| NexusError::NotFound(format!("{} is offline", body.target)))?;

    Ok(Json(InitiateResponse {
        success: true,
        target_ip: target_presence.ip.to_string(),
        target_port: target_presence.voice_udp,
        session_id: session.session_id,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequest {
    accepter: String,
    local_udp_port: u16,
}

pub async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<AcceptRequest>,
) -> NexusResult<Json<SessionDescriptor>> {
    let presence = state
        .presence
        .find(&body.accepter)
        .ok_or_else(|| NexusError::Authentication("accepter is not logged in".into()))?;
    let addr = SocketAddr::new(presence.ip, body.local_udp_port);
    let session = state.voice.accept(id, &body.accepter, addr).map_err(voice_err)?;
    Ok(Json(session.into()))
}

#[derive(Deserialize)]
pub struct UserQuery {
    user: String,
}

pub async fn reject(State(state): State<Arc<AppState>>, Path(id): Path<i64>, Query(query): Query<UserQuery>) -> NexusResult<StatusCode> {
    state.voice.reject(id, &query.user).map_err(voice_err)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn terminate(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> NexusResult<StatusCode> {
    state.voice.terminate(id).map_err(voice_err)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn status(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> NexusResult<Json<SessionDescriptor>> {
    state
        .voice
        .get(id)
        .map(|s| Json(s.into()))
        .ok_or_else(|| NexusError::NotFound("voice session".into()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    session_id: i64,
    caller: String,
}

pub async fn incoming(State(state): State<Arc<AppState>>, Query(query): Query<UserQuery>) -> Json<Vec<IncomingCall>> {
    Json(
        state
            .voice
            .incoming_for(&query.user)
            .into_iter()
            .map(|s| IncomingCall { session_id: s.session_id, caller: s.initiator })
            .collect(),
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    sample_rate: u32,
    channels: u8,
    bits_per_sample: u8,
    packet_duration_ms: u32,
}

pub async fn voice_config() -> Json<VoiceConfig> {
    Json(VoiceConfig {
        sample_rate: 16000,
        channels: 1,
        bits_per_sample: 16,
        packet_duration_ms: 20,
    })
}

#[derive(Deserialize)]
pub struct SdpRequest {
    sdp: String,
}

#[derive(Serialize)]
pub struct SdpResponse {
    sdp: String,
}

pub async fn post_offer(State(state): State<Arc<AppState>>, Path(id): Path<i64>, Json(body): Json<SdpRequest>) -> NexusResult<Json<SessionDescriptor>> {
    let session = state.voice.set_initiator_offer(id, body.sdp).map_err(voice_err)?;
    Ok(Json(session.into()))
}

pub async fn get_offer(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> NexusResult<axum::response::Response> {
    let session = state.voice.get(id).ok_or_else(|| NexusError::NotFound("voice session".into()))?;
    Ok(match session.initiator_sdp_offer {
        Some(sdp) => Json(SdpResponse { sdp }).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

pub async fn post_answer(State(state): State<Arc<AppState>>, Path(id): Path<i64>, Json(body): Json<SdpRequest>) -> NexusResult<Json<SessionDescriptor>> {
    let session = state.voice.set_target_answer(id, body.sdp).map_err(voice_err)?;
    Ok(Json(session.into()))
}

pub async fn get_answer(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> NexusResult<axum::response::Response> {
    let session = state.voice.get(id).ok_or_else(|| NexusError::NotFound("voice session".into()))?;
    Ok(match session.target_sdp_answer {
        Some(sdp) => Json(SdpResponse { sdp }).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}
