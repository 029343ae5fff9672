//! WebRTC Signaling Router (C10, §4.10).
//!
//! A `username -> WebSocket` map with the same push-anywhere/drain-by-one-
//! task discipline as the TCP hub (`tcp::session`): every peer owns an
//! `mpsc` channel, a dedicated task drains it into the socket, and handlers
//! never touch a socket directly. Grounded in the secondary reference
//! repo's axum WebSocket-per-connection pattern, since the teacher itself
//! has no WebSocket surface.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::voice::VoiceError;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

struct PeerLink {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
pub struct SignalingRouter {
    peers: RwLock<HashMap<String, PeerLink>>,
    voice_relay: RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>,
}

impl SignalingRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn forward(&self, target: &str, payload: &Value) -> bool {
        let tx = self.peers.read().get(target).map(|p| p.tx.clone());
        match tx {
            Some(tx) => tx.send(Message::Text(payload.to_string())).is_ok(),
            None => false,
        }
    }
}

#[derive(Deserialize)]
pub struct SignalingQuery {
    username: String,
}

#[derive(Deserialize)]
struct SignalMessage {
    from: String,
    to: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SignalingQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if query.username.is_empty() {
        return (StatusCode::BAD_REQUEST, "username is required").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, query.username, state))
}

async fn handle_socket(socket: WebSocket, username: String, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let link_id = NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed);

    // A second connect for the same username closes the first with a
    // normal close (§4.10).
    if let Some(previous) = state
        .signaling
        .peers
        .write()
        .insert(username.clone(), PeerLink { id: link_id, tx: tx.clone() })
    {
        let _ = previous.tx.send(Message::Close(None));
    }

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_message(&state, &username, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    disconnect(&state, &username, link_id);
}

fn disconnect(state: &AppState, username: &str, link_id: u64) {
    let owned_current = {
        let mut peers = state.signaling.peers.write();
        match peers.get(username) {
            Some(link) if link.id == link_id => {
                peers.remove(username);
                true
            }
            _ => false,
        }
    };
    if !owned_current {
        // a fresher connection for this username has already replaced ours.
        return;
    }

    for session in state.voice.sessions_for(username) {
        let _ = state.voice.terminate(session.session_id);
        let other = if session.initiator == username {
            session.target.clone()
        } else {
            session.initiator.clone()
        };
        state.signaling.forward(
            &other,
            &json!({
                "type": "peer-disconnected",
                "from": username,
                "to": other,
                "data": { "sessionId": session.session_id },
            }),
        );
    }
}

async fn handle_message(state: &AppState, connection_user: &str, text: &str) {
    let message: SignalMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            send_error(state, connection_user, &format!("malformed signaling message: {e}"));
            return;
        }
    };
    // Trust the connection's identity over a spoofable `from` field.
    let from = connection_user;

    match message.kind.as_str() {
        "call-initiate" => {
            let Some(to) = message.to else {
                send_error(state, from, "call-initiate requires 'to'");
                return;
            };
            call_initiate(state, from, &to);
        }
        "call-accept" => {
            let Some(session_id) = session_id_of(&message.data) else {
                send_error(state, from, "call-accept requires data.sessionId");
                return;
            };
            call_accept(state, from, session_id);
        }
        "call-reject" => {
            let Some(session_id) = session_id_of(&message.data) else {
                send_error(state, from, "call-reject requires data.sessionId");
                return;
            };
            call_reject(state, from, session_id);
        }
        "call-end" => {
            let Some(session_id) = session_id_of(&message.data) else {
                send_error(state, from, "call-end requires data.sessionId");
                return;
            };
            call_end(state, from, session_id);
        }
        "offer" => {
            let (Some(to), Some(session_id)) = (message.to, session_id_of(&message.data)) else {
                send_error(state, from, "offer requires 'to' and data.sessionId");
                return;
            };
            let Some(sdp) = sdp_of(&message.data) else {
                send_error(state, from, "offer requires data.sdp");
                return;
            };
            offer(state, from, &to, session_id, sdp);
        }
        "answer" => {
            let (Some(to), Some(session_id)) = (message.to, session_id_of(&message.data)) else {
                send_error(state, from, "answer requires 'to' and data.sessionId");
                return;
            };
            let Some(sdp) = sdp_of(&message.data) else {
                send_error(state, from, "answer requires data.sdp");
                return;
            };
            answer(state, from, &to, session_id, sdp);
        }
        "ice-candidate" => {
            let Some(to) = message.to else {
                send_error(state, from, "ice-candidate requires 'to'");
                return;
            };
            let payload = json!({ "type": "ice-candidate", "from": from, "to": to, "data": message.data });
            if !state.signaling.forward(&to, &payload) {
                send_error(state, from, &format!("{to} is offline"));
            }
        }
        other => send_error(state, from, &format!("unrecognized signaling type '{other}'")),
    }
}

fn call_initiate(state: &AppState, from: &str, to: &str) {
    let Some(presence) = state.presence.find(from) else {
        send_error(state, from, "not logged in");
        return;
    };
    if presence.voice_udp <= 0 {
        send_error(state, from, "no voice port declared");
        return;
    }
    let addr = SocketAddr::new(presence.ip, presence.voice_udp as u16);

    match state.voice.initiate(from, to, addr) {
        Ok(session) => {
            let incoming = json!({
                "type": "incoming-call",
                "from": from,
                "to": to,
                "data": { "sessionId": session.session_id, "caller": from },
            });
            if !state.signaling.forward(to, &incoming) {
                send_error(state, from, &format!("{to} is offline"));
            }
            let ack = json!({
                "type": "call-initiated",
                "from": from,
                "to": to,
                "data": { "sessionId": session.session_id, "target": to },
            });
            state.signaling.forward(from, &ack);
        }
        Err(e) => send_error(state, from, &voice_error_reason(&e)),
    }
}

fn call_accept(state: &AppState, from: &str, session_id: i64) {
    let Some(session) = state.voice.get(session_id) else {
        send_error(state, from, "session not found");
        return;
    };
    let Some(accepter_presence) = state.presence.find(from) else {
        send_error(state, from, "not logged in");
        return;
    };
    if accepter_presence.voice_udp <= 0 {
        send_error(state, from, "no voice port declared");
        return;
    }
    let accepter_addr = SocketAddr::new(accepter_presence.ip, accepter_presence.voice_udp as u16);
    match state.voice.accept(session_id, from, accepter_addr) {
        Ok(updated) => {
            state.signaling.forward(
                &updated.initiator,
                &json!({
                    "type": "call-accepted",
                    "from": from,
                    "to": updated.initiator,
                    "data": { "sessionId": session_id, "accepter": from },
                }),
            );
        }
        Err(e) => send_error(state, from, &voice_error_reason(&e)),
    }
}

fn call_reject(state: &AppState, from: &str, session_id: i64) {
    let Some(session) = state.voice.get(session_id) else {
        send_error(state, from, "session not found");
        return;
    };
    match state.voice.reject(session_id, from) {
        Ok(()) => {
            state.signaling.forward(
                &session.initiator,
                &json!({
                    "type": "call-rejected",
                    "from": from,
                    "to": session.initiator,
                    "data": { "sessionId": session_id, "rejecter": from },
                }),
            );
        }
        Err(e) => send_error(state, from, &voice_error_reason(&e)),
    }
}

fn call_end(state: &AppState, from: &str, session_id: i64) {
    let Some(session) = state.voice.get(session_id) else {
        send_error(state, from, "session not found");
        return;
    };
    match state.voice.terminate(session_id) {
        Ok(()) => {
            let other = if session.initiator == from { &session.target } else { &session.initiator };
            state.signaling.forward(
                other,
                &json!({
                    "type": "call-ended",
                    "from": from,
                    "to": other,
                    "data": { "sessionId": session_id, "endedBy": from },
                }),
            );
        }
        Err(e) => send_error(state, from, &voice_error_reason(&e)),
    }
}

fn offer(state: &AppState, from: &str, to: &str, session_id: i64, sdp: String) {
    match state.voice.set_initiator_offer(session_id, sdp.clone()) {
        Ok(_) => {
            let payload = json!({ "type": "offer", "from": from, "to": to, "data": { "sessionId": session_id, "sdp": sdp } });
            if !state.signaling.forward(to, &payload) {
                send_error(state, from, &format!("{to} is offline"));
            }
        }
        Err(e) => send_error(state, from, &voice_error_reason(&e)),
    }
}

fn answer(state: &AppState, from: &str, to: &str, session_id: i64, sdp: String) {
    match state.voice.set_target_answer(session_id, sdp.clone()) {
        Ok(_) => {
            let payload = json!({ "type": "answer", "from": from, "to": to, "data": { "sessionId": session_id, "sdp": sdp } });
            if !state.signaling.forward(to, &payload) {
                send_error(state, from, &format!("{to} is offline"));
            }
        }
        Err(e) => send_error(state, from, &voice_error_reason(&e)),
    }
}

fn send_error(state: &AppState, to: &str, reason: &str) {
    state.signaling.forward(
        to,
        &json!({ "type": "system/error", "from": "system", "to": to, "data": { "reason": reason } }),
    );
}

fn session_id_of(data: &Value) -> Option<i64> {
    data.get("sessionId").and_then(Value::as_i64)
}

fn sdp_of(data: &Value) -> Option<String> {
    data.get("sdp").and_then(Value::as_str).map(str::to_string)
}

fn voice_error_reason(e: &VoiceError) -> String {
    match e {
        VoiceError::IllegalArgument(reason) | VoiceError::IllegalState(reason) => reason.clone(),
        VoiceError::NotFound => "session not found".to_string(),
    }
}

/// `/ws/voice?username=X` — server-relayed audio fallback (§6). Binary
/// frames are forwarded to the other participant of a CONNECTED voice
/// session; anything else about the call is still negotiated over
/// `/ws/signaling`.
pub async fn voice_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SignalingQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if query.username.is_empty() {
        return (StatusCode::BAD_REQUEST, "username is required").into_response();
    }
    ws.on_upgrade(move |socket| handle_voice_socket(socket, query.username, state))
}

async fn handle_voice_socket(socket: WebSocket, username: String, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.signaling.voice_relay.write().insert(username.clone(), tx);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Binary(bytes) => {
                if let Some(peer) = connected_voice_peer(&state, &username) {
                    if let Some(tx) = state.signaling.voice_relay.read().get(&peer) {
                        let _ = tx.send(Message::Binary(bytes));
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.signaling.voice_relay.write().remove(&username);
}

fn connected_voice_peer(state: &AppState, username: &str) -> Option<String> {
    state
        .voice
        .sessions_for(username)
        .into_iter()
        .find(|s| s.state == crate::voice::VoiceState::Connected)
        .map(|s| if s.initiator == username { s.target } else { s.initiator })
}
