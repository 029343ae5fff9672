//! HTTP/WS Bridge (C5, §4.5).
//!
//! JSON endpoints that call into the same C2/C3/C7/C8/C9 instances the TCP
//! hub dispatches into (`state::AppState` is shared, not duplicated).
//! Grounded in the teacher's `api.rs` for the axum `Router`/`State` wiring
//! and its CORS layer setup; bearer-token auth is this crate's own addition
//! since the teacher's controller API is deliberately unauthenticated.

pub mod routes;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::NexusError;
use crate::signaling;
use crate::state::AppState;

/// Extracts and verifies the bearer token, yielding the username it was
/// issued for. Any handler taking this as a parameter requires auth.
pub struct AuthUser(pub String);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = NexusError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| NexusError::Authentication("missing bearer token".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| NexusError::Authentication("Authorization header must be a bearer token".into()))?;

        let username = state.tokens.verify(token)?;
        Ok(AuthUser(username))
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = if state.config.http.allow_origin == "*" {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origin: HeaderValue = state
            .config
            .http
            .allow_origin
            .parse()
            .unwrap_or_else(|_| HeaderValue::from_static("*"));
        CorsLayer::new().allow_origin(origin).allow_methods(Any).allow_headers(Any)
    };

    Router::new()
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/me", get(routes::auth::me))
        .route("/api/nio/login", post(routes::nio::login))
        .route("/api/nio/logout", post(routes::nio::logout))
        .route("/api/nio/message", post(routes::nio::message))
        .route("/api/nio/users", get(routes::nio::users))
        .route("/api/nio/messages", get(routes::nio::messages))
        .route("/api/nio/peer/{user}", get(routes::nio::peer))
        .route("/api/voice/initiate", post(routes::voice::initiate))
        .route("/api/voice/accept/{id}", post(routes::voice::accept))
        .route("/api/voice/reject/{id}", post(routes::voice::reject))
        .route("/api/voice/terminate/{id}", post(routes::voice::terminate))
        .route("/api/voice/status/{id}", get(routes::voice::status))
        .route("/api/voice/incoming", get(routes::voice::incoming))
        .route("/api/voice/config", get(routes::voice::voice_config))
        .route("/api/voice/sdp/offer/{id}", post(routes::voice::post_offer).get(routes::voice::get_offer))
        .route("/api/voice/sdp/answer/{id}", post(routes::voice::post_answer).get(routes::voice::get_answer))
        .route("/api/whiteboard/create", post(routes::whiteboard::create))
        .route("/api/whiteboard/draw", post(routes::whiteboard::draw))
        .route("/api/whiteboard/session/{id}", get(routes::whiteboard::session))
        .route("/api/whiteboard/close", post(routes::whiteboard::close))
        .route("/api/whiteboard/pending/{user}", get(routes::whiteboard::pending))
        .route("/api/tictactoe/start", post(routes::tictactoe::start))
        .route("/api/tictactoe/move/{id}", post(routes::tictactoe::make_move))
        .route("/api/tictactoe/resign/{id}", post(routes::tictactoe::resign))
        .route("/api/tictactoe/current", get(routes::tictactoe::current))
        .route("/api/filetransfer/send", post(routes::filetransfer::send))
        .route("/api/filetransfer/transfers/{user}", get(routes::filetransfer::transfers))
        .route("/api/filetransfer/downloads", get(routes::filetransfer::downloads))
        .route("/api/filetransfer/download/{filename}", get(routes::filetransfer::download))
        .route("/api/discovery/broadcast", post(routes::discovery::broadcast))
        .route("/api/discovery/peers", get(routes::discovery::peers))
        .route("/ws/signaling", get(signaling::ws_handler))
        .route("/ws/voice", get(signaling::voice_ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(state.config.http.listen).await?;
    log::info!("http bridge listening: addr={}", state.config.http.listen);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
