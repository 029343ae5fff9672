//! Error taxonomy shared by the TCP hub (C4) and the HTTP bridge (C5).
//!
//! Mirrors the classification in the specification's error-handling design:
//! protocol, authentication, authorization, not-found, state and transport
//! errors each map onto a distinct wire-level response (`ERROR:<cause>` on
//! TCP, a specific status code over HTTP). Fatal errors never reach this
//! type — they are logged and the offending session is dropped in place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum NexusError {
    #[error("protocol: {0}")]
    Protocol(String),

    #[error("authentication: {0}")]
    Authentication(String),

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state: {0}")]
    State(String),

    #[error("transport: {0}")]
    Transport(String),
}

impl NexusError {
    /// Formats the TCP-protocol rendering of this error (§7).
    pub fn as_tcp_frame(&self) -> String {
        match self {
            Self::Authentication(reason) => format!("LOGIN_FAIL:{reason}"),
            other => format!("ERROR:{}", other.cause()),
        }
    }

    fn cause(&self) -> &str {
        match self {
            Self::Protocol(c)
            | Self::Authentication(c)
            | Self::Authorization(c)
            | Self::NotFound(c)
            | Self::State(c)
            | Self::Transport(c) => c,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::State(_) => StatusCode::BAD_REQUEST,
            Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for NexusError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.cause() }));
        (status, body).into_response()
    }
}

pub type NexusResult<T> = Result<T, NexusError>;
