//! `/api/tictactoe/*` (§6): HTTP front for the Tic-Tac-Toe Engine (C9).
//! The acting player is always the bearer-authenticated caller, never a
//! client-supplied field — mirrors `nio.rs`'s `message()`/`auth.rs`'s `me()`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::{NexusError, NexusResult};
use crate::http::AuthUser;
use crate::state::AppState;
use crate::tictactoe::{Game, GameError};

fn game_err(e: GameError) -> NexusError {
    match e {
        GameError::IllegalArgument(reason) => NexusError::Protocol(reason),
        GameError::IllegalState(reason) => NexusError::State(reason),
        GameError::NotFound => NexusError::NotFound("tictactoe game".into()),
    }
}

#[derive(Deserialize)]
pub struct StartRequest {
    opponent: String,
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    AuthUser(initiator): AuthUser,
    Json(body): Json<StartRequest>,
) -> NexusResult<Json<Game>> {
    let game = state.tictactoe.start(&initiator, &body.opponent).map_err(game_err)?;
    Ok(Json(game))
}

#[derive(Deserialize)]
pub struct MoveRequest {
    row: usize,
    col: usize,
}

pub async fn make_move(
    State(state): State<Arc<AppState>>,
    AuthUser(player): AuthUser,
    Path(id): Path<u64>,
    Json(body): Json<MoveRequest>,
) -> NexusResult<Json<Game>> {
    let game = state.tictactoe.make_move(id, &player, body.row, body.col).map_err(game_err)?;
    Ok(Json(game))
}

pub async fn resign(State(state): State<Arc<AppState>>, AuthUser(player): AuthUser, Path(id): Path<u64>) -> NexusResult<Json<Game>> {
    let game = state.tictactoe.resign(id, &player).map_err(game_err)?;
    Ok(Json(game))
}

pub async fn current(State(state): State<Arc<AppState>>, AuthUser(user): AuthUser) -> Response {
    match state.tictactoe.current_for(&user) {
        Some(game) => Json(game).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
