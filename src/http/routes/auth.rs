//! `/api/auth/*` (§6): account registration, password login and the
//! current-user lookup that every other bridge endpoint's bearer token
//! traces back to.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::User;
use crate::error::NexusResult;
use crate::http::AuthUser;
use crate::state::AppState;

#[derive(Serialize)]
pub struct AuthResponse {
    token: String,
    user: User,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    name: String,
    email: String,
    password: String,
}

pub async fn register(State(state): State<Arc<AppState>>, Json(body): Json<RegisterRequest>) -> NexusResult<Json<AuthResponse>> {
    let user = state.credentials.register(&body.email, &body.name, &body.password)?;
    let token = state.tokens.issue(&user.username)?;
    Ok(Json(AuthResponse { token, user }))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

pub async fn login(State(state): State<Arc<AppState>>, Json(body): Json<LoginRequest>) -> NexusResult<Json<AuthResponse>> {
    let user = state.credentials.authenticate(&body.email, &body.password)?;
    let token = state.tokens.issue(&user.username)?;
    Ok(Json(AuthResponse { token, user }))
}

pub async fn me(State(state): State<Arc<AppState>>, AuthUser(username): AuthUser) -> NexusResult<Json<User>> {
    state
        .credentials
        .get_by_username(&username)
        .map(Json)
        .ok_or_else(|| crate::error::NexusError::NotFound("user".into()))
}
