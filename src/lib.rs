pub mod auth;
pub mod chat;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod filetransfer;
pub mod http;
pub mod presence;
pub mod signaling;
pub mod state;
pub mod statistics;
pub mod stun;
pub mod tcp;
pub mod tictactoe;
pub mod voice;
pub mod whiteboard;

use std::sync::Arc;

use self::config::Config;
use self::state::AppState;

/// Boots every component — TCP hub, HTTP/WS bridge, STUN responder and LAN
/// discovery — against one shared `AppState`, and runs until the first of
/// them exits (mirrors the teacher's `startup`, generalized from a single
/// TURN service to this crate's four concurrent listeners).
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let state = AppState::new(config);

    tokio::try_join!(
        tcp::run(state.clone()),
        http::run(state.clone()),
        stun::run(state.config.clone(), state.statistics.clone()),
        discovery::run(state.config.clone(), state.discovery.clone(), state.statistics.clone()),
    )?;

    Ok(())
}
