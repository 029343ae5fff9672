//! Process-wide shared state.
//!
//! Grounded in the teacher's composition root (`lib.rs::server_main`): one
//! value constructed once at startup and handed by `Arc` to every component
//! that needs it, rather than each component reaching for a global.

use std::sync::Arc;

use crate::auth::{CredentialGate, TokenIssuer};
use crate::chat::ChatCore;
use crate::config::Config;
use crate::discovery::DiscoveryCache;
use crate::filetransfer::FileTransferRegistry;
use crate::presence::PresenceRegistry;
use crate::signaling::SignalingRouter;
use crate::statistics::Statistics;
use crate::tcp::session::SessionTable;
use crate::tictactoe::TicTacToeEngine;
use crate::voice::VoiceSessionManager;
use crate::whiteboard::WhiteboardManager;

pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: Arc<CredentialGate>,
    pub tokens: Arc<TokenIssuer>,
    pub presence: Arc<PresenceRegistry>,
    pub chat: Arc<ChatCore>,
    pub voice: Arc<VoiceSessionManager>,
    pub whiteboard: Arc<WhiteboardManager>,
    pub tictactoe: Arc<TicTacToeEngine>,
    pub sessions: Arc<SessionTable>,
    pub filetransfer: Arc<FileTransferRegistry>,
    pub discovery: Arc<DiscoveryCache>,
    pub signaling: Arc<SignalingRouter>,
    pub statistics: Arc<Statistics>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        let sessions = SessionTable::new();
        let presence = Arc::new(PresenceRegistry::new());
        let broadcaster = sessions.clone() as Arc<dyn crate::events::Broadcaster>;

        let chat = Arc::new(ChatCore::new(presence.clone(), broadcaster.clone()));
        let voice = VoiceSessionManager::new(presence.clone(), broadcaster.clone(), config.sessions.voice_timeout());
        let whiteboard = WhiteboardManager::new(broadcaster.clone(), config.sessions.whiteboard_timeout());
        let tictactoe = Arc::new(TicTacToeEngine::new(presence.clone(), broadcaster.clone()));

        let credentials = Arc::new(CredentialGate::new(config.static_users.clone()));
        let tokens = Arc::new(TokenIssuer::new(config.auth.jwt_secret.clone(), config.auth.token_ttl_secs));
        let filetransfer = Arc::new(FileTransferRegistry::new(config.downloads_dir.clone()));
        let discovery = Arc::new(DiscoveryCache::new(config.sessions.discovery_stale()));
        let signaling = Arc::new(SignalingRouter::new());
        let statistics = Arc::new(Statistics::default());

        Arc::new(Self {
            config,
            credentials,
            tokens,
            presence,
            chat,
            voice,
            whiteboard,
            tictactoe,
            sessions,
            filetransfer,
            discovery,
            signaling,
            statistics,
        })
    }
}
