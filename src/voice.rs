//! Voice Session Manager (C7, §4.7).
//!
//! Lifecycle of voice calls: RINGING -> ACCEPTED -> CONNECTED -> TERMINATED.
//! Grounded in the teacher's node-table pattern (`turn_rs` session storage
//! accessed through a sweeper thread, see `credentials.rs`'s
//! `StaticCredentials` eviction loop) combined with the design note in §9:
//! "the voice `Session` mutates SDP fields in place; model as an atomic
//! snapshot replaced under a lock so readers never see torn state" — each
//! session is stored as a whole `VoiceSession` value behind a single lock
//! entry, never field-by-field.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time;

use crate::events::Broadcaster;
use crate::presence::PresenceRegistry;

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoiceState {
    Ringing,
    Accepted,
    Connected,
    Terminated,
}

#[derive(Clone, Serialize, Debug)]
pub struct VoiceSession {
    pub session_id: i64,
    pub initiator: String,
    pub target: String,
    pub initiator_addr: Option<SocketAddr>,
    pub target_addr: Option<SocketAddr>,
    pub state: VoiceState,
    pub created_at: u64,
    pub accepted_at: Option<u64>,
    #[serde(skip)]
    pub last_activity: u64,
    pub initiator_sdp_offer: Option<String>,
    pub target_sdp_answer: Option<String>,
}

impl VoiceSession {
    fn unordered_pair(&self) -> (String, String) {
        order_pair(&self.initiator, &self.target)
    }
}

fn order_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Debug)]
pub enum VoiceError {
    IllegalArgument(String),
    IllegalState(String),
    NotFound,
}

pub struct VoiceSessionManager {
    sessions: RwLock<HashMap<i64, VoiceSession>>,
    next_id: AtomicI64,
    presence: Arc<PresenceRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
    timeout: Duration,
}

impl VoiceSessionManager {
    pub fn new(presence: Arc<PresenceRegistry>, broadcaster: Arc<dyn Broadcaster>, timeout: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            presence,
            broadcaster,
            timeout,
        });

        manager.clone().spawn_sweeper();
        manager
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let timeout = self.timeout;
        tokio::spawn(async move {
            let mut ticker = time::interval(timeout);
            ticker.tick().await; // first tick fires immediately; skip it.
            loop {
                ticker.tick().await;
                self.sweep();
            }
        });
    }

    fn sweep(&self) {
        let now = now_secs();
        let timeout_secs = self.timeout.as_secs();
        let mut sessions = self.sessions.write();
        sessions.retain(|_, session| now.saturating_sub(session.last_activity) < timeout_secs);
    }

    /// Requires `initiator != target` and that `target` is present with a
    /// declared voice port (§4.7).
    pub fn initiate(
        &self,
        initiator: &str,
        target: &str,
        initiator_addr: SocketAddr,
    ) -> Result<VoiceSession, VoiceError> {
        if initiator == target {
            return Err(VoiceError::IllegalArgument("cannot call yourself".into()));
        }

        let target_presence = self
            .presence
            .find(target)
            .ok_or_else(|| VoiceError::NotFound)?;

        if target_presence.voice_udp <= 0 {
            return Err(VoiceError::IllegalArgument("target has no voice port".into()));
        }

        let pair = order_pair(initiator, target);
        {
            let sessions = self.sessions.read();
            let clash = sessions
                .values()
                .any(|s| s.unordered_pair() == pair && s.state != VoiceState::Terminated);
            if clash {
                return Err(VoiceError::IllegalState(
                    "a non-terminated session already exists for this pair".into(),
                ));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = now_secs();
        let session = VoiceSession {
            session_id: id,
            initiator: initiator.to_string(),
            target: target.to_string(),
            initiator_addr: Some(initiator_addr),
            target_addr: None,
            state: VoiceState::Ringing,
            created_at: now,
            accepted_at: None,
            last_activity: now,
            initiator_sdp_offer: None,
            target_sdp_answer: None,
        };

        self.sessions.write().insert(id, session.clone());
        self.push_lifecycle(&session);
        Ok(session)
    }

    pub fn accept(&self, session_id: i64, accepter: &str, accepter_addr: SocketAddr) -> Result<VoiceSession, VoiceError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&session_id).ok_or(VoiceError::NotFound)?;

        if session.target != accepter {
            return Err(VoiceError::IllegalArgument("not the target of this session".into()));
        }
        if session.state != VoiceState::Ringing {
            return Err(VoiceError::IllegalState("session is not ringing".into()));
        }

        session.target_addr = Some(accepter_addr);
        session.state = VoiceState::Accepted;
        session.accepted_at = Some(now_secs());
        session.last_activity = now_secs();
        let snapshot = session.clone();
        drop(sessions);

        self.push_lifecycle(&snapshot);
        Ok(snapshot)
    }

    pub fn reject(&self, session_id: i64, user: &str) -> Result<(), VoiceError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get(&session_id).ok_or(VoiceError::NotFound)?;
        if session.initiator != user && session.target != user {
            return Err(VoiceError::IllegalArgument("not a participant".into()));
        }
        let mut terminated = session.clone();
        terminated.state = VoiceState::Terminated;
        sessions.remove(&session_id);
        drop(sessions);

        self.push_lifecycle(&terminated);
        Ok(())
    }

    pub fn terminate(&self, session_id: i64) -> Result<(), VoiceError> {
        let mut sessions = self.sessions.write();
        let mut session = sessions.remove(&session_id).ok_or(VoiceError::NotFound)?;
        session.state = VoiceState::Terminated;
        drop(sessions);

        self.push_lifecycle(&session);
        Ok(())
    }

    pub fn get(&self, session_id: i64) -> Option<VoiceSession> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&session_id)?;
        session.last_activity = now_secs();
        Some(session.clone())
    }

    pub fn incoming_for(&self, user: &str) -> Vec<VoiceSession> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.target == user && s.state == VoiceState::Ringing)
            .cloned()
            .collect()
    }

    /// Every non-terminated session `user` participates in, either side
    /// (used by the signaling router to auto-terminate on disconnect, §4.10).
    pub fn sessions_for(&self, user: &str) -> Vec<VoiceSession> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.initiator == user || s.target == user)
            .cloned()
            .collect()
    }

    pub fn set_initiator_offer(&self, session_id: i64, sdp: String) -> Result<VoiceSession, VoiceError> {
        self.mutate_sdp(session_id, |s| s.initiator_sdp_offer = Some(sdp))
    }

    pub fn set_target_answer(&self, session_id: i64, sdp: String) -> Result<VoiceSession, VoiceError> {
        self.mutate_sdp(session_id, |s| s.target_sdp_answer = Some(sdp))
    }

    fn mutate_sdp(&self, session_id: i64, apply: impl FnOnce(&mut VoiceSession)) -> Result<VoiceSession, VoiceError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&session_id).ok_or(VoiceError::NotFound)?;
        apply(session);
        session.last_activity = now_secs();

        if session.initiator_sdp_offer.is_some() && session.target_sdp_answer.is_some() {
            session.state = VoiceState::Connected;
        }

        let snapshot = session.clone();
        drop(sessions);
        self.push_lifecycle(&snapshot);
        Ok(snapshot)
    }

    fn push_lifecycle(&self, session: &VoiceSession) {
        let line = format!("VOICE_UPDATE:{}:{:?}", session.session_id, session.state);
        self.broadcaster.send_to(&session.initiator, &line);
        self.broadcaster.send_to(&session.target, &line);
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::null_broadcaster;
    use crate::presence::Anchor;
    use std::net::{IpAddr, Ipv4Addr};

    fn setup() -> (Arc<VoiceSessionManager>, SocketAddr, SocketAddr) {
        let presence = Arc::new(PresenceRegistry::new());
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        presence.login("alice", ip, None, Some(5001), true, Anchor::Http(1));
        presence.login("bob", ip, None, Some(5002), true, Anchor::Http(2));

        let manager = VoiceSessionManager::new(presence, null_broadcaster(), Duration::from_secs(1800));
        let a: SocketAddr = "127.0.0.1:5001".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:5002".parse().unwrap();
        (manager, a, b)
    }

    #[test]
    fn happy_path_progresses_states_forward_only() {
        let (manager, a, b) = setup();
        let session = manager.initiate("alice", "bob", a).unwrap();
        assert_eq!(session.state, VoiceState::Ringing);

        let accepted = manager.accept(session.session_id, "bob", b).unwrap();
        assert_eq!(accepted.state, VoiceState::Accepted);

        manager
            .set_initiator_offer(session.session_id, "offer-sdp".into())
            .unwrap();
        let connected = manager
            .set_target_answer(session.session_id, "answer-sdp".into())
            .unwrap();
        assert_eq!(connected.state, VoiceState::Connected);

        manager.terminate(session.session_id).unwrap();
        assert!(manager.get(session.session_id).is_none());
    }

    #[test]
    fn rejects_self_call() {
        let (manager, a, _b) = setup();
        assert!(matches!(
            manager.initiate("alice", "alice", a),
            Err(VoiceError::IllegalArgument(_))
        ));
    }

    #[test]
    fn rejects_duplicate_active_session_for_same_pair() {
        let (manager, a, _b) = setup();
        manager.initiate("alice", "bob", a).unwrap();
        assert!(matches!(
            manager.initiate("alice", "bob", a),
            Err(VoiceError::IllegalState(_))
        ));
    }
}
