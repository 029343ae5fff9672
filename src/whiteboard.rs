//! Whiteboard Session Manager (C8, §4.8).
//!
//! Two-party drawing sessions with a per-session ordered command log.
//! `create` is idempotent on the unordered participant pair — grounded in
//! the same dedupe-or-create pattern the teacher uses for its router index
//! (a single write-lock critical section covering "look up, else insert").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time;

use crate::events::Broadcaster;

#[derive(Clone, Serialize, Debug)]
#[serde(tag = "type")]
pub enum DrawCommand {
    Draw {
        user: String,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        color: String,
        thickness: f64,
    },
    Clear {
        user: String,
    },
}

struct WhiteboardSession {
    id: u64,
    initiator: String,
    participant: String,
    created_at: u64,
    last_activity: u64,
    log: Vec<DrawCommand>,
}

impl WhiteboardSession {
    fn pair(&self) -> (String, String) {
        order_pair(&self.initiator, &self.participant)
    }

    fn has_participant(&self, user: &str) -> bool {
        self.initiator == user || self.participant == user
    }

    fn other(&self, user: &str) -> &str {
        if self.initiator == user {
            &self.participant
        } else {
            &self.initiator
        }
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
pub enum WhiteboardError {
    NotFound,
    Forbidden,
}

pub struct WhiteboardManager {
    sessions: RwLock<HashMap<u64, WhiteboardSession>>,
    next_id: AtomicU64,
    broadcaster: Arc<dyn Broadcaster>,
    timeout: Duration,
}

impl WhiteboardManager {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, timeout: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            broadcaster,
            timeout,
        });

        manager.clone().spawn_sweeper();
        manager
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let timeout = self.timeout;
        tokio::spawn(async move {
            let mut ticker = time::interval(timeout.max(Duration::from_secs(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep();
            }
        });
    }

    fn sweep(&self) {
        let now = now_secs();
        let timeout_secs = self.timeout.as_secs();
        self.sessions
            .write()
            .retain(|_, s| now.saturating_sub(s.last_activity) < timeout_secs);
    }

    /// Returns the existing session id for `{a,b}` if one lives, else
    /// creates a fresh one (§4.8, §8 idempotence property).
    pub fn create(&self, a: &str, b: &str) -> u64 {
        let pair = order_pair(a, b);
        let mut sessions = self.sessions.write();

        if let Some(existing) = sessions.values().find(|s| s.pair() == pair) {
            return existing.id;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = now_secs();
        sessions.insert(
            id,
            WhiteboardSession {
                id,
                initiator: a.to_string(),
                participant: b.to_string(),
                created_at: now,
                last_activity: now,
                log: Vec::new(),
            },
        );
        id
    }

    pub fn draw(
        &self,
        session_id: u64,
        user: &str,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        color: String,
        thickness: f64,
    ) -> Result<(), WhiteboardError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&session_id).ok_or(WhiteboardError::NotFound)?;
        if !session.has_participant(user) {
            return Err(WhiteboardError::Forbidden);
        }

        session.last_activity = now_secs();
        session.log.push(DrawCommand::Draw {
            user: user.to_string(),
            x1,
            y1,
            x2,
            y2,
            color: color.clone(),
            thickness,
        });

        let other = session.other(user).to_string();
        drop(sessions);

        let line = format!(
            "WHITEBOARD_COMMAND:{session_id}:draw:{x1:.2}:{y1:.2}:{x2:.2}:{y2:.2}:{color}:{thickness:.2}"
        );
        self.broadcaster.send_to(&other, &line);
        Ok(())
    }

    /// Truncates the prior log and appends a Clear marker (§3).
    pub fn clear(&self, session_id: u64, user: &str) -> Result<(), WhiteboardError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&session_id).ok_or(WhiteboardError::NotFound)?;
        if !session.has_participant(user) {
            return Err(WhiteboardError::Forbidden);
        }

        session.last_activity = now_secs();
        session.log.clear();
        session.log.push(DrawCommand::Clear {
            user: user.to_string(),
        });

        let other = session.other(user).to_string();
        drop(sessions);

        self.broadcaster
            .send_to(&other, &format!("WHITEBOARD_COMMAND:{session_id}:clear"));
        Ok(())
    }

    /// Stable ordered copy of the log (§4.8 `commands()`).
    pub fn commands(&self, session_id: u64, user: &str) -> Result<Vec<DrawCommand>, WhiteboardError> {
        let sessions = self.sessions.read();
        let session = sessions.get(&session_id).ok_or(WhiteboardError::NotFound)?;
        if !session.has_participant(user) {
            return Err(WhiteboardError::Forbidden);
        }
        Ok(session.log.clone())
    }

    /// Removes the session and notifies the other participant (§4.8).
    pub fn close(&self, session_id: u64, user: &str) -> Result<(), WhiteboardError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get(&session_id).ok_or(WhiteboardError::NotFound)?;
        if !session.has_participant(user) {
            return Err(WhiteboardError::Forbidden);
        }
        let other = session.other(user).to_string();
        sessions.remove(&session_id);
        drop(sessions);

        self.broadcaster
            .send_to(&other, &format!("WHITEBOARD_CLOSED:{user}"));
        Ok(())
    }

    pub fn pending_for(&self, user: &str) -> Vec<(u64, String, u64, u64)> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.has_participant(user))
            .map(|s| (s.id, s.other(user).to_string(), s.created_at, s.last_activity))
            .collect()
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

    fn manager() -> Arc<WhiteboardManager> {
        WhiteboardManager::new(null_broadcaster(), Duration::from_secs(3600))
    }

    #[test]
    fn create_is_idempotent_regardless_of_order() {
        let m = manager();
        let id1 = m.create("alice", "bob");
        let id2 = m.create("bob", "alice");
        assert_eq!(id1, id2);
    }

    #[test]
    fn only_participants_may_draw_or_read() {
        let m = manager();
        let id = m.create("alice", "bob");
        assert!(matches!(
            m.draw(id, "eve", 0.0, 0.0, 1.0, 1.0, "#000".into(), 1.0),
            Err(WhiteboardError::Forbidden)
        ));
        assert!(m.draw(id, "alice", 0.0, 0.0, 1.0, 1.0, "#000".into(), 1.0).is_ok());
        assert_eq!(m.commands(id, "bob").unwrap().len(), 1);
        assert!(matches!(m.commands(id, "eve"), Err(WhiteboardError::Forbidden)));
    }

    #[test]
    fn clear_truncates_log() {
        let m = manager();
        let id = m.create("alice", "bob");
        m.draw(id, "alice", 0.0, 0.0, 1.0, 1.0, "#000".into(), 1.0).unwrap();
        m.draw(id, "bob", 0.0, 0.0, 1.0, 1.0, "#000".into(), 1.0).unwrap();
        m.clear(id, "alice").unwrap();
        assert_eq!(m.commands(id, "bob").unwrap().len(), 1);
    }
}
