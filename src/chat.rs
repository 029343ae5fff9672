//! Chat Core (C3, §4.3).
//!
//! Global message fan-out with a bounded in-memory ring. Grounded in the
//! teacher's `Router` (append-then-fan-out under a single lock, §5 "a short
//! critical section covering exactly that step") but keyed by nothing —
//! there is exactly one ring for the whole process.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use crate::events::Broadcaster;
use crate::presence::PresenceRegistry;

const HISTORY_CAPACITY: usize = 200;

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: String,
    pub text: String,
    pub timestamp: u64,
}

pub struct ChatCore {
    history: Mutex<VecDeque<ChatMessage>>,
    presence: Arc<PresenceRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl ChatCore {
    pub fn new(presence: Arc<PresenceRegistry>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            presence,
            broadcaster,
        }
    }

    /// Validates the sender is present, normalizes `text`, appends to the
    /// ring (evicting the oldest entry past capacity) and fans the frame out
    /// to every TCP session (§4.3).
    pub fn broadcast(&self, from: &str, text: &str) -> Result<ChatMessage, &'static str> {
        if !self.presence.is_present(from) {
            return Err("not logged in");
        }

        let normalized = normalize(text);
        let message = ChatMessage {
            from: from.to_string(),
            text: normalized,
            timestamp: now_secs(),
        };

        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(message.clone());
        }

        let line = format!(
            "CHAT_MSG:{}:{}:{}",
            message.from, message.timestamp, message.text
        );
        self.broadcaster.broadcast(&line, None);

        Ok(message)
    }

    /// Chronological copy of the ring (§4.3 `recent()`).
    pub fn recent(&self) -> Vec<ChatMessage> {
        self.history.lock().iter().cloned().collect()
    }
}

/// Whitespace-trims and folds embedded newlines to single spaces (§3, §8
/// boundary case).
fn normalize(text: &str) -> String {
    text.trim().replace('\n', " ").replace('\r', " ")
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

    fn registry_with(user: &str) -> Arc<PresenceRegistry> {
        let reg = Arc::new(PresenceRegistry::new());
        reg.login(
            user,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            None,
            None,
            false,
            Anchor::Http(1),
        );
        reg
    }

    #[test]
    fn rejects_absent_sender() {
        let chat = ChatCore::new(Arc::new(PresenceRegistry::new()), null_broadcaster());
        assert!(chat.broadcast("ghost", "hi").is_err());
    }

    #[test]
    fn folds_newlines_and_trims() {
        let chat = ChatCore::new(registry_with("alice"), null_broadcaster());
        let msg = chat.broadcast("alice", "  hello\nworld  \n").unwrap();
        assert_eq!(msg.text, "hello world");
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let chat = ChatCore::new(registry_with("alice"), null_broadcaster());
        for i in 0..(HISTORY_CAPACITY + 10) {
            chat.broadcast("alice", &format!("msg{i}")).unwrap();
        }

        let recent = chat.recent();
        assert_eq!(recent.len(), HISTORY_CAPACITY);
        assert_eq!(recent.first().unwrap().text, "msg10");
        assert_eq!(recent.last().unwrap().text, format!("msg{}", HISTORY_CAPACITY + 9));
    }
}
