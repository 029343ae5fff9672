//! Per-connection session handle and the process-wide session table.
//!
//! Grounded in the §9 design note: "the per-session 'attach arbitrary state
//! to a selection key' pattern maps to a side map from socket handle to
//! session struct" and "the selector-thread-only write rule is a
//! discipline... enforce via a queue whose push is allowed anywhere but
//! whose drain is guarded to one owning task." Every session owns an
//! unbounded `mpsc` channel; only the task that owns the socket's write
//! half ever drains it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::events::Broadcaster;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A lightweight, cloneable capability for a single TCP connection: enqueue
/// a line for it to write out, or force it to disconnect.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    username: Arc<RwLock<Option<String>>>,
    outbound: UnboundedSender<String>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn username(&self) -> Option<String> {
        self.username.read().clone()
    }

    pub fn set_username(&self, username: &str) {
        *self.username.write() = Some(username.to_string());
    }

    /// Enqueues `line` for the write-half task. Safe to call from any
    /// thread (§5 "enqueues from any thread wake the selector").
    pub fn enqueue(&self, line: &str) -> bool {
        self.outbound.send(line.to_string()).is_ok()
    }

    /// Signals the read loop to tear the connection down.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

pub struct NewSession {
    pub handle: SessionHandle,
    pub outbound_rx: UnboundedReceiver<String>,
}

pub fn new_session() -> NewSession {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        id: next_session_id(),
        username: Arc::new(RwLock::new(None)),
        outbound: tx,
        cancel: CancellationToken::new(),
    };
    NewSession {
        handle,
        outbound_rx: rx,
    }
}

/// Process-wide table of every connected (not necessarily authenticated)
/// TCP session. Implements [`Broadcaster`] so chat/presence/voice/
/// whiteboard/tictactoe can push frames without depending on the dispatch
/// loop that owns the sockets.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<u64, SessionHandle>>,
}

impl SessionTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.write().insert(handle.id(), handle);
    }

    pub fn remove(&self, id: u64) {
        self.sessions.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }
}

impl Broadcaster for SessionTable {
    fn broadcast(&self, line: &str, exclude_username: Option<&str>) {
        let sessions = self.sessions.read();
        for handle in sessions.values() {
            let Some(username) = handle.username() else {
                continue;
            };
            if Some(username.as_str()) == exclude_username {
                continue;
            }
            handle.enqueue(line);
        }
    }

    fn send_to(&self, username: &str, line: &str) -> bool {
        let sessions = self.sessions.read();
        sessions
            .values()
            .find(|h| h.username().as_deref() == Some(username))
            .map(|h| h.enqueue(line))
            .unwrap_or(false)
    }
}
