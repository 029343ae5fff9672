//! Fan-out primitives shared by every component that needs to push a frame
//! at live TCP sessions (§4.2 "all mutations publish... to all live TCP
//! sessions", §4.7–§4.9 "pushes a ... frame to both players' TCP sessions").
//!
//! Grounded in the teacher's `Observer` trait (`observer.rs`): components
//! that mutate shared state don't reach into the TCP hub directly, they
//! call out through a small abstract interface, which keeps `tcp` as the
//! only module that owns sockets while still letting `chat`, `presence`,
//! `voice`, `whiteboard` and `tictactoe` notify live sessions.

use std::sync::Arc;

use crate::presence::PresenceEntry;

/// Anything that can push a line-framed message at TCP sessions.
///
/// Implemented by the TCP hub; held as `Arc<dyn Broadcaster>` by every
/// component whose state mutations have wire-visible side effects. Calls
/// are non-blocking: each implementation enqueues onto a per-session
/// channel and returns immediately (§5 "enqueues from any thread wake the
/// selector").
pub trait Broadcaster: Send + Sync {
    /// Sends `line` to every live, authenticated TCP session except
    /// `exclude_username` (pass `None` to exclude nobody).
    fn broadcast(&self, line: &str, exclude_username: Option<&str>);

    /// Sends `line` to exactly one user's live TCP session, if any.
    /// Returns `true` if a session was found and the line was enqueued.
    fn send_to(&self, username: &str, line: &str) -> bool;
}

/// Renders the `user,ip,fileTcp,voiceUdp,{nio|http}` tuple used by both
/// `USER_LIST` (§4.4) and the HTTP roster endpoint (§6).
pub fn format_presence_tuple(entry: &PresenceEntry) -> String {
    format!(
        "{},{},{},{},{}",
        entry.username,
        entry.ip,
        entry.file_tcp,
        entry.voice_udp,
        entry.transport_tag()
    )
}

/// Renders the full `USER_LIST:` frame body from a roster snapshot,
/// `;`-joined and sorted by username (§4.4 `USERS`).
pub fn format_user_list(mut roster: Vec<PresenceEntry>) -> String {
    roster.sort_by(|a, b| a.username.cmp(&b.username));
    let tuples: Vec<String> = roster.iter().map(format_presence_tuple).collect();
    format!("USER_LIST:{}", tuples.join(";"))
}

/// A no-op broadcaster used by components under unit test in isolation.
#[derive(Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn broadcast(&self, _line: &str, _exclude_username: Option<&str>) {}

    fn send_to(&self, _username: &str, _line: &str) -> bool {
        false
    }
}

pub fn null_broadcaster() -> Arc<dyn Broadcaster> {
    Arc::new(NullBroadcaster)
}
