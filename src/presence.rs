//! Presence Registry (C2, §4.2).
//!
//! The authoritative map of logged-in users to transport-annotated presence
//! entries. Grounded in the teacher's `Router` (`router.rs`): a
//! `RwLock`-guarded map keyed by identity, with conditional remove and a
//! broadcast side-effect on every mutation. Unlike the teacher's numeric
//! socket index, presence here is keyed by username and the "anchor" is a
//! tagged variant rather than a raw channel endpoint (§9 design note:
//! "the polymorphic Presence... is best expressed as a tagged variant with
//! two cases carrying their own teardown capability").

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::tcp::session::SessionHandle;

static NEXT_HTTP_ANCHOR: AtomicU64 = AtomicU64::new(1);

/// Mints a fresh marker id for an HTTP-bridged presence login (§9: "an Http
/// anchor is just a marker"). Each call identifies a distinct login, so a
/// stale marker's conditional logout can never clobber a fresher one.
pub fn next_http_anchor() -> u64 {
    NEXT_HTTP_ANCHOR.fetch_add(1, Ordering::Relaxed)
}

/// The live transport backing a presence entry.
///
/// A TCP anchor carries the session handle so a conflicting login can push
/// a disconnect to the previous holder; an Http anchor is just a marker
/// since HTTP presence has no socket to tear down, only a bearer token that
/// expires on its own.
#[derive(Clone)]
pub enum Anchor {
    Tcp(SessionHandle),
    Http(u64),
}

impl Anchor {
    /// Identity comparison used by conditional-remove (`logout`). Two Tcp
    /// anchors are the same anchor iff they're the same session; two Http
    /// anchors are the same anchor iff they carry the same marker id.
    fn same_anchor(&self, other: &Anchor) -> bool {
        match (self, other) {
            (Anchor::Tcp(a), Anchor::Tcp(b)) => a.id() == b.id(),
            (Anchor::Http(a), Anchor::Http(b)) => a == b,
            _ => false,
        }
    }

    pub fn via_nio(&self) -> bool {
        matches!(self, Anchor::Tcp(_))
    }
}

#[derive(Clone, Serialize)]
pub struct PresenceEntry {
    pub username: String,
    pub ip: IpAddr,
    /// -1 if unset, matching the spec's sentinel (§3).
    pub file_tcp: i32,
    pub voice_udp: i32,
    pub via_nio: bool,

    #[serde(skip)]
    pub anchor: Option<Anchor>,
}

impl PresenceEntry {
    pub fn transport_tag(&self) -> &'static str {
        if self.via_nio {
            "nio"
        } else {
            "http"
        }
    }
}

/// What `login` hands back: the freshly installed entry and whoever it
/// displaced, if anyone.
pub struct LoginOutcome {
    pub installed: PresenceEntry,
    pub evicted: Option<PresenceEntry>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<BTreeMap<String, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically installs a presence entry, returning the one it replaced
    /// (if any) so the caller can tear down the prior anchor (§4.2).
    pub fn login(
        &self,
        username: &str,
        ip: IpAddr,
        file_tcp: Option<u16>,
        voice_udp: Option<u16>,
        via_nio: bool,
        anchor: Anchor,
    ) -> LoginOutcome {
        let entry = PresenceEntry {
            username: username.to_string(),
            ip,
            file_tcp: file_tcp.map(|p| p as i32).unwrap_or(-1),
            voice_udp: voice_udp.map(|p| p as i32).unwrap_or(-1),
            via_nio,
            anchor: Some(anchor),
        };

        let evicted = self.entries.write().insert(username.to_string(), entry.clone());
        LoginOutcome {
            installed: entry,
            evicted,
        }
    }

    /// Conditional remove: only removes if the anchor installed still
    /// matches `expected_anchor`, so a stale HTTP logout can't clobber a
    /// fresher TCP re-login and vice versa (§4.2).
    pub fn logout(&self, username: &str, expected_anchor: &Anchor) -> Option<PresenceEntry> {
        let mut guard = self.entries.write();
        let matches = guard
            .get(username)
            .and_then(|e| e.anchor.as_ref())
            .map(|a| a.same_anchor(expected_anchor))
            .unwrap_or(false);

        if matches {
            guard.remove(username)
        } else {
            None
        }
    }

    /// Unconditional removal used when a transport closes and we already
    /// know it owned the entry (disconnect path, §4.4).
    pub fn remove_anchored_by(&self, username: &str, anchor_id: u64) -> Option<PresenceEntry> {
        let mut guard = self.entries.write();
        let owns = matches!(
            guard.get(username).and_then(|e| e.anchor.as_ref()),
            Some(Anchor::Tcp(handle)) if handle.id() == anchor_id
        );

        if owns { guard.remove(username) } else { None }
    }

    pub fn find(&self, username: &str) -> Option<PresenceEntry> {
        self.entries.read().get(username).cloned()
    }

    /// Full snapshot, sorted by username (§4.4 `USERS`).
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn is_present(&self, username: &str) -> bool {
        self.entries.read().contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn login_evicts_previous_holder() {
        let reg = PresenceRegistry::new();
        let first = reg.login("alice", ip(), None, None, false, Anchor::Http(1));
        assert!(first.evicted.is_none());

        let second = reg.login("alice", ip(), None, None, false, Anchor::Http(2));
        assert!(second.evicted.is_some());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn conditional_logout_ignores_stale_anchor() {
        let reg = PresenceRegistry::new();
        reg.login("bob", ip(), None, None, false, Anchor::Http(1));
        reg.login("bob", ip(), None, None, false, Anchor::Http(2));

        // A logout carrying the evicted anchor must not remove the fresh one.
        assert!(reg.logout("bob", &Anchor::Http(1)).is_none());
        assert!(reg.is_present("bob"));

        assert!(reg.logout("bob", &Anchor::Http(2)).is_some());
        assert!(!reg.is_present("bob"));
    }

    #[test]
    fn logout_of_absent_user_is_a_noop() {
        let reg = PresenceRegistry::new();
        assert!(reg.logout("nobody", &Anchor::Http(1)).is_none());
    }
}
