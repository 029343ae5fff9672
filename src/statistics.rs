//! Process-wide counters (ambient observability stack).
//!
//! Grounded in the teacher's `statistics.rs`: plain atomics for the hot
//! path, snapshotted on demand rather than pushed anywhere.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Statistics {
    pub tcp_connections_accepted: AtomicU64,
    pub tcp_connections_active: AtomicU64,
    pub chat_messages: AtomicU64,
    pub stun_requests: AtomicU64,
    pub stun_dropped: AtomicU64,
    pub discovery_packets: AtomicU64,
    pub file_transfers_completed: AtomicU64,
    pub file_transfers_failed: AtomicU64,
}

impl Statistics {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            tcp_connections_accepted: self.tcp_connections_accepted.load(Ordering::Relaxed),
            tcp_connections_active: self.tcp_connections_active.load(Ordering::Relaxed),
            chat_messages: self.chat_messages.load(Ordering::Relaxed),
            stun_requests: self.stun_requests.load(Ordering::Relaxed),
            stun_dropped: self.stun_dropped.load(Ordering::Relaxed),
            discovery_packets: self.discovery_packets.load(Ordering::Relaxed),
            file_transfers_completed: self.file_transfers_completed.load(Ordering::Relaxed),
            file_transfers_failed: self.file_transfers_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(serde::Serialize)]
pub struct StatisticsSnapshot {
    pub tcp_connections_accepted: u64,
    pub tcp_connections_active: u64,
    pub chat_messages: u64,
    pub stun_requests: u64,
    pub stun_dropped: u64,
    pub discovery_packets: u64,
    pub file_transfers_completed: u64,
    pub file_transfers_failed: u64,
}
