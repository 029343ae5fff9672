//! LAN Discovery (C12, §4.12).
//!
//! UDP broadcast listener/sender with a stale-eviction peer cache.
//! Grounded in the teacher's `fork_socket`/`udp_server` receive loop
//! (`server.rs`) for the socket-handling shape, and its sweeper-thread
//! pattern (`credentials.rs::StaticCredentials::new`) for the cache
//! eviction side.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::time;

use crate::config::Config;
use crate::statistics::Statistics;

struct DiscoveryEntry {
    ip: String,
    additional_info: String,
    last_seen: Instant,
}

#[derive(Serialize)]
pub struct DiscoveredPeer {
    pub username: String,
    pub ip: String,
    pub additional_info: String,
    pub last_seen_millis: u128,
    pub stale: bool,
}

pub struct DiscoveryCache {
    peers: parking_lot::RwLock<HashMap<String, DiscoveryEntry>>,
    stale_after: Duration,
}

impl DiscoveryCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            peers: parking_lot::RwLock::new(HashMap::new()),
            stale_after,
        }
    }

    fn update(&self, username: &str, ip: String, additional_info: String) {
        self.peers.write().insert(
            username.to_string(),
            DiscoveryEntry {
                ip,
                additional_info,
                last_seen: Instant::now(),
            },
        );
    }

    /// Evicts entries whose staleness exceeds the configured horizon (run by
    /// the 30s sweeper).
    fn sweep(&self) {
        let stale_after = self.stale_after;
        self.peers.write().retain(|_, e| e.last_seen.elapsed() < stale_after);
    }

    /// Returns every cached peer, flagging (but not yet evicting) stale
    /// entries (§4.12, §8 "Stale").
    pub fn snapshot(&self) -> Vec<DiscoveredPeer> {
        self.peers
            .read()
            .iter()
            .map(|(username, entry)| DiscoveredPeer {
                username: username.clone(),
                ip: entry.ip.clone(),
                additional_info: entry.additional_info.clone(),
                last_seen_millis: entry.last_seen.elapsed().as_millis(),
                stale: entry.last_seen.elapsed() >= self.stale_after,
            })
            .collect()
    }
}

/// Starts the UDP broadcast listener and its 30s sweeper. Returns
/// immediately; both run as detached tasks until the process exits.
pub async fn run(config: Arc<Config>, cache: Arc<DiscoveryCache>, statistics: Arc<Statistics>) -> anyhow::Result<()> {
    if !config.discovery.enabled {
        log::info!("discovery disabled by configuration");
        return Ok(());
    }

    let socket = UdpSocket::bind(config.discovery.listen).await?;
    socket.set_broadcast(true)?;
    log::info!("discovery listening: addr={}", config.discovery.listen);

    {
        let cache = cache.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        });
    }

    let local_username = config.discovery.local_username.clone();
    let hostname = local_username.clone();

    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            // 500ms timeout gives cooperative shutdown checks room without a
            // separate cancellation plumbing for this fire-and-forget task.
            let received = time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await;
            let (size, addr) = match received {
                Ok(Ok(ok)) => ok,
                Ok(Err(e)) => {
                    log::warn!("discovery socket error: {e}");
                    continue;
                }
                Err(_) => continue,
            };

            statistics.discovery_packets.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let Ok(text) = std::str::from_utf8(&buf[..size]) else {
                continue;
            };

            handle_packet(text, addr, &socket, &cache, &local_username, &hostname).await;
        }
    });

    Ok(())
}

async fn handle_packet(
    text: &str,
    addr: SocketAddr,
    socket: &UdpSocket,
    cache: &DiscoveryCache,
    local_username: &str,
    hostname: &str,
) {
    let mut parts = text.splitn(3, ':');
    let (Some(kind), Some(username), info) = (parts.next(), parts.next(), parts.next().unwrap_or("")) else {
        return;
    };

    match kind {
        "NEXUS_DISCOVER" => {
            if username == local_username {
                return;
            }
            let response = format!("NEXUS_RESPONSE:{local_username}:{hostname}");
            if let Err(e) = socket.send_to(response.as_bytes(), addr).await {
                log::warn!("discovery unicast response failed: {e}");
            }
        }
        "NEXUS_RESPONSE" => {
            cache.update(username, addr.ip().to_string(), info.to_string());
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entries_are_not_flagged_stale() {
        let cache = DiscoveryCache::new(Duration::from_secs(120));
        cache.update("alice", "10.0.0.2".into(), "desktop".into());
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].stale);
    }

    #[test]
    fn sweep_evicts_only_past_horizon() {
        let cache = DiscoveryCache::new(Duration::from_millis(0));
        cache.update("alice", "10.0.0.2".into(), "desktop".into());
        std::thread::sleep(Duration::from_millis(5));
        cache.sweep();
        assert!(cache.snapshot().is_empty());
    }
}
