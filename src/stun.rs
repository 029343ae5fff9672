//! Minimal STUN responder (C11, §4.11): RFC 5389 Binding Request →
//! Binding Response with a XOR-MAPPED-ADDRESS attribute, nothing else.
//!
//! Grounded in the teacher's `udp_server` receive loop (`server.rs`) —
//! receive on a dedicated task, hand the datagram to a spawned task so the
//! send half never blocks the next receive.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::config::Config;
use crate::statistics::Statistics;

const MAGIC_COOKIE: u32 = 0x2112_A442;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE: u16 = 0x0101;
const XOR_MAPPED_ADDRESS: u16 = 0x0020;
const HEADER_LEN: usize = 20;

/// Starts the STUN listener as a detached task. Returns immediately.
pub async fn run(config: Arc<Config>, statistics: Arc<Statistics>) -> anyhow::Result<()> {
    if !config.stun.enabled {
        log::info!("stun disabled by configuration");
        return Ok(());
    }

    let socket = Arc::new(UdpSocket::bind(config.stun.listen).await?);
    log::info!("stun listening: addr={}", config.stun.listen);

    tokio::spawn(async move {
        let mut buf = [0u8; 576];
        loop {
            let (size, peer) = match socket.recv_from(&mut buf).await {
                Ok(ok) => ok,
                Err(e) => {
                    log::warn!("stun socket error: {e}");
                    continue;
                }
            };
            statistics.stun_requests.fetch_add(1, Ordering::Relaxed);

            let Some(response) = build_binding_response(&buf[..size], peer) else {
                statistics.stun_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            // Hand the send off to a worker task so the next recv isn't
            // blocked behind it (§4.11, §5 "dispatched to a worker pool").
            let socket = socket.clone();
            tokio::spawn(async move {
                if let Err(e) = socket.send_to(&response, peer).await {
                    log::debug!("stun response to {peer} failed: {e}");
                }
            });
        }
    });

    Ok(())
}

/// Builds a Binding Response for `packet`, or `None` if it isn't a
/// well-formed Binding Request over IPv4 and should be dropped silently.
fn build_binding_response(packet: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
    if packet.len() < HEADER_LEN {
        return None;
    }

    let msg_type = u16::from_be_bytes([packet[0], packet[1]]);
    let magic = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
    if msg_type != BINDING_REQUEST || magic != MAGIC_COOKIE {
        return None;
    }

    let IpAddr::V4(ipv4) = peer.ip() else {
        return None;
    };
    let txid = &packet[8..20];

    let mut attribute = Vec::with_capacity(12);
    attribute.extend_from_slice(&XOR_MAPPED_ADDRESS.to_be_bytes());
    attribute.extend_from_slice(&8u16.to_be_bytes());
    attribute.push(0); // reserved
    attribute.push(0x01); // family: IPv4

    let xor_port = peer.port() ^ ((MAGIC_COOKIE >> 16) as u16);
    attribute.extend_from_slice(&xor_port.to_be_bytes());

    let magic_bytes = MAGIC_COOKIE.to_be_bytes();
    for (i, octet) in ipv4.octets().iter().enumerate() {
        attribute.push(octet ^ magic_bytes[i]);
    }

    let mut response = Vec::with_capacity(HEADER_LEN + attribute.len());
    response.extend_from_slice(&BINDING_RESPONSE.to_be_bytes());
    response.extend_from_slice(&(attribute.len() as u16).to_be_bytes());
    response.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    response.extend_from_slice(txid);
    response.extend_from_slice(&attribute);
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding_request(txid: &[u8; 12]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(20);
        packet.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
        packet.extend_from_slice(&0u16.to_be_bytes());
        packet.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        packet.extend_from_slice(txid);
        packet
    }

    #[test]
    fn short_packets_are_dropped() {
        assert!(build_binding_response(&[0u8; 10], "127.0.0.1:1234".parse().unwrap()).is_none());
    }

    #[test]
    fn non_binding_requests_are_dropped() {
        let mut packet = binding_request(&[0u8; 12]);
        packet[1] = 0x02; // corrupt the message type
        assert!(build_binding_response(&packet, "127.0.0.1:1234".parse().unwrap()).is_none());
    }

    #[test]
    fn binding_request_round_trips_address_and_port() {
        let txid = [7u8; 12];
        let packet = binding_request(&txid);
        let peer: SocketAddr = "203.0.113.5:54321".parse().unwrap();
        let response = build_binding_response(&packet, peer).expect("should respond");

        assert_eq!(u16::from_be_bytes([response[0], response[1]]), BINDING_RESPONSE);
        assert_eq!(&response[8..20], &txid);

        let xor_port = u16::from_be_bytes([response[24], response[25]]);
        let recovered_port = xor_port ^ ((MAGIC_COOKIE >> 16) as u16);
        assert_eq!(recovered_port, peer.port());

        let magic_bytes = MAGIC_COOKIE.to_be_bytes();
        let recovered_ip = Ipv4Addr::new(
            response[26] ^ magic_bytes[0],
            response[27] ^ magic_bytes[1],
            response[28] ^ magic_bytes[2],
            response[29] ^ magic_bytes[3],
        );
        assert_eq!(IpAddr::V4(recovered_ip), peer.ip());
    }
}
