//! Packet/Connection Matcher: builds bidirectional 5-tuple keys and
//! partial-tuple keys, and resolves each packet's owning connection.
//!
//! Sorts the two endpoints into a min/max pair before building the key, so a
//! single lookup (not two) resolves a flow regardless of which direction the
//! packet happens to be traveling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::connection::ConnectionEntry;
use crate::packet::PacketRecord;

/// Build the bidirectional key for a flow. Returns `None` (no match possible)
/// on a zero port, empty protocol, or empty address.
///
/// When `remote` is `None` the key degenerates to the partial form
/// `addr:port|PROTO`, used for UDP listeners and other partial-tuple rows.
fn build_key(
    local_addr: &str,
    local_port: u16,
    remote: Option<(&str, u16)>,
    protocol: &str,
) -> Option<String> {
    if local_addr.is_empty() || local_port == 0 || protocol.is_empty() {
        return None;
    }

    let local_ep = format!("{local_addr}:{local_port}");

    match remote {
        Some((remote_addr, remote_port)) => {
            if remote_addr.is_empty() || remote_port == 0 {
                return Some(format!("{local_ep}|{protocol}"));
            }
            let remote_ep = format!("{remote_addr}:{remote_port}");
            let (a, b) = if local_ep <= remote_ep {
                (local_ep, remote_ep)
            } else {
                (remote_ep, local_ep)
            };
            Some(format!("{a}|{b}|{protocol}"))
        }
        None => Some(format!("{local_ep}|{protocol}")),
    }
}

type ConnectionMap = HashMap<String, ConnectionEntry>;

/// Owns the atomically-swapped `ConnectionMap`. A matcher lookup sees either
/// the pre-update or the post-update map, never a torn intermediate, because
/// reads clone the `Arc` under a short-held lock and release before looking
/// anything up.
pub struct ConnectionMatcher {
    map: Mutex<Arc<ConnectionMap>>,
}

impl ConnectionMatcher {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(Arc::new(HashMap::new())),
        }
    }

    /// Build a brand-new map from the current connection list and swap it in
    /// atomically. Called by the Process<->Connection Manager's sync cycle.
    pub fn update_connection_map(&self, connections: &[ConnectionEntry]) {
        let mut fresh = HashMap::with_capacity(connections.len());
        for conn in connections {
            let remote = match (conn.remote_addr.as_deref(), conn.remote_port) {
                (Some(addr), Some(port)) => Some((addr, port)),
                _ => None,
            };
            if let Some(key) = build_key(&conn.local_addr, conn.local_port, remote, conn.protocol.as_str())
            {
                fresh.insert(key, conn.clone());
            }
        }
        *self.map.lock().unwrap() = Arc::new(fresh);
    }

    /// Resolve a packet's owning connection, if any. Synthesizes the packet's
    /// key from `(srcIP, srcPort, dstIP, dstPort)` using the same bidirectional
    /// function used to build the map, so a packet flowing in either
    /// direction through the same flow resolves to one entry.
    pub fn match_packet(&self, packet: &PacketRecord) -> Option<ConnectionEntry> {
        let src_ip = packet.src_ip.as_deref()?;
        let dst_ip = packet.dst_ip.as_deref()?;
        let src_port = packet.src_port?;
        let dst_port = packet.dst_port?;

        let map = Arc::clone(&self.map.lock().unwrap());

        for protocol in protocol_candidates(&packet.protocol) {
            if let Some(key) = build_key(src_ip, src_port, Some((dst_ip, dst_port)), protocol) {
                if let Some(entry) = map.get(&key) {
                    return Some(entry.clone());
                }
            }
            // Fall back to the partial-tuple key (§4.6): a listener is stored
            // under `addr:port|PROTO` with no remote side, which a full
            // bidirectional key can never equal. Try each endpoint as the
            // local side, destination first since that's the side a listener
            // normally binds.
            for key in [
                build_key(dst_ip, dst_port, None, protocol),
                build_key(src_ip, src_port, None, protocol),
            ]
            .into_iter()
            .flatten()
            {
                if let Some(entry) = map.get(&key) {
                    return Some(entry.clone());
                }
            }
        }
        None
    }
}

impl Default for ConnectionMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// `ConnectionEntry::protocol` is family-specific (`TCP4`/`TCP6`), but a
/// packet only knows `TCP`/`UDP`. Try both families so a v4 packet can match
/// a v4 connection and a v6 packet a v6 one, without the decoder needing to
/// know about the matcher's protocol enum.
fn protocol_candidates(packet_protocol: &str) -> &'static [&'static str] {
    match packet_protocol {
        "TCP" => &["TCP4", "TCP6"],
        "UDP" => &["UDP4", "UDP6"],
        _ => &[],
    }
}
