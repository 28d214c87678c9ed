//! Process/Connection Manager: orchestrates enrichment — enqueues decoded
//! packets, attaches `pid`/`procName` using the matcher and the UDP
//! side-tables, and exposes enriched packets to the Registry Manager.
//!
//! A manager struct holding `Arc`s to its collaborators, in the same shape
//! used elsewhere in this tree, with a local-side-preferring UDP port lookup
//! for flows that never appear in the TCP connection table.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::connection::ConnectionTracker;
use crate::matcher::ConnectionMatcher;
use crate::packet::{Direction, PacketRecord};
use crate::process_tracker::ProcessTracker;

const UNKNOWN: &str = "UNKNOWN";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Orchestrates packet enrichment. Holds the set of normalized local IPs (used
/// for direction and UDP-side resolution), the outbound packet queue, and
/// references to the matcher, connection tracker, and process tracker.
pub struct ProcConManager {
    local_ips: HashSet<String>,
    queue: Mutex<VecDeque<PacketRecord>>,
    matcher: Arc<ConnectionMatcher>,
    connection_tracker: Arc<ConnectionTracker>,
    process_tracker: Arc<ProcessTracker>,
}

impl ProcConManager {
    pub fn new(
        local_ips: HashSet<String>,
        matcher: Arc<ConnectionMatcher>,
        connection_tracker: Arc<ConnectionTracker>,
        process_tracker: Arc<ProcessTracker>,
    ) -> Self {
        Self {
            local_ips,
            queue: Mutex::new(VecDeque::new()),
            matcher,
            connection_tracker,
            process_tracker,
        }
    }

    /// Called on a 1s timer by the Analyzer Runner: refreshes process names
    /// on the current connection list and republishes the matcher's map.
    pub fn sync_connection_info(&self) {
        let mut connections = self.connection_tracker.get_connections();

        for conn in connections.iter_mut() {
            let Some(pid) = conn.pid else { continue };
            let name = self
                .process_tracker
                .get_process_name(pid)
                .unwrap_or_else(|| UNKNOWN.to_string());
            conn.proc_name = name.clone();
            // Back-fill into the tracker's own caches where still missing.
            self.connection_tracker.backfill_proc_name(pid, &name);
        }

        self.matcher.update_connection_map(&connections);
    }

    /// Attributes the packet (TCP/ICMP via the matcher,
    /// UDP via the local-side-preferring port lookup) and computes its
    /// direction, then pushes it onto the outbound queue. UDP packets are
    /// always enqueued, even unattributed — losing them would understate
    /// traffic, since many legitimate UDP flows never appear in the socket
    /// table.
    pub fn enqueue_packet(&self, mut packet: PacketRecord) {
        packet.direction = Some(self.compute_direction(&packet));

        if packet.is_udp() {
            self.attribute_udp(&mut packet);
        } else {
            self.attribute_via_matcher(&mut packet);
        }

        self.queue.lock().unwrap().push_back(packet);
    }

    fn compute_direction(&self, packet: &PacketRecord) -> Direction {
        match packet.src_ip.as_deref() {
            Some(src) if self.local_ips.contains(src) => Direction::Outbound,
            Some(_) => Direction::Inbound,
            // No source address: default to outbound rather than guess.
            None => Direction::Outbound,
        }
    }

    fn attribute_via_matcher(&self, packet: &mut PacketRecord) {
        match self.matcher.match_packet(packet) {
            Some(conn) => {
                packet.pid = conn.pid;
                packet.proc_name = Some(if conn.proc_name.is_empty() {
                    UNKNOWN.to_string()
                } else {
                    conn.proc_name
                });
            }
            None => {
                packet.proc_name = Some(UNKNOWN.to_string());
            }
        }
    }

    /// UDP-specific side resolution, preferring the local side of the flow.
    fn attribute_udp(&self, packet: &mut PacketRecord) {
        let (Some(src_ip), Some(dst_ip), Some(src_port), Some(dst_port)) =
            (packet.src_ip.clone(), packet.dst_ip.clone(), packet.src_port, packet.dst_port)
        else {
            packet.proc_name = Some(UNKNOWN.to_string());
            return;
        };

        let src_is_local = self.local_ips.contains(&src_ip);
        let dst_is_local = self.local_ips.contains(&dst_ip);

        let lookup = if dst_is_local {
            Some((dst_ip.as_str(), dst_port))
        } else if src_is_local {
            Some((src_ip.as_str(), src_port))
        } else {
            None
        };

        let mapping = lookup.and_then(|(addr, port)| self.connection_tracker.get_udp_mapping(addr, port));

        match mapping {
            Some(mapping) => {
                let proc_name = if mapping.proc_name.is_empty() {
                    mapping
                        .pid
                        .and_then(|pid| self.process_tracker.get_process_name(pid))
                        .unwrap_or_else(|| UNKNOWN.to_string())
                } else {
                    mapping.proc_name.clone()
                };

                let key = format!("{}:{}", mapping.local_addr, mapping.local_port);
                self.connection_tracker.touch_udp_mapping(&key);
                if mapping.is_listener {
                    self.connection_tracker
                        .touch_udp_mapping(&format!(":{}", mapping.local_port));
                }

                packet.pid = mapping.pid;
                packet.proc_name = Some(proc_name);
            }
            None => {
                packet.proc_name = Some(UNKNOWN.to_string());
            }
        }
    }

    /// Atomic swap with an empty queue; returned records are caller-owned.
    pub fn flush_queue(&self) -> Vec<PacketRecord> {
        std::mem::take(&mut *self.queue.lock().unwrap()).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnProtocol, ConnState, ConnectionEntry};
    use crate::packet::EthernetHeader;

    fn packet(src_ip: &str, src_port: u16, dst_ip: &str, dst_port: u16, is_udp: bool) -> PacketRecord {
        PacketRecord {
            timestamp_ms: now_ms(),
            captured_size: 1500,
            interface: "eth0".into(),
            ethernet: EthernetHeader {
                src_mac: "00:00:00:00:00:00".into(),
                dst_mac: "00:00:00:00:00:00".into(),
                ether_type: "Ipv4".into(),
            },
            ipv4: None,
            ipv6: None,
            tcp: if is_udp {
                None
            } else {
                Some(crate::packet::TcpHeader {
                    src_port,
                    dst_port,
                    seq: 0,
                    ack: 0,
                    flags: 0,
                })
            },
            udp: if is_udp {
                Some(crate::packet::UdpHeader {
                    src_port,
                    dst_port,
                    length: 8,
                })
            } else {
                None
            },
            icmp: None,
            src_ip: Some(src_ip.into()),
            dst_ip: Some(dst_ip.into()),
            src_port: Some(src_port),
            dst_port: Some(dst_port),
            protocol: if is_udp { "UDP".into() } else { "TCP".into() },
            direction: None,
            pid: None,
            proc_name: None,
            app_name: None,
            app_display_name: None,
            app_registry_id: None,
        }
    }

    fn manager_with_locals(local_ips: &[&str]) -> ProcConManager {
        ProcConManager::new(
            local_ips.iter().map(|s| s.to_string()).collect(),
            Arc::new(ConnectionMatcher::new()),
            Arc::new(ConnectionTracker::new()),
            Arc::new(ProcessTracker::new()),
        )
    }

    #[test]
    fn test_s1_tcp_packet_matched_via_connection_tracker() {
        let manager = manager_with_locals(&["192.168.1.10"]);
        manager.connection_tracker.apply_rows_for_test(vec![
            crate::connection::test_support::tcp_row(
                "192.168.1.10",
                54321,
                "1.1.1.1",
                443,
                4242,
            ),
        ]);
        manager.sync_connection_info();

        let pkt = packet("1.1.1.1", 443, "192.168.1.10", 54321, false);
        manager.enqueue_packet(pkt);

        let flushed = manager.flush_queue();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].pid, Some(4242));
        assert_eq!(flushed[0].direction, Some(Direction::Inbound));
    }

    #[test]
    fn test_unmatched_tcp_packet_is_unknown_but_still_enqueued() {
        let manager = manager_with_locals(&["192.168.1.10"]);
        let pkt = packet("9.9.9.9", 1, "192.168.1.10", 2, false);
        manager.enqueue_packet(pkt);
        let flushed = manager.flush_queue();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].proc_name.as_deref(), Some("UNKNOWN"));
    }

    #[test]
    fn test_unmatched_udp_packet_is_still_enqueued() {
        let manager = manager_with_locals(&["192.168.1.10"]);
        let pkt = packet("192.168.1.10", 55000, "8.8.8.8", 53, true);
        manager.enqueue_packet(pkt);
        let flushed = manager.flush_queue();
        assert_eq!(flushed.len(), 1, "unattributed UDP must still be recorded");
        assert_eq!(flushed[0].proc_name.as_deref(), Some("UNKNOWN"));
    }

    #[test]
    fn test_flush_queue_drains_and_resets() {
        let manager = manager_with_locals(&["10.0.0.1"]);
        manager.enqueue_packet(packet("10.0.0.1", 1, "2.2.2.2", 2, false));
        assert_eq!(manager.flush_queue().len(), 1);
        assert_eq!(manager.flush_queue().len(), 0);
    }

    #[test]
    fn test_direction_outbound_when_src_is_local() {
        let manager = manager_with_locals(&["10.0.0.1"]);
        let pkt = packet("10.0.0.1", 1, "2.2.2.2", 2, false);
        manager.enqueue_packet(pkt);
        let flushed = manager.flush_queue();
        assert_eq!(flushed[0].direction, Some(Direction::Outbound));
    }
}
