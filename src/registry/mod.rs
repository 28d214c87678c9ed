//! Registry Manager: aggregates enriched packets into global, per-application,
//! and per-process registries, bucketing counters by protocol, direction, and
//! interface.
//!
//! Each tier is a struct wrapping a `DashMap` for lock-free concurrent
//! per-key upserts, the same primitive used elsewhere in this tree for
//! per-PID counters.

pub mod friendly_names;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionEntry;
use crate::packet::{Direction, PacketRecord};
use crate::process_tracker::ProcessTracker;

const UNKNOWN_INTERFACE: &str = "<unknown-interface>";
static UNKNOWN_INTERFACE_WARNED: Once = Once::new();

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn percent(count: u64, total: u64) -> u8 {
    if total == 0 {
        0
    } else {
        ((count.saturating_mul(100)) / total).min(100) as u8
    }
}

/// Raw protocol/byte counters shared by all three registry tiers. All
/// counters are 64-bit; percentages are derived on snapshot, not stored here.
#[derive(Debug, Default)]
struct Counters {
    total_packets: AtomicU64,
    total_bytes_sent: AtomicU64,
    total_bytes_received: AtomicU64,
    inbound_bytes: AtomicU64,
    outbound_bytes: AtomicU64,
    ipv4_packets: AtomicU64,
    ipv6_packets: AtomicU64,
    tcp_packets: AtomicU64,
    udp_packets: AtomicU64,
}

impl Counters {
    fn record(&self, packet: &PacketRecord, direction: Direction) {
        self.total_packets.fetch_add(1, Ordering::Relaxed);
        let size = packet.captured_size;
        match direction {
            Direction::Outbound => {
                self.total_bytes_sent.fetch_add(size, Ordering::Relaxed);
                self.outbound_bytes.fetch_add(size, Ordering::Relaxed);
            }
            Direction::Inbound => {
                self.total_bytes_received.fetch_add(size, Ordering::Relaxed);
                self.inbound_bytes.fetch_add(size, Ordering::Relaxed);
            }
        }
        if packet.ipv4.is_some() {
            self.ipv4_packets.fetch_add(1, Ordering::Relaxed);
        } else if packet.ipv6.is_some() {
            self.ipv6_packets.fetch_add(1, Ordering::Relaxed);
        }
        if packet.is_tcp() {
            self.tcp_packets.fetch_add(1, Ordering::Relaxed);
        } else if packet.is_udp() {
            self.udp_packets.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot_counts(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_packets: self.total_packets.load(Ordering::Relaxed),
            total_bytes_sent: self.total_bytes_sent.load(Ordering::Relaxed),
            total_bytes_received: self.total_bytes_received.load(Ordering::Relaxed),
            inbound_bytes: self.inbound_bytes.load(Ordering::Relaxed),
            outbound_bytes: self.outbound_bytes.load(Ordering::Relaxed),
            ipv4_packets: self.ipv4_packets.load(Ordering::Relaxed),
            ipv6_packets: self.ipv6_packets.load(Ordering::Relaxed),
            tcp_packets: self.tcp_packets.load(Ordering::Relaxed),
            udp_packets: self.udp_packets.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CounterSnapshot {
    total_packets: u64,
    total_bytes_sent: u64,
    total_bytes_received: u64,
    inbound_bytes: u64,
    outbound_bytes: u64,
    ipv4_packets: u64,
    ipv6_packets: u64,
    tcp_packets: u64,
    udp_packets: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub packets: u64,
    pub bytes: u64,
}

// --- live (un-derived) registry entries -----------------------------------

struct GlobalEntry {
    counters: Counters,
    first_seen_ms: AtomicU64,
    last_seen_ms: AtomicU64,
}

impl GlobalEntry {
    fn new(now: u64) -> Self {
        Self {
            counters: Counters::default(),
            first_seen_ms: AtomicU64::new(now),
            last_seen_ms: AtomicU64::new(now),
        }
    }

    fn widen(&self, now: u64) {
        self.last_seen_ms.fetch_max(now, Ordering::Relaxed);
        // first_seen only ever narrows toward the earliest value it's seen.
        let mut current = self.first_seen_ms.load(Ordering::Relaxed);
        while now < current {
            match self.first_seen_ms.compare_exchange_weak(
                current,
                now,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

struct AppEntry {
    counters: Counters,
    app_display_name: Mutex<String>,
    process_ids: Mutex<HashSet<String>>,
    unique_remote_ips: Mutex<HashSet<String>>,
    interface_stats: DashMap<String, InterfaceStats>,
}

struct ProcEntry {
    counters: Counters,
    is_root_process: bool,
    parent_pid: Option<u32>,
    exe_path: Option<String>,
    unique_remote_ips: Mutex<HashSet<String>>,
    interface_stats: DashMap<String, InterfaceStats>,
}

use std::sync::Mutex;

// --- snapshot (derived, owned, serializable) types ------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRegistryEntry {
    pub interface: String,
    pub total_packets: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
    pub ipv4_packets: u64,
    pub ipv6_packets: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
    pub ipv4_percent: u8,
    pub ipv6_percent: u8,
    pub tcp_percent: u8,
    pub udp_percent: u8,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRegistryEntry {
    pub app_id: String,
    pub app_display_name: String,
    pub process_count: u64,
    pub process_ids: Vec<String>,
    pub unique_remote_ips: Vec<String>,
    /// Opaque pass-through: populated by a downstream domain-enrichment
    /// collaborator, never computed here (§4.8).
    pub unique_domains: Vec<String>,
    /// Opaque pass-through: populated by a downstream geolocation
    /// collaborator, never computed here (§4.8).
    pub geo_locations: HashMap<String, String>,
    pub interface_stats: HashMap<String, InterfaceStats>,
    pub total_packets: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
    pub ipv4_packets: u64,
    pub ipv6_packets: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRegistryEntry {
    pub process_key: String,
    pub pid: u32,
    pub app_id: String,
    pub is_root_process: bool,
    pub parent_pid: Option<u32>,
    pub exe_path: Option<String>,
    pub unique_remote_ips: Vec<String>,
    pub interface_stats: HashMap<String, InterfaceStats>,
    pub total_packets: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
    pub ipv4_packets: u64,
    pub ipv6_packets: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
}

/// An owned, read-only copy of the registry triple plus the current
/// connection list, stamped with an emission timestamp (§10.4). Handed to the
/// Snapshot Scheduler's sink so a caller on another thread never has to hold
/// a lock across the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub global: HashMap<String, GlobalRegistryEntry>,
    pub applications: HashMap<String, ApplicationRegistryEntry>,
    pub processes: HashMap<String, ProcessRegistryEntry>,
    pub connections: Vec<ConnectionEntry>,
    pub emitted_at_ms: u64,
}

/// Compute the app identity triple for a packet's attribution (§4.8 step 1).
/// Returns `(app_id, app_name, app_display_name)`.
fn compute_app_identity(proc_name: Option<&str>, pid: Option<u32>) -> (String, String, String) {
    let is_system = pid == Some(0)
        || matches!(proc_name, Some("SYSTEM") | Some("System"));
    if is_system {
        return ("system".into(), "System".into(), "System".into());
    }
    if proc_name == Some("UNKNOWN") || proc_name.is_none() {
        return ("unknown".into(), "Unknown".into(), "Unknown".into());
    }

    let raw = proc_name.unwrap();
    let stripped = raw.strip_suffix(".exe").unwrap_or(raw);
    let app_id = stripped.to_lowercase().trim().to_string();

    let display = friendly_names::lookup(&app_id)
        .map(str::to_string)
        .unwrap_or_else(|| friendly_names::title_case_fallback(&app_id));

    (app_id, stripped.to_string(), display)
}

/// Aggregates enriched packets into the three registries (§4.8). All work is
/// synchronous per packet, in-memory only, and must never panic: an invalid
/// field is treated as missing and bucketed under a catch-all.
pub struct RegistryManager {
    local_ips: HashSet<String>,
    process_tracker: Arc<ProcessTracker>,
    global: DashMap<String, GlobalEntry>,
    applications: DashMap<String, AppEntry>,
    processes: DashMap<String, ProcEntry>,
    pid_start_proxy: DashMap<u32, u64>,
}

impl RegistryManager {
    pub fn new(local_ips: HashSet<String>, process_tracker: Arc<ProcessTracker>) -> Self {
        Self {
            local_ips,
            process_tracker,
            global: DashMap::new(),
            applications: DashMap::new(),
            processes: DashMap::new(),
            pid_start_proxy: DashMap::new(),
        }
    }

    /// Ingest one enriched packet, mutating all three registries and
    /// decorating the packet with `appName`/`appDisplayName`/`appRegistryID`
    /// for downstream consumers (§4.8 step 6). Never panics.
    pub fn ingest(&self, packet: &mut PacketRecord) {
        let now = now_ms();
        let interface = if packet.interface.is_empty() {
            UNKNOWN_INTERFACE_WARNED.call_once(|| {
                tracing::warn!("packet with empty interface name; bucketed under {UNKNOWN_INTERFACE}");
            });
            UNKNOWN_INTERFACE.to_string()
        } else {
            packet.interface.clone()
        };

        let direction = packet.direction.unwrap_or_else(|| self.fallback_direction(packet));

        let (app_id, app_name, app_display_name) =
            compute_app_identity(packet.proc_name.as_deref(), packet.pid);

        // --- GlobalRegistry[interface] ---
        let global_entry = self
            .global
            .entry(interface.clone())
            .or_insert_with(|| GlobalEntry::new(now));
        global_entry.counters.record(packet, direction);
        global_entry.widen(now);

        // --- ApplicationRegistry[appId] ---
        let remote_ip = self.remote_ip_of(packet, direction);
        {
            let app_entry = self
                .applications
                .entry(app_id.clone())
                .or_insert_with(|| AppEntry {
                    counters: Counters::default(),
                    app_display_name: Mutex::new(app_display_name.clone()),
                    process_ids: Mutex::new(HashSet::new()),
                    unique_remote_ips: Mutex::new(HashSet::new()),
                    interface_stats: DashMap::new(),
                });
            app_entry.counters.record(packet, direction);
            if let Some(ip) = &remote_ip {
                app_entry.unique_remote_ips.lock().unwrap().insert(ip.clone());
            }
            let mut stats = app_entry.interface_stats.entry(interface.clone()).or_default();
            stats.packets += 1;
            stats.bytes += packet.captured_size;
        }

        // --- ProcessRegistry[pid-key] ---
        //
        // Every packet lands in exactly one process bucket per app, even when
        // `pid` is absent (an unattributed TCP miss, or UDP with no resolvable
        // side): pidless packets fall into app_name's own synthetic pid-0
        // bucket rather than being dropped, so §8 invariant 4 (sum over an
        // app's processes equals the app's totalPackets) always holds.
        let pid = packet.pid.unwrap_or(0);
        let process_key = self.process_key(&app_name, pid);
        {
            let proc_entry = self.processes.entry(process_key.clone()).or_insert_with(|| {
                let is_root = packet
                    .pid
                    .map(|p| self.process_tracker.find_root_ancestor(p) == p)
                    .unwrap_or(false);
                let os_entry = packet.pid.and_then(|p| self.process_tracker.get_process(p));
                ProcEntry {
                    counters: Counters::default(),
                    is_root_process: is_root,
                    parent_pid: os_entry.as_ref().and_then(|e| e.ppid),
                    exe_path: os_entry.and_then(|e| e.exe_path),
                    unique_remote_ips: Mutex::new(HashSet::new()),
                    interface_stats: DashMap::new(),
                }
            });
            proc_entry.counters.record(packet, direction);
            if let Some(ip) = &remote_ip {
                proc_entry.unique_remote_ips.lock().unwrap().insert(ip.clone());
            }
            let mut stats = proc_entry.interface_stats.entry(interface.clone()).or_default();
            stats.packets += 1;
            stats.bytes += packet.captured_size;
        }

        self.applications
            .get(&app_id)
            .unwrap()
            .process_ids
            .lock()
            .unwrap()
            .insert(process_key);

        // --- decorate the outgoing packet (§4.8 step 6) ---
        packet.app_name = Some(app_name);
        packet.app_display_name = Some(app_display_name);
        packet.app_registry_id = Some(app_id);
    }

    fn fallback_direction(&self, packet: &PacketRecord) -> Direction {
        match packet.src_ip.as_deref() {
            Some(ip) if self.local_ips.contains(ip) => Direction::Outbound,
            Some(_) => Direction::Inbound,
            None => Direction::Outbound,
        }
    }

    fn remote_ip_of(&self, packet: &PacketRecord, direction: Direction) -> Option<String> {
        match direction {
            Direction::Outbound => packet.dst_ip.clone(),
            Direction::Inbound => packet.src_ip.clone(),
        }
    }

    fn process_key(&self, app_name: &str, pid: u32) -> String {
        let start_proxy = *self
            .pid_start_proxy
            .entry(pid)
            .or_insert_with(now_ms);
        format!("{app_name}:{pid}:{start_proxy}")
    }

    pub fn get_global(&self) -> HashMap<String, GlobalRegistryEntry> {
        self.global
            .iter()
            .map(|entry| {
                let counts = entry.counters.snapshot_counts();
                (
                    entry.key().clone(),
                    GlobalRegistryEntry {
                        interface: entry.key().clone(),
                        total_packets: counts.total_packets,
                        total_bytes_sent: counts.total_bytes_sent,
                        total_bytes_received: counts.total_bytes_received,
                        inbound_bytes: counts.inbound_bytes,
                        outbound_bytes: counts.outbound_bytes,
                        ipv4_packets: counts.ipv4_packets,
                        ipv6_packets: counts.ipv6_packets,
                        tcp_packets: counts.tcp_packets,
                        udp_packets: counts.udp_packets,
                        ipv4_percent: percent(counts.ipv4_packets, counts.total_packets),
                        ipv6_percent: percent(counts.ipv6_packets, counts.total_packets),
                        tcp_percent: percent(counts.tcp_packets, counts.total_packets),
                        udp_percent: percent(counts.udp_packets, counts.total_packets),
                        first_seen_ms: entry.first_seen_ms.load(Ordering::Relaxed),
                        last_seen_ms: entry.last_seen_ms.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }

    pub fn get_applications(&self) -> HashMap<String, ApplicationRegistryEntry> {
        self.applications
            .iter()
            .map(|entry| {
                let counts = entry.counters.snapshot_counts();
                let process_ids: Vec<String> =
                    entry.process_ids.lock().unwrap().iter().cloned().collect();
                let interface_stats = entry
                    .interface_stats
                    .iter()
                    .map(|s| (s.key().clone(), *s.value()))
                    .collect();
                (
                    entry.key().clone(),
                    ApplicationRegistryEntry {
                        app_id: entry.key().clone(),
                        app_display_name: entry.app_display_name.lock().unwrap().clone(),
                        process_count: process_ids.len() as u64,
                        process_ids,
                        unique_remote_ips: entry
                            .unique_remote_ips
                            .lock()
                            .unwrap()
                            .iter()
                            .cloned()
                            .collect(),
                        unique_domains: Vec::new(),
                        geo_locations: HashMap::new(),
                        interface_stats,
                        total_packets: counts.total_packets,
                        total_bytes_sent: counts.total_bytes_sent,
                        total_bytes_received: counts.total_bytes_received,
                        inbound_bytes: counts.inbound_bytes,
                        outbound_bytes: counts.outbound_bytes,
                        ipv4_packets: counts.ipv4_packets,
                        ipv6_packets: counts.ipv6_packets,
                        tcp_packets: counts.tcp_packets,
                        udp_packets: counts.udp_packets,
                    },
                )
            })
            .collect()
    }

    pub fn get_processes(&self) -> HashMap<String, ProcessRegistryEntry> {
        self.processes
            .iter()
            .map(|entry| {
                let counts = entry.counters.snapshot_counts();
                let interface_stats = entry
                    .interface_stats
                    .iter()
                    .map(|s| (s.key().clone(), *s.value()))
                    .collect();
                // process_key is "appName:pid:startProxy"; pid is the middle segment.
                let pid = entry
                    .key()
                    .split(':')
                    .nth(1)
                    .and_then(|s| s.parse::<u32>().ok())
                    .unwrap_or(0);
                let app_id = entry.key().split(':').next().unwrap_or_default().to_string();
                (
                    entry.key().clone(),
                    ProcessRegistryEntry {
                        process_key: entry.key().clone(),
                        pid,
                        app_id,
                        is_root_process: entry.is_root_process,
                        parent_pid: entry.parent_pid,
                        exe_path: entry.exe_path.clone(),
                        unique_remote_ips: entry
                            .unique_remote_ips
                            .lock()
                            .unwrap()
                            .iter()
                            .cloned()
                            .collect(),
                        interface_stats,
                        total_packets: counts.total_packets,
                        total_bytes_sent: counts.total_bytes_sent,
                        total_bytes_received: counts.total_bytes_received,
                        inbound_bytes: counts.inbound_bytes,
                        outbound_bytes: counts.outbound_bytes,
                        ipv4_packets: counts.ipv4_packets,
                        ipv6_packets: counts.ipv6_packets,
                        tcp_packets: counts.tcp_packets,
                        udp_packets: counts.udp_packets,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::EthernetHeader;

    fn packet(
        interface: &str,
        src_ip: &str,
        dst_ip: &str,
        size: u64,
        pid: Option<u32>,
        proc_name: Option<&str>,
        is_tcp: bool,
    ) -> PacketRecord {
        PacketRecord {
            timestamp_ms: now_ms(),
            captured_size: size,
            interface: interface.into(),
            ethernet: EthernetHeader {
                src_mac: "00:00:00:00:00:00".into(),
                dst_mac: "00:00:00:00:00:00".into(),
                ether_type: "Ipv4".into(),
            },
            ipv4: Some(crate::packet::Ipv4Header {
                src_addr: src_ip.into(),
                dst_addr: dst_ip.into(),
                ttl: 64,
                protocol: if is_tcp { 6 } else { 17 },
                total_length: size as u16,
                header_len_bytes: 20,
            }),
            ipv6: None,
            tcp: if is_tcp {
                Some(crate::packet::TcpHeader {
                    src_port: 1,
                    dst_port: 2,
                    seq: 0,
                    ack: 0,
                    flags: 0,
                })
            } else {
                None
            },
            udp: if is_tcp {
                None
            } else {
                Some(crate::packet::UdpHeader {
                    src_port: 1,
                    dst_port: 2,
                    length: 8,
                })
            },
            icmp: None,
            src_ip: Some(src_ip.into()),
            dst_ip: Some(dst_ip.into()),
            src_port: Some(1),
            dst_port: Some(2),
            protocol: if is_tcp { "TCP".into() } else { "UDP".into() },
            direction: None,
            pid,
            proc_name: proc_name.map(String::from),
            app_name: None,
            app_display_name: None,
            app_registry_id: None,
        }
    }

    fn manager(local_ips: &[&str]) -> RegistryManager {
        RegistryManager::new(
            local_ips.iter().map(|s| s.to_string()).collect(),
            Arc::new(ProcessTracker::new()),
        )
    }

    #[test]
    fn test_s1_tcp_attribution_sets_app_fields_and_global_counters() {
        let mgr = manager(&["192.168.1.10"]);
        let mut pkt = packet(
            "eth0",
            "1.1.1.1",
            "192.168.1.10",
            1500,
            Some(4242),
            Some("firefox"),
            true,
        );
        mgr.ingest(&mut pkt);

        assert_eq!(pkt.app_name.as_deref(), Some("firefox"));
        assert_eq!(pkt.app_display_name.as_deref(), Some("Mozilla Firefox"));

        let global = mgr.get_global();
        let eth0 = &global["eth0"];
        assert_eq!(eth0.total_packets, 1);
        assert_eq!(eth0.inbound_bytes, 1500);
    }

    #[test]
    fn test_invariant_direction_bytes_equal_sent_received_sum() {
        let mgr = manager(&["10.0.0.1"]);
        let mut out_pkt = packet("eth0", "10.0.0.1", "2.2.2.2", 100, Some(1), Some("a"), true);
        let mut in_pkt = packet("eth0", "2.2.2.2", "10.0.0.1", 200, Some(1), Some("a"), true);
        mgr.ingest(&mut out_pkt);
        mgr.ingest(&mut in_pkt);

        let eth0 = &mgr.get_global()["eth0"];
        assert_eq!(
            eth0.inbound_bytes + eth0.outbound_bytes,
            eth0.total_bytes_sent + eth0.total_bytes_received
        );
    }

    #[test]
    fn test_invariant_protocol_buckets_partition_total() {
        let mgr = manager(&["10.0.0.1"]);
        for _ in 0..5 {
            mgr.ingest(&mut packet("eth0", "10.0.0.1", "2.2.2.2", 1, Some(1), Some("a"), true));
        }
        for _ in 0..3 {
            mgr.ingest(&mut packet("eth0", "10.0.0.1", "2.2.2.2", 1, Some(1), Some("a"), false));
        }
        let eth0 = &mgr.get_global()["eth0"];
        assert_eq!(eth0.ipv4_packets + eth0.ipv6_packets, eth0.total_packets);
        assert!(eth0.tcp_packets + eth0.udp_packets <= eth0.total_packets);
    }

    #[test]
    fn test_s3_registry_aggregation_across_interfaces() {
        let mgr = manager(&["10.0.0.1"]);
        for _ in 0..7 {
            mgr.ingest(&mut packet("eth0", "10.0.0.1", "2.2.2.2", 1000, Some(1000), Some("chrome"), true));
        }
        for _ in 0..3 {
            mgr.ingest(&mut packet("wlan0", "10.0.0.1", "2.2.2.2", 500, Some(1000), Some("chrome"), true));
        }

        let apps = mgr.get_applications();
        let chrome = &apps["chrome"];
        assert_eq!(chrome.total_packets, 10);
        assert_eq!(
            chrome.total_bytes_sent + chrome.total_bytes_received,
            7000 + 1500
        );
        assert_eq!(chrome.interface_stats["eth0"].packets, 7);
        assert_eq!(chrome.interface_stats["eth0"].bytes, 7000);

        let processes = mgr.get_processes();
        let proc_entry = processes.values().find(|p| p.pid == 1000).unwrap();
        assert_eq!(proc_entry.total_packets, 10);
    }

    #[test]
    fn test_invariant_app_totals_equal_sum_of_its_processes() {
        let mgr = manager(&["10.0.0.1"]);
        mgr.ingest(&mut packet("eth0", "10.0.0.1", "2.2.2.2", 10, Some(1), Some("chrome"), true));
        mgr.ingest(&mut packet("eth0", "10.0.0.1", "3.3.3.3", 20, Some(2), Some("chrome"), true));

        let apps = mgr.get_applications();
        let processes = mgr.get_processes();
        let chrome = &apps["chrome"];
        let sum: u64 = processes
            .values()
            .filter(|p| chrome.process_ids.contains(&p.process_key))
            .map(|p| p.total_packets)
            .sum();
        assert_eq!(sum, chrome.total_packets);
    }

    #[test]
    fn test_invariant_app_totals_equal_sum_of_processes_with_pidless_packets() {
        // Unattributed packets (pid == None, proc_name == "UNKNOWN") must still
        // land in a process bucket under the "unknown" app, or the app's
        // totalPackets would outrun the sum of its processes.
        let mgr = manager(&["10.0.0.1"]);
        mgr.ingest(&mut packet("eth0", "10.0.0.1", "2.2.2.2", 10, None, Some("UNKNOWN"), true));
        mgr.ingest(&mut packet("eth0", "10.0.0.1", "3.3.3.3", 20, None, Some("UNKNOWN"), false));

        let apps = mgr.get_applications();
        let processes = mgr.get_processes();
        let unknown = &apps["unknown"];
        let sum: u64 = processes
            .values()
            .filter(|p| unknown.process_ids.contains(&p.process_key))
            .map(|p| p.total_packets)
            .sum();
        assert_eq!(sum, unknown.total_packets);
        assert_eq!(unknown.total_packets, 2);
    }

    #[test]
    fn test_system_and_unknown_app_identity_buckets() {
        assert_eq!(
            compute_app_identity(Some("SYSTEM"), Some(1)).0,
            "system"
        );
        assert_eq!(compute_app_identity(Some("UNKNOWN"), Some(1)).0, "unknown");
        assert_eq!(compute_app_identity(None, Some(1)).0, "unknown");
        assert_eq!(compute_app_identity(Some("anything"), Some(0)).0, "system");
    }

    #[test]
    fn test_app_identity_strips_exe_suffix_and_lowercases() {
        let (id, name, _display) = compute_app_identity(Some("Chrome.exe"), Some(1));
        assert_eq!(id, "chrome");
        assert_eq!(name, "Chrome");
    }

    #[test]
    fn test_title_case_fallback_used_for_unknown_friendly_name() {
        let (_, _, display) = compute_app_identity(Some("my-cool-daemon"), Some(1));
        assert_eq!(display, "My Cool Daemon");
    }

    #[test]
    fn test_empty_interface_bucketed_under_unknown_interface() {
        let mgr = manager(&["10.0.0.1"]);
        let mut pkt = packet("", "10.0.0.1", "2.2.2.2", 10, Some(1), Some("a"), true);
        mgr.ingest(&mut pkt);
        assert!(mgr.get_global().contains_key("<unknown-interface>"));
    }
}
