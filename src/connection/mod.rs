//! Connection Tracker: periodically enumerates OS socket tables and maintains
//! a TCP connection map plus a UDP port-mapping map with staleness eviction.
//!
//! Platform enumeration lives in `linux.rs` / `windows.rs` / `macos.rs`; this
//! module owns the shared types, the persistent UDP map, the atomic-swap TCP
//! map, and the serialized-refresh rule.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::address::normalize_ipv6;
use crate::config::{SOCKET_ENUMERATION_TIMEOUT_SECS, UDP_MAPPING_STALE_SECS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnProtocol {
    Tcp4,
    Tcp6,
    Udp4,
    Udp6,
}

impl ConnProtocol {
    pub fn is_udp(self) -> bool {
        matches!(self, ConnProtocol::Udp4 | ConnProtocol::Udp6)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnProtocol::Tcp4 => "TCP4",
            ConnProtocol::Tcp6 => "TCP6",
            ConnProtocol::Udp4 => "UDP4",
            ConnProtocol::Udp6 => "UDP6",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnState {
    Established,
    Listening,
    CloseWait,
    FinWait1,
    FinWait2,
    Closing,
    LastAck,
    /// Any TCP state not in the set above (SynSent, SynRecv, TimeWait, Closed),
    /// or a generic placeholder for states the matcher does not special-case.
    Other,
}

/// A row from the OS socket table, normalized and typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub protocol: ConnProtocol,
    pub local_addr: String,
    pub local_port: u16,
    pub remote_addr: Option<String>,
    pub remote_port: Option<u16>,
    pub state: ConnState,
    pub pid: Option<u32>,
    pub proc_name: String,
}

/// A raw socket-table row as produced by a platform backend, before
/// loopback/missing-port/missing-pid filtering is applied.
pub(crate) struct RawSocketRow {
    pub protocol: ConnProtocol,
    pub local_addr: String,
    pub local_port: u16,
    pub remote_addr: Option<String>,
    pub remote_port: Option<u16>,
    pub state: ConnState,
    pub pid: Option<u32>,
}

/// A UDP local-port-to-process mapping, kept alive across gaps in traffic
/// until it goes stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpPortMapping {
    pub local_addr: String,
    pub local_port: u16,
    pub pid: Option<u32>,
    pub proc_name: String,
    pub last_seen_ms: u64,
    pub is_listener: bool,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn is_loopback(addr: &str) -> bool {
    if let Some(rest) = addr.strip_prefix("127.") {
        return rest.split('.').count() == 3;
    }
    addr == "0000:0000:0000:0000:0000:0000:0000:0001" || addr == "::1"
}

/// Periodically enumerates the OS socket table (300 ms default) and
/// exposes the TCP connection list/index and the persistent UDP map.
pub struct ConnectionTracker {
    tcp_connections: Mutex<Arc<Vec<ConnectionEntry>>>,
    tcp_index: Mutex<Arc<HashMap<String, ConnectionEntry>>>,
    udp_map: DashMap<String, UdpPortMapping>,
    refreshing: AtomicBool,
    running: AtomicBool,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            tcp_connections: Mutex::new(Arc::new(Vec::new())),
            tcp_index: Mutex::new(Arc::new(HashMap::new())),
            udp_map: DashMap::new(),
            refreshing: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Run one enumeration pass. Skipped (no-op) if a previous call is still
    /// in flight — refreshes are never allowed to overlap. If the
    /// enumeration itself exceeds `SOCKET_ENUMERATION_TIMEOUT_SECS` (§5), the
    /// cycle is abandoned and the next tick runs against the previous
    /// snapshot rather than blocking this thread.
    pub fn poll_once(&self) {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            tracing::debug!("connection poll skipped: previous refresh still in flight");
            return;
        }

        match run_with_timeout(
            enumerate_sockets,
            Duration::from_secs(SOCKET_ENUMERATION_TIMEOUT_SECS),
        ) {
            Some(rows) => self.apply_rows(rows),
            None => tracing::warn!(
                "connection poll abandoned: enumeration exceeded {}s, keeping previous snapshot",
                SOCKET_ENUMERATION_TIMEOUT_SECS
            ),
        }

        self.refreshing.store(false, Ordering::SeqCst);
    }

    fn apply_rows(&self, rows: Vec<RawSocketRow>) {
        let mut tcp_list = Vec::new();
        let mut tcp_index = HashMap::new();
        let mut fresh_udp: Vec<UdpPortMapping> = Vec::new();
        let now = now_ms();

        for row in rows {
            let local_addr = normalize_address(&row.local_addr);
            let remote_addr = row.remote_addr.as_deref().map(normalize_address);

            if row.local_port == 0 || row.pid.is_none() {
                continue;
            }
            let remote_is_loopback = remote_addr.as_deref().map(is_loopback).unwrap_or(false);
            if is_loopback(&local_addr) && (remote_addr.is_none() || remote_is_loopback) {
                continue;
            }

            if row.protocol.is_udp() {
                let is_listener = remote_addr.is_none()
                    || remote_addr.as_deref() == Some("0.0.0.0")
                    || row.remote_port == Some(0);
                fresh_udp.push(UdpPortMapping {
                    local_addr: local_addr.clone(),
                    local_port: row.local_port,
                    pid: row.pid,
                    proc_name: String::new(),
                    last_seen_ms: now,
                    is_listener,
                });
            } else {
                let key = format!("{}:{}", local_addr, row.local_port);
                let entry = ConnectionEntry {
                    protocol: row.protocol,
                    local_addr,
                    local_port: row.local_port,
                    remote_addr,
                    remote_port: row.remote_port,
                    state: row.state,
                    pid: row.pid,
                    proc_name: String::new(),
                };
                tcp_index.insert(key, entry.clone());
                tcp_list.push(entry);
            }
        }

        // Evict stale non-listener UDP entries before splicing in fresh ones.
        self.udp_map
            .retain(|_, v| v.is_listener || now.saturating_sub(v.last_seen_ms) <= UDP_MAPPING_STALE_SECS * 1000);

        for mapping in fresh_udp {
            let specific_key = format!("{}:{}", mapping.local_addr, mapping.local_port);
            if mapping.is_listener {
                let wildcard_key = format!(":{}", mapping.local_port);
                self.udp_map.insert(wildcard_key, mapping.clone());
            }
            self.udp_map.insert(specific_key, mapping);
        }

        *self.tcp_connections.lock().unwrap() = Arc::new(tcp_list);
        *self.tcp_index.lock().unwrap() = Arc::new(tcp_index);
    }

    pub fn get_connections(&self) -> Vec<ConnectionEntry> {
        self.tcp_connections.lock().unwrap().as_ref().clone()
    }

    pub fn get_tcp_connections(&self) -> Arc<Vec<ConnectionEntry>> {
        Arc::clone(&self.tcp_connections.lock().unwrap())
    }

    pub fn get_udp_map(&self) -> Vec<UdpPortMapping> {
        self.udp_map.iter().map(|e| e.value().clone()).collect()
    }

    /// Tries `addr:port`, then falls back to the wildcard `:port` entry if
    /// that entry is itself a listener mapping.
    pub fn get_udp_mapping(&self, addr: &str, port: u16) -> Option<UdpPortMapping> {
        let specific_key = format!("{addr}:{port}");
        if let Some(entry) = self.udp_map.get(&specific_key) {
            return Some(entry.clone());
        }
        let wildcard_key = format!(":{port}");
        self.udp_map
            .get(&wildcard_key)
            .filter(|e| e.is_listener)
            .map(|e| e.clone())
    }

    /// Back-fill `proc_name` into the TCP and UDP caches, and touch
    /// `last_seen` on a UDP mapping hit. Called by the process/connection
    /// manager's periodic sync and by its per-packet UDP-side resolution.
    pub fn backfill_proc_name(&self, pid: u32, proc_name: &str) {
        {
            let current = self.tcp_connections.lock().unwrap();
            let mut updated: Vec<ConnectionEntry> = current.as_ref().clone();
            let mut changed = false;
            for entry in updated.iter_mut() {
                if entry.pid == Some(pid) && entry.proc_name.is_empty() {
                    entry.proc_name = proc_name.to_string();
                    changed = true;
                }
            }
            if changed {
                drop(current);
                let mut index = HashMap::new();
                for e in &updated {
                    index.insert(format!("{}:{}", e.local_addr, e.local_port), e.clone());
                }
                *self.tcp_connections.lock().unwrap() = Arc::new(updated);
                *self.tcp_index.lock().unwrap() = Arc::new(index);
            }
        }

        for mut entry in self.udp_map.iter_mut() {
            if entry.pid == Some(pid) && entry.proc_name.is_empty() {
                entry.proc_name = proc_name.to_string();
            }
        }
    }

    pub fn touch_udp_mapping(&self, key: &str) {
        if let Some(mut entry) = self.udp_map.get_mut(key) {
            entry.last_seen_ms = now_ms();
        }
    }

    pub fn start_polling(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let tracker = Arc::clone(self);
        std::thread::Builder::new()
            .name("connection-tracker".into())
            .spawn(move || {
                while tracker.running.load(Ordering::SeqCst) {
                    tracker.poll_once();
                    std::thread::sleep(std::time::Duration::from_millis(
                        crate::config::CONNECTION_POLL_INTERVAL_MS,
                    ));
                }
            })
            .expect("failed to spawn connection-tracker thread");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl ConnectionTracker {
    /// Test-only entry point for collaborators (e.g. `procon.rs`) that need to
    /// seed a tracker with synthetic socket rows without going through a real
    /// OS enumeration.
    pub fn apply_rows_for_test(&self, rows: Vec<RawSocketRow>) {
        self.apply_rows(rows);
    }
}

/// Synthetic `RawSocketRow` builders shared by other modules' tests.
#[cfg(test)]
pub mod test_support {
    use super::{ConnProtocol, ConnState, RawSocketRow};

    pub fn tcp_row(
        local_addr: &str,
        local_port: u16,
        remote_addr: &str,
        remote_port: u16,
        pid: u32,
    ) -> RawSocketRow {
        RawSocketRow {
            protocol: ConnProtocol::Tcp4,
            local_addr: local_addr.to_string(),
            local_port,
            remote_addr: Some(remote_addr.to_string()),
            remote_port: Some(remote_port),
            state: ConnState::Established,
            pid: Some(pid),
        }
    }
}

fn normalize_address(addr: &str) -> String {
    normalize_ipv6(addr)
}

#[cfg(target_os = "linux")]
fn enumerate_sockets() -> Vec<RawSocketRow> {
    linux::enumerate()
}

#[cfg(target_os = "windows")]
fn enumerate_sockets() -> Vec<RawSocketRow> {
    windows::enumerate()
}

#[cfg(target_os = "macos")]
fn enumerate_sockets() -> Vec<RawSocketRow> {
    macos::enumerate()
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
fn enumerate_sockets() -> Vec<RawSocketRow> {
    Vec::new()
}

/// Run `f` on a dedicated thread and wait up to `timeout`. Returns `None` if
/// the bound is exceeded, in which case `f`'s thread is left to finish on its
/// own and its result is discarded — the caller abandons this cycle and
/// keeps its previous snapshot rather than blocking on a slow enumeration.
fn run_with_timeout<F>(f: F, timeout: Duration) -> Option<Vec<RawSocketRow>>
where
    F: FnOnce() -> Vec<RawSocketRow> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("connection-enumerate".into())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .expect("failed to spawn connection-enumerate thread");

    rx.recv_timeout(timeout).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        protocol: ConnProtocol,
        local_addr: &str,
        local_port: u16,
        remote_addr: Option<&str>,
        remote_port: Option<u16>,
        pid: Option<u32>,
    ) -> RawSocketRow {
        RawSocketRow {
            protocol,
            local_addr: local_addr.to_string(),
            local_port,
            remote_addr: remote_addr.map(|s| s.to_string()),
            remote_port,
            state: ConnState::Established,
            pid,
        }
    }

    #[test]
    fn test_drops_rows_missing_port_or_pid() {
        let tracker = ConnectionTracker::new();
        tracker.apply_rows(vec![
            row(ConnProtocol::Tcp4, "10.0.0.1", 0, Some("1.1.1.1"), Some(80), Some(1)),
            row(ConnProtocol::Tcp4, "10.0.0.1", 443, Some("1.1.1.1"), Some(80), None),
        ]);
        assert!(tracker.get_connections().is_empty());
    }

    #[test]
    fn test_drops_loopback_only_rows() {
        let tracker = ConnectionTracker::new();
        tracker.apply_rows(vec![row(
            ConnProtocol::Tcp4,
            "127.0.0.1",
            5000,
            Some("127.0.0.1"),
            Some(6000),
            Some(10),
        )]);
        assert!(tracker.get_connections().is_empty());
    }

    #[test]
    fn test_keeps_loopback_local_with_remote_endpoint_unset() {
        // A loopback listener with no remote endpoint yet (e.g. just bound) is
        // still useful — it's not "both ends loopback", it's "remote unknown".
        let tracker = ConnectionTracker::new();
        tracker.apply_rows(vec![row(
            ConnProtocol::Tcp4,
            "127.0.0.1",
            5432,
            None,
            None,
            Some(10),
        )]);
        assert_eq!(tracker.get_connections().len(), 1);
    }

    #[test]
    fn test_tcp_connection_is_indexed_and_returned() {
        let tracker = ConnectionTracker::new();
        tracker.apply_rows(vec![row(
            ConnProtocol::Tcp4,
            "192.168.1.10",
            54321,
            Some("1.1.1.1"),
            Some(443),
            Some(4242),
        )]);
        let conns = tracker.get_connections();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].local_port, 54321);
        assert_eq!(conns[0].pid, Some(4242));
    }

    #[test]
    fn test_udp_listener_gets_wildcard_and_specific_entries() {
        let tracker = ConnectionTracker::new();
        tracker.apply_rows(vec![row(
            ConnProtocol::Udp4,
            "0.0.0.0",
            5353,
            None,
            None,
            Some(7),
        )]);
        assert!(tracker.get_udp_mapping("0.0.0.0", 5353).is_some());
        assert!(tracker.get_udp_mapping("192.168.1.10", 5353).is_some());
    }

    #[test]
    fn test_udp_mapping_lookup_prefers_specific_over_wildcard() {
        let tracker = ConnectionTracker::new();
        tracker.apply_rows(vec![row(
            ConnProtocol::Udp4,
            "0.0.0.0",
            53,
            None,
            None,
            Some(7),
        )]);
        let mapping = tracker.get_udp_mapping("10.0.0.5", 53).unwrap();
        assert_eq!(mapping.pid, Some(7));
    }

    #[test]
    fn test_udp_non_listener_without_wildcard_miss() {
        let tracker = ConnectionTracker::new();
        tracker.apply_rows(vec![row(
            ConnProtocol::Udp4,
            "10.0.0.5",
            60000,
            Some("8.8.8.8"),
            Some(53),
            Some(99),
        )]);
        assert!(tracker.get_udp_mapping("10.0.0.5", 60000).is_some());
        assert!(tracker.get_udp_mapping("1.2.3.4", 60000).is_none());
    }

    #[test]
    fn test_stale_non_listener_udp_entry_is_evicted() {
        let tracker = ConnectionTracker::new();
        let stale_key = "10.0.0.5:60000".to_string();
        tracker.udp_map.insert(
            stale_key.clone(),
            UdpPortMapping {
                local_addr: "10.0.0.5".into(),
                local_port: 60000,
                pid: Some(1),
                proc_name: "x".into(),
                last_seen_ms: now_ms().saturating_sub(31_000),
                is_listener: false,
            },
        );
        tracker.apply_rows(vec![]);
        assert!(tracker.udp_map.get(&stale_key).is_none());
    }

    #[test]
    fn test_listener_udp_entry_is_never_evicted_by_age() {
        let tracker = ConnectionTracker::new();
        let key = ":53".to_string();
        tracker.udp_map.insert(
            key.clone(),
            UdpPortMapping {
                local_addr: "0.0.0.0".into(),
                local_port: 53,
                pid: Some(1),
                proc_name: "resolver".into(),
                last_seen_ms: 0,
                is_listener: true,
            },
        );
        tracker.apply_rows(vec![]);
        assert!(tracker.udp_map.get(&key).is_some());
    }

    #[test]
    fn test_backfill_proc_name_updates_tcp_and_udp() {
        let tracker = ConnectionTracker::new();
        tracker.apply_rows(vec![row(
            ConnProtocol::Tcp4,
            "192.168.1.10",
            54321,
            Some("1.1.1.1"),
            Some(443),
            Some(4242),
        )]);
        tracker.backfill_proc_name(4242, "firefox");
        assert_eq!(tracker.get_connections()[0].proc_name, "firefox");
    }

    #[test]
    fn test_run_with_timeout_returns_some_within_bound() {
        let result = run_with_timeout(Vec::new, Duration::from_secs(1));
        assert!(result.is_some());
    }

    #[test]
    fn test_run_with_timeout_abandons_a_slow_enumeration() {
        let result = run_with_timeout(
            || {
                std::thread::sleep(Duration::from_millis(200));
                vec![]
            },
            Duration::from_millis(20),
        );
        assert!(result.is_none());
    }
}
