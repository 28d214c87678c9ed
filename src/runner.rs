//! Analyzer Runner: the orchestrator that owns every other component and
//! wires the timer roles together in dependency order.
//!
//! Startup is a numbered, dependency-ordered thread-spawning sequence: each
//! step only starts once the collaborators it reads from are already live,
//! mirroring the background-service startup pattern used elsewhere in this
//! tree for multi-timer subsystems.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capture::CaptureEngine;
use crate::config::PACKET_TICK_INTERVAL_MS;
use crate::connection::{ConnectionEntry, ConnectionTracker};
use crate::error::{CoreError, Result};
use crate::interfaces::{self, InterfaceInfo};
use crate::matcher::ConnectionMatcher;
use crate::packet::PacketRecord;
use crate::procon::ProcConManager;
use crate::process_tracker::ProcessTracker;
use crate::registry::{
    ApplicationRegistryEntry, GlobalRegistryEntry, ProcessRegistryEntry, RegistryManager, Snapshot,
};
use crate::scheduler::SnapshotScheduler;

/// Owns every collaborator and the packet-processing timer thread. Neither
/// `start` nor `stop` block beyond canceling timers and joining threads —
/// cancellation is best-effort, and in-flight OS enumerations are allowed to
/// finish.
pub struct AnalyzerRunner {
    local_ips: HashSet<String>,
    process_tracker: Arc<ProcessTracker>,
    connection_tracker: Arc<ConnectionTracker>,
    matcher: Arc<ConnectionMatcher>,
    procon: Arc<ProcConManager>,
    registry: Arc<RegistryManager>,
    scheduler: Mutex<SnapshotScheduler>,
    capture: Arc<Mutex<Option<CaptureEngine>>>,
    timers_running: Arc<AtomicBool>,
    packet_tick_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    running: AtomicBool,
}

impl AnalyzerRunner {
    pub fn new(local_ips: HashSet<String>) -> Self {
        let process_tracker = Arc::new(ProcessTracker::new());
        let connection_tracker = Arc::new(ConnectionTracker::new());
        let matcher = Arc::new(ConnectionMatcher::new());
        let procon = Arc::new(ProcConManager::new(
            local_ips.clone(),
            Arc::clone(&matcher),
            Arc::clone(&connection_tracker),
            Arc::clone(&process_tracker),
        ));
        let registry = Arc::new(RegistryManager::new(
            local_ips.clone(),
            Arc::clone(&process_tracker),
        ));
        let scheduler = Mutex::new(SnapshotScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&connection_tracker),
        ));

        Self {
            local_ips,
            process_tracker,
            connection_tracker,
            matcher,
            procon,
            registry,
            scheduler,
            capture: Arc::new(Mutex::new(None)),
            timers_running: Arc::new(AtomicBool::new(false)),
            packet_tick_thread: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Idempotent, dependency-ordered startup. `on_packet_batch` is invoked
    /// from the packet-processing timer thread once per tick with whatever
    /// batch (possibly empty) was produced. `on_snapshot` is the Snapshot
    /// Scheduler's sink; this crate has no opinion on transport for either
    /// callback — both are plain closures the embedder supplies.
    pub fn start<P, S>(&self, interface_name: &str, on_packet_batch: P, on_snapshot: S) -> Result<()>
    where
        P: Fn(&[PacketRecord]) + Send + 'static,
        S: Fn(Snapshot) + Send + 'static,
    {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        interfaces::validate_interface_name(interface_name)?;

        if self.running.swap(true, Ordering::SeqCst) {
            // Lost a race with a concurrent start() between the check above
            // and here; the winner is already bringing the runner up.
            return Ok(());
        }

        // 1. Process Tracker, 1 Hz.
        self.process_tracker.start_polling();
        // 2. Connection Tracker, ~3.3 Hz.
        self.connection_tracker.start_polling();
        // 3. ProcCon sync timer, 1 Hz.
        self.start_procon_sync();
        // 4. Traffic Capture.
        let engine = match CaptureEngine::start(interface_name) {
            Ok(engine) => engine,
            Err(err) => {
                // Roll back everything already brought up so a failed start
                // leaves the runner fully stopped, not half-running.
                self.timers_running.store(false, Ordering::SeqCst);
                self.connection_tracker.stop();
                self.process_tracker.stop();
                self.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };
        *self.capture.lock().unwrap() = Some(engine);
        // Snapshot Scheduler: depends on the registries the steps above
        // populate, so it starts alongside them rather than being left to the
        // caller to wire up separately.
        self.scheduler.lock().unwrap().start(on_snapshot);
        // 5. Packet-processing timer, 10 Hz.
        self.start_packet_tick(on_packet_batch);

        Ok(())
    }

    fn start_procon_sync(&self) {
        let procon = Arc::clone(&self.procon);
        let running = Arc::clone(&self.timers_running);
        running.store(true, Ordering::SeqCst);
        std::thread::Builder::new()
            .name("procon-sync".into())
            .spawn(move || {
                // This thread's own lifetime is tied to the packet tick's
                // running flag: both start and stop together, with no
                // separate procon-sync shutdown signal.
                while running.load(Ordering::SeqCst) {
                    procon.sync_connection_info();
                    std::thread::sleep(Duration::from_millis(
                        crate::config::PROCON_SYNC_INTERVAL_MS,
                    ));
                }
            })
            .expect("failed to spawn procon-sync thread");
    }

    fn start_packet_tick<F>(&self, on_packet_batch: F)
    where
        F: Fn(&[PacketRecord]) + Send + 'static,
    {
        self.timers_running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.timers_running);
        let capture = Arc::clone(&self.capture);
        let procon = Arc::clone(&self.procon);
        let registry = Arc::clone(&self.registry);

        let handle = std::thread::Builder::new()
            .name("packet-tick".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(PACKET_TICK_INTERVAL_MS));
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    let captured = {
                        let guard = capture.lock().unwrap();
                        guard.as_ref().map(|e| e.flush_queue()).unwrap_or_default()
                    };
                    for packet in captured {
                        procon.enqueue_packet(packet);
                    }
                    let mut batch = procon.flush_queue();
                    for packet in batch.iter_mut() {
                        registry.ingest(packet);
                    }
                    on_packet_batch(&batch);
                }
            })
            .expect("failed to spawn packet-tick thread");

        *self.packet_tick_thread.lock().unwrap() = Some(handle);
    }

    /// Reverse-order cancellation. Best-effort; in-flight enumerations are
    /// allowed to finish.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.timers_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.packet_tick_thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        self.scheduler.lock().unwrap().stop();

        if let Some(mut engine) = self.capture.lock().unwrap().take() {
            engine.stop();
        }

        self.connection_tracker.stop();
        self.process_tracker.stop();
    }

    pub fn get_connections(&self) -> Vec<ConnectionEntry> {
        self.connection_tracker.get_connections()
    }

    pub fn get_interfaces(&self) -> Vec<InterfaceInfo> {
        interfaces::list_interfaces()
    }

    pub fn get_global(&self) -> std::collections::HashMap<String, GlobalRegistryEntry> {
        self.registry.get_global()
    }

    pub fn get_applications(&self) -> std::collections::HashMap<String, ApplicationRegistryEntry> {
        self.registry.get_applications()
    }

    pub fn get_processes(&self) -> std::collections::HashMap<String, ProcessRegistryEntry> {
        self.registry.get_processes()
    }

    /// Stop and restart capture on a new interface, atomically from the
    /// caller's point of view: either the new interface opens successfully
    /// and replaces the old one, or the old capture (if any) is left running
    /// and an error is returned.
    pub fn select_interfaces(&self, names: &[String]) -> Result<()> {
        let name = names.first().ok_or_else(|| {
            CoreError::Configuration("select_interfaces requires at least one name".into())
        })?;
        interfaces::validate_interface_name(name)?;

        let new_engine = CaptureEngine::start(name)?;
        let mut guard = self.capture.lock().unwrap();
        if let Some(mut old) = guard.take() {
            old.stop();
        }
        *guard = Some(new_engine);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn local_ips(&self) -> &HashSet<String> {
        &self.local_ips
    }
}

impl Drop for AnalyzerRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_on_nonexistent_interface_returns_configuration_error() {
        let runner = AnalyzerRunner::new(HashSet::from(["10.0.0.1".to_string()]));
        let result = runner.start(
            "definitely-not-a-real-interface-xyz",
            |_batch| {},
            |_snapshot| {},
        );
        assert!(result.is_err());
        assert!(!runner.is_running());
    }

    #[test]
    fn test_stop_without_start_is_a_harmless_no_op() {
        let runner = AnalyzerRunner::new(HashSet::new());
        runner.stop();
        assert!(!runner.is_running());
    }

    #[test]
    fn test_select_interfaces_rejects_unknown_name() {
        let runner = AnalyzerRunner::new(HashSet::new());
        let result = runner.select_interfaces(&["definitely-not-a-real-interface-xyz".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_select_interfaces_requires_at_least_one_name() {
        let runner = AnalyzerRunner::new(HashSet::new());
        let result = runner.select_interfaces(&[]);
        assert!(matches!(result, Err(CoreError::Configuration(_))));
    }

    #[test]
    fn test_registry_state_is_not_cleared_by_stop() {
        let runner = AnalyzerRunner::new(HashSet::from(["10.0.0.1".to_string()]));
        // Stop cancels timers; it must not wipe accumulated registry state.
        let mut pkt = crate::packet::PacketRecord {
            timestamp_ms: 0,
            captured_size: 10,
            interface: "eth0".into(),
            ethernet: crate::packet::EthernetHeader {
                src_mac: "00:00:00:00:00:00".into(),
                dst_mac: "00:00:00:00:00:00".into(),
                ether_type: "Ipv4".into(),
            },
            ipv4: None,
            ipv6: None,
            tcp: None,
            udp: None,
            icmp: None,
            src_ip: Some("10.0.0.1".into()),
            dst_ip: Some("2.2.2.2".into()),
            src_port: Some(1),
            dst_port: Some(2),
            protocol: "TCP".into(),
            direction: None,
            pid: Some(1),
            proc_name: Some("a".into()),
            app_name: None,
            app_display_name: None,
            app_registry_id: None,
        };
        runner.registry.ingest(&mut pkt);
        assert!(runner.registry.get_global().contains_key("eth0"));
        runner.stop();
        assert!(runner.registry.get_global().contains_key("eth0"));
    }
}
