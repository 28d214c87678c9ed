//! Process Tracker: periodically enumerates OS processes and exposes a
//! `pid -> ProcessEntry` lookup plus a root-ancestor walk.
//!
//! Generalizes the teacher's `core/process_mapper.rs` (a port->pid map built
//! over `sysinfo`) into the full process snapshot spec.md §4.4 requires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

use crate::config::ROOT_ANCESTOR_MAX_DEPTH;

/// A single process snapshot entry. Never mutated after insertion; the whole
/// map is replaced atomically each poll cycle (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub exe_path: Option<String>,
    pub ppid: Option<u32>,
    pub cpu_usage: Option<f32>,
    pub memory_bytes: Option<u64>,
}

type ProcessMap = HashMap<u32, ProcessEntry>;

/// Periodically enumerates OS processes on a dedicated thread (1 Hz default,
/// §5). Readers clone the current `Arc<ProcessMap>` and never hold a lock
/// across a lookup.
pub struct ProcessTracker {
    map: Mutex<Arc<ProcessMap>>,
    running: AtomicBool,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(Arc::new(HashMap::new())),
            running: AtomicBool::new(false),
        }
    }

    /// Run one enumeration pass and atomically replace the map. Called by the
    /// Analyzer Runner's process-poll thread; exposed directly so tests and
    /// other callers can drive a single cycle without spawning a thread.
    pub fn poll_once(&self, sys: &mut System) {
        sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

        let mut fresh = HashMap::with_capacity(sys.processes().len());
        for (pid, proc_) in sys.processes() {
            let entry = ProcessEntry {
                pid: pid.as_u32(),
                name: proc_.name().to_string_lossy().into_owned(),
                exe_path: proc_.exe().map(|p| p.to_string_lossy().into_owned()),
                ppid: proc_.parent().map(|p| p.as_u32()),
                cpu_usage: Some(proc_.cpu_usage()),
                memory_bytes: Some(proc_.memory()),
            };
            fresh.insert(pid.as_u32(), entry);
        }

        *self.map.lock().unwrap() = Arc::new(fresh);
    }

    fn snapshot(&self) -> Arc<ProcessMap> {
        Arc::clone(&self.map.lock().unwrap())
    }

    pub fn get_process(&self, pid: u32) -> Option<ProcessEntry> {
        self.snapshot().get(&pid).cloned()
    }

    pub fn get_process_name(&self, pid: u32) -> Option<String> {
        self.snapshot().get(&pid).map(|p| p.name.clone())
    }

    /// Walk the `ppid` chain starting at `pid` until reaching a process whose
    /// parent is pid 1, whose parent is unknown to the current snapshot, or a
    /// cycle/self-parent is detected. Capped at `ROOT_ANCESTOR_MAX_DEPTH` hops.
    ///
    /// This resolves spec.md §9's open question: the walk never attempts to
    /// cross user namespaces or sandboxes — it only ever consults the single
    /// process table this poll cycle observed.
    pub fn find_root_ancestor(&self, pid: u32) -> u32 {
        let map = self.snapshot();
        let mut current = pid;
        let mut seen = std::collections::HashSet::new();

        for _ in 0..ROOT_ANCESTOR_MAX_DEPTH {
            if !seen.insert(current) {
                // Cycle detected; current is as far back as we can walk.
                return current;
            }
            let Some(entry) = map.get(&current) else {
                return current;
            };
            let Some(ppid) = entry.ppid else {
                return current;
            };
            if ppid == 1 || ppid == current {
                return current;
            }
            if !map.contains_key(&ppid) {
                // Parent exists per the OS but fell outside this snapshot.
                return current;
            }
            current = ppid;
        }
        current
    }

    pub fn start_polling(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let tracker = Arc::clone(self);
        std::thread::Builder::new()
            .name("process-tracker".into())
            .spawn(move || {
                let mut sys = System::new();
                while tracker.running.load(Ordering::SeqCst) {
                    tracker.poll_once(&mut sys);
                    std::thread::sleep(std::time::Duration::from_millis(
                        crate::config::PROCESS_POLL_INTERVAL_MS,
                    ));
                }
            })
            .expect("failed to spawn process-tracker thread");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Default for ProcessTracker {
    fn default() -> Self {
        Self::new()
    }
}
