//! Traffic Capture: opens an interface handle, receives frames, decodes them,
//! and pushes the result into a bounded queue.
//!
//! Built around `pnet_datalink::channel()`: open an `Ethernet` channel, block
//! on `rx.next()`, copy the frame out of the reused kernel buffer before
//! decoding, on a named background thread with an `AtomicBool` shutdown flag
//! and a `Drop` impl that releases resources as a safety net.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use pnet_datalink::Channel;

use crate::error::{CoreError, Result};
use crate::packet::{decode_frame, PacketRecord};

/// Bound on the internal queue: at 10 MiB of kernel buffer and a 100ms drain
/// tick, this comfortably covers a burst without unbounded growth.
const QUEUE_CAPACITY: usize = 65536;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Owns one interface's capture thread and its outbound decoded-packet queue.
pub struct CaptureEngine {
    running: Arc<AtomicBool>,
    queue: Arc<Mutex<VecDeque<PacketRecord>>>,
    thread: Option<std::thread::JoinHandle<()>>,
    interface: String,
}

impl CaptureEngine {
    /// Open `interface_name` and start decoding frames on a dedicated thread.
    /// Idempotent only in the sense that calling `start` twice on distinct
    /// `CaptureEngine` values is safe; a single value only ever opens once.
    pub fn start(interface_name: &str) -> Result<Self> {
        let interfaces = pnet_datalink::interfaces();
        let interface = interfaces
            .into_iter()
            .find(|i| i.name == interface_name)
            .ok_or_else(|| {
                CoreError::CaptureOpen(format!("no such interface: {interface_name}"))
            })?;

        let channel = pnet_datalink::channel(&interface, Default::default())
            .map_err(|e| CoreError::CaptureOpen(format!("failed to open {interface_name}: {e}")))?;

        let mut rx = match channel {
            Channel::Ethernet(_tx, rx) => rx,
            _ => {
                return Err(CoreError::CaptureOpen(format!(
                    "unsupported channel type on {interface_name}"
                )))
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(1024)));

        let thread_running = Arc::clone(&running);
        let thread_queue = Arc::clone(&queue);
        let thread_iface = interface_name.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("capture-{interface_name}"))
            .spawn(move || {
                while thread_running.load(Ordering::SeqCst) {
                    match rx.next() {
                        Ok(frame) => {
                            // Immediately copy out of pnet's reused internal buffer
                            // before any further processing.
                            let owned = frame.to_vec();
                            if let Some(record) =
                                decode_frame(&owned, &thread_iface, now_ms())
                            {
                                let mut q = thread_queue.lock().unwrap();
                                if q.len() >= QUEUE_CAPACITY {
                                    q.pop_front();
                                }
                                q.push_back(record);
                            } else {
                                tracing::debug!("dropped undecodable frame on {thread_iface}");
                            }
                        }
                        Err(e) => {
                            tracing::debug!("capture receive error on {thread_iface}: {e}");
                        }
                    }
                }
            })
            .map_err(|e| CoreError::CaptureOpen(e.to_string()))?;

        Ok(Self {
            running,
            queue,
            thread: Some(handle),
            interface: interface_name.to_string(),
        })
    }

    pub fn interface_name(&self) -> &str {
        &self.interface
    }

    /// Atomically swap the queue with an empty one and return what was
    /// buffered. Caller-owned; safe to call after `stop()` (drains remaining
    /// records, then returns empty forever).
    pub fn flush_queue(&self) -> Vec<PacketRecord> {
        let mut q = self.queue.lock().unwrap();
        std::mem::take(&mut *q).into_iter().collect()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            // The blocking rx.next() call may not return until the next frame
            // or a read timeout, so this join is best-effort.
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_on_nonexistent_interface_returns_capture_open_error() {
        let result = CaptureEngine::start("definitely-not-a-real-interface-xyz");
        assert!(result.is_err());
        match result {
            Err(CoreError::CaptureOpen(_)) => {}
            other => panic!("expected CaptureOpen error, got {other:?}"),
        }
    }

    #[test]
    fn test_flush_queue_on_empty_queue_returns_empty_vec() {
        let queue: Arc<Mutex<VecDeque<PacketRecord>>> = Arc::new(Mutex::new(VecDeque::new()));
        let engine = CaptureEngine {
            running: Arc::new(AtomicBool::new(false)),
            queue,
            thread: None,
            interface: "eth0".into(),
        };
        assert!(engine.flush_queue().is_empty());
    }
}
