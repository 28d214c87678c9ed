//! macOS socket-table enumeration.
//!
//! The teacher's own macOS capture backend (`capture/pf_backend.rs`) was
//! itself a doc-comment stub with no packet-filter implementation behind it;
//! this mirrors that gap for connection enumeration. `libproc` exposes
//! per-process fd/socket info on macOS but not a single system-wide
//! socket-to-pid table the way `/proc/net/*` or `GetExtendedTcpTable` do, so
//! a real backend here means walking every process's fd table via
//! `libproc::proc_pid_fd_info` and matching `PROC_FD_TYPE::SOCKET` entries
//! to mapper output, one process at a time. Not implemented yet.

use std::sync::Once;

use super::RawSocketRow;

static WARN_ONCE: Once = Once::new();

pub(super) fn enumerate() -> Vec<RawSocketRow> {
    WARN_ONCE.call_once(|| {
        tracing::warn!(
            "connection enumeration is not implemented on macOS; TCP/UDP socket tables will be empty"
        );
    });
    Vec::new()
}
