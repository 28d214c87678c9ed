//! Linux socket-table enumeration via `procfs` (`/proc/net/tcp[6]`,
//! `/proc/net/udp[6]`), with inode->pid resolution via each process's fd
//! table. Row shape grounded in the pack's supervizio connections scanner,
//! re-expressed against `procfs`'s typed API instead of hand-parsing hex.

use std::collections::HashMap;

use procfs::net::{TcpNetEntry, TcpState, UdpNetEntry};
use procfs::process::all_processes;

use super::{ConnProtocol, ConnState, RawSocketRow};

fn tcp_state_to_conn_state(state: TcpState) -> ConnState {
    match state {
        TcpState::Established => ConnState::Established,
        TcpState::Listen => ConnState::Listening,
        TcpState::CloseWait => ConnState::CloseWait,
        TcpState::FinWait1 => ConnState::FinWait1,
        TcpState::FinWait2 => ConnState::FinWait2,
        TcpState::Closing => ConnState::Closing,
        TcpState::LastAck => ConnState::LastAck,
        _ => ConnState::Other,
    }
}

/// inode -> pid, built by walking every process's open fd table. Sockets show
/// up as `socket:[inode]` symlink targets.
fn build_inode_to_pid() -> HashMap<u64, u32> {
    let mut map = HashMap::new();
    let Ok(procs) = all_processes() else {
        tracing::warn!("procfs: failed to enumerate processes for inode->pid map");
        return map;
    };

    for proc_result in procs {
        let Ok(proc_) = proc_result else { continue };
        let pid = proc_.pid() as u32;
        let Ok(fds) = proc_.fd() else { continue };
        for fd_result in fds {
            let Ok(fd) = fd_result else { continue };
            if let procfs::process::FDTarget::Socket(inode) = fd.target {
                map.entry(inode).or_insert(pid);
            }
        }
    }
    map
}

fn tcp_rows(entries: Vec<TcpNetEntry>, protocol: ConnProtocol, inode_to_pid: &HashMap<u64, u32>) -> Vec<RawSocketRow> {
    entries
        .into_iter()
        .map(|e| RawSocketRow {
            protocol,
            local_addr: e.local_address.ip().to_string(),
            local_port: e.local_address.port(),
            remote_addr: Some(e.remote_address.ip().to_string()),
            remote_port: Some(e.remote_address.port()),
            state: tcp_state_to_conn_state(e.state),
            pid: inode_to_pid.get(&e.inode).copied(),
        })
        .collect()
}

fn udp_rows(entries: Vec<UdpNetEntry>, protocol: ConnProtocol, inode_to_pid: &HashMap<u64, u32>) -> Vec<RawSocketRow> {
    entries
        .into_iter()
        .map(|e| {
            let remote_port = e.remote_address.port();
            let has_remote = remote_port != 0;
            RawSocketRow {
                protocol,
                local_addr: e.local_address.ip().to_string(),
                local_port: e.local_address.port(),
                remote_addr: has_remote.then(|| e.remote_address.ip().to_string()),
                remote_port: has_remote.then_some(remote_port),
                state: ConnState::Other,
                pid: inode_to_pid.get(&e.inode).copied(),
            }
        })
        .collect()
}

pub(super) fn enumerate() -> Vec<RawSocketRow> {
    let inode_to_pid = build_inode_to_pid();
    let mut rows = Vec::new();

    if let Ok(entries) = procfs::net::tcp() {
        rows.extend(tcp_rows(entries, ConnProtocol::Tcp4, &inode_to_pid));
    } else {
        tracing::warn!("procfs: failed to read /proc/net/tcp");
    }
    if let Ok(entries) = procfs::net::tcp6() {
        rows.extend(tcp_rows(entries, ConnProtocol::Tcp6, &inode_to_pid));
    }
    if let Ok(entries) = procfs::net::udp() {
        rows.extend(udp_rows(entries, ConnProtocol::Udp4, &inode_to_pid));
    } else {
        tracing::warn!("procfs: failed to read /proc/net/udp");
    }
    if let Ok(entries) = procfs::net::udp6() {
        rows.extend(udp_rows(entries, ConnProtocol::Udp6, &inode_to_pid));
    }

    rows
}
