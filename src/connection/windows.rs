//! Windows socket-table enumeration via `iphlpapi.dll`.
//!
//! Uses `GetExtendedTcpTable` / `GetExtendedUdpTable` with the two-phase
//! "query size with a null buffer, then query again with an allocated
//! buffer" pattern. Unlike a bare `(protocol, port) -> pid` lookup, the full
//! row (remote endpoint, state) is kept here to build a `ConnectionEntry`.

use super::{ConnProtocol, ConnState, RawSocketRow};

const AF_INET: u32 = 2;
const AF_INET6: u32 = 23;
const TCP_TABLE_OWNER_PID_ALL: u32 = 5;
const UDP_TABLE_OWNER_PID: u32 = 1;
const NO_ERROR: u32 = 0;
const ERROR_INSUFFICIENT_BUFFER: u32 = 122;

// TCP state values as returned by MIB_TCP_STATE (winipmsp.h).
const MIB_TCP_STATE_ESTAB: u32 = 5;
const MIB_TCP_STATE_LISTEN: u32 = 2;
const MIB_TCP_STATE_CLOSE_WAIT: u32 = 8;
const MIB_TCP_STATE_FIN_WAIT1: u32 = 6;
const MIB_TCP_STATE_FIN_WAIT2: u32 = 7;
const MIB_TCP_STATE_CLOSING: u32 = 9;
const MIB_TCP_STATE_LAST_ACK: u32 = 10;

#[repr(C)]
struct MibTcpRowOwnerPid {
    state: u32,
    local_addr: u32,
    local_port: u32,
    remote_addr: u32,
    remote_port: u32,
    owning_pid: u32,
}

#[repr(C)]
struct MibUdpRowOwnerPid {
    local_addr: u32,
    local_port: u32,
    owning_pid: u32,
}

#[repr(C)]
struct MibTcp6RowOwnerPid {
    local_addr: [u8; 16],
    local_scope_id: u32,
    local_port: u32,
    remote_addr: [u8; 16],
    remote_scope_id: u32,
    remote_port: u32,
    state: u32,
    owning_pid: u32,
}

#[repr(C)]
struct MibUdp6RowOwnerPid {
    local_addr: [u8; 16],
    local_scope_id: u32,
    local_port: u32,
    owning_pid: u32,
}

#[link(name = "iphlpapi")]
extern "system" {
    fn GetExtendedTcpTable(
        pTcpTable: *mut u8,
        pdwSize: *mut u32,
        bOrder: i32,
        ulAf: u32,
        TableClass: u32,
        Reserved: u32,
    ) -> u32;

    fn GetExtendedUdpTable(
        pUdpTable: *mut u8,
        pdwSize: *mut u32,
        bOrder: i32,
        ulAf: u32,
        TableClass: u32,
        Reserved: u32,
    ) -> u32;
}

fn tcp_state_to_conn_state(state: u32) -> ConnState {
    match state {
        MIB_TCP_STATE_ESTAB => ConnState::Established,
        MIB_TCP_STATE_LISTEN => ConnState::Listening,
        MIB_TCP_STATE_CLOSE_WAIT => ConnState::CloseWait,
        MIB_TCP_STATE_FIN_WAIT1 => ConnState::FinWait1,
        MIB_TCP_STATE_FIN_WAIT2 => ConnState::FinWait2,
        MIB_TCP_STATE_CLOSING => ConnState::Closing,
        MIB_TCP_STATE_LAST_ACK => ConnState::LastAck,
        _ => ConnState::Other,
    }
}

fn ipv4_to_string(addr_ne: u32) -> String {
    let bytes = addr_ne.to_ne_bytes();
    format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])
}

fn ipv6_to_string(addr: [u8; 16]) -> String {
    std::net::Ipv6Addr::from(addr).to_string()
}

pub(super) fn enumerate() -> Vec<RawSocketRow> {
    let mut rows = Vec::new();
    scan_tcp_table(&mut rows);
    scan_udp_table(&mut rows);
    scan_tcp6_table(&mut rows);
    scan_udp6_table(&mut rows);
    rows
}

fn scan_tcp_table(rows: &mut Vec<RawSocketRow>) {
    let mut size: u32 = 0;
    let ret = unsafe {
        GetExtendedTcpTable(std::ptr::null_mut(), &mut size, 0, AF_INET, TCP_TABLE_OWNER_PID_ALL, 0)
    };
    if ret != ERROR_INSUFFICIENT_BUFFER {
        return;
    }

    let mut buf = vec![0u8; size as usize];
    let ret = unsafe {
        GetExtendedTcpTable(buf.as_mut_ptr(), &mut size, 0, AF_INET, TCP_TABLE_OWNER_PID_ALL, 0)
    };
    if ret != NO_ERROR {
        tracing::warn!("GetExtendedTcpTable failed with code {ret}");
        return;
    }

    if buf.len() < 4 {
        return;
    }
    let num_entries = u32::from_ne_bytes(buf[0..4].try_into().unwrap()) as usize;
    let row_size = std::mem::size_of::<MibTcpRowOwnerPid>();

    for i in 0..num_entries {
        let offset = 4 + i * row_size;
        if offset + row_size > buf.len() {
            break;
        }
        let row = unsafe { &*(buf.as_ptr().add(offset) as *const MibTcpRowOwnerPid) };
        let local_port = u16::from_be(row.local_port as u16);
        let remote_port = u16::from_be(row.remote_port as u16);
        if local_port == 0 || row.owning_pid == 0 {
            continue;
        }
        rows.push(RawSocketRow {
            protocol: ConnProtocol::Tcp4,
            local_addr: ipv4_to_string(row.local_addr),
            local_port,
            remote_addr: Some(ipv4_to_string(row.remote_addr)),
            remote_port: Some(remote_port),
            state: tcp_state_to_conn_state(row.state),
            pid: Some(row.owning_pid),
        });
    }
}

fn scan_udp_table(rows: &mut Vec<RawSocketRow>) {
    let mut size: u32 = 0;
    let ret = unsafe {
        GetExtendedUdpTable(std::ptr::null_mut(), &mut size, 0, AF_INET, UDP_TABLE_OWNER_PID, 0)
    };
    if ret != ERROR_INSUFFICIENT_BUFFER {
        return;
    }

    let mut buf = vec![0u8; size as usize];
    let ret = unsafe {
        GetExtendedUdpTable(buf.as_mut_ptr(), &mut size, 0, AF_INET, UDP_TABLE_OWNER_PID, 0)
    };
    if ret != NO_ERROR {
        tracing::warn!("GetExtendedUdpTable failed with code {ret}");
        return;
    }

    if buf.len() < 4 {
        return;
    }
    let num_entries = u32::from_ne_bytes(buf[0..4].try_into().unwrap()) as usize;
    let row_size = std::mem::size_of::<MibUdpRowOwnerPid>();

    for i in 0..num_entries {
        let offset = 4 + i * row_size;
        if offset + row_size > buf.len() {
            break;
        }
        let row = unsafe { &*(buf.as_ptr().add(offset) as *const MibUdpRowOwnerPid) };
        let local_port = u16::from_be(row.local_port as u16);
        if local_port == 0 || row.owning_pid == 0 {
            continue;
        }
        rows.push(RawSocketRow {
            protocol: ConnProtocol::Udp4,
            local_addr: ipv4_to_string(row.local_addr),
            local_port,
            remote_addr: None,
            remote_port: None,
            state: ConnState::Other,
            pid: Some(row.owning_pid),
        });
    }
}

fn scan_tcp6_table(rows: &mut Vec<RawSocketRow>) {
    let mut size: u32 = 0;
    let ret = unsafe {
        GetExtendedTcpTable(std::ptr::null_mut(), &mut size, 0, AF_INET6, TCP_TABLE_OWNER_PID_ALL, 0)
    };
    if ret != ERROR_INSUFFICIENT_BUFFER {
        return;
    }

    let mut buf = vec![0u8; size as usize];
    let ret = unsafe {
        GetExtendedTcpTable(buf.as_mut_ptr(), &mut size, 0, AF_INET6, TCP_TABLE_OWNER_PID_ALL, 0)
    };
    if ret != NO_ERROR {
        tracing::warn!("GetExtendedTcpTable(AF_INET6) failed with code {ret}");
        return;
    }

    if buf.len() < 4 {
        return;
    }
    let num_entries = u32::from_ne_bytes(buf[0..4].try_into().unwrap()) as usize;
    let row_size = std::mem::size_of::<MibTcp6RowOwnerPid>();

    for i in 0..num_entries {
        let offset = 4 + i * row_size;
        if offset + row_size > buf.len() {
            break;
        }
        let row = unsafe { &*(buf.as_ptr().add(offset) as *const MibTcp6RowOwnerPid) };
        let local_port = u16::from_be(row.local_port as u16);
        let remote_port = u16::from_be(row.remote_port as u16);
        if local_port == 0 || row.owning_pid == 0 {
            continue;
        }
        rows.push(RawSocketRow {
            protocol: ConnProtocol::Tcp6,
            local_addr: ipv6_to_string(row.local_addr),
            local_port,
            remote_addr: Some(ipv6_to_string(row.remote_addr)),
            remote_port: Some(remote_port),
            state: tcp_state_to_conn_state(row.state),
            pid: Some(row.owning_pid),
        });
    }
}

fn scan_udp6_table(rows: &mut Vec<RawSocketRow>) {
    let mut size: u32 = 0;
    let ret = unsafe {
        GetExtendedUdpTable(std::ptr::null_mut(), &mut size, 0, AF_INET6, UDP_TABLE_OWNER_PID, 0)
    };
    if ret != ERROR_INSUFFICIENT_BUFFER {
        return;
    }

    let mut buf = vec![0u8; size as usize];
    let ret = unsafe {
        GetExtendedUdpTable(buf.as_mut_ptr(), &mut size, 0, AF_INET6, UDP_TABLE_OWNER_PID, 0)
    };
    if ret != NO_ERROR {
        tracing::warn!("GetExtendedUdpTable(AF_INET6) failed with code {ret}");
        return;
    }

    if buf.len() < 4 {
        return;
    }
    let num_entries = u32::from_ne_bytes(buf[0..4].try_into().unwrap()) as usize;
    let row_size = std::mem::size_of::<MibUdp6RowOwnerPid>();

    for i in 0..num_entries {
        let offset = 4 + i * row_size;
        if offset + row_size > buf.len() {
            break;
        }
        let row = unsafe { &*(buf.as_ptr().add(offset) as *const MibUdp6RowOwnerPid) };
        let local_port = u16::from_be(row.local_port as u16);
        if local_port == 0 || row.owning_pid == 0 {
            continue;
        }
        rows.push(RawSocketRow {
            protocol: ConnProtocol::Udp6,
            local_addr: ipv6_to_string(row.local_addr),
            local_port,
            remote_addr: None,
            remote_port: None,
            state: ConnState::Other,
            pid: Some(row.owning_pid),
        });
    }
}
