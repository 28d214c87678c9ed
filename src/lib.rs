//! Packet-to-process correlation core: decodes captured frames, correlates
//! them against OS connection and process tables, and aggregates the result
//! into a three-tier registry (global / application / process) that an
//! embedding application can sample or snapshot on its own cadence.
//!
//! This crate has no opinion on transport, storage, or UI — it installs no
//! tracing subscriber and owns no window or tray. An embedder wires
//! [`AnalyzerRunner::start`]'s two callbacks into whatever channel, event bus,
//! or HTTP stream it needs, and is responsible for its own `tracing_subscriber`
//! initialization.

mod address;
mod capture;
mod config;
mod connection;
mod error;
mod interfaces;
mod matcher;
mod packet;
mod procon;
mod process_tracker;
mod registry;
mod runner;
mod scheduler;

pub use address::{format_ipv6_from_captured, normalize_ipv6};
pub use capture::CaptureEngine;
pub use config::{
    CONNECTION_POLL_INTERVAL_MS, PACKET_TICK_INTERVAL_MS, PROCESS_POLL_INTERVAL_MS,
    PROCON_SYNC_INTERVAL_MS, ROOT_ANCESTOR_MAX_DEPTH, SNAPSHOT_INTERVAL_MS,
    SOCKET_ENUMERATION_TIMEOUT_SECS, UDP_MAPPING_STALE_SECS,
};
pub use connection::{ConnProtocol, ConnState, ConnectionEntry, ConnectionTracker, UdpPortMapping};
pub use error::{CoreError, Result};
pub use interfaces::{default_interface, list_interfaces, validate_interface_name, InterfaceInfo};
pub use matcher::ConnectionMatcher;
pub use packet::{
    decode_frame, Direction, EthernetHeader, IcmpHeader, Ipv4Header, Ipv6Header, PacketRecord,
    TcpHeader, UdpHeader,
};
pub use procon::ProcConManager;
pub use process_tracker::{ProcessEntry, ProcessTracker};
pub use registry::{
    ApplicationRegistryEntry, GlobalRegistryEntry, InterfaceStats, ProcessRegistryEntry,
    RegistryManager, Snapshot,
};
pub use runner::AnalyzerRunner;
pub use scheduler::SnapshotScheduler;
