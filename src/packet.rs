//! Packet Decoder: parses a raw captured frame into a typed, owned
//! `PacketRecord`. Stateless and reentrant — the decoder holds no state
//! between calls, so it can run concurrently from multiple capture threads
//! if an embedder opens multiple interfaces.

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet as _;
use serde::{Deserialize, Serialize};

use crate::address::{format_ipv6_from_captured, normalize_ipv6};

/// Direction of a packet relative to the local host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetHeader {
    pub src_mac: String,
    pub dst_mac: String,
    pub ether_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Header {
    pub src_addr: String,
    pub dst_addr: String,
    pub ttl: u8,
    pub protocol: u8,
    pub total_length: u16,
    pub header_len_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Header {
    pub src_addr: String,
    pub dst_addr: String,
    pub hop_limit: u8,
    pub next_header: u8,
    pub payload_length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub icmp_code: u8,
}

/// One captured frame after decoding, and (later) after attribution.
///
/// Created by the Packet Decoder; mutated only by the Process<->Connection
/// Manager to add attribution; read-only after that. Ownership then passes to
/// the Registry Manager and external consumers, neither of which may mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketRecord {
    pub timestamp_ms: u64,
    pub captured_size: u64,
    pub interface: String,

    pub ethernet: EthernetHeader,
    pub ipv4: Option<Ipv4Header>,
    pub ipv6: Option<Ipv6Header>,
    pub tcp: Option<TcpHeader>,
    pub udp: Option<UdpHeader>,
    pub icmp: Option<IcmpHeader>,

    /// Flat fields pulled out for fast matching, populated via the Address
    /// Normalizer. Absent for non-IP frames (ARP, etc).
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    /// Protocol name: "TCP", "UDP", "ICMP", "ICMPV6", or the ethertype name
    /// ("ARP", "WOL", ...) for non-IP frames.
    pub protocol: String,

    pub direction: Option<Direction>,

    // --- attribution, filled by the Process<->Connection Manager ---
    pub pid: Option<u32>,
    pub proc_name: Option<String>,
    pub app_name: Option<String>,
    pub app_display_name: Option<String>,
    pub app_registry_id: Option<String>,
}

impl PacketRecord {
    pub fn is_tcp(&self) -> bool {
        self.tcp.is_some()
    }

    pub fn is_udp(&self) -> bool {
        self.udp.is_some()
    }
}

fn mac_to_string(mac: pnet::util::MacAddr) -> String {
    mac.to_string()
}

fn protocol_name(proto: pnet::packet::ip::IpNextHeaderProtocol) -> String {
    match proto {
        IpNextHeaderProtocols::Tcp => "TCP".to_string(),
        IpNextHeaderProtocols::Udp => "UDP".to_string(),
        IpNextHeaderProtocols::Icmp => "ICMP".to_string(),
        IpNextHeaderProtocols::Icmpv6 => "ICMPV6".to_string(),
        other => other.to_string(),
    }
}

/// Decode a raw link-layer frame into a `PacketRecord`. Returns `None` on any
/// malformed or truncated input — the caller (Traffic Capture) drops the frame
/// and continues; the capture loop must never panic on attacker- or
/// network-garbled bytes.
pub fn decode_frame(data: &[u8], interface: &str, timestamp_ms: u64) -> Option<PacketRecord> {
    let eth = EthernetPacket::new(data)?;

    let ethernet = EthernetHeader {
        src_mac: mac_to_string(eth.get_source()),
        dst_mac: mac_to_string(eth.get_destination()),
        ether_type: format!("{:?}", eth.get_ethertype()),
    };

    let mut record = PacketRecord {
        timestamp_ms,
        captured_size: data.len() as u64,
        interface: interface.to_string(),
        ethernet,
        ipv4: None,
        ipv6: None,
        tcp: None,
        udp: None,
        icmp: None,
        src_ip: None,
        dst_ip: None,
        src_port: None,
        dst_port: None,
        protocol: format!("{:?}", eth.get_ethertype()),
        direction: None,
        pid: None,
        proc_name: None,
        app_name: None,
        app_display_name: None,
        app_registry_id: None,
    };

    match eth.get_ethertype() {
        EtherTypes::Ipv4 => decode_ipv4(eth.payload(), &mut record),
        EtherTypes::Ipv6 => decode_ipv6(eth.payload(), &mut record),
        _ => {
            // Non-IP ethertype (ARP, WoL, ...): keep the ethernet-only record
            // so system-level counters can still see it.
        }
    }

    Some(record)
}

fn decode_ipv4(payload: &[u8], record: &mut PacketRecord) {
    let Some(ip) = Ipv4Packet::new(payload) else {
        return;
    };

    let proto = ip.get_next_level_protocol();
    record.protocol = protocol_name(proto);
    record.src_ip = Some(normalize_ipv6_passthrough(&ip.get_source().to_string()));
    record.dst_ip = Some(normalize_ipv6_passthrough(&ip.get_destination().to_string()));

    record.ipv4 = Some(Ipv4Header {
        src_addr: ip.get_source().to_string(),
        dst_addr: ip.get_destination().to_string(),
        ttl: ip.get_ttl(),
        protocol: proto.0,
        total_length: ip.get_total_length(),
        header_len_bytes: (ip.get_header_length() as usize) * 4,
    });

    decode_l4(proto, ip.payload(), record);
}

fn decode_ipv6(payload: &[u8], record: &mut PacketRecord) {
    let Some(ip) = Ipv6Packet::new(payload) else {
        return;
    };

    let proto = ip.get_next_header();
    record.protocol = protocol_name(proto);
    record.src_ip = Some(normalize_ipv6(&ip.get_source().to_string()));
    record.dst_ip = Some(normalize_ipv6(&ip.get_destination().to_string()));

    record.ipv6 = Some(Ipv6Header {
        src_addr: ip.get_source().to_string(),
        dst_addr: ip.get_destination().to_string(),
        hop_limit: ip.get_hop_limit(),
        next_header: proto.0,
        payload_length: ip.get_payload_length(),
    });

    // No extension-header chain walk: only a next-header that is directly
    // TCP/UDP/ICMPv6 is parsed. Anything else yields an IP-only record.
    decode_l4(proto, ip.payload(), record);
}

fn decode_l4(proto: pnet::packet::ip::IpNextHeaderProtocol, payload: &[u8], record: &mut PacketRecord) {
    match proto {
        IpNextHeaderProtocols::Tcp => {
            if let Some(tcp) = TcpPacket::new(payload) {
                record.src_port = Some(tcp.get_source());
                record.dst_port = Some(tcp.get_destination());
                record.tcp = Some(TcpHeader {
                    src_port: tcp.get_source(),
                    dst_port: tcp.get_destination(),
                    seq: tcp.get_sequence(),
                    ack: tcp.get_acknowledgement(),
                    flags: tcp.get_flags(),
                });
            }
        }
        IpNextHeaderProtocols::Udp => {
            if let Some(udp) = UdpPacket::new(payload) {
                record.src_port = Some(udp.get_source());
                record.dst_port = Some(udp.get_destination());
                record.udp = Some(UdpHeader {
                    src_port: udp.get_source(),
                    dst_port: udp.get_destination(),
                    length: udp.get_length(),
                });
            }
        }
        IpNextHeaderProtocols::Icmp => {
            if let Some(icmp) = IcmpPacket::new(payload) {
                record.icmp = Some(IcmpHeader {
                    icmp_type: icmp.get_icmp_type().0,
                    icmp_code: icmp.get_icmp_code().0,
                });
            }
        }
        IpNextHeaderProtocols::Icmpv6 => {
            if let Some(icmp) = Icmpv6Packet::new(payload) {
                record.icmp = Some(IcmpHeader {
                    icmp_type: icmp.get_icmpv6_type().0,
                    icmp_code: icmp.get_icmpv6_code().0,
                });
            }
        }
        _ => {}
    }
}

/// IPv4 addresses are never passed through IPv6 normalization; this exists
/// only so `src_ip`/`dst_ip` always go through one code path regardless of
/// family, and an IPv4 address always passes through unchanged.
fn normalize_ipv6_passthrough(addr: &str) -> String {
    normalize_ipv6(addr)
}
