use std::net::{Ipv4Addr, Ipv6Addr};

use pnet::packet::{
    ipv4::{Ipv4Flags, Ipv4Packet},
    ipv6::Ipv6Packet,
    tcp::TcpPacket,
    udp::UdpPacket,
};
use tracing::trace;

use crate::{proto, AddressFamily, Packet};

/// Number of in-flight fragmented IPv4 datagrams whose ports are remembered.
pub const FRAG_CACHE_SIZE: usize = 16;

/// Flow descriptor of an IPv4 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowV4 {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u8,
    pub tos: u8,
    pub sport: u16,
    pub dport: u16,
    /// IPsec security parameter index (ESP or AH).
    pub gpi: u32,
}

impl Default for FlowV4 {
    fn default() -> Self {
        Self {
            src: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::UNSPECIFIED,
            proto: 0,
            tos: 0,
            sport: 0,
            dport: 0,
            gpi: 0,
        }
    }
}

/// Flow descriptor of an IPv6 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowV6 {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub proto: u8,
    pub tclass: u8,
    /// 20-bit flow label.
    pub flow_label: u32,
    pub sport: u16,
    pub dport: u16,
    pub gpi: u32,
}

impl Default for FlowV6 {
    fn default() -> Self {
        Self {
            src: Ipv6Addr::UNSPECIFIED,
            dst: Ipv6Addr::UNSPECIFIED,
            proto: 0,
            tclass: 0,
            flow_label: 0,
            sport: 0,
            dport: 0,
            gpi: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    V4(FlowV4),
    V6(FlowV6),
}

impl Flow {
    pub const fn family(&self) -> AddressFamily {
        match self {
            Self::V4(_) => AddressFamily::Inet,
            Self::V6(_) => AddressFamily::Inet6,
        }
    }
}

/// Upper-layer fields found while walking the header chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Ports {
    proto: u8,
    sport: u16,
    dport: u16,
    gpi: u32,
}

#[derive(Debug, Clone, Copy)]
struct FragEntry {
    id: u16,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    ports: Ports,
    last_used: u64,
}

/// Extracts [`Flow`] descriptors from packets.
///
/// Non-first IPv4 fragments carry no transport header. The extractor remembers the ports of
/// the first fragment of every fragmented datagram it sees and hands them to the following
/// fragments; the entry is released when the last fragment is looked up.
#[derive(Debug, Default)]
pub struct FlowExtractor {
    frags: Vec<FragEntry>,
    tick: u64,
}

impl FlowExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts the flow of `pkt`. Ports and SPI are only parsed when `need_ports` is set and
    /// are zero otherwise. Returns `None` for unparseable or non-IP packets.
    pub fn extract(&mut self, pkt: &Packet, need_ports: bool) -> Option<Flow> {
        match pkt.family() {
            AddressFamily::Inet => self.extract_v4(pkt.data(), need_ports).map(Flow::V4),
            AddressFamily::Inet6 => extract_v6(pkt.data(), need_ports).map(Flow::V6),
            AddressFamily::Unspec => None,
        }
    }

    /// Number of fragmented datagrams currently remembered.
    pub fn cached_fragments(&self) -> usize {
        self.frags.len()
    }

    fn extract_v4(&mut self, data: &[u8], need_ports: bool) -> Option<FlowV4> {
        let ip = Ipv4Packet::new(data)?;
        if ip.get_version() != 4 {
            return None;
        }
        let hlen = ip.get_header_length() as usize * 4;
        if hlen < Ipv4Packet::minimum_packet_size() || hlen > data.len() {
            return None;
        }

        let mut flow = FlowV4 {
            src: ip.get_source(),
            dst: ip.get_destination(),
            proto: ip.get_next_level_protocol().0,
            tos: (ip.get_dscp() << 2) | ip.get_ecn(),
            ..Default::default()
        };
        if !need_ports {
            return Some(flow);
        }

        let more_frags = ip.get_flags() & Ipv4Flags::MoreFragments != 0;
        let id = ip.get_identification();

        if ip.get_fragment_offset() != 0 {
            if let Some(ports) = self.frag_lookup(id, flow.src, flow.dst, flow.proto, !more_frags)
            {
                apply_v4(&mut flow, ports);
            }
            return Some(flow);
        }

        let end = (ip.get_total_length() as usize).clamp(hlen, data.len());
        let ports = walk_upper(flow.proto, &data[hlen..end]);
        apply_v4(&mut flow, ports);

        if more_frags {
            self.frag_insert(id, flow.src, flow.dst, ip.get_next_level_protocol().0, ports);
        }

        Some(flow)
    }

    fn frag_lookup(
        &mut self,
        id: u16,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        proto: u8,
        last: bool,
    ) -> Option<Ports> {
        let pos = self
            .frags
            .iter()
            .position(|e| e.id == id && e.src == src && e.dst == dst && e.proto == proto)?;

        if last {
            trace!(id, %src, %dst, "releasing fragment entry");
            return Some(self.frags.swap_remove(pos).ports);
        }

        self.tick += 1;
        let entry = &mut self.frags[pos];
        entry.last_used = self.tick;
        Some(entry.ports)
    }

    fn frag_insert(&mut self, id: u16, src: Ipv4Addr, dst: Ipv4Addr, proto: u8, ports: Ports) {
        self.tick += 1;
        let entry = FragEntry { id, src, dst, proto, ports, last_used: self.tick };

        if let Some(existing) = self
            .frags
            .iter_mut()
            .find(|e| e.id == id && e.src == src && e.dst == dst && e.proto == proto)
        {
            *existing = entry;
        } else if self.frags.len() < FRAG_CACHE_SIZE {
            self.frags.push(entry);
        } else if let Some(oldest) = self.frags.iter_mut().min_by_key(|e| e.last_used) {
            trace!(evicted = oldest.id, id, "fragment cache full, evicting oldest entry");
            *oldest = entry;
        }
    }
}

fn apply_v4(flow: &mut FlowV4, ports: Ports) {
    if ports.proto != 0 {
        flow.proto = ports.proto;
    }
    flow.sport = ports.sport;
    flow.dport = ports.dport;
    flow.gpi = ports.gpi;
}

/// Walks the upper-layer header chain starting at protocol `next`.
///
/// IPv6 extension headers are skipped; a non-first IPv6 fragment stops the walk because its
/// payload carries no transport header.
fn walk_upper(mut next: u8, mut data: &[u8]) -> Ports {
    let mut ports = Ports::default();

    loop {
        match next {
            proto::TCP => {
                ports.proto = next;
                if let Some(tcp) = TcpPacket::new(data) {
                    ports.sport = tcp.get_source();
                    ports.dport = tcp.get_destination();
                } else if data.len() >= 4 {
                    // Truncated header, the ports still sit in the first four bytes.
                    ports.sport = u16::from_be_bytes([data[0], data[1]]);
                    ports.dport = u16::from_be_bytes([data[2], data[3]]);
                }
                return ports;
            }
            proto::UDP => {
                ports.proto = next;
                if let Some(udp) = UdpPacket::new(data) {
                    ports.sport = udp.get_source();
                    ports.dport = udp.get_destination();
                }
                return ports;
            }
            proto::ESP => {
                ports.proto = next;
                if data.len() >= 4 {
                    ports.gpi = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                }
                return ports;
            }
            proto::AH => {
                if data.len() < 8 {
                    return ports;
                }
                if ports.gpi == 0 {
                    ports.gpi = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
                }
                let len = 8 + data[1] as usize * 4;
                ports.proto = next;
                next = data[0];
                data = data.get(len..).unwrap_or_default();
            }
            proto::HOPOPTS | proto::ROUTING | proto::DSTOPTS => {
                if data.len() < 2 {
                    return ports;
                }
                let len = (data[1] as usize + 1) * 8;
                next = data[0];
                data = data.get(len..).unwrap_or_default();
            }
            proto::FRAGMENT => {
                if data.len() < 8 {
                    return ports;
                }
                let offset = u16::from_be_bytes([data[2], data[3]]) & 0xfff8;
                if offset != 0 {
                    ports.proto = data[0];
                    return ports;
                }
                next = data[0];
                data = &data[8..];
            }
            other => {
                ports.proto = other;
                return ports;
            }
        }
    }
}

fn extract_v6(data: &[u8], need_ports: bool) -> Option<FlowV6> {
    let ip = Ipv6Packet::new(data)?;
    if ip.get_version() != 6 {
        return None;
    }

    let mut flow = FlowV6 {
        src: ip.get_source(),
        dst: ip.get_destination(),
        proto: ip.get_next_header().0,
        tclass: ip.get_traffic_class(),
        flow_label: ip.get_flow_label(),
        ..Default::default()
    };
    if !need_ports {
        return Some(flow);
    }

    let hlen = Ipv6Packet::minimum_packet_size();
    let end = (hlen + ip.get_payload_length() as usize).clamp(hlen, data.len());
    let ports = walk_upper(flow.proto, &data[hlen..end]);
    if ports.proto != 0 {
        flow.proto = ports.proto;
    }
    flow.sport = ports.sport;
    flow.dport = ports.dport;
    flow.gpi = ports.gpi;

    Some(flow)
}
