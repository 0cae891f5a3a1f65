use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use pnet::packet::{
    ip::IpNextHeaderProtocol,
    ipv4::{self, Ipv4Flags, MutableIpv4Packet},
    ipv6::MutableIpv6Packet,
    tcp::MutableTcpPacket,
    udp::MutableUdpPacket,
};

use crate::{proto, Packet};

const IPV4_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, Copy)]
enum Addrs {
    V4(Ipv4Addr, Ipv4Addr),
    V6(Ipv6Addr, Ipv6Addr),
}

#[derive(Debug, Clone, Copy)]
struct Fragment {
    id: u16,
    offset: u16,
    more: bool,
}

/// Builds well-formed IPv4/IPv6 packets with a TCP, UDP or ESP header and a zero payload.
///
/// Used by tests, benchmarks and demos to feed realistic traffic through classifiers and
/// disciplines.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    addrs: Addrs,
    proto: u8,
    sport: u16,
    dport: u16,
    spi: u32,
    tos: u8,
    flow_label: u32,
    payload_len: usize,
    fragment: Option<Fragment>,
}

impl PacketBuilder {
    fn new(addrs: Addrs) -> Self {
        Self {
            addrs,
            proto: proto::UDP,
            sport: 0,
            dport: 0,
            spi: 0,
            tos: 0,
            flow_label: 0,
            payload_len: 0,
            fragment: None,
        }
    }

    /// Starts an IPv4 packet. Defaults to UDP with zero ports.
    pub fn v4(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self::new(Addrs::V4(src, dst))
    }

    /// Starts an IPv6 packet. Defaults to UDP with zero ports.
    pub fn v6(src: Ipv6Addr, dst: Ipv6Addr) -> Self {
        Self::new(Addrs::V6(src, dst))
    }

    pub fn tcp(mut self, sport: u16, dport: u16) -> Self {
        self.proto = proto::TCP;
        self.sport = sport;
        self.dport = dport;
        self
    }

    pub fn udp(mut self, sport: u16, dport: u16) -> Self {
        self.proto = proto::UDP;
        self.sport = sport;
        self.dport = dport;
        self
    }

    /// Makes the packet an ESP datagram with the given security parameter index.
    pub fn esp(mut self, spi: u32) -> Self {
        self.proto = proto::ESP;
        self.spi = spi;
        self
    }

    /// Sets a raw protocol number with no upper-layer header.
    pub fn protocol(mut self, proto: u8) -> Self {
        self.proto = proto;
        self
    }

    /// Sets the IPv4 ToS byte or the IPv6 traffic class.
    pub fn tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    /// Sets the IPv6 flow label. Ignored for IPv4.
    pub fn flow_label(mut self, label: u32) -> Self {
        self.flow_label = label & 0xf_ffff;
        self
    }

    /// Sets the number of payload bytes following the upper-layer header.
    pub fn payload_len(mut self, len: usize) -> Self {
        self.payload_len = len;
        self
    }

    /// Marks the IPv4 packet as a fragment. `offset` is in 8-byte units.
    pub fn fragment(mut self, id: u16, offset: u16, more: bool) -> Self {
        self.fragment = Some(Fragment { id, offset, more });
        self
    }

    fn upper(&self) -> BytesMut {
        let hdr_len = match self.proto {
            proto::TCP => MutableTcpPacket::minimum_packet_size(),
            proto::UDP => MutableUdpPacket::minimum_packet_size(),
            proto::ESP => 8,
            _ => 0,
        };
        let mut buf = BytesMut::zeroed(hdr_len + self.payload_len);

        match self.proto {
            proto::TCP => {
                if let Some(mut tcp) = MutableTcpPacket::new(&mut buf) {
                    tcp.set_source(self.sport);
                    tcp.set_destination(self.dport);
                    tcp.set_data_offset(5);
                }
            }
            proto::UDP => {
                let len = u16::try_from(buf.len()).unwrap_or(u16::MAX);
                if let Some(mut udp) = MutableUdpPacket::new(&mut buf) {
                    udp.set_source(self.sport);
                    udp.set_destination(self.dport);
                    udp.set_length(len);
                }
            }
            proto::ESP => buf[..4].copy_from_slice(&self.spi.to_be_bytes()),
            _ => {}
        }

        buf
    }

    pub fn build(self) -> Packet {
        let upper = self.upper();

        match self.addrs {
            Addrs::V4(src, dst) => {
                let mut buf = BytesMut::zeroed(IPV4_HEADER_LEN);
                buf.put_slice(&upper);
                let total = u16::try_from(buf.len()).unwrap_or(u16::MAX);

                if let Some(mut ip) = MutableIpv4Packet::new(&mut buf) {
                    ip.set_version(4);
                    ip.set_header_length(5);
                    ip.set_dscp(self.tos >> 2);
                    ip.set_ecn(self.tos & 0x3);
                    ip.set_total_length(total);
                    ip.set_ttl(DEFAULT_TTL);
                    ip.set_next_level_protocol(IpNextHeaderProtocol(self.proto));
                    ip.set_source(src);
                    ip.set_destination(dst);
                    if let Some(frag) = self.fragment {
                        ip.set_identification(frag.id);
                        ip.set_fragment_offset(frag.offset);
                        ip.set_flags(if frag.more { Ipv4Flags::MoreFragments } else { 0 });
                    }
                    let csum = ipv4::checksum(&ip.to_immutable());
                    ip.set_checksum(csum);
                }

                Packet::ipv4(buf.freeze())
            }
            Addrs::V6(src, dst) => {
                let mut buf = BytesMut::zeroed(IPV6_HEADER_LEN);
                buf.put_slice(&upper);
                let payload = u16::try_from(upper.len()).unwrap_or(u16::MAX);

                if let Some(mut ip) = MutableIpv6Packet::new(&mut buf) {
                    ip.set_version(6);
                    ip.set_traffic_class(self.tos);
                    ip.set_flow_label(self.flow_label);
                    ip.set_payload_length(payload);
                    ip.set_next_header(IpNextHeaderProtocol(self.proto));
                    ip.set_hop_limit(DEFAULT_TTL);
                    ip.set_source(src);
                    ip.set_destination(dst);
                }

                Packet::ipv6(buf.freeze())
            }
        }
    }
}
