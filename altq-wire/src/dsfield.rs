use bytes::BytesMut;
use pnet::packet::{
    ipv4::{self, Ipv4Packet, MutableIpv4Packet},
    ipv6::{Ipv6Packet, MutableIpv6Packet},
};
use tracing::trace;

use crate::{AddressFamily, Packet};

/// ECN occupies the two low-order bits of the ToS / traffic class byte.
const ECN_MASK: u8 = 0x03;

/// Reads the DS field (ToS byte or IPv6 traffic class, ECN bits included).
pub fn read_dsfield(pkt: &Packet) -> Option<u8> {
    match pkt.family() {
        AddressFamily::Inet => {
            let ip = Ipv4Packet::new(pkt.data())?;
            Some((ip.get_dscp() << 2) | ip.get_ecn())
        }
        AddressFamily::Inet6 => Ipv6Packet::new(pkt.data()).map(|ip| ip.get_traffic_class()),
        AddressFamily::Unspec => None,
    }
}

/// Rewrites the DSCP bits of the DS field, preserving ECN. The IPv4 header checksum is
/// recomputed. Returns `false` if the packet has no writable network-layer header.
pub fn write_dsfield(pkt: &mut Packet, dsfield: u8) -> bool {
    let Some(old) = read_dsfield(pkt) else { return false };
    let new = (dsfield & !ECN_MASK) | (old & ECN_MASK);
    if new == old {
        return true;
    }

    let mut buf = BytesMut::from(&pkt.data()[..]);
    let written = match pkt.family() {
        AddressFamily::Inet => MutableIpv4Packet::new(&mut buf)
            .map(|mut ip| {
                ip.set_dscp(new >> 2);
                let csum = ipv4::checksum(&ip.to_immutable());
                ip.set_checksum(csum);
            })
            .is_some(),
        AddressFamily::Inet6 => MutableIpv6Packet::new(&mut buf)
            .map(|mut ip| ip.set_traffic_class(new))
            .is_some(),
        AddressFamily::Unspec => false,
    };

    if written {
        trace!(old, new, "rewrote dsfield");
        pkt.replace_data(buf.freeze());
    }
    written
}

/// Clears the DSCP bits, keeping ECN.
pub fn clear_dsfield(pkt: &mut Packet) -> bool {
    write_dsfield(pkt, 0)
}
