use std::net::IpAddr;

use altq_wire::{AddressFamily, FlowV4, FlowV6};

use crate::{Error, Result};

/// Bits of the per-filter field bitmask: which fields a filter actually constrains.
pub(crate) mod fbmask {
    pub(crate) const PROTO: u32 = 0x01;
    pub(crate) const TOS: u32 = 0x02;
    pub(crate) const DADDR: u32 = 0x04;
    pub(crate) const SADDR: u32 = 0x08;
    pub(crate) const SPORT: u32 = 0x10;
    pub(crate) const DPORT: u32 = 0x20;
    pub(crate) const GPI: u32 = 0x40;
    pub(crate) const FLABEL: u32 = 0x80;

    /// Fields that require walking past the network-layer header.
    pub(crate) const PORTS: u32 = SPORT | DPORT | GPI;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Rule4 {
    pub(crate) src: u32,
    pub(crate) src_mask: u32,
    pub(crate) dst: u32,
    pub(crate) dst_mask: u32,
    pub(crate) proto: u8,
    pub(crate) tos: u8,
    pub(crate) tos_mask: u8,
    pub(crate) sport: u16,
    pub(crate) dport: u16,
    pub(crate) gpi: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Rule6 {
    pub(crate) src: u128,
    pub(crate) src_mask: u128,
    pub(crate) dst: u128,
    pub(crate) dst_mask: u128,
    pub(crate) proto: u8,
    pub(crate) tclass: u8,
    pub(crate) tclass_mask: u8,
    pub(crate) flow_label: u32,
    pub(crate) sport: u16,
    pub(crate) dport: u16,
    pub(crate) gpi: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rule {
    V4(Rule4),
    V6(Rule6),
}

/// A flow-matching pattern, built field by field.
///
/// Unset fields are wildcards. An address given without a mask matches exactly; an all-zero
/// address matches anything regardless of its mask. Errors found while building (wrong
/// family, bad prefix length) are reported when the filter is added to a classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFilter {
    rule: Rule,
    ruleno: u32,
    error: Option<Error>,
}

/// Host-order mask with the top `len` bits set.
fn prefix_mask<const BITS: u8>(len: u8) -> Result<u128> {
    if len > BITS {
        return Err(Error::InvalidPrefix { len, bits: BITS });
    }
    if len == 0 {
        return Ok(0);
    }
    let ones = u128::MAX << (128 - len as u32);
    Ok(ones >> (128 - BITS as u32))
}

impl FlowFilter {
    /// An IPv4 filter matching every IPv4 packet.
    pub fn v4() -> Self {
        Self { rule: Rule::V4(Rule4::default()), ruleno: 0, error: None }
    }

    /// An IPv6 filter matching every IPv6 packet.
    pub fn v6() -> Self {
        Self { rule: Rule::V6(Rule6::default()), ruleno: 0, error: None }
    }

    /// A match-all filter for `family`. Only IPv4 and IPv6 are supported.
    pub fn for_family(family: AddressFamily) -> Result<Self> {
        match family {
            AddressFamily::Inet => Ok(Self::v4()),
            AddressFamily::Inet6 => Ok(Self::v6()),
            AddressFamily::Unspec => Err(Error::UnsupportedFamily),
        }
    }

    pub fn family(&self) -> AddressFamily {
        match self.rule {
            Rule::V4(_) => AddressFamily::Inet,
            Rule::V6(_) => AddressFamily::Inet6,
        }
    }

    /// The rule number. Higher numbers are tried first.
    pub fn rule_number(&self) -> u32 {
        self.ruleno
    }

    fn fail(mut self, err: Error) -> Self {
        self.error.get_or_insert(err);
        self
    }

    fn with_addr(mut self, addr: IpAddr, mask: Option<IpAddr>, is_src: bool) -> Self {
        let same_family = match (&self.rule, addr, mask) {
            (Rule::V4(_), IpAddr::V4(_), None | Some(IpAddr::V4(_))) => true,
            (Rule::V6(_), IpAddr::V6(_), None | Some(IpAddr::V6(_))) => true,
            _ => false,
        };
        if !same_family {
            return self.fail(Error::FamilyMismatch("address does not match filter family"));
        }

        match (&mut self.rule, addr, mask) {
            (Rule::V4(r), IpAddr::V4(a), mask) => {
                let m = match mask {
                    Some(IpAddr::V4(m)) => u32::from(m),
                    _ => 0,
                };
                if is_src {
                    (r.src, r.src_mask) = (a.into(), m);
                } else {
                    (r.dst, r.dst_mask) = (a.into(), m);
                }
            }
            (Rule::V6(r), IpAddr::V6(a), mask) => {
                let m = match mask {
                    Some(IpAddr::V6(m)) => u128::from(m),
                    _ => 0,
                };
                if is_src {
                    (r.src, r.src_mask) = (a.into(), m);
                } else {
                    (r.dst, r.dst_mask) = (a.into(), m);
                }
            }
            _ => {}
        }
        self
    }

    fn with_prefix(self, addr: IpAddr, len: u8, is_src: bool) -> Self {
        if len == 0 {
            // A zero-length prefix matches everything.
            let any = match addr {
                IpAddr::V4(_) => IpAddr::V4(0.into()),
                IpAddr::V6(_) => IpAddr::V6(0.into()),
            };
            return self.with_addr(any, None, is_src);
        }

        let mask = match addr {
            IpAddr::V4(_) => prefix_mask::<32>(len).map(|m| IpAddr::V4((m as u32).into())),
            IpAddr::V6(_) => prefix_mask::<128>(len).map(|m| IpAddr::V6(m.into())),
        };
        match mask {
            Ok(mask) => self.with_addr(addr, Some(mask), is_src),
            Err(e) => self.fail(e),
        }
    }

    /// Matches the exact source address.
    pub fn src(self, addr: impl Into<IpAddr>) -> Self {
        self.with_addr(addr.into(), None, true)
    }

    /// Matches source addresses within `addr/len`.
    pub fn src_prefix(self, addr: impl Into<IpAddr>, len: u8) -> Self {
        self.with_prefix(addr.into(), len, true)
    }

    /// Matches the source address under an arbitrary mask.
    pub fn src_masked(self, addr: impl Into<IpAddr>, mask: impl Into<IpAddr>) -> Self {
        self.with_addr(addr.into(), Some(mask.into()), true)
    }

    /// Matches the exact destination address.
    pub fn dst(self, addr: impl Into<IpAddr>) -> Self {
        self.with_addr(addr.into(), None, false)
    }

    /// Matches destination addresses within `addr/len`.
    pub fn dst_prefix(self, addr: impl Into<IpAddr>, len: u8) -> Self {
        self.with_prefix(addr.into(), len, false)
    }

    /// Matches the destination address under an arbitrary mask.
    pub fn dst_masked(self, addr: impl Into<IpAddr>, mask: impl Into<IpAddr>) -> Self {
        self.with_addr(addr.into(), Some(mask.into()), false)
    }

    /// Matches the upper-layer protocol number.
    pub fn proto(mut self, proto: u8) -> Self {
        match &mut self.rule {
            Rule::V4(r) => r.proto = proto,
            Rule::V6(r) => r.proto = proto,
        }
        self
    }

    pub fn sport(mut self, port: u16) -> Self {
        match &mut self.rule {
            Rule::V4(r) => r.sport = port,
            Rule::V6(r) => r.sport = port,
        }
        self
    }

    pub fn dport(mut self, port: u16) -> Self {
        match &mut self.rule {
            Rule::V4(r) => r.dport = port,
            Rule::V6(r) => r.dport = port,
        }
        self
    }

    /// Matches the ToS byte (IPv4) or traffic class (IPv6) under `mask`. A zero mask means
    /// an exact match.
    pub fn tos(mut self, tos: u8, mask: u8) -> Self {
        match &mut self.rule {
            Rule::V4(r) => (r.tos, r.tos_mask) = (tos, mask),
            Rule::V6(r) => (r.tclass, r.tclass_mask) = (tos, mask),
        }
        self
    }

    /// Matches the IPsec security parameter index.
    pub fn gpi(mut self, spi: u32) -> Self {
        match &mut self.rule {
            Rule::V4(r) => r.gpi = spi,
            Rule::V6(r) => r.gpi = spi,
        }
        self
    }

    /// Matches the IPv6 flow label. Filters with a label are hashed on it.
    pub fn flow_label(mut self, label: u32) -> Self {
        if let Rule::V6(r) = &mut self.rule {
            r.flow_label = label & 0xf_ffff;
            return self;
        }
        self.fail(Error::FamilyMismatch("flow label on an IPv4 filter"))
    }

    /// Sets the rule number.
    pub fn rule(mut self, ruleno: u32) -> Self {
        self.ruleno = ruleno;
        self
    }

    /// Validates the filter and canonicalises its masks.
    pub(crate) fn normalize(self) -> Result<(Rule, u32)> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let rule = match self.rule {
            Rule::V4(mut r) => {
                (r.src, r.src_mask) = canon(r.src, r.src_mask);
                (r.dst, r.dst_mask) = canon(r.dst, r.dst_mask);
                (r.tos, r.tos_mask) = canon(r.tos, r.tos_mask);
                Rule::V4(r)
            }
            Rule::V6(mut r) => {
                (r.src, r.src_mask) = canon(r.src, r.src_mask);
                (r.dst, r.dst_mask) = canon(r.dst, r.dst_mask);
                (r.tclass, r.tclass_mask) = canon(r.tclass, r.tclass_mask);
                Rule::V6(r)
            }
        };

        Ok((rule, self.ruleno))
    }
}

/// Integer types a filter field can be canonicalised over.
trait MaskBits: Copy + Eq + std::ops::BitAnd<Output = Self> + std::ops::Not<Output = Self> {
    const ZERO: Self;
}

macro_rules! mask_bits {
    ($($t:ty),*) => { $(impl MaskBits for $t { const ZERO: Self = 0; })* };
}
mask_bits!(u8, u32, u128);

/// Zero value forces a zero mask; a value with no mask is exact; bits outside the mask clear.
fn canon<T: MaskBits>(value: T, mask: T) -> (T, T) {
    if value == T::ZERO {
        return (T::ZERO, T::ZERO);
    }
    let mask = if mask == T::ZERO { !T::ZERO } else { mask };
    (value & mask, mask)
}

impl Rule {
    /// Field bitmask of the normalised rule.
    pub(crate) fn fbmask(&self) -> u32 {
        let mut m = 0;
        let mut set = |cond: bool, bit: u32| {
            if cond {
                m |= bit;
            }
        };
        match self {
            Self::V4(r) => {
                set(r.proto != 0, fbmask::PROTO);
                set(r.tos != 0, fbmask::TOS);
                set(r.dst != 0, fbmask::DADDR);
                set(r.src != 0, fbmask::SADDR);
                set(r.sport != 0, fbmask::SPORT);
                set(r.dport != 0, fbmask::DPORT);
                set(r.gpi != 0, fbmask::GPI);
            }
            Self::V6(r) => {
                set(r.proto != 0, fbmask::PROTO);
                set(r.tclass != 0, fbmask::TOS);
                set(r.dst != 0, fbmask::DADDR);
                set(r.src != 0, fbmask::SADDR);
                set(r.sport != 0, fbmask::SPORT);
                set(r.dport != 0, fbmask::DPORT);
                set(r.gpi != 0, fbmask::GPI);
                set(r.flow_label != 0, fbmask::FLABEL);
            }
        }
        m
    }
}

impl Rule4 {
    /// Full structural match over the fields selected by `fbm`.
    pub(crate) fn matches(&self, fbm: u32, f: &FlowV4) -> bool {
        !((fbm & fbmask::SPORT != 0 && self.sport != f.sport)
            || (fbm & fbmask::DPORT != 0 && self.dport != f.dport)
            || (fbm & fbmask::DADDR != 0 && self.dst != u32::from(f.dst) & self.dst_mask)
            || (fbm & fbmask::SADDR != 0 && self.src != u32::from(f.src) & self.src_mask)
            || (fbm & fbmask::PROTO != 0 && self.proto != f.proto)
            || (fbm & fbmask::TOS != 0 && self.tos != f.tos & self.tos_mask)
            || (fbm & fbmask::GPI != 0 && self.gpi != f.gpi))
    }

    /// Match for classifiers whose filters only reference ToS.
    pub(crate) fn matches_tos(&self, fbm: u32, f: &FlowV4) -> bool {
        fbm & fbmask::TOS == 0 || self.tos == f.tos & self.tos_mask
    }

    /// Match for classifiers whose filters only reference protocol and ports.
    pub(crate) fn matches_proto_ports(&self, fbm: u32, f: &FlowV4) -> bool {
        !((fbm & fbmask::SPORT != 0 && self.sport != f.sport)
            || (fbm & fbmask::DPORT != 0 && self.dport != f.dport)
            || (fbm & fbmask::PROTO != 0 && self.proto != f.proto))
    }
}

impl Rule6 {
    pub(crate) fn matches(&self, fbm: u32, f: &FlowV6) -> bool {
        !((fbm & fbmask::FLABEL != 0 && self.flow_label != f.flow_label)
            || (fbm & fbmask::PROTO != 0 && self.proto != f.proto)
            || (fbm & fbmask::SPORT != 0 && self.sport != f.sport)
            || (fbm & fbmask::DPORT != 0 && self.dport != f.dport)
            || (fbm & fbmask::DADDR != 0 && self.dst != u128::from(f.dst) & self.dst_mask)
            || (fbm & fbmask::SADDR != 0 && self.src != u128::from(f.src) & self.src_mask)
            || (fbm & fbmask::TOS != 0 && self.tclass != f.tclass & self.tclass_mask)
            || (fbm & fbmask::GPI != 0 && self.gpi != f.gpi))
    }
}
