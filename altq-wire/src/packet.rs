use std::fmt;

use altq_common::Key;
use bytes::Bytes;

/// The protocol family of a packet's network-layer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressFamily {
    /// Unknown or unparsed payload. Never matches a flow filter.
    #[default]
    Unspec,
    Inet,
    Inet6,
}

/// Opaque reference to a class of the discipline currently attached to an interface.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassHandle(Key);

impl ClassHandle {
    #[inline]
    pub const fn new(key: Key) -> Self {
        Self(key)
    }

    #[inline]
    pub const fn key(&self) -> Key {
        self.0
    }
}

impl fmt::Debug for ClassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{:?}", self.0)
    }
}

/// An outbound packet.
///
/// `data` starts at the network-layer header. The attached `class`, when present, was assigned
/// by a classifier before the packet reached the discipline and takes precedence over the
/// discipline's own filters.
#[derive(Debug, Clone)]
pub struct Packet {
    data: Bytes,
    family: AddressFamily,
    class: Option<ClassHandle>,
}

impl Packet {
    /// Wraps a raw datagram of the given family.
    pub fn new(family: AddressFamily, data: Bytes) -> Self {
        Self { data, family, class: None }
    }

    /// Wraps an IPv4 datagram.
    pub fn ipv4(data: Bytes) -> Self {
        Self::new(AddressFamily::Inet, data)
    }

    /// Wraps an IPv6 datagram.
    pub fn ipv6(data: Bytes) -> Self {
        Self::new(AddressFamily::Inet6, data)
    }

    /// A zero-filled packet of `len` bytes with no parseable header.
    pub fn opaque(len: usize) -> Self {
        Self::new(AddressFamily::Unspec, Bytes::from(vec![0u8; len]))
    }

    /// Length in bytes, as accounted by every queue and regulator.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn class(&self) -> Option<ClassHandle> {
        self.class
    }

    /// Attaches a pre-assigned class, overriding filter lookup.
    #[inline]
    pub fn set_class(&mut self, class: Option<ClassHandle>) {
        self.class = class;
    }

    /// Builder-style variant of [`Packet::set_class`].
    pub fn with_class(mut self, class: ClassHandle) -> Self {
        self.class = Some(class);
        self
    }

    pub(crate) fn replace_data(&mut self, data: Bytes) {
        self.data = data;
    }
}

impl From<Packet> for Bytes {
    fn from(pkt: Packet) -> Self {
        pkt.data
    }
}
