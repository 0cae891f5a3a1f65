/// Packet and byte counter pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PktCounter {
    packets: u64,
    bytes: u64,
}

impl PktCounter {
    #[inline]
    pub fn add(&mut self, len: usize) {
        self.packets = self.packets.saturating_add(1);
        self.bytes = self.bytes.saturating_add(len as u64);
    }

    /// Takes a packet back out, e.g. when an accepted packet is dropped later on.
    #[inline]
    pub fn sub(&mut self, len: usize) {
        self.packets = self.packets.saturating_sub(1);
        self.bytes = self.bytes.saturating_sub(len as u64);
    }

    #[inline]
    pub fn packets(&self) -> u64 {
        self.packets
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
