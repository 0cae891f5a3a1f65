use std::collections::VecDeque;

use altq_queue::PktCounter;
use altq_wire::{ClassHandle, Packet};

use crate::{Admission, DropTail, DEFAULT_QLIMIT};

/// Options of a PRIQ class.
#[derive(Debug)]
pub struct PriqClassOptions {
    /// Priority slot. Higher is served first.
    pri: u8,
    /// Queue limit in packets.
    limit: usize,
    /// Whether the class catches unclassified packets.
    default: bool,
    /// Zero the DS field of accepted packets.
    clear_dscp: bool,
    /// Admission policy. Drop-tail if unset.
    admission: Option<Box<dyn Admission>>,
}

impl PriqClassOptions {
    pub fn new(pri: u8) -> Self {
        Self { pri, limit: DEFAULT_QLIMIT, default: false, clear_dscp: false, admission: None }
    }

    /// Sets the queue limit in packets. Zero selects the default limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = if limit == 0 { DEFAULT_QLIMIT } else { limit };
        self
    }

    pub fn default_class(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    pub fn clear_dscp(mut self, clear: bool) -> Self {
        self.clear_dscp = clear;
        self
    }

    /// Replaces drop-tail with another admission policy.
    pub fn admission(mut self, admission: impl Admission + 'static) -> Self {
        self.admission = Some(Box::new(admission));
        self
    }

    #[inline]
    pub(crate) fn pri(&self) -> u8 {
        self.pri
    }

    #[inline]
    pub(crate) fn is_default(&self) -> bool {
        self.default
    }
}

#[derive(Debug)]
pub(crate) struct PriqClass {
    pub(crate) handle: ClassHandle,
    pub(crate) queue: VecDeque<Packet>,
    pub(crate) limit: usize,
    pub(crate) clear_dscp: bool,
    pub(crate) admission: Box<dyn Admission>,

    pub(crate) arrivals: PktCounter,
    pub(crate) xmit: PktCounter,
    pub(crate) dropped: PktCounter,
    /// Number of busy periods, counted when the last packet is dequeued. Purges do not count.
    pub(crate) period: u64,
}

impl PriqClass {
    pub(crate) fn new(handle: ClassHandle, options: PriqClassOptions) -> Self {
        let mut class = Self {
            handle,
            queue: VecDeque::new(),
            limit: DEFAULT_QLIMIT,
            clear_dscp: false,
            admission: Box::new(DropTail),
            arrivals: PktCounter::default(),
            xmit: PktCounter::default(),
            dropped: PktCounter::default(),
            period: 0,
        };
        class.configure(options);
        class
    }

    /// Applies new options. Counters are kept.
    pub(crate) fn configure(&mut self, options: PriqClassOptions) {
        self.limit = options.limit;
        self.clear_dscp = options.clear_dscp;
        self.admission = options.admission.unwrap_or_else(|| Box::new(DropTail));
    }

    /// Drops every queued packet, counting them as drops. Returns how many were dropped.
    pub(crate) fn purge(&mut self) -> usize {
        let n = self.queue.len();
        for pkt in self.queue.drain(..) {
            self.dropped.add(pkt.len());
        }
        n
    }
}
