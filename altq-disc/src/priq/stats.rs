use altq_queue::PktCounter;
use altq_wire::ClassHandle;

/// Snapshot of a PRIQ instance.
#[derive(Debug, Clone)]
pub struct PriqStats {
    /// Configured link bandwidth in bits per second.
    pub bandwidth: u64,
    /// Packets queued over all classes.
    pub qlength: usize,
    /// Packets dropped because they matched no class and no default class existed.
    pub unclassified_drops: PktCounter,
    /// Per-class statistics, in ascending priority.
    pub classes: Vec<PriqClassStats>,
}

impl PriqStats {
    /// Statistics of the class at priority `pri`.
    pub fn class(&self, pri: u8) -> Option<&PriqClassStats> {
        self.classes.iter().find(|c| c.pri == pri)
    }
}

#[derive(Debug, Clone)]
pub struct PriqClassStats {
    pub handle: ClassHandle,
    pub pri: u8,
    pub qlength: usize,
    pub qlimit: usize,
    pub period: u64,
    pub arrivals: PktCounter,
    pub xmit: PktCounter,
    pub dropped: PktCounter,
    /// Name of the admission policy.
    pub admission: &'static str,
}
