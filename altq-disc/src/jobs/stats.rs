use std::time::Duration;

use altq_common::Loss;
use altq_queue::PktCounter;
use altq_wire::ClassHandle;

/// Snapshot of a JoBS instance.
#[derive(Debug, Clone)]
pub struct JobsStats {
    /// Link bandwidth in bits per second.
    pub bandwidth: u64,
    /// Interface buffer size in packets.
    pub limit: usize,
    pub separate: bool,
    pub qlength: usize,
    pub unclassified_drops: PktCounter,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub cycles: CycleStats,
    /// Per-class statistics, in ascending priority.
    pub classes: Vec<JobsClassStats>,
}

impl JobsStats {
    /// Statistics of the class at priority `pri`.
    pub fn class(&self, pri: u8) -> Option<&JobsClassStats> {
        self.classes.iter().find(|c| c.pri == pri)
    }
}

#[derive(Debug, Clone)]
pub struct JobsClassStats {
    pub handle: ClassHandle,
    pub pri: u8,
    pub qlength: usize,
    /// Bytes queued.
    pub qbytes: u64,
    pub qlimit: usize,
    pub period: u64,
    // Cumulative counters, not reset between epochs.
    pub arrival: PktCounter,
    pub rin: PktCounter,
    pub rout: PktCounter,
    pub dropped: PktCounter,
    /// Queueing delay of the last transmitted packet.
    pub lastdel: Duration,
    pub avgdel: Duration,
    pub adc_violations: u64,
    /// Current service rate in bits per second.
    pub service_rate: u64,
    /// Loss in the current epoch.
    pub current_loss: Loss,
    /// Rate the class needs to meet its ADC and ARC, bits per second.
    pub min_rate_adc: u64,
}

/// Processing time spent per enqueue and dequeue.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    pub wc_cycles_enqueue: Duration,
    pub avg_cycles_enqueue: Duration,
    pub wc_cycles_dequeue: Duration,
    pub avg_cycles_dequeue: Duration,
}

#[derive(Debug, Default)]
pub(super) struct CycleCounter {
    worst: Duration,
    total: Duration,
    count: u32,
}

impl CycleCounter {
    pub(super) fn record(&mut self, elapsed: Duration) {
        self.worst = self.worst.max(elapsed);
        self.total = self.total.saturating_add(elapsed);
        self.count = self.count.saturating_add(1);
    }

    pub(super) fn worst(&self) -> Duration {
        self.worst
    }

    pub(super) fn average(&self) -> Duration {
        self.total.checked_div(self.count).unwrap_or_default()
    }
}
