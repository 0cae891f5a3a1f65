//! Joint Buffer management and Scheduling.
//!
//! Every class may carry absolute delay, loss and rate constraints (ADC, ALC, ARC) and
//! relative delay and loss constraints (RDC, RLC) against the other classes. On each enqueue
//! the service rates are recomputed: minimum rates for the absolute constraints first, then a
//! feedback loop that moves rate between RDC classes until their weighted delays agree. When
//! the shared buffer overflows, the victim class is chosen from the loss constraints.
//!
//! Dequeue serves the backlogged class that is furthest behind its promised output curve,
//! the integral of its service rate since the start of the current epoch. An epoch starts
//! whenever a packet arrives at an empty interface.

use std::{any::Any, error::Error as StdError, time::Duration, time::Instant};

use altq_classifier::{Classifier, FilterHandle, FlowFilter};
use altq_common::{constants::SCALE_RATE, Rate};
use altq_queue::{DequeueOp, Discipline, DisciplineKind, DropReason, Enqueue, PktCounter};
use altq_wire::{clear_dsfield, ClassHandle, Packet};
use tracing::{debug, trace, warn};

use crate::{table::ClassTable, Classful, Error, Result};

mod class;
use class::JobsClass;
pub use class::JobsClassOptions;

mod drops;

mod rates;
use rates::{bps_to_rate, rate_to_bps};

mod stats;
use stats::CycleCounter;
pub use stats::{CycleStats, JobsClassStats, JobsStats};

/// Number of priority slots.
pub const JOBS_MAXPRI: usize = 16;

/// Default interface buffer, in packets.
pub const JOBS_DEFAULT_LIMIT: usize = 200;

/// Epoch byte counters are kept below this so scaled loss ratios stay exact.
const EPOCH_BYTES_MAX: u64 = (i64::MAX >> SCALE_RATE) as u64;

/// Interface-level JoBS options.
#[derive(Debug, Clone)]
pub struct JobsOptions {
    /// Link bandwidth in bits per second.
    bandwidth: u64,
    /// Interface buffer in packets.
    limit: usize,
    /// Whether each class has its own buffer instead of sharing the interface buffer.
    separate: bool,
}

impl JobsOptions {
    pub fn new(bandwidth: u64) -> Self {
        Self { bandwidth, limit: JOBS_DEFAULT_LIMIT, separate: false }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn separate(mut self, separate: bool) -> Self {
        self.separate = separate;
        self
    }
}

/// A JoBS instance.
#[derive(Debug)]
pub struct Jobs {
    bandwidth: u64,
    link: Rate,
    limit: usize,
    separate: bool,
    classes: ClassTable<JobsClass, JOBS_MAXPRI>,
    classifier: Classifier<ClassHandle>,
    /// Packets queued over all classes.
    len: usize,
    /// Time the output curves were last advanced to.
    last_update: u64,
    /// Class chosen by the last poll, served by the next remove.
    polled: Option<usize>,
    unclassified: PktCounter,
    total_enqueued: u64,
    total_dequeued: u64,
    enqueue_cycles: CycleCounter,
    dequeue_cycles: CycleCounter,
}

impl Jobs {
    pub fn new(options: JobsOptions) -> Result<Self> {
        if options.bandwidth == 0 {
            return Err(Error::InvalidBandwidth(options.bandwidth));
        }
        let link = bps_to_rate(options.bandwidth);
        if !link.is_positive() {
            return Err(Error::InvalidBandwidth(options.bandwidth));
        }
        if options.limit == 0 {
            return Err(Error::InvalidConstraint("buffer limit must be positive"));
        }

        Ok(Self {
            bandwidth: options.bandwidth,
            link,
            limit: options.limit,
            separate: options.separate,
            classes: ClassTable::default(),
            classifier: Classifier::new(),
            len: 0,
            last_update: 0,
            polled: None,
            unclassified: PktCounter::default(),
            total_enqueued: 0,
            total_dequeued: 0,
            enqueue_cycles: CycleCounter::default(),
            dequeue_cycles: CycleCounter::default(),
        })
    }

    /// Current service rate of a class, in bytes per nanosecond.
    pub fn service_rate(&self, class: ClassHandle) -> Option<Rate> {
        self.classes.by_handle(class).map(|c| c.rate)
    }

    pub fn filters(&self) -> usize {
        self.classifier.len()
    }

    fn new_epoch(&mut self, now: u64) {
        for (_, c) in self.classes.iter_mut() {
            c.reset_epoch(now);
            c.rate = Rate::ZERO;
        }
        self.last_update = now;
        trace!(now, "new epoch");
    }

    fn enqueue_inner(&mut self, mut pkt: Packet, now: u64) -> Enqueue {
        let Some(pri) = self.classes.resolve(pkt.class()) else {
            warn!(len = pkt.len(), "unclassified packet and no default class, dropping");
            self.unclassified.add(pkt.len());
            return Enqueue::Dropped(DropReason::Unclassified);
        };
        if self.len == 0 {
            self.new_epoch(now);
        }

        let len = pkt.len();
        let overflow = self.classes.get(pri).is_some_and(|c| {
            c.arrival.bytes().saturating_add(len as u64) > EPOCH_BYTES_MAX
        });
        if overflow {
            debug!(pri, "epoch byte counters exhausted, restarting epoch");
            for (_, c) in self.classes.iter_mut() {
                c.reset_epoch(now);
            }
            self.last_update = now;
        }

        let Some(class) = self.classes.get_mut(pri) else {
            return Enqueue::Dropped(DropReason::Unclassified);
        };
        class.count_arrival(len);
        if class.clear_dscp {
            clear_dsfield(&mut pkt);
        }

        self.advance_curves(now);
        let outcome = self.addq(pri, pkt, now);

        self.enforce_wc();
        if !self.min_rates_adc(now) {
            self.assign_rate_drops_adc(now);
        }
        self.adjust_rates_rdc(now);
        self.enforce_wc();

        if outcome.is_queued() {
            self.total_enqueued += 1;
        }
        outcome
    }

    /// The backlogged class furthest behind its output curve. Ties go to the higher priority.
    fn select(&self) -> Option<usize> {
        let mut best: Option<(usize, i128)> = None;
        for (pri, c) in self.classes.iter().rev().filter(|(_, c)| c.is_backlogged()) {
            let error = c.rout_th - ((c.rout.bytes() as i128) << SCALE_RATE);
            if best.map_or(true, |(_, e)| error > e) {
                best = Some((pri, error));
            }
        }
        best.map(|(pri, _)| pri)
    }

    fn dequeue_inner(&mut self, op: DequeueOp, now: u64) -> Option<Packet> {
        if self.len == 0 {
            for (_, c) in self.classes.iter_mut() {
                c.idletime = now;
            }
            self.polled = None;
            return None;
        }

        self.advance_curves(now);
        let polled = self.polled.take().filter(|&p| {
            self.classes.get(p).is_some_and(|c| c.is_backlogged())
        });
        let pri = polled.or_else(|| self.select())?;
        let class = self.classes.get_mut(pri)?;

        match op {
            DequeueOp::Poll => {
                self.polled = Some(pri);
                class.queue.front().map(|(p, _)| p.clone())
            }
            DequeueOp::Remove => {
                let pkt = class.pop(now)?;
                let emptied = !class.is_backlogged();
                self.len -= 1;
                self.total_dequeued += 1;
                if emptied {
                    self.release_rate(pri);
                }
                trace!(pri, len = pkt.len(), "dequeued");
                Some(pkt)
            }
        }
    }

    fn class_stats(&self, pri: usize, c: &JobsClass) -> JobsClassStats {
        JobsClassStats {
            handle: c.handle,
            pri: pri as u8,
            qlength: c.queue.len(),
            qbytes: c.qbytes,
            qlimit: c.limit.unwrap_or(self.limit),
            period: c.period,
            arrival: c.st_arrival,
            rin: c.st_rin,
            rout: c.st_rout,
            dropped: c.st_dropped,
            lastdel: Duration::from_nanos(c.lastdel),
            avgdel: Duration::from_nanos(c.avg_delay()),
            adc_violations: c.adc_violations,
            service_rate: rate_to_bps(c.rate),
            current_loss: c.loss,
            min_rate_adc: rate_to_bps(c.min_rate_adc),
        }
    }
}

impl Discipline for Jobs {
    fn kind(&self) -> DisciplineKind {
        DisciplineKind::Jobs
    }

    fn enqueue(&mut self, pkt: Packet, now: u64) -> Enqueue {
        let started = Instant::now();
        let outcome = self.enqueue_inner(pkt, now);
        self.enqueue_cycles.record(started.elapsed());
        outcome
    }

    fn dequeue(&mut self, op: DequeueOp, now: u64) -> Option<Packet> {
        let started = Instant::now();
        let pkt = self.dequeue_inner(op, now);
        self.dequeue_cycles.record(started.elapsed());
        pkt
    }

    fn purge(&mut self) {
        for (_, c) in self.classes.iter_mut() {
            c.purge();
            c.rate = Rate::ZERO;
            c.min_rate_adc = Rate::ZERO;
        }
        self.len = 0;
        self.polled = None;
    }

    fn len(&self) -> usize {
        self.len
    }

    fn classify(&mut self, pkt: &Packet) -> Option<ClassHandle> {
        self.classifier.classify(pkt)
    }

    fn check_enable(&self) -> std::result::Result<(), Box<dyn StdError + Send + Sync>> {
        match self.classes.default_slot() {
            Some(_) => Ok(()),
            None => Err(Box::new(Error::NoDefaultClass)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Classful for Jobs {
    type Options = JobsOptions;
    type ClassOptions = JobsClassOptions;
    type Stats = JobsStats;

    fn create(options: JobsOptions) -> Result<Self> {
        Self::new(options)
    }

    fn add_class(&mut self, options: JobsClassOptions) -> Result<ClassHandle> {
        let cons = options.constraints(self.bandwidth)?;
        let (pri, default) = (options.pri(), options.is_default());
        let handle =
            self.classes.insert(pri, default, |handle| JobsClass::new(handle, &options, cons))?;
        self.recompute_products();
        debug!(pri, default, ?handle, ?cons, "jobs class created");
        Ok(handle)
    }

    fn modify_class(&mut self, class: ClassHandle, options: JobsClassOptions) -> Result<()> {
        let cons = options.constraints(self.bandwidth)?;
        let from = self.classes.pri_of(class)?;
        let to = self.classes.relocate(class, options.pri(), options.is_default())?;

        if let Some(c) = self.classes.get_mut(to) {
            self.len -= c.purge();
            c.configure(&options, cons);
        }
        self.polled = None;
        self.release_rate(to);
        self.recompute_products();
        debug!(from, to, ?class, ?cons, "jobs class modified");
        Ok(())
    }

    fn delete_class(&mut self, class: ClassHandle) -> Result<()> {
        let pri = self.classes.pri_of(class)?;
        if let Some(c) = self.classes.get_mut(pri) {
            self.len -= c.purge();
        }
        self.polled = None;
        self.release_rate(pri);
        self.classes.remove(class)?;
        let filters = self.classifier.discard_class(class);
        self.recompute_products();
        debug!(pri, ?class, filters, "jobs class destroyed");
        Ok(())
    }

    fn add_filter(&mut self, class: ClassHandle, filter: FlowFilter) -> Result<FilterHandle> {
        self.classes.pri_of(class)?;
        let handle = self.classifier.add_filter(filter, class)?;
        debug!(?class, ?handle, "jobs filter added");
        Ok(handle)
    }

    fn delete_filter(&mut self, filter: FilterHandle) -> Result<()> {
        self.classifier.delete_filter(filter)?;
        debug!(handle = ?filter, "jobs filter deleted");
        Ok(())
    }

    fn clear(&mut self) {
        self.classifier.clear();
        let purged: usize = self.classes.clear().iter().map(|c| c.queue.len()).sum();
        self.len = 0;
        self.polled = None;
        debug!(purged, "jobs cleared");
    }

    fn stats(&self) -> JobsStats {
        JobsStats {
            bandwidth: self.bandwidth,
            limit: self.limit,
            separate: self.separate,
            qlength: self.len,
            unclassified_drops: self.unclassified,
            total_enqueued: self.total_enqueued,
            total_dequeued: self.total_dequeued,
            cycles: CycleStats {
                wc_cycles_enqueue: self.enqueue_cycles.worst(),
                avg_cycles_enqueue: self.enqueue_cycles.average(),
                wc_cycles_dequeue: self.dequeue_cycles.worst(),
                avg_cycles_dequeue: self.dequeue_cycles.average(),
            },
            classes: self.classes.iter().map(|(pri, c)| self.class_stats(pri, c)).collect(),
        }
    }
}
