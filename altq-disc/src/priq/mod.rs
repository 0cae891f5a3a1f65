//! Strict priority queueing.
//!
//! Each class owns a FIFO at a unique priority. Dequeue always serves the non-empty class with
//! the highest priority; lower classes get nothing while a higher one has traffic.

use std::{any::Any, error::Error as StdError};

use altq_classifier::{Classifier, FilterHandle, FlowFilter};
use altq_queue::{DequeueOp, Discipline, DisciplineKind, DropReason, Enqueue, PktCounter};
use altq_wire::{clear_dsfield, ClassHandle, Packet};
use tracing::{debug, trace, warn};

use crate::{table::ClassTable, Classful, Error, Result};

mod class;
use class::PriqClass;
pub use class::PriqClassOptions;

mod stats;
pub use stats::{PriqClassStats, PriqStats};

/// Number of priority slots.
pub const PRIQ_MAXPRI: usize = 16;

/// Interface-level PRIQ options.
#[derive(Debug, Clone, Default)]
pub struct PriqOptions {
    /// Link bandwidth in bits per second. Informational only.
    bandwidth: u64,
}

impl PriqOptions {
    pub fn bandwidth(mut self, bps: u64) -> Self {
        self.bandwidth = bps;
        self
    }
}

/// A PRIQ instance.
#[derive(Debug)]
pub struct Priq {
    bandwidth: u64,
    classes: ClassTable<PriqClass, PRIQ_MAXPRI>,
    classifier: Classifier<ClassHandle>,
    /// Packets queued over all classes.
    len: usize,
    unclassified: PktCounter,
}

impl Priq {
    pub fn new(options: PriqOptions) -> Self {
        Self {
            bandwidth: options.bandwidth,
            classes: ClassTable::default(),
            classifier: Classifier::new(),
            len: 0,
            unclassified: PktCounter::default(),
        }
    }

    /// Number of filters installed.
    pub fn filters(&self) -> usize {
        self.classifier.len()
    }

    fn drop_class_queue(&mut self, pri: usize) {
        if let Some(class) = self.classes.get_mut(pri) {
            self.len -= class.purge();
        }
    }
}

impl Discipline for Priq {
    fn kind(&self) -> DisciplineKind {
        DisciplineKind::Priq
    }

    fn enqueue(&mut self, mut pkt: Packet, _now: u64) -> Enqueue {
        let Some(pri) = self.classes.resolve(pkt.class()) else {
            warn!(len = pkt.len(), "unclassified packet and no default class, dropping");
            self.unclassified.add(pkt.len());
            return Enqueue::Dropped(DropReason::Unclassified);
        };
        let Some(class) = self.classes.get_mut(pri) else {
            return Enqueue::Dropped(DropReason::Unclassified);
        };

        class.arrivals.add(pkt.len());
        let qlen = class.queue.len();
        if !class.admission.admit(&pkt, qlen, class.limit) {
            class.dropped.add(pkt.len());
            let reason =
                if qlen >= class.limit { DropReason::QueueFull } else { DropReason::Admission };
            trace!(pri, len = pkt.len(), ?reason, "dropped");
            return Enqueue::Dropped(reason);
        }

        if class.clear_dscp {
            clear_dsfield(&mut pkt);
        }
        class.queue.push_back(pkt);
        self.len += 1;
        Enqueue::Queued
    }

    fn dequeue(&mut self, op: DequeueOp, _now: u64) -> Option<Packet> {
        if self.len == 0 {
            return None;
        }

        let (pri, class) = self.classes.iter_mut().rev().find(|(_, c)| !c.queue.is_empty())?;
        match op {
            DequeueOp::Poll => class.queue.front().cloned(),
            DequeueOp::Remove => {
                let pkt = class.queue.pop_front()?;
                class.xmit.add(pkt.len());
                if class.queue.is_empty() {
                    class.period += 1;
                }
                self.len -= 1;
                trace!(pri, len = pkt.len(), "dequeued");
                Some(pkt)
            }
        }
    }

    fn purge(&mut self) {
        for (_, class) in self.classes.iter_mut() {
            class.purge();
        }
        self.len = 0;
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

impl Classful for Priq {
    type Options = PriqOptions;
    type ClassOptions = PriqClassOptions;
    type Stats = PriqStats;

    fn create(options: PriqOptions) -> Result<Self> {
        Ok(Self::new(options))
    }

    fn add_class(&mut self, options: PriqClassOptions) -> Result<ClassHandle> {
        let (pri, default) = (options.pri(), options.is_default());
        let handle =
            self.classes.insert(pri, default, |handle| PriqClass::new(handle, options))?;
        debug!(pri, default, ?handle, "priq class created");
        Ok(handle)
    }

    fn modify_class(&mut self, class: ClassHandle, options: PriqClassOptions) -> Result<()> {
        let from = self.classes.pri_of(class)?;
        let to = self.classes.relocate(class, options.pri(), options.is_default())?;
        // Queued packets belong to the old configuration.
        self.drop_class_queue(to);
        if let Some(c) = self.classes.get_mut(to) {
            c.configure(options);
        }
        debug!(from, to, ?class, "priq class modified");
        Ok(())
    }

    fn delete_class(&mut self, class: ClassHandle) -> Result<()> {
        let pri = self.classes.pri_of(class)?;
        self.drop_class_queue(pri);
        self.classes.remove(class)?;
        let filters = self.classifier.discard_class(class);
        debug!(pri, ?class, filters, "priq class destroyed");
        Ok(())
    }

    fn add_filter(&mut self, class: ClassHandle, filter: FlowFilter) -> Result<FilterHandle> {
        self.classes.pri_of(class)?;
        let handle = self.classifier.add_filter(filter, class)?;
        debug!(?class, ?handle, "priq filter added");
        Ok(handle)
    }

    fn delete_filter(&mut self, filter: FilterHandle) -> Result<()> {
        self.classifier.delete_filter(filter)?;
        debug!(handle = ?filter, "priq filter deleted");
        Ok(())
    }

    fn clear(&mut self) {
        self.classifier.clear();
        let purged: usize = self.classes.clear().iter().map(|c| c.queue.len()).sum();
        self.len = 0;
        debug!(purged, "priq cleared");
    }

    fn stats(&self) -> PriqStats {
        let classes = self
            .classes
            .iter()
            .map(|(pri, c)| PriqClassStats {
                handle: c.handle,
                pri: pri as u8,
                qlength: c.queue.len(),
                qlimit: c.limit,
                period: c.period,
                arrivals: c.arrivals,
                xmit: c.xmit,
                dropped: c.dropped,
                admission: c.admission.name(),
            })
            .collect();

        PriqStats {
            bandwidth: self.bandwidth,
            qlength: self.len,
            unclassified_drops: self.unclassified,
            classes,
        }
    }
}
