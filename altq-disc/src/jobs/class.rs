use std::{collections::VecDeque, time::Duration};

use altq_common::{duration_nanos, Loss, Rate};
use altq_queue::PktCounter;
use altq_wire::{ClassHandle, Packet};

use crate::{Error, Result};

/// Options of a JoBS class.
///
/// Every constraint is optional. An unset constraint is neither enforced nor taken into
/// account when the other classes' constraints are computed.
#[derive(Debug, Clone)]
pub struct JobsClassOptions {
    pri: u8,
    limit: Option<usize>,
    default: bool,
    clear_dscp: bool,
    adc: Option<Duration>,
    alc: Option<Loss>,
    arc: Option<u64>,
    rdc: Option<u32>,
    rlc: Option<u32>,
}

impl JobsClassOptions {
    pub fn new(pri: u8) -> Self {
        Self {
            pri,
            limit: None,
            default: false,
            clear_dscp: false,
            adc: None,
            alc: None,
            arc: None,
            rdc: None,
            rlc: None,
        }
    }

    /// Caps the class queue, in packets. Without a cap the class may use the whole interface
    /// buffer.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
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

    /// Absolute delay constraint: no packet should wait longer than `delay`.
    pub fn adc(mut self, delay: Duration) -> Self {
        self.adc = Some(delay);
        self
    }

    /// Absolute loss constraint: the fraction of bytes dropped stays at or below `loss`.
    pub fn alc(mut self, loss: Loss) -> Self {
        self.alc = Some(loss);
        self
    }

    /// Absolute rate constraint: while backlogged the class is served at `bps` or more.
    pub fn arc(mut self, bps: u64) -> Self {
        self.arc = Some(bps);
        self
    }

    /// Relative delay constraint. Delays of RDC classes are driven toward the ratios of their
    /// weights: a class of weight 2 waits twice as long as a class of weight 1.
    pub fn rdc(mut self, weight: u32) -> Self {
        self.rdc = Some(weight);
        self
    }

    /// Relative loss constraint. Losses of RLC classes are driven toward the ratios of their
    /// weights.
    pub fn rlc(mut self, weight: u32) -> Self {
        self.rlc = Some(weight);
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

    /// Validates the constraints against a link of `bandwidth` bits per second.
    pub(super) fn constraints(&self, bandwidth: u64) -> Result<Constraints> {
        if self.limit == Some(0) {
            return Err(Error::InvalidConstraint("queue limit must be positive"));
        }
        if self.adc.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidConstraint("delay bound must be positive"));
        }
        if self.alc.is_some_and(|l| l < Loss::ZERO || l > Loss::ONE) {
            return Err(Error::InvalidConstraint("loss bound must lie in [0, 1]"));
        }
        match self.arc {
            Some(0) => return Err(Error::InvalidConstraint("rate bound must be positive")),
            Some(bps) if bps > bandwidth => {
                return Err(Error::InvalidConstraint("rate bound exceeds the link bandwidth"))
            }
            _ => {}
        }
        if self.rdc == Some(0) || self.rlc == Some(0) {
            return Err(Error::InvalidConstraint("relative weights must be positive"));
        }

        Ok(Constraints {
            adc: self.adc.map(duration_nanos),
            alc: self.alc,
            arc: self.arc,
            rdc: self.rdc,
            rlc: self.rlc,
        })
    }
}

/// Validated constraints of a class.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Constraints {
    /// Delay bound, nanoseconds.
    pub(super) adc: Option<u64>,
    pub(super) alc: Option<Loss>,
    /// Rate bound, bits per second.
    pub(super) arc: Option<u64>,
    pub(super) rdc: Option<u32>,
    pub(super) rlc: Option<u32>,
}

#[derive(Debug)]
pub(super) struct JobsClass {
    pub(super) handle: ClassHandle,
    /// Queued packets with their arrival time.
    pub(super) queue: VecDeque<(Packet, u64)>,
    pub(super) qbytes: u64,
    pub(super) limit: Option<usize>,
    pub(super) clear_dscp: bool,
    pub(super) cons: Constraints,

    // Counters of the current epoch. `rin` counts accepted traffic; a queued packet dropped
    // later on is taken back out.
    pub(super) arrival: PktCounter,
    pub(super) rin: PktCounter,
    pub(super) rout: PktCounter,
    pub(super) dropped: PktCounter,

    // Cumulative counters.
    pub(super) st_arrival: PktCounter,
    pub(super) st_rin: PktCounter,
    pub(super) st_rout: PktCounter,
    pub(super) st_dropped: PktCounter,

    /// Promised output curve: bytes owed since the epoch started, at rate scale.
    pub(super) rout_th: i128,
    pub(super) rate: Rate,
    /// Smallest rate meeting the ADC and ARC of the class.
    pub(super) min_rate_adc: Rate,
    pub(super) loss: Loss,
    /// Product of the RDC weights of every other RDC class.
    pub(super) delay_prod_others: i64,
    /// Product of the RLC weights of every other RLC class.
    pub(super) loss_prod_others: i64,

    pub(super) idletime: u64,
    pub(super) period: u64,
    pub(super) lastdel: u64,
    delay_sum: u128,
    delay_count: u64,
    pub(super) adc_violations: u64,
}

impl JobsClass {
    pub(super) fn new(handle: ClassHandle, options: &JobsClassOptions, cons: Constraints) -> Self {
        Self {
            handle,
            queue: VecDeque::new(),
            qbytes: 0,
            limit: options.limit,
            clear_dscp: options.clear_dscp,
            cons,
            arrival: PktCounter::default(),
            rin: PktCounter::default(),
            rout: PktCounter::default(),
            dropped: PktCounter::default(),
            st_arrival: PktCounter::default(),
            st_rin: PktCounter::default(),
            st_rout: PktCounter::default(),
            st_dropped: PktCounter::default(),
            rout_th: 0,
            rate: Rate::ZERO,
            min_rate_adc: Rate::ZERO,
            loss: Loss::ZERO,
            delay_prod_others: 1,
            loss_prod_others: 1,
            idletime: 0,
            period: 0,
            lastdel: 0,
            delay_sum: 0,
            delay_count: 0,
            adc_violations: 0,
        }
    }

    pub(super) fn configure(&mut self, options: &JobsClassOptions, cons: Constraints) {
        self.limit = options.limit;
        self.clear_dscp = options.clear_dscp;
        self.cons = cons;
    }

    #[inline]
    pub(super) fn is_backlogged(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Starts a new measurement epoch.
    pub(super) fn reset_epoch(&mut self, now: u64) {
        self.arrival.reset();
        self.rin.reset();
        self.rout.reset();
        self.dropped.reset();
        self.rout_th = 0;
        self.loss = Loss::ZERO;
        self.idletime = now;
    }

    /// Counts an arrival. The packet is taken as accepted until it is dropped.
    pub(super) fn count_arrival(&mut self, len: usize) {
        self.arrival.add(len);
        self.st_arrival.add(len);
        self.rin.add(len);
        self.st_rin.add(len);
        self.refresh_loss();
    }

    /// Counts the drop of a packet previously counted as accepted.
    pub(super) fn count_drop(&mut self, len: usize) {
        self.rin.sub(len);
        self.st_rin.sub(len);
        self.dropped.add(len);
        self.st_dropped.add(len);
        self.refresh_loss();
    }

    fn loss_of(arrived: u64, accepted: u64) -> Loss {
        if arrived == 0 {
            return Loss::ZERO;
        }
        let lost = arrived.saturating_sub(accepted);
        // Saturates just below one.
        Loss::from_ratio(lost as i128, arrived as i128).min(Loss::from_raw(Loss::ONE.raw() - 1))
    }

    pub(super) fn refresh_loss(&mut self) {
        self.loss = Self::loss_of(self.arrival.bytes(), self.rin.bytes());
    }

    /// The loss the class would have after dropping `len` more accepted bytes.
    pub(super) fn loss_if_dropped(&self, len: usize) -> Loss {
        Self::loss_of(self.arrival.bytes(), self.rin.bytes().saturating_sub(len as u64))
    }

    /// Whether dropping `len` more bytes would push the class past its loss bound.
    pub(super) fn would_breach_alc(&self, len: usize) -> bool {
        self.cons.alc.is_some_and(|alc| self.loss_if_dropped(len) > alc)
    }

    #[inline]
    pub(super) fn tail_len(&self) -> Option<usize> {
        self.queue.back().map(|(p, _)| p.len())
    }

    pub(super) fn push(&mut self, pkt: Packet, now: u64) {
        self.qbytes += pkt.len() as u64;
        self.queue.push_back((pkt, now));
    }

    /// Drops the packet at the tail of the queue.
    pub(super) fn drop_tail(&mut self) -> Option<Packet> {
        let (pkt, _) = self.queue.pop_back()?;
        self.qbytes -= pkt.len() as u64;
        self.count_drop(pkt.len());
        Some(pkt)
    }

    /// Removes the head packet for transmission and records its queueing delay.
    pub(super) fn pop(&mut self, now: u64) -> Option<Packet> {
        let (pkt, ts) = self.queue.pop_front()?;
        self.qbytes -= pkt.len() as u64;
        self.rout.add(pkt.len());
        self.st_rout.add(pkt.len());

        let delay = now.saturating_sub(ts);
        self.lastdel = delay;
        self.delay_sum += delay as u128;
        self.delay_count += 1;
        if self.cons.adc.is_some_and(|adc| delay > adc) {
            self.adc_violations += 1;
        }

        if self.queue.is_empty() {
            self.period += 1;
        }
        Some(pkt)
    }

    /// Drops every queued packet. Returns how many were dropped.
    pub(super) fn purge(&mut self) -> usize {
        let n = self.queue.len();
        while self.drop_tail().is_some() {}
        n
    }

    /// How long the head packet has been waiting.
    #[inline]
    pub(super) fn head_delay(&self, now: u64) -> u64 {
        self.queue.front().map_or(0, |(_, ts)| now.saturating_sub(*ts))
    }

    /// Head delay divided by the class's own weight, scaled by the product of all RDC weights.
    pub(super) fn weighted_delay(&self, now: u64) -> i128 {
        (self.head_delay(now) as i128).saturating_mul(self.delay_prod_others as i128)
    }

    /// Loss divided by the class's own weight, scaled by the product of all RLC weights.
    pub(super) fn weighted_loss(&self) -> i128 {
        (self.loss.raw() as i128).saturating_mul(self.loss_prod_others as i128)
    }

    /// Average queueing delay of transmitted packets, nanoseconds.
    pub(super) fn avg_delay(&self) -> u64 {
        if self.delay_count == 0 {
            return 0;
        }
        (self.delay_sum / self.delay_count as u128) as u64
    }
}

#[cfg(test)]
mod tests {
    use altq_common::Arena;

    use super::*;

    fn class(options: JobsClassOptions) -> JobsClass {
        let mut arena = Arena::new();
        let cons = options.constraints(1_000_000).unwrap();
        JobsClass::new(ClassHandle::new(arena.insert(())), &options, cons)
    }

    #[test]
    fn rejects_bad_constraints() {
        let bad = [
            JobsClassOptions::new(0).limit(0),
            JobsClassOptions::new(0).adc(Duration::ZERO),
            JobsClassOptions::new(0).alc(Loss::from_ratio(3, 2)),
            JobsClassOptions::new(0).arc(0),
            JobsClassOptions::new(0).arc(2_000_000),
            JobsClassOptions::new(0).rdc(0),
            JobsClassOptions::new(0).rlc(0),
        ];
        for options in bad {
            assert!(
                matches!(options.constraints(1_000_000), Err(Error::InvalidConstraint(_))),
                "{options:?}"
            );
        }
    }

    #[test]
    fn loss_tracks_counters() {
        let mut c = class(JobsClassOptions::new(0).alc(Loss::from_ratio(1, 4)));
        for _ in 0..4 {
            c.count_arrival(100);
            c.push(Packet::opaque(100), 0);
        }
        assert_eq!(c.loss, Loss::ZERO);
        assert!(!c.would_breach_alc(100));

        c.drop_tail().unwrap();
        assert_eq!(c.loss, Loss::from_ratio(1, 4));
        assert_eq!(c.qbytes, 300);
        assert!(c.would_breach_alc(100));

        c.reset_epoch(10);
        assert_eq!(c.loss, Loss::ZERO);
        assert_eq!(c.st_dropped.packets(), 1);
    }

    #[test]
    fn loss_saturates_below_one() {
        let mut c = class(JobsClassOptions::new(0));
        c.count_arrival(100);
        c.count_drop(100);
        assert!(c.loss < Loss::ONE);
        assert!(c.loss > Loss::from_ratio(99, 100));
    }

    #[test]
    fn pop_records_delay() {
        let mut c = class(JobsClassOptions::new(0).adc(Duration::from_nanos(50)));
        c.push(Packet::opaque(10), 0);
        c.push(Packet::opaque(10), 0);

        assert_eq!(c.head_delay(30), 30);
        c.pop(30).unwrap();
        c.pop(100).unwrap();
        assert_eq!(c.lastdel, 100);
        assert_eq!(c.avg_delay(), 65);
        assert_eq!(c.adc_violations, 1);
        assert_eq!(c.period, 1);
    }
}
