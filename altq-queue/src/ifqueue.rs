use std::collections::VecDeque;

use altq_wire::Packet;
use tracing::{debug, trace};

use crate::{
    Dequeue, DequeueOp, Discipline, DropReason, Enqueue, Error, PktCounter, Result, TbrProfile,
    TbrStatus, TokenBucket,
};

/// Default capacity of the plain FIFO.
pub const IFQ_MAXLEN: usize = 50;

/// How [`IfQueue::attach`] treats an already attached discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachMode {
    /// Refuse if a discipline is attached.
    #[default]
    Exclusive,
    /// Replace a disabled discipline.
    Replace,
}

/// An interface output queue.
///
/// While no discipline is enabled, packets go through a bounded FIFO. Enabling or disabling a
/// discipline purges whatever was queued under the previous regime, so the queue length is
/// zero right after either transition.
#[derive(Debug)]
pub struct IfQueue {
    ready: bool,
    discipline: Option<Box<dyn Discipline>>,
    /// Whether the discipline intercepts the queue and pre-classifies packets.
    enabled: bool,
    fifo: VecDeque<Packet>,
    maxlen: usize,
    fifo_drops: PktCounter,
    tbr: Option<TokenBucket>,
}

impl Default for IfQueue {
    fn default() -> Self {
        Self::new(IFQ_MAXLEN)
    }
}

impl IfQueue {
    pub fn new(maxlen: usize) -> Self {
        Self {
            ready: true,
            discipline: None,
            enabled: false,
            fifo: VecDeque::with_capacity(maxlen),
            maxlen,
            fifo_drops: PktCounter::default(),
            tbr: None,
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Marks the queue (un)usable, e.g. when the link goes down.
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.discipline.is_some()
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn discipline(&self) -> Option<&dyn Discipline> {
        self.discipline.as_deref()
    }

    pub fn discipline_mut(&mut self) -> Option<&mut (dyn Discipline + 'static)> {
        self.discipline.as_deref_mut()
    }

    /// Packets dropped by the plain FIFO.
    pub fn fifo_drops(&self) -> PktCounter {
        self.fifo_drops
    }

    /// Installs a discipline. It stays inactive until [`IfQueue::enable`].
    pub fn attach(&mut self, disc: Box<dyn Discipline>, mode: AttachMode) -> Result<()> {
        if !self.ready {
            return Err(Error::NotReady);
        }
        if self.enabled {
            return Err(Error::Busy);
        }
        if self.discipline.is_some() && mode == AttachMode::Exclusive {
            return Err(Error::AlreadyAttached);
        }

        debug!(kind = %disc.kind(), "attaching discipline");
        self.discipline = Some(disc);
        Ok(())
    }

    /// Removes the attached discipline and returns it.
    pub fn detach(&mut self) -> Result<Box<dyn Discipline>> {
        if self.enabled {
            return Err(Error::Busy);
        }
        let disc = self.discipline.take().ok_or(Error::NotAttached)?;
        debug!(kind = %disc.kind(), "detached discipline");
        Ok(disc)
    }

    /// Switches the queue over to the attached discipline. No-op if already enabled.
    pub fn enable(&mut self) -> Result<()> {
        if !self.ready {
            return Err(Error::NotReady);
        }
        if self.enabled {
            return Ok(());
        }
        let disc = self.discipline.as_deref().ok_or(Error::NotAttached)?;
        disc.check_enable().map_err(Error::Discipline)?;

        self.purge();
        self.enabled = true;
        debug_assert_eq!(self.len(), 0);
        debug!("discipline enabled");
        Ok(())
    }

    /// Reverts the queue to the plain FIFO. No-op if not enabled.
    pub fn disable(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        self.purge();
        self.enabled = false;
        debug!("discipline disabled");
        Ok(())
    }

    pub fn enqueue(&mut self, mut pkt: Packet, now: u64) -> Enqueue {
        if let (true, Some(disc)) = (self.enabled, self.discipline.as_deref_mut()) {
            if pkt.class().is_none() {
                let class = disc.classify(&pkt);
                pkt.set_class(class);
            }
            return disc.enqueue(pkt, now);
        }

        if self.fifo.len() >= self.maxlen {
            trace!(len = pkt.len(), "fifo full, dropping");
            self.fifo_drops.add(pkt.len());
            return Enqueue::Dropped(DropReason::QueueFull);
        }
        self.fifo.push_back(pkt);
        Enqueue::Queued
    }

    fn raw_dequeue(&mut self, op: DequeueOp, now: u64) -> Option<Packet> {
        if let (true, Some(disc)) = (self.enabled, self.discipline.as_deref_mut()) {
            return disc.dequeue(op, now);
        }
        match op {
            DequeueOp::Poll => self.fifo.front().cloned(),
            DequeueOp::Remove => self.fifo.pop_front(),
        }
    }

    /// Dequeues through the token-bucket regulator, if one is installed.
    pub fn dequeue(&mut self, op: DequeueOp, now: u64) -> Dequeue {
        let Some(mut tbr) = self.tbr.take() else {
            return self.raw_dequeue(op, now).map_or(Dequeue::Empty, Dequeue::Packet);
        };
        let out = self.regulated_dequeue(&mut tbr, op, now);
        self.tbr = Some(tbr);
        out
    }

    fn regulated_dequeue(&mut self, tbr: &mut TokenBucket, op: DequeueOp, now: u64) -> Dequeue {
        let pkt = if tbr.completes_poll(op) {
            self.raw_dequeue(op, now)
        } else {
            let Some(head) = self.raw_dequeue(DequeueOp::Poll, now) else {
                tbr.set_last_op(op);
                return Dequeue::Empty;
            };
            if let TbrStatus::NotYet(retry_after) = tbr.check(now, head.len()) {
                trace!(len = head.len(), ?retry_after, "token bucket throttled");
                return Dequeue::Throttled { retry_after };
            }
            match op {
                DequeueOp::Poll => Some(head),
                DequeueOp::Remove => self.raw_dequeue(op, now),
            }
        };

        if let (Some(p), DequeueOp::Remove) = (&pkt, op) {
            tbr.debit(p.len());
        }
        tbr.set_last_op(op);
        pkt.map_or(Dequeue::Empty, Dequeue::Packet)
    }

    /// Drops every queued packet.
    pub fn purge(&mut self) {
        if let (true, Some(disc)) = (self.enabled, self.discipline.as_deref_mut()) {
            disc.purge();
        }
        self.fifo.clear();
    }

    pub fn len(&self) -> usize {
        match (self.enabled, self.discipline.as_deref()) {
            (true, Some(disc)) => disc.len(),
            _ => self.fifo.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Installs or replaces the regulator. A zero rate removes it.
    pub fn set_tbr(&mut self, profile: TbrProfile, now: u64) -> Result<()> {
        if profile.rate == 0 {
            return self.tbr.take().map(|_| ()).ok_or(Error::NoRegulator);
        }
        self.tbr = Some(TokenBucket::new(profile, now)?);
        Ok(())
    }

    pub fn tbr(&self) -> Option<&TokenBucket> {
        self.tbr.as_ref()
    }
}
