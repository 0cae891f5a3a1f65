use std::{any::Any, error::Error, fmt, time::Duration};

use altq_wire::{ClassHandle, Packet};

/// Which queueing discipline an instance implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisciplineKind {
    Priq,
    Jobs,
}

impl fmt::Display for DisciplineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Priq => f.write_str("priq"),
            Self::Jobs => f.write_str("jobs"),
        }
    }
}

/// Dequeue operation. `Poll` peeks at the packet `Remove` would return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueOp {
    Poll,
    Remove,
}

/// Why a packet was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The class or interface queue was at its limit.
    QueueFull,
    /// No filter matched and no default class exists.
    Unclassified,
    /// The class's admission policy refused the packet.
    Admission,
}

/// Outcome of an enqueue. Drops are not errors: they are counted and never signalled further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Enqueue {
    Queued,
    Dropped(DropReason),
}

impl Enqueue {
    #[inline]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// Outcome of a dequeue at the interface.
#[derive(Debug, Clone)]
pub enum Dequeue {
    Packet(Packet),
    Empty,
    /// The token-bucket regulator holds the head packet back. Retry after the given delay.
    Throttled { retry_after: Duration },
}

impl Dequeue {
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            Self::Packet(p) => Some(p),
            _ => None,
        }
    }

    #[inline]
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}

/// A queueing discipline that can be attached to an interface output queue.
///
/// All methods run under the interface lock, so implementations never need interior
/// synchronisation. `now` is the interface clock reading in nanoseconds.
pub trait Discipline: Send + fmt::Debug + 'static {
    fn kind(&self) -> DisciplineKind;

    fn enqueue(&mut self, pkt: Packet, now: u64) -> Enqueue;

    /// Selects the next packet. `Poll` must return the packet a directly following `Remove`
    /// returns.
    fn dequeue(&mut self, op: DequeueOp, now: u64) -> Option<Packet>;

    /// Drops every queued packet.
    fn purge(&mut self);

    /// Total number of queued packets.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pre-classifies a packet before it is handed to [`Discipline::enqueue`]. Called once per
    /// packet that carries no class yet; `enqueue` then only reads [`Packet::class`].
    fn classify(&mut self, _pkt: &Packet) -> Option<ClassHandle> {
        None
    }

    /// Whether the discipline can be enabled in its current configuration.
    fn check_enable(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
