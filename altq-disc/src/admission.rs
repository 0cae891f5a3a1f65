use std::fmt;

use altq_wire::Packet;

/// Admission policy of a class queue.
///
/// Drop-tail is built in. Active queue management schemes (RED, RIO) plug in here; a policy
/// only decides whether an arriving packet joins the queue, it never touches queued packets.
pub trait Admission: Send + fmt::Debug {
    /// Whether `pkt` may join a queue that currently holds `qlen` packets out of `limit`.
    fn admit(&mut self, pkt: &Packet, qlen: usize, limit: usize) -> bool;

    /// Short name for statistics and logs.
    fn name(&self) -> &'static str;
}

/// Accepts packets until the queue reaches its limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropTail;

impl Admission for DropTail {
    #[inline]
    fn admit(&mut self, _pkt: &Packet, qlen: usize, limit: usize) -> bool {
        qlen < limit
    }

    fn name(&self) -> &'static str {
        "droptail"
    }
}
