use std::{fmt, sync::Arc};

use altq_common::Clock;
use altq_wire::Packet;
use parking_lot::Mutex;

use crate::{Dequeue, DequeueOp, Enqueue, IfQueue, IFQ_MAXLEN};

/// Transmit-start routine of an interface: called when queued packets may be sent, e.g. by
/// the token-bucket timer once tokens are available again.
pub type StartFn = Arc<dyn Fn(&Interface) + Send + Sync>;

/// Options for a new [`Interface`].
#[derive(Clone)]
pub struct InterfaceOptions {
    /// Capacity of the plain FIFO used while no discipline is enabled.
    maxlen: usize,
    /// Whether the output queue accepts a discipline right away.
    ready: bool,
    /// The transmit-start routine.
    start: Option<StartFn>,
}

impl Default for InterfaceOptions {
    fn default() -> Self {
        Self { maxlen: IFQ_MAXLEN, ready: true, start: None }
    }
}

impl fmt::Debug for InterfaceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceOptions")
            .field("maxlen", &self.maxlen)
            .field("ready", &self.ready)
            .field("start", &self.start.is_some())
            .finish()
    }
}

impl InterfaceOptions {
    /// Sets the plain FIFO capacity.
    pub fn maxlen(mut self, maxlen: usize) -> Self {
        self.maxlen = maxlen;
        self
    }

    /// Sets whether the queue starts out ready.
    pub fn ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// Sets the transmit-start routine.
    pub fn start(mut self, start: impl Fn(&Interface) + Send + Sync + 'static) -> Self {
        self.start = Some(Arc::new(start));
        self
    }
}

/// A network interface as seen by the queueing layer: a name, an output queue and a
/// transmit-start hook.
pub struct Interface {
    name: String,
    queue: Mutex<IfQueue>,
    start: Option<StartFn>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface").field("name", &self.name).field("queue", &self.queue).finish()
    }
}

impl Interface {
    pub(crate) fn new(name: String, options: InterfaceOptions, clock: Arc<dyn Clock>) -> Self {
        let mut queue = IfQueue::new(options.maxlen);
        queue.set_ready(options.ready);
        Self { name, queue: Mutex::new(queue), start: options.start, clock }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current reading of the interface clock.
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn enqueue(&self, pkt: Packet) -> Enqueue {
        let now = self.clock.now();
        self.queue.lock().enqueue(pkt, now)
    }

    /// Removes the next packet, subject to the token-bucket regulator.
    pub fn dequeue(&self) -> Dequeue {
        let now = self.clock.now();
        self.queue.lock().dequeue(DequeueOp::Remove, now)
    }

    /// Peeks at the packet [`Interface::dequeue`] would return.
    pub fn poll(&self) -> Dequeue {
        let now = self.clock.now();
        self.queue.lock().dequeue(DequeueOp::Poll, now)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_ready(&self, ready: bool) {
        self.queue.lock().set_ready(ready);
    }

    /// Runs the transmit-start routine, if any.
    pub fn start(&self) {
        if let Some(start) = &self.start {
            start(self);
        }
    }

    /// Runs `f` with exclusive access to the output queue.
    pub fn with_queue<R>(&self, f: impl FnOnce(&mut IfQueue) -> R) -> R {
        f(&mut self.queue.lock())
    }
}
