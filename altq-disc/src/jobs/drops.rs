//! Buffer management: admission into the class queues and victim selection when the shared
//! buffer is full.

use altq_common::Loss;
use altq_queue::{DropReason, Enqueue};
use altq_wire::Packet;
use tracing::trace;

use super::Jobs;

impl Jobs {
    /// Queues `pkt` in the class at `pri`, dropping a packet if there is no room.
    pub(super) fn addq(&mut self, pri: usize, pkt: Packet, now: u64) -> Enqueue {
        let (separate, full) = (self.separate, self.len >= self.limit);
        let limit = self.limit;
        let Some(class) = self.classes.get_mut(pri) else {
            return Enqueue::Dropped(DropReason::Unclassified);
        };
        let len = pkt.len();

        if class.queue.len() >= class.limit.unwrap_or(limit) {
            class.count_drop(len);
            trace!(pri, len, "class queue full, dropping");
            return Enqueue::Dropped(DropReason::QueueFull);
        }
        if separate || !full {
            class.push(pkt, now);
            self.len += 1;
            return Enqueue::Queued;
        }

        // Shared buffer full. Without loss constraints the arrival is dropped. With only an
        // ALC, it is dropped as long as the bound holds.
        let drop_arrival = match (class.cons.rlc, class.cons.alc) {
            (None, None) => true,
            (None, Some(_)) => !class.would_breach_alc(len),
            (Some(_), _) => false,
        };
        if drop_arrival {
            class.count_drop(len);
            trace!(pri, len, "buffer full, dropping arrival");
            return Enqueue::Dropped(DropReason::QueueFull);
        }

        class.push(pkt, now);
        self.len += 1;
        let victim = self.pick_dropped_rlc(pri);
        if let Some(v) = self.classes.get_mut(victim) {
            if v.drop_tail().is_some() {
                self.len -= 1;
            }
        }
        trace!(pri, victim, "buffer full, dropped tail of victim");

        if victim == pri {
            Enqueue::Dropped(DropReason::QueueFull)
        } else {
            Enqueue::Queued
        }
    }

    /// Picks the class whose tail is dropped to make room for an arrival to `arriving`, which
    /// is already queued.
    ///
    /// Among the backlogged RLC classes whose ALC survives the drop, the one with the lowest
    /// weighted loss relative to the mean is chosen. If there is none, the backlogged class
    /// with the largest ALC margin after the drop is chosen. If every class would breach its
    /// bound, the arrival is dropped. Ties go to the lower priority.
    pub(super) fn pick_dropped_rlc(&self, arriving: usize) -> usize {
        let rlc = || self.classes.iter().filter(|(_, c)| c.is_backlogged() && c.cons.rlc.is_some());

        let n = rlc().count();
        if n > 0 {
            let mean = rlc().map(|(_, c)| c.weighted_loss()).sum::<i128>() / n as i128;

            let mut best: Option<(usize, i128)> = None;
            for (pri, c) in rlc() {
                let Some(len) = c.tail_len() else { continue };
                if c.would_breach_alc(len) {
                    continue;
                }
                let error = c.weighted_loss() - mean;
                if best.map_or(true, |(_, e)| error < e) {
                    best = Some((pri, error));
                }
            }
            if let Some((pri, _)) = best {
                return pri;
            }
        }

        let mut best: Option<(usize, Loss)> = None;
        for (pri, c) in self.classes.iter().filter(|(_, c)| c.is_backlogged()) {
            let Some(len) = c.tail_len() else { continue };
            let margin = c.cons.alc.unwrap_or(Loss::ONE) - c.loss_if_dropped(len);
            if margin >= Loss::ZERO && best.map_or(true, |(_, m)| margin > m) {
                best = Some((pri, margin));
            }
        }
        best.map_or(arriving, |(pri, _)| pri)
    }
}

#[cfg(test)]
mod tests {
    use altq_queue::Discipline;
    use altq_wire::ClassHandle;

    use super::*;
    use crate::{Classful, JobsClassOptions, JobsOptions};

    fn jobs(limit: usize) -> Jobs {
        Jobs::new(JobsOptions::new(8_000_000).limit(limit)).unwrap()
    }

    fn send(q: &mut Jobs, class: ClassHandle) -> Enqueue {
        q.enqueue(Packet::opaque(100).with_class(class), 0)
    }

    #[test]
    fn rlc_victim_has_lowest_weighted_loss() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut q = jobs(4);
        let a = q.add_class(JobsClassOptions::new(1).rlc(1).default_class(true)).unwrap();
        let b = q.add_class(JobsClassOptions::new(2).rlc(2)).unwrap();
        for c in [a, a, b, b] {
            assert!(send(&mut q, c).is_queued());
        }

        // Equal losses: the lower priority gives way.
        assert_eq!(send(&mut q, a), Enqueue::Dropped(DropReason::QueueFull));
        // Now `a` has lost a third of its bytes, `b` nothing.
        assert_eq!(send(&mut q, b), Enqueue::Dropped(DropReason::QueueFull));

        let s = q.stats();
        assert_eq!(s.class(1).unwrap().dropped.packets(), 1);
        assert_eq!(s.class(2).unwrap().dropped.packets(), 1);
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn alc_protects_class_from_victimization() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut q = jobs(4);
        let a = q.add_class(JobsClassOptions::new(1).rlc(1).default_class(true)).unwrap();
        let b = q.add_class(JobsClassOptions::new(2).rlc(1).alc(Loss::ZERO)).unwrap();
        for c in [a, a, b, b] {
            assert!(send(&mut q, c).is_queued());
        }

        for _ in 0..2 {
            assert!(send(&mut q, b).is_queued());
        }
        let s = q.stats();
        assert_eq!(s.class(2).unwrap().dropped.packets(), 0);
        assert_eq!(s.class(2).unwrap().qlength, 4);
        assert_eq!(s.class(1).unwrap().qlength, 0);
        assert_eq!(s.class(1).unwrap().dropped.packets(), 2);

        // Nobody else to drop from: the bound gives.
        assert_eq!(send(&mut q, b), Enqueue::Dropped(DropReason::QueueFull));
    }

    #[test]
    fn alc_only_class_drops_arrival_within_bound() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut q = jobs(2);
        let a = q.add_class(JobsClassOptions::new(1).default_class(true)).unwrap();
        let b = q.add_class(JobsClassOptions::new(2).alc(Loss::from_ratio(1, 2))).unwrap();
        assert!(send(&mut q, a).is_queued());
        assert!(send(&mut q, b).is_queued());

        // Dropping the second arrival of `b` would make its loss one half: still allowed.
        assert_eq!(send(&mut q, b), Enqueue::Dropped(DropReason::QueueFull));
        // The third would not be, so `a` pays.
        assert!(send(&mut q, b).is_queued());
        assert_eq!(q.stats().class(1).unwrap().dropped.packets(), 1);
        assert_eq!(q.stats().class(2).unwrap().qlength, 2);
    }
}
