//! Service-rate allocation: output curves, work conservation, the ADC/ARC feasibility pass
//! and the RDC feedback loop.

use altq_common::{
    constants::{NANOS_PER_SEC, SCALE_RATE, SCALE_SHARE},
    Rate, Share,
};
use tracing::trace;

use super::{class::JobsClass, Jobs, JOBS_MAXPRI};

/// Smallest rate a backlogged class may be given.
const MIN_RATE: Rate = Rate::from_raw(1);

/// Converts bits per second to bytes per nanosecond.
pub(super) fn bps_to_rate(bps: u64) -> Rate {
    Rate::from_ratio(bps as i128, 8 * NANOS_PER_SEC as i128)
}

/// Converts bytes per nanosecond to bits per second, truncating.
pub(super) fn rate_to_bps(rate: Rate) -> u64 {
    let bps = (rate.raw().max(0) as i128 * 8 * NANOS_PER_SEC as i128) >> SCALE_RATE;
    u64::try_from(bps).unwrap_or(u64::MAX)
}

/// Rate needed to send every queued packet of `class` before its deadline. A deadline that
/// already passed asks for the whole link.
pub(super) fn adc_need(class: &JobsClass, now: u64, link: Rate) -> Rate {
    let Some(adc) = class.cons.adc else { return Rate::ZERO };

    let mut cum = 0u64;
    let mut need = Rate::ZERO;
    for (pkt, ts) in &class.queue {
        cum += pkt.len() as u64;
        let deadline = ts.saturating_add(adc);
        if deadline <= now {
            return link;
        }
        need = need.max(Rate::from_ratio(cum as i128, (deadline - now) as i128));
    }
    need.min(link)
}

#[inline]
fn floor(class: &JobsClass) -> Rate {
    class.min_rate_adc.max(MIN_RATE)
}

impl Jobs {
    /// Advances every class's promised output curve to `now`.
    pub(super) fn advance_curves(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_update);
        if elapsed > 0 {
            for (_, c) in self.classes.iter_mut() {
                c.rout_th = c.rout_th.saturating_add(c.rate.raw() as i128 * elapsed as i128);
            }
        }
        self.last_update = self.last_update.max(now);
    }

    /// Re-establishes work conservation: backlogged classes get a positive rate and idle ones
    /// none. When violated, the link is split evenly among backlogged classes.
    pub(super) fn enforce_wc(&mut self) {
        let violated = self.classes.iter().any(|(_, c)| c.is_backlogged() != c.rate.is_positive());
        if !violated {
            return;
        }

        let backlogged = self.classes.iter().filter(|(_, c)| c.is_backlogged()).count();
        let (share, mut rest) = if backlogged > 0 {
            let share = self.link.div_int(backlogged as i64).max(MIN_RATE);
            (share, (self.link - share.mul_int(backlogged as i64)).max(Rate::ZERO))
        } else {
            (Rate::ZERO, Rate::ZERO)
        };
        // The remainder goes to the highest priority.
        for (_, c) in self.classes.iter_mut().rev() {
            c.rate = if c.is_backlogged() { share + std::mem::take(&mut rest) } else { Rate::ZERO };
        }
        trace!(backlogged, "work conservation restored");
    }

    /// Gives the rate of a class that just went idle to the classes still backlogged.
    pub(super) fn release_rate(&mut self, pri: usize) {
        let Some(class) = self.classes.get_mut(pri) else { return };
        let freed = std::mem::replace(&mut class.rate, Rate::ZERO);
        class.min_rate_adc = Rate::ZERO;

        let backlogged = self.classes.iter().filter(|(_, c)| c.is_backlogged()).count();
        if backlogged == 0 || !freed.is_positive() {
            return;
        }
        let share = freed.div_int(backlogged as i64);
        let mut rest = freed - share.mul_int(backlogged as i64);
        // The remainder goes to the highest priority.
        for (_, c) in self.classes.iter_mut().rev().filter(|(_, c)| c.is_backlogged()) {
            c.rate += share + rest;
            rest = Rate::ZERO;
        }
    }

    /// Computes every class's minimum ADC/ARC rate. Returns whether the current allocation
    /// already satisfies all of them.
    pub(super) fn min_rates_adc(&mut self, now: u64) -> bool {
        let link = self.link;
        let mut feasible = true;
        for (_, c) in self.classes.iter_mut() {
            c.min_rate_adc = if c.is_backlogged() {
                let arc = c.cons.arc.map_or(Rate::ZERO, bps_to_rate);
                adc_need(c, now, link).max(arc).min(link)
            } else {
                Rate::ZERO
            };
            if c.is_backlogged() && c.rate < c.min_rate_adc {
                feasible = false;
            }
        }
        feasible
    }

    /// Moves rate from classes above their minimum to classes below it, most deficient and
    /// most surplus first. Classes that still miss their deadline drop packets from the tail
    /// until the rest of their backlog can make it, without breaching their loss bound and
    /// without emptying the queue.
    pub(super) fn assign_rate_drops_adc(&mut self, now: u64) {
        loop {
            let mut recv: Option<(usize, Rate)> = None;
            let mut donor: Option<(usize, Rate)> = None;
            for (pri, c) in self.classes.iter().filter(|(_, c)| c.is_backlogged()) {
                let need = floor(c);
                if c.rate < need {
                    let deficit = need - c.rate;
                    if recv.map_or(true, |(_, d)| deficit > d) {
                        recv = Some((pri, deficit));
                    }
                } else if c.rate > need {
                    let surplus = c.rate - need;
                    if donor.map_or(true, |(_, s)| surplus > s) {
                        donor = Some((pri, surplus));
                    }
                }
            }
            let (Some((to, deficit)), Some((from, surplus))) = (recv, donor) else { break };

            let amount = deficit.min(surplus);
            if let Some(c) = self.classes.get_mut(from) {
                c.rate -= amount;
            }
            if let Some(c) = self.classes.get_mut(to) {
                c.rate += amount;
            }
        }

        let link = self.link;
        for pri in 0..JOBS_MAXPRI {
            let Some(c) = self.classes.get_mut(pri) else { continue };
            if !c.is_backlogged() || c.rate >= c.min_rate_adc {
                continue;
            }

            let mut dropped = 0;
            let mut need = c.min_rate_adc;
            while need > c.rate && c.queue.len() > 1 {
                let Some(len) = c.tail_len() else { break };
                if c.would_breach_alc(len) {
                    break;
                }
                c.drop_tail();
                self.len -= 1;
                dropped += 1;
                need = adc_need(c, now, link).max(c.cons.arc.map_or(Rate::ZERO, bps_to_rate));
            }
            c.min_rate_adc = need.min(link);
            if dropped > 0 {
                trace!(pri, dropped, "adc tail drops");
            }
        }
    }

    /// Proportional control of the RDC classes' rates toward equal weighted delays.
    pub(super) fn adjust_rates_rdc(&mut self, now: u64) {
        let mut members = [0usize; JOBS_MAXPRI];
        let mut wd = [0i128; JOBS_MAXPRI];
        let mut n = 0;
        let mut reserved = Rate::ZERO;
        for (pri, c) in self.classes.iter().filter(|(_, c)| c.is_backlogged()) {
            if c.cons.rdc.is_some() {
                members[n] = pri;
                wd[n] = c.weighted_delay(now);
                n += 1;
            } else {
                reserved += c.rate;
            }
        }
        if n < 2 {
            return;
        }
        let (members, wd) = (&members[..n], &wd[..n]);

        let total_in: u64 = self.classes.iter().map(|(_, c)| c.rin.bytes()).sum();
        if total_in == 0 {
            return;
        }
        let mut s_min = Share::ONE;
        let mut p_max = 1i64;
        let mut max_avg_pkt = 1u64;
        for c in members.iter().filter_map(|&pri| self.classes.get(pri)) {
            s_min = s_min.min(Share::from_ratio(c.rin.bytes() as i128, total_in as i128));
            p_max = p_max.max(c.delay_prod_others);
            if let Some(avg) = c.rin.bytes().checked_div(c.rin.packets()) {
                max_avg_pkt = max_avg_pkt.max(avg);
            }
        }

        let link = self.link.raw().max(1) as i128;
        // Transmission time of the largest average packet, nanoseconds.
        let t_pkt = ((max_avg_pkt as i128) << SCALE_RATE) / link;
        let t_pkt = t_pkt.max(1);
        let mean = wd.iter().sum::<i128>() / n as i128;
        let upper = self.link - reserved;

        let mut rates = [Rate::ZERO; JOBS_MAXPRI];
        let mut sum = Rate::ZERO;
        for (i, &pri) in members.iter().enumerate() {
            let Some(c) = self.classes.get(pri) else { continue };
            let error = (wd[i] - mean) / p_max as i128;
            let delta = link
                .saturating_mul(s_min.raw() as i128)
                .saturating_mul(error)
                / t_pkt
                >> SCALE_SHARE;
            let delta = Rate::from_raw(delta.clamp(i64::MIN as i128, i64::MAX as i128) as i64);
            let lo = floor(c);
            rates[i] = (c.rate + delta).max(lo).min(upper.max(lo));
            sum += rates[i];
        }

        // Settle the difference to the available rate, lowest priority first.
        let mut credit = upper - sum;
        if credit.is_positive() {
            let share = credit.div_int(n as i64);
            let rest = credit - share.mul_int(n as i64);
            for rate in rates[..n].iter_mut() {
                *rate += share;
            }
            rates[0] += rest;
        } else {
            for (i, &pri) in members.iter().enumerate() {
                if credit >= Rate::ZERO {
                    break;
                }
                let Some(c) = self.classes.get(pri) else { continue };
                let give = (rates[i] - floor(c)).max(Rate::ZERO).min(Rate::ZERO - credit);
                rates[i] -= give;
                credit += give;
            }
        }

        for (i, &pri) in members.iter().enumerate() {
            if let Some(c) = self.classes.get_mut(pri) {
                c.rate = rates[i];
            }
        }
        trace!(classes = n, "rdc rates adjusted");
    }

    /// Recomputes every class's product of the other classes' relative weights.
    pub(super) fn recompute_products(&mut self) {
        let mut rdc = [None; JOBS_MAXPRI];
        let mut rlc = [None; JOBS_MAXPRI];
        for (pri, c) in self.classes.iter() {
            rdc[pri] = c.cons.rdc;
            rlc[pri] = c.cons.rlc;
        }

        let product = |weights: &[Option<u32>], skip: usize| {
            weights
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != skip)
                .filter_map(|(_, w)| *w)
                .fold(1i64, |acc, w| acc.saturating_mul(w as i64))
        };
        for (pri, c) in self.classes.iter_mut() {
            c.delay_prod_others = product(&rdc[..], pri);
            c.loss_prod_others = product(&rlc[..], pri);
        }
    }
}
