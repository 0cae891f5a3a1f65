use std::time::Duration;

use altq_common::{constants::NANOS_PER_SEC, Tokens};

use crate::{DequeueOp, Error, Result};

/// Rate and burst of a token-bucket regulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbrProfile {
    /// Rate in bits per second. Zero removes the regulator.
    pub rate: u64,
    /// Bucket depth in bytes.
    pub depth: u64,
}

impl TbrProfile {
    pub const fn new(rate_bps: u64, depth_bytes: u64) -> Self {
        Self { rate: rate_bps, depth: depth_bytes }
    }

    /// A profile expressed in bytes per second.
    pub const fn bytes_per_sec(rate: u64, depth_bytes: u64) -> Self {
        Self { rate: rate.saturating_mul(8), depth: depth_bytes }
    }
}

/// Result of a conformance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbrStatus {
    Ready,
    NotYet(Duration),
}

/// Token-bucket regulator wrapping an output queue's dequeue.
///
/// Tokens are bytes in [`Tokens`] fixed point. The bucket holds at most `depth` tokens and
/// refills at `rate` tokens per second; refills are computed from the elapsed nanoseconds in
/// 128-bit arithmetic and are exact up to the fixed-point resolution.
///
/// A packet conforms when the balance covers its length. Packets longer than the depth
/// conform on a full bucket, so they can never stall the queue; they leave the balance
/// negative.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    profile: TbrProfile,
    /// Bytes per second, scaled.
    rate: Tokens,
    depth: Tokens,
    token: Tokens,
    /// Nanoseconds needed to refill an empty bucket.
    filluptime: u64,
    last: u64,
    last_op: DequeueOp,
}

impl TokenBucket {
    /// A full bucket with the given profile.
    pub fn new(profile: TbrProfile, now: u64) -> Result<Self> {
        if profile.rate == 0 {
            return Err(Error::InvalidProfile("rate must be positive"));
        }
        if profile.depth == 0 {
            return Err(Error::InvalidProfile("depth must be positive"));
        }

        let rate = Tokens::from_ratio(profile.rate as i128, 8);
        let depth = Tokens::from_int(i64::try_from(profile.depth).unwrap_or(i64::MAX));
        let filluptime = (profile.depth as u128 * 8 * NANOS_PER_SEC as u128 / profile.rate as u128)
            .min(u64::MAX as u128) as u64;

        Ok(Self { profile, rate, depth, token: depth, filluptime, last: now, last_op: DequeueOp::Remove })
    }

    pub fn profile(&self) -> TbrProfile {
        self.profile
    }

    /// Current balance in bytes, possibly negative.
    pub fn token(&self) -> Tokens {
        self.token
    }

    pub fn depth(&self) -> Tokens {
        self.depth
    }

    pub fn last_op(&self) -> DequeueOp {
        self.last_op
    }

    pub(crate) fn set_last_op(&mut self, op: DequeueOp) {
        self.last_op = op;
    }

    /// Whether a `Remove` may skip the conformance check because it completes a `Poll`.
    #[inline]
    pub(crate) fn completes_poll(&self, op: DequeueOp) -> bool {
        op == DequeueOp::Remove && self.last_op == DequeueOp::Poll
    }

    /// Tokens a packet of `len` bytes needs in the bucket before it may leave.
    fn needed(&self, len: usize) -> Tokens {
        Tokens::from_int(len as i64).min(self.depth)
    }

    /// Brings the balance up to date with `now`.
    pub fn refill(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last);
        if elapsed >= self.filluptime {
            self.token = self.depth;
        } else {
            let gained = elapsed as i128 * self.rate.raw() as i128 / NANOS_PER_SEC as i128;
            let gained = Tokens::from_raw(gained.min(i64::MAX as i128) as i64);
            self.token = (self.token + gained).min(self.depth);
        }
        self.last = now;
    }

    /// Checks whether a packet of `len` bytes may leave at `now`. Refills only when the current
    /// balance does not already cover the packet.
    pub fn check(&mut self, now: u64, len: usize) -> TbrStatus {
        let need = self.needed(len);
        if self.token < need {
            self.refill(now);
        }
        if self.token >= need {
            return TbrStatus::Ready;
        }

        let deficit = (need - self.token).raw() as u128;
        let rate = self.rate.raw().max(1) as u128;
        let nanos = (deficit * NANOS_PER_SEC as u128).div_ceil(rate);
        TbrStatus::NotYet(Duration::from_nanos(nanos.min(u64::MAX as u128) as u64))
    }

    /// Charges a transmitted packet.
    pub fn debit(&mut self, len: usize) {
        self.token -= Tokens::from_int(len as i64);
    }
}
