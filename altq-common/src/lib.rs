//! Shared building blocks for the altq crates: a nanosecond clock abstraction, fixed-point
//! numbers with explicit scale, and a generation-checked arena used for every opaque handle.

mod arena;
pub use arena::{Arena, Key};

mod clock;
pub use clock::{Clock, ManualClock, MonotonicClock};

mod fixed;
pub use fixed::{Fixed, Loss, Rate, Share, Tokens};

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: u32 = 1024;
    pub const MiB: u32 = 1024 * KiB;
    pub const GiB: u32 = 1024 * MiB;

    /// Nanoseconds per second. All timestamps in the altq crates are nanoseconds.
    pub const NANOS_PER_SEC: u64 = 1_000_000_000;

    /// Fractional bits of a token-bucket balance.
    pub const TBR_SHIFT: u32 = 29;
    /// Fractional bits of a JoBS service rate (bytes per nanosecond).
    pub const SCALE_RATE: u32 = 32;
    /// Fractional bits of a loss fraction.
    pub const SCALE_LOSS: u32 = 32;
    /// Fractional bits of a traffic share.
    pub const SCALE_SHARE: u32 = 16;
}

/// Converts a [`std::time::Duration`] to whole nanoseconds, saturating at `u64::MAX`.
#[inline]
pub fn duration_nanos(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
