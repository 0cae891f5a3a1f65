use std::{
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use crate::constants::{SCALE_LOSS, SCALE_RATE, SCALE_SHARE, TBR_SHIFT};

/// A loss fraction in `[0, 1)`.
pub type Loss = Fixed<SCALE_LOSS>;
/// A traffic share in `[0, 1]`.
pub type Share = Fixed<SCALE_SHARE>;
/// A service rate in bytes per nanosecond.
pub type Rate = Fixed<SCALE_RATE>;
/// A token-bucket balance or rate in bytes (per second, for rates).
pub type Tokens = Fixed<TBR_SHIFT>;

/// A signed 64-bit fixed-point number with `FRAC` fractional bits.
///
/// Arithmetic saturates at the bounds of the raw `i64` instead of wrapping. Intermediate
/// products and quotients are computed in `i128`, so the only loss of precision is the final
/// truncation toward negative infinity.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed<const FRAC: u32>(i64);

#[inline]
fn saturate(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

impl<const FRAC: u32> Fixed<FRAC> {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1 << FRAC);
    pub const MAX: Self = Self(i64::MAX);

    /// Number of fractional bits.
    pub const FRAC_BITS: u32 = FRAC;

    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Scales an integer up, saturating if it does not fit.
    #[inline]
    pub fn from_int(v: i64) -> Self {
        Self(saturate((v as i128) << FRAC))
    }

    /// Returns `num / den`. A zero denominator saturates toward the sign of the numerator.
    pub fn from_ratio(num: i128, den: i128) -> Self {
        if den == 0 {
            return if num < 0 { Self(i64::MIN) } else { Self::MAX };
        }
        let one = 1i128 << FRAC;
        match num.checked_mul(one) {
            Some(scaled) => Self(saturate(scaled / den)),
            // Split off the integer part so that only the remainder is scaled.
            None => {
                // Only `i128::MIN / -1` overflows, and it saturates to the top.
                let q = num.checked_div(den).unwrap_or(i128::MAX);
                let r = num.checked_rem(den).unwrap_or(0);
                // |r| < |den|, so when `r` cannot be scaled `den` is at least `one`.
                let frac = r.checked_mul(one).map_or_else(|| r / (den / one), |r| r / den);
                Self(saturate(q.saturating_mul(one).saturating_add(frac)))
            }
        }
    }

    /// Truncates toward negative infinity.
    #[inline]
    pub const fn to_int(self) -> i64 {
        self.0 >> FRAC
    }

    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / (1u64 << FRAC) as f64
    }

    #[inline]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Multiplies by an integer.
    #[inline]
    pub fn mul_int(self, v: i64) -> Self {
        Self(saturate(self.0 as i128 * v as i128))
    }

    /// Divides by an integer. Division by zero saturates like [`Fixed::from_ratio`].
    pub fn div_int(self, v: i64) -> Self {
        if v == 0 {
            return if self.0 < 0 { Self(i64::MIN) } else { Self::MAX };
        }
        Self(self.0 / v)
    }

    /// Multiplies two fixed-point values of the same scale.
    #[inline]
    pub fn mul_fixed(self, rhs: Self) -> Self {
        Self(saturate((self.0 as i128 * rhs.0 as i128) >> FRAC))
    }
}

impl<const FRAC: u32> Add for Fixed<FRAC> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl<const FRAC: u32> AddAssign for Fixed<FRAC> {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl<const FRAC: u32> Sub for Fixed<FRAC> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl<const FRAC: u32> SubAssign for Fixed<FRAC> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = self.saturating_sub(rhs);
    }
}

impl<const FRAC: u32> fmt::Debug for Fixed<FRAC> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(raw={}, q{})", self.to_f64(), self.0, FRAC)
    }
}

impl<const FRAC: u32> fmt::Display for Fixed<FRAC> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}
