//! Fixed-point arithmetic for weights, utilizations and scale factors
//!
//! `Fixed<FRAC>` stores a signed value with `FRAC` fractional bits in an
//! `i64`. Products and quotients go through `i128` so that nanosecond
//! quantities multiplied by a fraction never overflow in practice.

use core::fmt;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed<const FRAC: u32>(i64);

impl<const FRAC: u32> Fixed<FRAC> {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1 << FRAC);

    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn from_int(value: i64) -> Self {
        Self(value << FRAC)
    }

    /// `numerator / denominator`, truncated toward zero.
    #[inline]
    pub const fn from_ratio(numerator: i64, denominator: i64) -> Self {
        Self((((numerator as i128) << FRAC) / denominator as i128) as i64)
    }

    /// Nearest integer, halves rounded up.
    #[inline]
    pub const fn round(self) -> i64 {
        (self.0 + (1 << (FRAC - 1))) >> FRAC
    }

    /// Integer part, rounded toward negative infinity.
    #[inline]
    pub const fn floor(self) -> i64 {
        self.0 >> FRAC
    }

    /// `value * self`, truncated to an integer.
    #[inline]
    pub const fn scale(self, value: i64) -> i64 {
        ((value as i128 * self.0 as i128) >> FRAC) as i64
    }

    #[inline]
    pub const fn mul(self, other: Self) -> Self {
        Self(((self.0 as i128 * other.0 as i128) >> FRAC) as i64)
    }

    #[inline]
    pub const fn div(self, other: Self) -> Self {
        Self((((self.0 as i128) << FRAC) / other.0 as i128) as i64)
    }

    /// `1 / self`.
    #[inline]
    pub const fn reciprocal(self) -> Self {
        Self::ONE.div(self)
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        Ord::max(self, other)
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        Ord::min(self, other)
    }

    /// Convert between fractional precisions.
    #[inline]
    pub const fn convert<const OTHER: u32>(self) -> Fixed<OTHER> {
        if OTHER >= FRAC {
            Fixed::<OTHER>((self.0 as i128).wrapping_shl(OTHER - FRAC) as i64)
        } else {
            Fixed::<OTHER>(self.0 >> (FRAC - OTHER))
        }
    }
}

impl<const FRAC: u32> Add for Fixed<FRAC> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl<const FRAC: u32> Sub for Fixed<FRAC> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl<const FRAC: u32> AddAssign for Fixed<FRAC> {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl<const FRAC: u32> SubAssign for Fixed<FRAC> {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl<const FRAC: u32> Neg for Fixed<FRAC> {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl<const FRAC: u32> fmt::Display for Fixed<FRAC> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = (self.0 as i128).abs();
        let int = magnitude >> FRAC;
        let frac = ((magnitude & ((1i128 << FRAC) - 1)) * 10_000) >> FRAC;
        write!(f, "{}{}.{:04}", sign, int, frac)
    }
}

impl<const FRAC: u32> fmt::Debug for Fixed<FRAC> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
