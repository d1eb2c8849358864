//! Rational frame timestamps.
//!
//! Timestamps are exact rationals so that ordering and equality never go
//! through floating-point division. All comparisons are performed by the
//! rational type via cross-multiplication.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};

/// A rational timestamp attached to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameTime {
    value: Rational64,
}

impl FrameTime {
    /// Zero time constant.
    pub const ZERO: Self = Self {
        value: Rational64::new_raw(0, 1),
    };

    /// Create a timestamp of `numerator / denominator` seconds.
    #[inline]
    pub fn new(numerator: i64, denominator: i64) -> Self {
        Self {
            value: Rational64::new(numerator, denominator),
        }
    }

    /// Timestamp of frame `index` at the given rate.
    #[inline]
    pub fn from_frame_index(index: i64, rate: FrameRate) -> Self {
        Self {
            value: Rational64::new(index * rate.denominator as i64, rate.numerator as i64),
        }
    }

    /// Frame index of this timestamp at the given rate (floored).
    #[inline]
    pub fn to_frame_index(self, rate: FrameRate) -> i64 {
        let frames = self.value * Rational64::new(rate.numerator as i64, rate.denominator as i64);
        *frames.numer() / *frames.denom()
    }

    /// Convert to seconds. Display/diagnostics only; never used for
    /// ordering.
    #[inline]
    pub fn to_seconds_f64(self) -> f64 {
        *self.value.numer() as f64 / *self.value.denom() as f64
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        *self.value.numer() == 0
    }
}

impl Default for FrameTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for FrameTime {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            value: self.value + rhs.value,
        }
    }
}

impl Sub for FrameTime {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            value: self.value - rhs.value,
        }
    }
}

impl Mul<i64> for FrameTime {
    type Output = Self;
    fn mul(self, rhs: i64) -> Self {
        Self {
            value: self.value * rhs,
        }
    }
}

impl fmt::Display for FrameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.value.numer(), self.value.denom())
    }
}

/// Frame rate as a rational number (e.g., 30000/1001 for 29.97 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Duration of a single frame.
    #[inline]
    pub fn frame_duration(self) -> FrameTime {
        FrameTime::new(self.denominator as i64, self.numerator as i64)
    }

    #[inline]
    pub fn to_fps_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Common broadcast frame rates
    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_29_97: Self = Self::new(30000, 1001);
    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_50: Self = Self::new(50, 1);
    pub const FPS_59_94: Self = Self::new(60000, 1001);
    pub const FPS_60: Self = Self::new(60, 1);
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_25
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fps = self.to_fps_f64();
        if (fps - fps.round()).abs() < 0.001 {
            write!(f, "{} fps", fps.round() as u32)
        } else {
            write!(f, "{:.3} fps", fps)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_index_round_trip() {
        let rate = FrameRate::FPS_50;
        let t = FrameTime::from_frame_index(100, rate);
        assert_eq!(t.to_seconds_f64(), 2.0);
        assert_eq!(t.to_frame_index(rate), 100);
    }

    #[test]
    fn test_ordering_is_exact() {
        // 1/3 vs 33/100 would compare equal through truncated floats at
        // low precision; rational ordering must get it right.
        let a = FrameTime::new(1, 3);
        let b = FrameTime::new(33, 100);
        assert!(b < a);
    }

    #[test]
    fn test_ntsc_rate_duration() {
        let rate = FrameRate::FPS_59_94;
        let d = rate.frame_duration();
        assert_eq!(d, FrameTime::new(1001, 60000));
        // 60000 frames span exactly 1001 seconds
        assert_eq!(d * 60000, FrameTime::new(1001, 1));
    }

    #[test]
    fn test_strictly_increasing_sequence() {
        let rate = FrameRate::FPS_29_97;
        let mut prev = FrameTime::from_frame_index(0, rate);
        for i in 1..100 {
            let t = FrameTime::from_frame_index(i, rate);
            assert!(t > prev);
            prev = t;
        }
    }
}
