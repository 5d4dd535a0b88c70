//! A non-negative, immutable duration value object.
//!
//! Wraps [`std::time::Duration`] (already non-negative) but adds the
//! construction and arithmetic surface the rest of the crate needs:
//! building from a fractional-seconds config value, and saturating
//! subtraction so timing-window arithmetic (`ttl - elapsed`) never panics.

use std::fmt;
use std::ops::{Add, Mul};
use std::time::Duration as StdDuration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// A non-negative span of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(StdDuration);

impl Duration {
    pub const ZERO: Duration = Duration(StdDuration::ZERO);

    /// Builds a `Duration` from a fractional seconds value, rejecting
    /// negative or non-finite input.
    pub fn from_secs_f64(secs: f64) -> Result<Self, CoreError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(CoreError::Validation(format!(
                "duration must be a finite, non-negative number of seconds, got {secs}"
            )));
        }
        Ok(Self(StdDuration::from_secs_f64(secs)))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(StdDuration::from_secs(secs))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(StdDuration::from_millis(millis))
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0.as_secs_f64()
    }

    pub fn as_std(self) -> StdDuration {
        self.0
    }

    /// Subtracts without going negative.
    pub fn saturating_sub(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl From<StdDuration> for Duration {
    fn from(value: StdDuration) -> Self {
        Self(value)
    }
}

impl From<Duration> for StdDuration {
    fn from(value: Duration) -> Self {
        value.0
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0 + rhs.0)
    }
}

impl Mul<u32> for Duration {
    type Output = Duration;
    fn mul(self, rhs: u32) -> Duration {
        Duration(self.0 * rhs)
    }
}

impl Mul<f64> for Duration {
    type Output = Duration;
    fn mul(self, rhs: f64) -> Duration {
        // `rhs` is a scale factor (e.g. a backoff multiplier or jitter
        // fraction); negative scales are a programmer error and saturate
        // to zero rather than producing a negative duration.
        Duration(StdDuration::from_secs_f64((self.0.as_secs_f64() * rhs).max(0.0)))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0.as_secs_f64())
    }
}

/// Serializes as a fractional-seconds number, matching the wire
/// representation the Python original uses for duration fields.
impl Serialize for Duration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.as_secs_f64())
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_seconds() {
        assert!(Duration::from_secs_f64(-1.0).is_err());
    }

    #[test]
    fn saturating_sub_never_negative() {
        let small = Duration::from_secs(1);
        let big = Duration::from_secs(5);
        assert_eq!(small.saturating_sub(big), Duration::ZERO);
    }

    #[test]
    fn mul_scale_factor() {
        let d = Duration::from_secs(2);
        assert_eq!((d * 2.0).as_secs_f64(), 4.0);
    }

    proptest::proptest! {
        /// `saturating_sub` never produces a value greater than the minuend,
        /// and is exact (no saturation) whenever the subtrahend is smaller.
        #[test]
        fn saturating_sub_bounded_by_minuend(a in 0.0f64..1_000.0, b in 0.0f64..1_000.0) {
            let lhs = Duration::from_secs_f64(a).unwrap();
            let rhs = Duration::from_secs_f64(b).unwrap();
            let result = lhs.saturating_sub(rhs);
            proptest::prop_assert!(result.as_secs_f64() <= lhs.as_secs_f64() + 1e-9);
            if a >= b {
                proptest::prop_assert!((result.as_secs_f64() - (a - b)).abs() < 1e-6);
            } else {
                proptest::prop_assert!(result.is_zero());
            }
        }

        /// Any finite non-negative seconds value round-trips through
        /// `from_secs_f64` / `as_secs_f64` to within floating-point rounding.
        #[test]
        fn from_secs_f64_round_trips(secs in 0.0f64..1_000_000.0) {
            let d = Duration::from_secs_f64(secs).unwrap();
            proptest::prop_assert!((d.as_secs_f64() - secs).abs() < 1e-6);
        }
    }
}
