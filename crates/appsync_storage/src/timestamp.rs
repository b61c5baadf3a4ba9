//! Fixed-point timestamps.
//!
//! Every timestamp is rounded to two decimal places and stored as an integer
//! count of hundredths of a second. The integer form is the relational
//! encoding (`round(t, 2) * 100`); the JSON wire form is a number of seconds.
//! Keeping one integer representation means a value written through one path
//! compares exactly against the same value read back through another.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::ParseFloatError;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

const CENTIS_PER_SEC: i64 = 100;

/// A point in time with hundredth-of-a-second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch; also the `since` value that selects everything.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Amount a commit time is pushed past a stored one when the clock lags.
    pub const SKEW_STEP: Timestamp = Timestamp(CENTIS_PER_SEC);

    /// Creates a timestamp from hundredths of a second.
    pub const fn from_centis(centis: i64) -> Self {
        Self(centis)
    }

    /// Returns the timestamp in hundredths of a second.
    pub const fn as_centis(self) -> i64 {
        self.0
    }

    /// Creates a timestamp from whole seconds.
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * CENTIS_PER_SEC)
    }

    /// Creates a timestamp from fractional seconds, rounded to two decimals.
    ///
    /// Non-finite input maps to [`Timestamp::ZERO`].
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() {
            return Self::ZERO;
        }
        Self((secs * CENTIS_PER_SEC as f64).round() as i64)
    }

    /// Returns the timestamp as fractional seconds.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / CENTIS_PER_SEC as f64
    }

    /// Returns the current wall-clock time, rounded to two decimals.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        Self((millis + 5) / 10)
    }

    /// Returns `self` if it is strictly later than `stored`, otherwise
    /// `stored` advanced by [`Timestamp::SKEW_STEP`].
    ///
    /// Collection timestamps go through this so they never move backwards
    /// when clocks disagree between writers.
    #[must_use]
    pub fn after(self, stored: Timestamp) -> Self {
        if self > stored {
            self
        } else {
            Self(stored.0 + Self::SKEW_STEP.0)
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:02}",
            abs / CENTIS_PER_SEC as u64,
            abs % CENTIS_PER_SEC as u64
        )
    }
}

impl FromStr for Timestamp {
    type Err = ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<f64>().map(Self::from_secs_f64)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_secs_f64())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Self::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(Timestamp::from_secs_f64(12.344).as_centis(), 1234);
        assert_eq!(Timestamp::from_secs_f64(12.346).as_centis(), 1235);
        assert_eq!(Timestamp::from_secs_f64(7.0).as_centis(), 700);
    }

    #[test]
    fn non_finite_is_zero() {
        assert_eq!(Timestamp::from_secs_f64(f64::NAN), Timestamp::ZERO);
        assert_eq!(Timestamp::from_secs_f64(f64::INFINITY), Timestamp::ZERO);
    }

    #[test]
    fn display_keeps_two_digits() {
        assert_eq!(Timestamp::from_centis(1205).to_string(), "12.05");
        assert_eq!(Timestamp::from_centis(-5).to_string(), "-0.05");
        assert_eq!(Timestamp::ZERO.to_string(), "0.00");
    }

    #[test]
    fn parse_from_str() {
        let ts: Timestamp = "1700000000.5".parse().unwrap();
        assert_eq!(ts.as_centis(), 170_000_000_050);
        assert!("soon".parse::<Timestamp>().is_err());
    }

    #[test]
    fn after_bumps_on_skew() {
        let stored = Timestamp::from_secs(100);
        assert_eq!(Timestamp::from_secs(90).after(stored), Timestamp::from_secs(101));
        assert_eq!(stored.after(stored), Timestamp::from_secs(101));
        assert_eq!(Timestamp::from_secs(120).after(stored), Timestamp::from_secs(120));
    }

    #[test]
    fn json_wire_form_is_seconds() {
        let ts = Timestamp::from_centis(1234);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "12.34");
        let back: Timestamp = serde_json::from_str("12.34").unwrap();
        assert_eq!(back, ts);
        let whole: Timestamp = serde_json::from_str("3").unwrap();
        assert_eq!(whole, Timestamp::from_secs(3));
    }

    #[test]
    fn now_is_after_epoch() {
        assert!(Timestamp::now() > Timestamp::ZERO);
    }

    proptest! {
        #[test]
        fn after_is_monotonic(now in 0i64..1_000_000_000, stored in 0i64..1_000_000_000) {
            let result = Timestamp::from_centis(now).after(Timestamp::from_centis(stored));
            prop_assert!(result > Timestamp::from_centis(stored));
            prop_assert!(result >= Timestamp::from_centis(now));
        }

        #[test]
        fn centis_survive_the_wire(centis in 0i64..10_000_000_000_000) {
            let ts = Timestamp::from_centis(centis);
            let back = Timestamp::from_secs_f64(ts.as_secs_f64());
            prop_assert_eq!(back, ts);
        }
    }
}
