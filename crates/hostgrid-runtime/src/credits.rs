//! Fixed-point credit amounts and the host/platform earnings split.
//!
//! Credits carry two decimal places: one credit is 100 minor units. All
//! settlement arithmetic happens on minor units so the split never drifts.
//! Conversion from/to JSON numbers only happens at the API boundary.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Minor units per whole credit.
pub const MINOR_UNITS_PER_CREDIT: i64 = 100;

/// A non-negative amount of credits, stored in minor units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Credits(i64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    /// Largest amount a single charge may carry: one trillion credits.
    pub const MAX: Credits = Credits(1_000_000_000_000 * MINOR_UNITS_PER_CREDIT);

    pub fn from_minor_units(units: i64) -> Self {
        Self(units)
    }

    pub fn from_whole(credits: i64) -> Self {
        Self(credits * MINOR_UNITS_PER_CREDIT)
    }

    /// Parse a decimal credit amount, rounding to the nearest minor unit.
    /// Rejects negative and non-finite values.
    pub fn from_decimal(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err(format!("credit amount must be finite, got {}", value));
        }
        if value < 0.0 {
            return Err(format!("credit amount must not be negative, got {}", value));
        }
        let units = (value * MINOR_UNITS_PER_CREDIT as f64).round();
        if units > Self::MAX.0 as f64 {
            return Err(format!(
                "credit amount too large: {} (max {})",
                value,
                Self::MAX
            ));
        }
        Ok(Self(units as i64))
    }

    pub fn minor_units(self) -> i64 {
        self.0
    }

    pub fn as_decimal(self) -> f64 {
        self.0 as f64 / MINOR_UNITS_PER_CREDIT as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Credits) -> Option<Credits> {
        self.0.checked_add(rhs.0).map(Credits)
    }
}

impl Add for Credits {
    type Output = Credits;

    fn add(self, rhs: Credits) -> Credits {
        Credits(self.0 + rhs.0)
    }
}

impl Sub for Credits {
    type Output = Credits;

    fn sub(self, rhs: Credits) -> Credits {
        Credits(self.0 - rhs.0)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}",
            self.0 / MINOR_UNITS_PER_CREDIT,
            (self.0 % MINOR_UNITS_PER_CREDIT).abs()
        )
    }
}

impl Serialize for Credits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_decimal())
    }
}

impl<'de> Deserialize<'de> for Credits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Credits::from_decimal(value).map_err(de::Error::custom)
    }
}

/// Host/platform division of one execution's cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsSplit {
    pub host: Credits,
    pub platform: Credits,
}

impl EarningsSplit {
    /// Split used for executions that earn the host nothing.
    pub fn platform_only(cost: Credits) -> Self {
        Self {
            host: Credits::ZERO,
            platform: cost,
        }
    }

    pub fn total(&self) -> Credits {
        self.host + self.platform
    }
}

/// Split `cost` between host and platform.
///
/// The host share is `cost * percentage / 100` rounded down to a whole minor
/// unit; the platform receives the remainder, so `host + platform == cost`
/// always holds. `profit_share_percentage` is clamped to `0..=100`.
pub fn split_earnings(cost: Credits, profit_share_percentage: u8) -> EarningsSplit {
    let percentage = i128::from(profit_share_percentage.min(100));
    let host_units = (i128::from(cost.minor_units()) * percentage).div_euclid(100) as i64;
    let host = Credits::from_minor_units(host_units);
    EarningsSplit {
        host,
        platform: cost - host,
    }
}
