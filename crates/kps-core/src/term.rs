//! License terms with millisecond precision.
//!
//! Terms are handed out in days but trials can be a few minutes long, so a
//! term is stored as whole milliseconds and converted from fractional days.

use crate::{Error, Result};
use chrono::TimeDelta;
use std::fmt;

/// Milliseconds in one day.
pub const MS_PER_DAY: i64 = 86_400_000;

/// Longest term accepted, in days (10,000 years).
pub const MAX_DAYS: f64 = 3_652_500.0;

/// Length of a license grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Term(i64);

impl Term {
    pub const ZERO: Term = Term(0);

    /// Build a term from a (possibly fractional) number of days.
    ///
    /// Fails for NaN, infinities and anything longer than [`MAX_DAYS`]
    /// in either direction.
    pub fn from_days(days: f64) -> Result<Self> {
        if !days.is_finite() || days.abs() > MAX_DAYS {
            return Err(Error::InvalidRequest(format!(
                "term of {} days is out of range",
                days
            )));
        }
        Ok(Self((days * MS_PER_DAY as f64).round() as i64))
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Fractional day count, as stored in `duration_days`.
    pub fn as_days(&self) -> f64 {
        self.0 as f64 / MS_PER_DAY as f64
    }

    pub fn as_delta(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.0)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = self.as_days();
        if days >= 1.0 {
            write!(f, "{:.2} days", days)
        } else {
            write!(f, "{} minutes", self.0 / 60_000)
        }
    }
}
