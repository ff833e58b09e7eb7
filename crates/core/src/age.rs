//! File age buckets
//!
//! Aggregates are sub-partitioned by how long ago files were last accessed
//! (`A*`) or modified (`M*`). `Age::All` is the unfiltered union.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECS_PER_MONTH: i64 = 2_628_000;
const SECS_PER_YEAR: i64 = 31_536_000;

/// Age bucket of an aggregate row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Age {
    All,
    A1M,
    A2M,
    A6M,
    A1Y,
    A2Y,
    A3Y,
    A5Y,
    A7Y,
    M1M,
    M2M,
    M6M,
    M1Y,
    M2Y,
    M3Y,
    M5Y,
    M7Y,
}

impl Age {
    /// Every bucket, `All` first
    pub const ALL_BUCKETS: [Age; 17] = [
        Age::All,
        Age::A1M,
        Age::A2M,
        Age::A6M,
        Age::A1Y,
        Age::A2Y,
        Age::A3Y,
        Age::A5Y,
        Age::A7Y,
        Age::M1M,
        Age::M2M,
        Age::M6M,
        Age::M1Y,
        Age::M2Y,
        Age::M3Y,
        Age::M5Y,
        Age::M7Y,
    ];

    /// Stable 16-bit code used in encoded keys
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Inverse of [`Age::code`]
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL_BUCKETS.get(code as usize).copied()
    }

    pub fn is_all(self) -> bool {
        self == Age::All
    }

    fn threshold_secs(self) -> i64 {
        match self {
            Age::All => 0,
            Age::A1M | Age::M1M => SECS_PER_MONTH,
            Age::A2M | Age::M2M => 2 * SECS_PER_MONTH,
            Age::A6M | Age::M6M => 6 * SECS_PER_MONTH,
            Age::A1Y | Age::M1Y => SECS_PER_YEAR,
            Age::A2Y | Age::M2Y => 2 * SECS_PER_YEAR,
            Age::A3Y | Age::M3Y => 3 * SECS_PER_YEAR,
            Age::A5Y | Age::M5Y => 5 * SECS_PER_YEAR,
            Age::A7Y | Age::M7Y => 7 * SECS_PER_YEAR,
        }
    }

    fn is_access_age(self) -> bool {
        matches!(
            self,
            Age::A1M | Age::A2M | Age::A6M | Age::A1Y | Age::A2Y | Age::A3Y | Age::A5Y | Age::A7Y
        )
    }

    /// Check whether a file with the given access and modify times (unix
    /// seconds) belongs in this bucket at time `now`.
    pub fn fits(self, atime: i64, mtime: i64, now: i64) -> bool {
        if self.is_all() {
            return true;
        }

        let cutoff = now - self.threshold_secs();
        if self.is_access_age() {
            atime <= cutoff
        } else {
            mtime <= cutoff
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Age::All => "all",
            Age::A1M => "a1m",
            Age::A2M => "a2m",
            Age::A6M => "a6m",
            Age::A1Y => "a1y",
            Age::A2Y => "a2y",
            Age::A3Y => "a3y",
            Age::A5Y => "a5y",
            Age::A7Y => "a7y",
            Age::M1M => "m1m",
            Age::M2M => "m2m",
            Age::M6M => "m6m",
            Age::M1Y => "m1y",
            Age::M2Y => "m2y",
            Age::M3Y => "m3y",
            Age::M5Y => "m5y",
            Age::M7Y => "m7y",
        }
    }
}

impl Default for Age {
    fn default() -> Self {
        Age::All
    }
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Age {
    type Err = String;

    /// Accepts either the bucket name (`a1y`) or its numeric code (`4`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u16>() {
            return Self::from_code(code).ok_or_else(|| format!("invalid age code: {}", code));
        }

        let lower = s.to_ascii_lowercase();
        Self::ALL_BUCKETS
            .iter()
            .copied()
            .find(|age| age.name() == lower)
            .ok_or_else(|| format!("invalid age: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for age in Age::ALL_BUCKETS {
            assert_eq!(Age::from_code(age.code()), Some(age));
        }
        assert_eq!(Age::from_code(17), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("a1y".parse::<Age>().unwrap(), Age::A1Y);
        assert_eq!("M7Y".parse::<Age>().unwrap(), Age::M7Y);
        assert_eq!("0".parse::<Age>().unwrap(), Age::All);
        assert!("a9y".parse::<Age>().is_err());
        assert!("99".parse::<Age>().is_err());
    }

    #[test]
    fn test_fits() {
        let now = 100 * SECS_PER_YEAR;
        let two_years_ago = now - 2 * SECS_PER_YEAR;

        assert!(Age::All.fits(now, now, now));
        assert!(Age::A1Y.fits(two_years_ago, now, now));
        assert!(Age::A2Y.fits(two_years_ago, now, now));
        assert!(!Age::A3Y.fits(two_years_ago, now, now));
        assert!(!Age::M1Y.fits(two_years_ago, now, now));
        assert!(Age::M1Y.fits(now, two_years_ago, now));
    }
}
