use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// A calendar month that bills are issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

#[derive(Deserialize)]
struct RawPeriod {
    year: i32,
    month: u32,
}

impl TryFrom<RawPeriod> for BillingPeriod {
    type Error = CoreError;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        BillingPeriod::new(raw.year, raw.month)
    }
}

impl BillingPeriod {
    /// Years are limited to four digits so the period always fits the
    /// tracking code grammar.
    pub fn new(year: i32, month: u32) -> Result<Self, CoreError> {
        if !(1..=12).contains(&month) || !(1000..=9999).contains(&year) {
            return Err(CoreError::InvalidPeriod { year, month });
        }
        Ok(BillingPeriod { year, month })
    }

    pub fn containing(ts: DateTime<Utc>) -> Self {
        BillingPeriod {
            year: ts.year(),
            month: ts.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn month_name(self) -> &'static str {
        MONTH_NAMES[(self.month - 1) as usize]
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            BillingPeriod {
                year: self.year + 1,
                month: 1,
            }
        } else {
            BillingPeriod {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

/// Case-sensitive lookup of an English month name.
pub fn month_from_name(name: &str) -> Option<u32> {
    MONTH_NAMES
        .iter()
        .position(|m| *m == name)
        .map(|idx| idx as u32 + 1)
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn deserialize_validates_like_new() {
        let ok: BillingPeriod = serde_json::from_str(r#"{"year":2025,"month":7}"#).unwrap();
        assert_eq!(ok, BillingPeriod::new(2025, 7).unwrap());
        assert!(serde_json::from_str::<BillingPeriod>(r#"{"year":2025,"month":13}"#).is_err());
        assert!(serde_json::from_str::<BillingPeriod>(r#"{"year":2025,"month":0}"#).is_err());
        assert!(serde_json::from_str::<BillingPeriod>(r#"{"year":99,"month":1}"#).is_err());
    }

    #[test]
    fn new_rejects_out_of_range_month() {
        assert!(BillingPeriod::new(2025, 0).is_err());
        assert!(BillingPeriod::new(2025, 13).is_err());
        assert!(BillingPeriod::new(2025, 12).is_ok());
    }

    #[test]
    fn new_rejects_years_that_are_not_four_digits() {
        assert!(BillingPeriod::new(999, 1).is_err());
        assert!(BillingPeriod::new(10_000, 1).is_err());
    }

    #[test]
    fn containing_uses_calendar_month() {
        let ts = Utc.with_ymd_and_hms(2025, 7, 31, 23, 59, 0).unwrap();
        assert_eq!(
            BillingPeriod::containing(ts),
            BillingPeriod::new(2025, 7).unwrap()
        );
    }

    #[test]
    fn next_rolls_over_year() {
        let dec = BillingPeriod::new(2024, 12).unwrap();
        assert_eq!(dec.next(), BillingPeriod::new(2025, 1).unwrap());
    }

    #[test]
    fn month_names_round_trip() {
        let period = BillingPeriod::new(2025, 7).unwrap();
        assert_eq!(period.month_name(), "July");
        assert_eq!(month_from_name("July"), Some(7));
        assert_eq!(month_from_name("july"), None);
    }

    #[test]
    fn display_is_zero_padded() {
        assert_eq!(BillingPeriod::new(2025, 3).unwrap().to_string(), "2025-03");
    }
}
