use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::category::BillCategory;
use crate::error::CoreError;
use crate::period::{month_from_name, BillingPeriod, MONTH_NAMES};

/// Token of the form `2025-July-Electricity`. The grammar is case-sensitive
/// and requires a four digit year, an English month name and a capitalized
/// category label, which keeps it out of ordinary prose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingCode(String);

fn grammar() -> String {
    let categories: Vec<&str> = BillCategory::ALL.iter().map(|c| c.label()).collect();
    format!(
        r"(\d{{4}})-({})-({})",
        MONTH_NAMES.join("|"),
        categories.join("|")
    )
}

fn embedded_re() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(&format!(r"\b{}\b", grammar())).expect("invalid regex"))
}

fn anchored_re() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(&format!(r"^{}$", grammar())).expect("invalid regex"))
}

impl TrackingCode {
    pub fn generate(period: BillingPeriod, category: BillCategory) -> Self {
        TrackingCode(format!(
            "{}-{}-{}",
            period.year(),
            period.month_name(),
            category.label()
        ))
    }

    /// Returns the first code embedded in `text`, if any.
    pub fn extract(text: &str) -> Option<Self> {
        embedded_re()
            .find(text)
            .map(|m| TrackingCode(m.as_str().to_string()))
    }

    pub fn parse(code: &str) -> Result<(BillingPeriod, BillCategory), CoreError> {
        let invalid = || CoreError::InvalidTrackingCode(code.to_string());
        let caps = anchored_re().captures(code).ok_or_else(invalid)?;

        let year: i32 = caps[1].parse().map_err(|_| invalid())?;
        let month = month_from_name(&caps[2]).ok_or_else(invalid)?;
        let category = BillCategory::from_label(&caps[3]).ok_or_else(invalid)?;
        let period = BillingPeriod::new(year, month).map_err(|_| invalid())?;
        Ok((period, category))
    }

    /// Validates an already-stored code.
    pub fn from_stored(code: &str) -> Result<Self, CoreError> {
        Self::parse(code)?;
        Ok(TrackingCode(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn components(&self) -> Result<(BillingPeriod, BillCategory), CoreError> {
        Self::parse(&self.0)
    }
}

impl fmt::Display for TrackingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn period(y: i32, m: u32) -> BillingPeriod {
        BillingPeriod::new(y, m).unwrap()
    }

    #[test]
    fn generate_is_human_readable() {
        let code = TrackingCode::generate(period(2025, 7), BillCategory::Electricity);
        assert_eq!(code.as_str(), "2025-July-Electricity");
    }

    #[test]
    fn parse_known_code() {
        let (p, c) = TrackingCode::parse("2025-July-Electricity").unwrap();
        assert_eq!(p.year(), 2025);
        assert_eq!(p.month(), 7);
        assert_eq!(c, BillCategory::Electricity);
    }

    #[test]
    fn parse_rejects_malformed_codes() {
        for bad in [
            "2025-july-Electricity",
            "2025-July-electricity",
            "25-July-Rent",
            "2025-Jul-Rent",
            "2025-July-Groceries",
            " 2025-July-Rent",
            "2025-July-Rent extra",
        ] {
            assert!(
                matches!(TrackingCode::parse(bad), Err(CoreError::InvalidTrackingCode(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn extract_finds_embedded_code() {
        let text = "Thanks! for 2025-March-Water (split 3 ways)";
        assert_eq!(
            TrackingCode::extract(text).unwrap().as_str(),
            "2025-March-Water"
        );
    }

    #[test]
    fn extract_returns_first_of_several() {
        let text = "2025-March-Water and 2025-April-Water";
        assert_eq!(
            TrackingCode::extract(text).unwrap().as_str(),
            "2025-March-Water"
        );
    }

    #[test]
    fn extract_ignores_prose() {
        assert!(TrackingCode::extract("rent for july, gas and water too").is_none());
        assert!(TrackingCode::extract("May 2025 rent - Electricity").is_none());
        assert!(TrackingCode::extract("12025-July-Gasoline").is_none());
        assert!(TrackingCode::extract("").is_none());
    }

    proptest! {
        #[test]
        fn generate_then_parse_is_identity(year in 1000i32..=9999, month in 1u32..=12, idx in 0usize..6) {
            let p = period(year, month);
            let c = BillCategory::ALL[idx];
            let code = TrackingCode::generate(p, c);
            prop_assert_eq!(TrackingCode::parse(code.as_str()).unwrap(), (p, c));
        }

        #[test]
        fn extract_recovers_single_embedded_code(
            prefix in "[a-z ,.!]{0,30}",
            suffix in "[a-z ,.!]{0,30}",
            year in 1000i32..=9999,
            month in 1u32..=12,
            idx in 0usize..6,
        ) {
            let code = TrackingCode::generate(period(year, month), BillCategory::ALL[idx]);
            let text = format!("{prefix} {code} {suffix}");
            prop_assert_eq!(TrackingCode::extract(&text), Some(code));
        }
    }
}
