use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// The fixed set of bills that are split with tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillCategory {
    Rent,
    Electricity,
    Gas,
    Water,
    Internet,
    Trash,
}

impl BillCategory {
    pub const ALL: [BillCategory; 6] = [
        BillCategory::Rent,
        BillCategory::Electricity,
        BillCategory::Gas,
        BillCategory::Water,
        BillCategory::Internet,
        BillCategory::Trash,
    ];

    /// Storage / config identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            BillCategory::Rent => "rent",
            BillCategory::Electricity => "electricity",
            BillCategory::Gas => "gas",
            BillCategory::Water => "water",
            BillCategory::Internet => "internet",
            BillCategory::Trash => "trash",
        }
    }

    /// Capitalized form used inside tracking codes.
    pub fn label(self) -> &'static str {
        match self {
            BillCategory::Rent => "Rent",
            BillCategory::Electricity => "Electricity",
            BillCategory::Gas => "Gas",
            BillCategory::Water => "Water",
            BillCategory::Internet => "Internet",
            BillCategory::Trash => "Trash",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }

    /// Lowercase words that identify this bill in notes and bank descriptors.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            BillCategory::Rent => &["rent"],
            BillCategory::Electricity => &["electricity", "electric", "pg&e", "pge", "power"],
            BillCategory::Gas => &["gas"],
            BillCategory::Water => &["water", "sewer"],
            BillCategory::Internet => &["internet", "wifi", "wi-fi", "comcast", "xfinity"],
            BillCategory::Trash => &["trash", "garbage", "recology"],
        }
    }

    /// Whether `text` mentions one of this category's keywords as a whole word.
    pub fn is_mentioned_in(self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.keywords()
            .iter()
            .any(|kw| contains_word(&lowered, kw))
    }

    /// First category mentioned in `text`, in declaration order.
    pub fn detect(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.is_mentioned_in(text))
    }
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

impl fmt::Display for BillCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BillCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| CoreError::UnknownCategory(s.to_string()))
    }
}
