use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionDirection {
    Debit,
    Credit,
}

impl TransactionDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionDirection::Debit => "debit",
            TransactionDirection::Credit => "credit",
        }
    }
}

impl std::str::FromStr for TransactionDirection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(TransactionDirection::Debit),
            "credit" => Ok(TransactionDirection::Credit),
            other => Err(CoreError::UnknownDirection(other.to_string())),
        }
    }
}

/// Outcome of running a transaction through the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Option<String>,
    pub merchant: Option<String>,
    pub confidence: f64,
    pub auto_approve: bool,
    pub excluded: bool,
    pub exclude_reason: Option<String>,
    /// Id of the last rule that shaped the result, if any.
    pub rule_id: Option<i64>,
}

impl ClassificationResult {
    pub fn uncategorized() -> Self {
        ClassificationResult {
            category: None,
            merchant: None,
            confidence: 0.0,
            auto_approve: false,
            excluded: false,
            exclude_reason: None,
            rule_id: None,
        }
    }
}

/// A bank transaction as imported, before and after classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub id: Option<i64>,
    pub amount: Money,
    pub description: String,
    #[serde(default)]
    pub payee: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub direction: TransactionDirection,
    #[serde(default)]
    pub classification: Option<ClassificationResult>,
    #[serde(default)]
    pub manually_overridden: bool,
}

impl RawTransaction {
    pub fn new(
        amount: Money,
        description: &str,
        payee: Option<&str>,
        timestamp: DateTime<Utc>,
        direction: TransactionDirection,
    ) -> Self {
        RawTransaction {
            id: None,
            amount,
            description: description.to_string(),
            payee: payee.map(str::to_string),
            timestamp,
            direction,
            classification: None,
            manually_overridden: false,
        }
    }

    /// Classification is written exactly once; later changes go through
    /// [`RawTransaction::override_classification`].
    pub fn apply_classification(&mut self, result: ClassificationResult) -> Result<(), CoreError> {
        if self.classification.is_some() {
            return Err(CoreError::AlreadyClassified);
        }
        self.classification = Some(result);
        Ok(())
    }

    pub fn override_classification(&mut self, result: ClassificationResult) {
        self.classification = Some(result);
        self.manually_overridden = true;
    }
}
