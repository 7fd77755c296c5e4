use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::BillCategory;
use crate::error::CoreError;
use crate::money::Money;

/// How categorize/approve rules combine when several of them match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleResolution {
    /// Keep scanning; every later matching rule overwrites the category.
    #[default]
    LastMatchWins,
    /// Stop at the highest-priority categorize/approve rule.
    FirstMatchWins,
}

/// What to do when an embedded tracking code names no open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedCodePolicy {
    #[default]
    FallBackToFuzzy,
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Categorize rules at or above this priority are auto-approved.
    pub auto_approve_priority: i32,
    pub resolution: RuleResolution,
    /// Whole-word descriptor spellings banks use in place of a merchant's
    /// name, e.g. `PGANDE` for `PG&E`. Rules also see the aliased text.
    pub descriptor_aliases: BTreeMap<String, String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            auto_approve_priority: 90,
            resolution: RuleResolution::default(),
            descriptor_aliases: BTreeMap::from([("PGANDE".to_string(), "PG&E".to_string())]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub amount_tolerance_cents: i64,
    pub auto_match_threshold: f64,
    /// How many scored candidates travel with a manual review.
    pub review_candidates: usize,
    pub unresolved_code: UnresolvedCodePolicy,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            amount_tolerance_cents: 100,
            auto_match_threshold: 0.90,
            review_candidates: 3,
            unresolved_code: UnresolvedCodePolicy::default(),
        }
    }
}

impl MatcherConfig {
    pub fn amount_tolerance(&self) -> Money {
        Money::from_cents(self.amount_tolerance_cents)
    }
}

/// Site policy: large payments from the primary payer after the cutover are
/// booked straight against that payer's monthly request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryPayerConfig {
    /// Names the payer shows up under in notifications.
    pub aliases: Vec<String>,
    /// Recipient identity on the payer's outstanding requests.
    pub recipient: String,
    #[serde(default = "default_policy_category")]
    pub category: BillCategory,
    pub min_amount_cents: i64,
    pub cutover: DateTime<Utc>,
}

fn default_policy_category() -> BillCategory {
    BillCategory::Rent
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Upper bound on events matched and applied at the same time.
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Every tunable the engine reads. Passed in at construction so several
/// configurations can run side by side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rules: RulesConfig,
    pub matcher: MatcherConfig,
    pub batch: BatchConfig,
    pub policy: Option<PrimaryPayerConfig>,
}

impl EngineConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, CoreError> {
        let config: EngineConfig = toml::from_str(toml_content)
            .map_err(|e| CoreError::Config(format!("Failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let threshold = self.matcher.auto_match_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CoreError::Config(format!(
                "auto_match_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.matcher.amount_tolerance_cents < 0 {
            return Err(CoreError::Config(
                "amount_tolerance_cents must not be negative".to_string(),
            ));
        }
        if self.matcher.review_candidates == 0 {
            return Err(CoreError::Config(
                "review_candidates must be at least 1".to_string(),
            ));
        }
        if self.batch.concurrency == 0 {
            return Err(CoreError::Config(
                "batch concurrency must be at least 1".to_string(),
            ));
        }
        if let Some(policy) = &self.policy {
            if policy.aliases.is_empty() {
                return Err(CoreError::Config(
                    "policy.aliases must name at least one payer".to_string(),
                ));
            }
        }
        Ok(())
    }
}
