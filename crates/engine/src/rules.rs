use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use rentledger_core::{BillCategory, ClassificationResult, RawTransaction, RuleResolution, RulesConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const RULE_CONFIDENCE: f64 = 0.9;
const HEURISTIC_CONFIDENCE: f64 = 0.5;
const EXCLUDE_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Failed to parse TOML: {0}")]
    Toml(String),
    #[error("Unknown rule action: '{0}'")]
    UnknownAction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    #[default]
    Categorize,
    Approve,
    /// Terminal: drops the transaction from the books.
    Exclude,
}

impl RuleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleAction::Categorize => "categorize",
            RuleAction::Approve => "approve",
            RuleAction::Exclude => "exclude",
        }
    }
}

impl std::str::FromStr for RuleAction {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "categorize" => Ok(RuleAction::Categorize),
            "approve" => Ok(RuleAction::Approve),
            "exclude" => Ok(RuleAction::Exclude),
            other => Err(RuleError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Insertion id; breaks ties between rules of equal priority.
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub priority: i32,
    /// Case-insensitive regex over the transaction description.
    pub pattern: String,
    #[serde(default)]
    pub payee_pattern: Option<String>,
    #[serde(default)]
    pub amount_min_cents: Option<i64>,
    #[serde(default)]
    pub amount_max_cents: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<ClassificationRule>,
}

/// Reads a `[[rules]]` TOML document without compiling the patterns.
pub fn parse_rule_file(toml_content: &str) -> Result<Vec<ClassificationRule>, RuleError> {
    let file: RuleFile =
        toml::from_str(toml_content).map_err(|e| RuleError::Toml(e.to_string()))?;
    Ok(file.rules)
}

/// Internal pairing of a rule with its precompiled regexes.
struct CompiledRule {
    rule: ClassificationRule,
    description_re: Regex,
    payee_re: Option<Regex>,
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    config: RulesConfig,
    /// Uppercased alias -> canonical spelling.
    aliases: HashMap<String, String>,
}

impl RuleEngine {
    /// Inactive rules and rules whose patterns fail to compile are dropped
    /// here; a bad pattern is logged and never aborts classification.
    pub fn new(rules: Vec<ClassificationRule>, config: RulesConfig) -> Self {
        let mut compiled: Vec<CompiledRule> = rules
            .into_iter()
            .filter(|rule| rule.active)
            .filter_map(|rule| {
                let description_re = match compile(&rule.pattern) {
                    Ok(re) => re,
                    Err(e) => {
                        tracing::warn!(rule = %rule.name, error = %e, "skipping rule with malformed pattern");
                        return None;
                    }
                };
                let payee_re = match rule.payee_pattern.as_deref().map(compile).transpose() {
                    Ok(re) => re,
                    Err(e) => {
                        tracing::warn!(rule = %rule.name, error = %e, "skipping rule with malformed payee pattern");
                        return None;
                    }
                };
                Some(CompiledRule {
                    rule,
                    description_re,
                    payee_re,
                })
            })
            .collect();
        // Highest priority first, then insertion order.
        compiled.sort_by(|a, b| {
            b.rule
                .priority
                .cmp(&a.rule.priority)
                .then(a.rule.id.cmp(&b.rule.id))
        });
        let aliases = config
            .descriptor_aliases
            .iter()
            .map(|(alias, canonical)| (alias.to_uppercase(), canonical.clone()))
            .collect();
        Self {
            rules: compiled,
            config,
            aliases,
        }
    }

    pub fn from_toml(toml_content: &str, config: RulesConfig) -> Result<Self, RuleError> {
        Ok(Self::new(parse_rule_file(toml_content)?, config))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn classify(&self, tx: &RawTransaction) -> ClassificationResult {
        let mut result = ClassificationResult::uncategorized();
        let mut matched = false;

        for cr in &self.rules {
            if !self.rule_matches(cr, tx) {
                continue;
            }
            let rule = &cr.rule;
            match rule.action {
                RuleAction::Exclude => {
                    result.excluded = true;
                    result.exclude_reason = Some(rule.name.clone());
                    result.confidence = EXCLUDE_CONFIDENCE;
                    result.auto_approve = false;
                    result.rule_id = Some(rule.id);
                    return result;
                }
                RuleAction::Categorize | RuleAction::Approve => {
                    // Exclude rules further down still get their chance.
                    if matched && self.config.resolution == RuleResolution::FirstMatchWins {
                        continue;
                    }
                    matched = true;
                    result.category = rule.category.clone();
                    result.merchant = rule.merchant.clone();
                    result.confidence = RULE_CONFIDENCE;
                    result.auto_approve = rule.action == RuleAction::Approve
                        || rule.priority >= self.config.auto_approve_priority;
                    result.rule_id = Some(rule.id);
                }
            }
        }

        if matched {
            result
        } else {
            Self::heuristic(tx)
        }
    }

    /// Classifications are independent of one another; callers with large
    /// batches may split the slice across threads.
    pub fn classify_batch(&self, transactions: &[RawTransaction]) -> Vec<ClassificationResult> {
        transactions.iter().map(|tx| self.classify(tx)).collect()
    }

    /// Replaces whole words found in the alias table. `None` when nothing
    /// was replaced.
    fn aliased(&self, text: &str) -> Option<String> {
        if self.aliases.is_empty() {
            return None;
        }
        let mut replaced = false;
        let words: Vec<&str> = text
            .split_whitespace()
            .map(|word| match self.aliases.get(&word.to_uppercase()) {
                Some(canonical) => {
                    replaced = true;
                    canonical.as_str()
                }
                None => word,
            })
            .collect();
        replaced.then(|| words.join(" "))
    }

    fn matches_descriptor(&self, re: &Regex, text: &str) -> bool {
        re.is_match(text) || self.aliased(text).is_some_and(|t| re.is_match(&t))
    }

    fn rule_matches(&self, cr: &CompiledRule, tx: &RawTransaction) -> bool {
        let rule = &cr.rule;
        let amount_cents = tx.amount.to_cents();

        // Optional amount range filter.
        if let Some(min) = rule.amount_min_cents {
            if amount_cents < min {
                return false;
            }
        }
        if let Some(max) = rule.amount_max_cents {
            if amount_cents > max {
                return false;
            }
        }

        if !self.matches_descriptor(&cr.description_re, &tx.description) {
            return false;
        }

        match (&cr.payee_re, tx.payee.as_deref()) {
            (None, _) => true,
            (Some(re), Some(payee)) => self.matches_descriptor(re, payee),
            (Some(_), None) => false,
        }
    }

    fn heuristic(tx: &RawTransaction) -> ClassificationResult {
        let text = match tx.payee.as_deref() {
            Some(payee) => format!("{} {}", tx.description, payee),
            None => tx.description.clone(),
        };
        let mut result = ClassificationResult::uncategorized();
        if let Some(category) = BillCategory::detect(&text) {
            tracing::debug!(category = %category, "no rule matched, keyword heuristic applied");
            result.category = Some(category.as_str().to_string());
            result.confidence = HEURISTIC_CONFIDENCE;
        }
        result
    }
}
