pub mod match_engine;
pub mod notification;
pub mod policy;
pub mod rules;
pub(crate) mod util;

pub use match_engine::{
    amount_score, name_score, note_score, weighted_confidence, ReconciliationMatcher,
};
pub use notification::{idempotency_key, NotificationParser};
pub use policy::{PolicyOverride, PrimaryPayerPolicy};
pub use rules::{parse_rule_file, ClassificationRule, RuleAction, RuleEngine, RuleError};
pub use util::normalize_name;
