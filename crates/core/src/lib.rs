pub mod category;
pub mod config;
pub mod error;
pub mod event;
pub mod matching;
pub mod money;
pub mod period;
pub mod request;
pub mod tracking;
pub mod transaction;

pub use category::BillCategory;
pub use config::{
    BatchConfig, EngineConfig, MatcherConfig, PrimaryPayerConfig, RuleResolution, RulesConfig,
    UnresolvedCodePolicy,
};
pub use error::CoreError;
pub use event::{Notification, PaymentDirection, PaymentEvent};
pub use matching::{MatchFailure, MatchMethod, MatchResult, ScoredCandidate};
pub use money::Money;
pub use period::BillingPeriod;
pub use request::{NewRequest, OutstandingRequest, RequestId, RequestStatus};
pub use tracking::TrackingCode;
pub use transaction::{ClassificationResult, RawTransaction, TransactionDirection};
