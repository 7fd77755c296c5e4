pub mod apply;
pub mod db;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod requests;
pub mod rules;

pub use apply::{
    get_outbox, get_reconciliations, ApplyError, LogNotifier, MatchApplier, Notifier,
    NotifyError, PaymentNotice, ReconciliationEntry,
};
pub use db::{create_db, create_memory_db, DbPool};
pub use error::StorageError;
pub use events::{
    get_event, get_open_manual_reviews, get_unconsumed_events, is_event_consumed, record_event,
    retire_event, upsert_manual_review, ManualReview,
};
pub use reconcile::{BatchReport, EventOutcome, EventReport, Reconciler};
pub use requests::{
    create_request, forego_request, get_open_requests, get_open_requests_by_code,
    get_open_requests_for_period, get_open_requests_in_window, get_request, mark_request_sent,
};
pub use rules::{
    get_active_classification_rules, get_raw_transaction, insert_raw_transaction,
    override_classification, record_classification, save_classification_rule,
    set_classification_rule_active,
};
