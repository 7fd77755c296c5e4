use std::collections::HashSet;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rentledger_core::{
    EngineConfig, MatchFailure, MatchResult, Notification, OutstandingRequest, PaymentDirection,
    PaymentEvent, RequestId, RequestStatus,
};
use rentledger_engine::{normalize_name, NotificationParser, ReconciliationMatcher};
use serde::Serialize;

use crate::apply::{ApplyError, MatchApplier, Notifier, ReconciliationEntry};
use crate::db::DbPool;
use crate::error::StorageError;
use crate::events::{
    get_event, get_unconsumed_events, is_event_consumed, record_event, retire_event,
    upsert_manual_review,
};
use crate::requests::{
    get_open_requests_by_code, get_open_requests_for_period, get_open_requests_in_window,
    transition,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Matched { entry: ReconciliationEntry },
    /// A "requested" notification confirmed that the request went out.
    MarkedSent { request_id: RequestId },
    /// Carried no money; closed without a match.
    Retired,
    Review { reason: MatchFailure, candidates: usize },
    /// Already applied earlier or repeated within the batch.
    Duplicate,
    /// Left unconsumed; picked up again by reprocessing.
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub event_id: String,
    #[serde(flatten)]
    pub outcome: EventOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub events: Vec<EventReport>,
}

impl BatchReport {
    pub fn matched(&self) -> usize {
        self.count(|o| matches!(o, EventOutcome::Matched { .. }))
    }

    pub fn reviews(&self) -> usize {
        self.count(|o| matches!(o, EventOutcome::Review { .. }))
    }

    pub fn duplicates(&self) -> usize {
        self.count(|o| matches!(o, EventOutcome::Duplicate))
    }

    pub fn failures(&self) -> usize {
        self.count(|o| matches!(o, EventOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&EventOutcome) -> bool) -> usize {
        self.events.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Drives notifications through parse, match and apply against the database.
pub struct Reconciler {
    parser: NotificationParser,
    matcher: ReconciliationMatcher,
    applier: MatchApplier,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(pool: DbPool, config: &EngineConfig, notifier: Box<dyn Notifier>) -> Self {
        Reconciler {
            parser: NotificationParser::new(),
            matcher: ReconciliationMatcher::from_engine_config(config),
            applier: MatchApplier::new(pool, notifier),
            concurrency: config.batch.concurrency.max(1),
        }
    }

    fn pool(&self) -> &DbPool {
        self.applier.pool()
    }

    pub async fn reconcile_batch(
        &self,
        notifications: &[Notification],
    ) -> Result<BatchReport, StorageError> {
        let mut seen = HashSet::new();
        let mut slots: Vec<Option<EventReport>> = Vec::with_capacity(notifications.len());
        let mut pending = Vec::new();

        for notification in notifications {
            let event = self.parser.parse(notification);
            if !seen.insert(event.external_id.clone())
                || is_event_consumed(self.pool(), &event.external_id).await?
            {
                tracing::info!(event_id = %event.external_id, "skipping duplicate event");
                slots.push(Some(EventReport {
                    event_id: event.external_id,
                    outcome: EventOutcome::Duplicate,
                }));
                continue;
            }
            record_event(self.pool(), &event).await?;
            pending.push((slots.len(), event));
            slots.push(None);
        }

        for (idx, report) in self.run(pending).await {
            slots[idx] = Some(report);
        }

        let events: Vec<EventReport> = slots.into_iter().flatten().collect();
        let report = BatchReport { events };
        tracing::info!(
            total = report.events.len(),
            matched = report.matched(),
            reviews = report.reviews(),
            duplicates = report.duplicates(),
            failures = report.failures(),
            "batch reconciled"
        );
        Ok(report)
    }

    /// Runs every recorded but unconsumed event through matching again, for
    /// example after new requests were created or an apply failed.
    pub async fn reprocess_unconsumed(&self) -> Result<BatchReport, StorageError> {
        let events = get_unconsumed_events(self.pool()).await?;
        let mut reports = self.run(events.into_iter().enumerate().collect()).await;
        reports.sort_by_key(|(idx, _)| *idx);
        Ok(BatchReport {
            events: reports.into_iter().map(|(_, r)| r).collect(),
        })
    }

    /// Applies an operator's decision for an event in manual review.
    pub async fn resolve_manually(
        &self,
        event_id: &str,
        request_id: RequestId,
    ) -> Result<ReconciliationEntry, ApplyError> {
        let event = get_event(self.pool(), event_id)
            .await?
            .ok_or_else(|| StorageError::EventNotFound(event_id.to_string()))?;
        self.applier
            .apply(&event, &MatchResult::manual(event_id, request_id))
            .await
    }

    async fn run(&self, events: Vec<(usize, PaymentEvent)>) -> Vec<(usize, EventReport)> {
        let (claimed, free): (Vec<_>, Vec<_>) = events
            .into_iter()
            .partition(|(_, event)| self.matcher.policy_claims(event));

        let mut reports = Vec::new();
        // Policy-selected requests are chosen from shared state, so those
        // events go one at a time in arrival order.
        for (idx, event) in claimed {
            reports.push((idx, self.report(&event).await));
        }

        let concurrent: Vec<(usize, EventReport)> = stream::iter(free)
            .map(|(idx, event)| async move { (idx, self.report(&event).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        reports.extend(concurrent);
        reports
    }

    async fn report(&self, event: &PaymentEvent) -> EventReport {
        let outcome = match self.process(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(event_id = %event.external_id, error = %e, "event left unconsumed");
                EventOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        EventReport {
            event_id: event.external_id.clone(),
            outcome,
        }
    }

    async fn process(&self, event: &PaymentEvent) -> Result<EventOutcome, ApplyError> {
        if event.direction == PaymentDirection::Requested {
            return self.confirm_sent(event).await;
        }

        let candidates = self.candidates(event).await?;
        let result = self.matcher.match_event(event, &candidates);

        if result.is_matched() {
            let entry = self.applier.apply(event, &result).await?;
            return Ok(EventOutcome::Matched { entry });
        }

        let reason = result.failure.unwrap_or(MatchFailure::NoCandidates);
        if reason == MatchFailure::NotAPayment {
            retire_event(self.pool(), &event.external_id, Utc::now()).await?;
            return Ok(EventOutcome::Retired);
        }

        upsert_manual_review(self.pool(), &result, Utc::now()).await?;
        Ok(EventOutcome::Review {
            reason,
            candidates: result.candidates.len(),
        })
    }

    /// A "you requested" notification carrying a tracking code moves the
    /// matching pending request to Sent.
    async fn confirm_sent(&self, event: &PaymentEvent) -> Result<EventOutcome, ApplyError> {
        let mut target = None;
        if let Some(code) = &event.tracking_code {
            let pending: Vec<OutstandingRequest> = get_open_requests_by_code(self.pool(), code)
                .await?
                .into_iter()
                .filter(|r| r.status == RequestStatus::Pending)
                .collect();
            target = match pending.as_slice() {
                [only] => Some(only.id),
                many => event.actor.as_deref().map(normalize_name).and_then(|actor| {
                    many.iter()
                        .find(|r| normalize_name(&r.recipient) == actor)
                        .map(|r| r.id)
                }),
            };
        }

        // The status change and the event's consumption commit together, so a
        // failure leaves the event for reprocessing.
        let mut tx = self.pool().begin().await?;
        if let Some(request_id) = target {
            transition(
                &mut tx,
                request_id,
                &[RequestStatus::Pending],
                RequestStatus::Sent,
            )
            .await?;
        }
        retire_event(&mut *tx, &event.external_id, Utc::now()).await?;
        tx.commit().await?;

        Ok(match target {
            Some(request_id) => EventOutcome::MarkedSent { request_id },
            None => EventOutcome::Retired,
        })
    }

    /// Open requests the matcher may consider: the amount window, anything
    /// sharing the event's tracking code and, for policy events, the event's
    /// billing period.
    async fn candidates(&self, event: &PaymentEvent) -> Result<Vec<OutstandingRequest>, StorageError> {
        if !event.is_payment() || !event.is_parsed() {
            return Ok(Vec::new());
        }
        let mut requests = Vec::new();
        if let Some(amount) = event.amount {
            requests.extend(
                get_open_requests_in_window(self.pool(), amount, self.matcher.config().amount_tolerance())
                    .await?,
            );
        }
        if let Some(code) = &event.tracking_code {
            requests.extend(get_open_requests_by_code(self.pool(), code).await?);
        }
        if self.matcher.policy_claims(event) {
            requests.extend(get_open_requests_for_period(self.pool(), event.period()).await?);
        }

        let mut seen = HashSet::new();
        requests.retain(|r| seen.insert(r.id));
        Ok(requests)
    }
}
