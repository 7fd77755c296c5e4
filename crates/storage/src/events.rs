use chrono::{DateTime, Utc};
use rentledger_core::{MatchResult, Money, PaymentDirection, PaymentEvent, ScoredCandidate, TrackingCode};
use serde::Serialize;
use sqlx::SqliteExecutor;

use crate::db::DbPool;
use crate::error::StorageError;

type EventRow = (
    String,
    String,
    i64,
    Option<String>,
    Option<i64>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
);

const EVENT_COLUMNS: &str =
    "external_id, direction, in_reply_to_request, actor, amount_cents, note, tracking_code, occurred_at";

fn event_from_row(r: EventRow) -> Result<PaymentEvent, StorageError> {
    Ok(PaymentEvent {
        external_id: r.0,
        direction: r.1.parse::<PaymentDirection>()?,
        in_reply_to_request: r.2 != 0,
        actor: r.3,
        amount: r.4.map(Money::from_cents),
        note: r.5,
        tracking_code: r.6.as_deref().map(TrackingCode::from_stored).transpose()?,
        occurred_at: r.7,
    })
}

/// Stores a parsed event unless one with the same external id exists.
/// Returns `true` when the row was new. Accepts a pool or an open transaction.
pub async fn record_event<'e, E>(executor: E, event: &PaymentEvent) -> Result<bool, StorageError>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "INSERT OR IGNORE INTO payment_events (external_id, direction, in_reply_to_request, actor, amount_cents, note, tracking_code, occurred_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.external_id)
    .bind(event.direction.as_str())
    .bind(event.in_reply_to_request)
    .bind(&event.actor)
    .bind(event.amount.map(Money::to_cents))
    .bind(&event.note)
    .bind(event.tracking_code.as_ref().map(TrackingCode::as_str))
    .bind(event.occurred_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_event(pool: &DbPool, external_id: &str) -> Result<Option<PaymentEvent>, StorageError> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM payment_events WHERE external_id = ?"
    ))
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    row.map(event_from_row).transpose()
}

/// Idempotency check: has this external event already been settled?
pub async fn is_event_consumed(pool: &DbPool, external_id: &str) -> Result<bool, StorageError> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT consumed_at FROM payment_events WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(pool)
            .await?;
    Ok(matches!(row, Some((Some(_),))))
}

/// Events that were recorded but never applied, oldest first.
pub async fn get_unconsumed_events(pool: &DbPool) -> Result<Vec<PaymentEvent>, StorageError> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM payment_events WHERE consumed_at IS NULL ORDER BY occurred_at, external_id"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(event_from_row).collect()
}

/// Closes an event that carries no money (requests, reminders, cancellations)
/// so it is not picked up by later reprocessing.
pub async fn retire_event<'e, E>(
    executor: E,
    external_id: &str,
    at: DateTime<Utc>,
) -> Result<bool, StorageError>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE payment_events SET consumed_at = ? WHERE external_id = ? AND consumed_at IS NULL",
    )
    .bind(at)
    .bind(external_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualReview {
    pub id: i64,
    pub event_id: String,
    pub reason: String,
    pub candidates: Vec<ScoredCandidate>,
    pub created_at: DateTime<Utc>,
}

/// Files (or refreshes) the "needs manual review" record for an unmatched
/// result.
pub async fn upsert_manual_review(
    pool: &DbPool,
    result: &MatchResult,
    at: DateTime<Utc>,
) -> Result<(), StorageError> {
    let reason = result
        .failure
        .map(|f| f.as_str())
        .unwrap_or("unmatched");
    let candidates = serde_json::to_string(&result.candidates)?;

    sqlx::query(
        r#"
        INSERT INTO manual_reviews (event_id, reason, candidates, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (event_id) DO UPDATE SET reason = excluded.reason, candidates = excluded.candidates
        WHERE manual_reviews.resolved_at IS NULL
        "#,
    )
    .bind(&result.event_id)
    .bind(reason)
    .bind(candidates)
    .bind(at)
    .execute(pool)
    .await?;

    tracing::info!(event_id = %result.event_id, reason, "event routed to manual review");
    Ok(())
}

pub async fn get_open_manual_reviews(pool: &DbPool) -> Result<Vec<ManualReview>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, String, String, String, DateTime<Utc>)>(
        "SELECT id, event_id, reason, candidates, created_at FROM manual_reviews WHERE resolved_at IS NULL ORDER BY created_at, id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(ManualReview {
                id: r.0,
                event_id: r.1,
                reason: r.2,
                candidates: serde_json::from_str(&r.3)?,
                created_at: r.4,
            })
        })
        .collect()
}
