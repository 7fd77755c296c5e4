use chrono::{DateTime, Utc};
use rentledger_core::{
    BillCategory, BillingPeriod, MatchMethod, MatchResult, Money, PaymentEvent, RequestId,
    RequestStatus, TrackingCode,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DbPool;
use crate::error::StorageError;
use crate::events::record_event;
use crate::requests::{request_from_row, RequestRow, REQUEST_COLUMNS};

/// Payload handed to the outside world once a request is settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentNotice {
    pub request_id: RequestId,
    pub event_id: String,
    pub recipient: String,
    pub category: BillCategory,
    pub period: BillingPeriod,
    pub amount: Money,
    pub tracking_code: TrackingCode,
    pub method: MatchMethod,
    pub confidence: f64,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery hook for settled payments. Called inside the apply transaction;
/// returning an error rolls the whole apply back.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &PaymentNotice) -> Result<(), NotifyError>;
}

/// Notifier that only writes the notice to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &PaymentNotice) -> Result<(), NotifyError> {
        tracing::info!(
            request = %notice.request_id,
            recipient = %notice.recipient,
            amount = %notice.amount,
            code = %notice.tracking_code,
            "payment received"
        );
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Event '{0}' has no matched request")]
    NotMatched(String),
    #[error("Request {0} is already paid")]
    AlreadyPaid(RequestId),
    #[error("Request {id} is {status} and cannot be paid")]
    RequestClosed { id: RequestId, status: RequestStatus },
    #[error("Request {0} not found")]
    RequestNotFound(RequestId),
    #[error("Event '{0}' was already applied")]
    EventAlreadyConsumed(String),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for ApplyError {
    fn from(e: sqlx::Error) -> Self {
        ApplyError::Storage(StorageError::Database(e))
    }
}

/// One row of the reconciliation ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationEntry {
    pub id: i64,
    pub request_id: RequestId,
    pub event_id: String,
    pub method: String,
    pub confidence: f64,
    pub reconciled_at: DateTime<Utc>,
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// The only writer of settled state: consumes the event, marks the request
/// paid, books the ledger entry and queues the notice, all in one transaction.
pub struct MatchApplier {
    pool: DbPool,
    notifier: Box<dyn Notifier>,
}

impl MatchApplier {
    pub fn new(pool: DbPool, notifier: Box<dyn Notifier>) -> Self {
        MatchApplier { pool, notifier }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn apply(
        &self,
        event: &PaymentEvent,
        result: &MatchResult,
    ) -> Result<ReconciliationEntry, ApplyError> {
        let (Some(request_id), Some(method)) = (result.request_id, result.method) else {
            return Err(ApplyError::NotMatched(event.external_id.clone()));
        };
        if !result.is_matched() || result.event_id != event.external_id {
            return Err(ApplyError::NotMatched(event.external_id.clone()));
        }
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        record_event(&mut *tx, event).await?;

        let consumed = sqlx::query(
            "UPDATE payment_events SET consumed_at = ?, match_method = ?, match_confidence = ? WHERE external_id = ? AND consumed_at IS NULL",
        )
        .bind(now)
        .bind(method.as_str())
        .bind(result.confidence)
        .bind(&event.external_id)
        .execute(&mut *tx)
        .await?;
        if consumed.rows_affected() == 0 {
            return Err(ApplyError::EventAlreadyConsumed(event.external_id.clone()));
        }

        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM outstanding_requests WHERE id = ?"
        ))
        .bind(request_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let request = match row {
            Some(row) => request_from_row(row)?,
            None => return Err(ApplyError::RequestNotFound(request_id)),
        };
        match request.status {
            RequestStatus::Paid => return Err(ApplyError::AlreadyPaid(request_id)),
            RequestStatus::Foregone => {
                return Err(ApplyError::RequestClosed {
                    id: request_id,
                    status: request.status,
                })
            }
            RequestStatus::Pending | RequestStatus::Sent => {}
        }

        let paid = sqlx::query(
            "UPDATE outstanding_requests SET status = 'paid', paid_at = ? WHERE id = ? AND status IN ('pending', 'sent')",
        )
        .bind(now)
        .bind(request_id.0)
        .execute(&mut *tx)
        .await?;
        if paid.rows_affected() == 0 {
            return Err(ApplyError::AlreadyPaid(request_id));
        }

        let entry_id: (i64,) = sqlx::query_as(
            "INSERT INTO reconciliations (request_id, event_id, method, confidence, reconciled_at) VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(request_id.0)
        .bind(&event.external_id)
        .bind(method.as_str())
        .bind(result.confidence)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApplyError::AlreadyPaid(request_id)
            } else {
                ApplyError::from(e)
            }
        })?;

        sqlx::query(
            "UPDATE manual_reviews SET resolved_at = ? WHERE event_id = ? AND resolved_at IS NULL",
        )
        .bind(now)
        .bind(&event.external_id)
        .execute(&mut *tx)
        .await?;

        let notice = PaymentNotice {
            request_id,
            event_id: event.external_id.clone(),
            recipient: request.recipient.clone(),
            category: request.category,
            period: request.period,
            amount: event.amount.unwrap_or(request.amount),
            tracking_code: request.tracking_code.clone(),
            method,
            confidence: result.confidence,
            paid_at: now,
        };
        sqlx::query("INSERT INTO notification_outbox (request_id, event_id, payload) VALUES (?, ?, ?)")
            .bind(request_id.0)
            .bind(&event.external_id)
            .bind(serde_json::to_string(&notice).map_err(StorageError::from)?)
            .execute(&mut *tx)
            .await?;

        if let Err(e) = self.notifier.notify(&notice) {
            tracing::warn!(event_id = %event.external_id, request = %request_id, error = %e, "notifier failed, rolling back");
            return Err(e.into());
        }

        tx.commit().await?;

        tracing::info!(
            event_id = %event.external_id,
            request = %request_id,
            method = %method,
            confidence = result.confidence,
            "request reconciled"
        );

        Ok(ReconciliationEntry {
            id: entry_id.0,
            request_id,
            event_id: event.external_id.clone(),
            method: method.as_str().to_string(),
            confidence: result.confidence,
            reconciled_at: now,
        })
    }
}

pub async fn get_reconciliations(pool: &DbPool) -> Result<Vec<ReconciliationEntry>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, i64, String, String, f64, DateTime<Utc>)>(
        "SELECT id, request_id, event_id, method, confidence, reconciled_at FROM reconciliations ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| ReconciliationEntry {
            id: r.0,
            request_id: RequestId(r.1),
            event_id: r.2,
            method: r.3,
            confidence: r.4,
            reconciled_at: r.5,
        })
        .collect())
}

/// Notices queued by successful applies, oldest first.
pub async fn get_outbox(pool: &DbPool) -> Result<Vec<PaymentNotice>, StorageError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT payload FROM notification_outbox ORDER BY id")
            .fetch_all(pool)
            .await?;
    rows.into_iter()
        .map(|(payload,)| serde_json::from_str(&payload).map_err(StorageError::from))
        .collect()
}
