use chrono::{DateTime, Utc};
use rentledger_core::{
    BillCategory, BillingPeriod, Money, NewRequest, OutstandingRequest, RequestId, RequestStatus,
    TrackingCode,
};

use sqlx::{SqliteConnection, SqliteExecutor};

use crate::db::DbPool;
use crate::error::StorageError;

pub(crate) const REQUEST_COLUMNS: &str = "id, amount_cents, recipient, category, period_year, period_month, status, tracking_code, created_at, paid_at";

pub(crate) type RequestRow = (
    i64,
    i64,
    String,
    String,
    i64,
    i64,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

pub(crate) fn request_from_row(r: RequestRow) -> Result<OutstandingRequest, StorageError> {
    Ok(OutstandingRequest {
        id: RequestId(r.0),
        amount: Money::from_cents(r.1),
        recipient: r.2,
        category: r.3.parse::<BillCategory>()?,
        period: BillingPeriod::new(r.4 as i32, r.5 as u32)?,
        status: r.6.parse::<RequestStatus>()?,
        tracking_code: TrackingCode::from_stored(&r.7)?,
        created_at: r.8,
        paid_at: r.9,
    })
}

fn requests_from_rows(rows: Vec<RequestRow>) -> Result<Vec<OutstandingRequest>, StorageError> {
    rows.into_iter().map(request_from_row).collect()
}

/// Creates the request for (recipient, period, category) unless it already
/// exists, in which case the stored one is returned untouched.
pub async fn create_request(
    pool: &DbPool,
    request: &NewRequest,
    created_at: DateTime<Utc>,
) -> Result<OutstandingRequest, StorageError> {
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO outstanding_requests (amount_cents, recipient, category, period_year, period_month, status, tracking_code, created_at) VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)",
    )
    .bind(request.amount.to_cents())
    .bind(&request.recipient)
    .bind(request.category.as_str())
    .bind(request.period.year())
    .bind(request.period.month())
    .bind(request.tracking_code().as_str())
    .bind(created_at)
    .execute(pool)
    .await?;

    if inserted.rows_affected() == 0 {
        tracing::debug!(
            recipient = %request.recipient,
            period = %request.period,
            category = %request.category,
            "request already exists"
        );
    }

    let row = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {REQUEST_COLUMNS} FROM outstanding_requests WHERE recipient = ? AND period_year = ? AND period_month = ? AND category = ?"
    ))
    .bind(&request.recipient)
    .bind(request.period.year())
    .bind(request.period.month())
    .bind(request.category.as_str())
    .fetch_one(pool)
    .await?;

    request_from_row(row)
}

pub async fn get_request<'e, E>(
    executor: E,
    id: RequestId,
) -> Result<Option<OutstandingRequest>, StorageError>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {REQUEST_COLUMNS} FROM outstanding_requests WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(executor)
    .await?;

    row.map(request_from_row).transpose()
}

/// Pending/Sent requests whose amount lies within `amount ± tolerance`.
pub async fn get_open_requests_in_window(
    pool: &DbPool,
    amount: Money,
    tolerance: Money,
) -> Result<Vec<OutstandingRequest>, StorageError> {
    let low = (amount - tolerance).to_cents();
    let high = (amount + tolerance).to_cents();
    let rows = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {REQUEST_COLUMNS} FROM outstanding_requests WHERE status IN ('pending', 'sent') AND amount_cents BETWEEN ? AND ? ORDER BY created_at DESC, id DESC"
    ))
    .bind(low)
    .bind(high)
    .fetch_all(pool)
    .await?;

    requests_from_rows(rows)
}

pub async fn get_open_requests_by_code(
    pool: &DbPool,
    code: &TrackingCode,
) -> Result<Vec<OutstandingRequest>, StorageError> {
    let rows = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {REQUEST_COLUMNS} FROM outstanding_requests WHERE status IN ('pending', 'sent') AND tracking_code = ?"
    ))
    .bind(code.as_str())
    .fetch_all(pool)
    .await?;

    requests_from_rows(rows)
}

pub async fn get_open_requests_for_period(
    pool: &DbPool,
    period: BillingPeriod,
) -> Result<Vec<OutstandingRequest>, StorageError> {
    let rows = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {REQUEST_COLUMNS} FROM outstanding_requests WHERE status IN ('pending', 'sent') AND period_year = ? AND period_month = ?"
    ))
    .bind(period.year())
    .bind(period.month())
    .fetch_all(pool)
    .await?;

    requests_from_rows(rows)
}

pub async fn get_open_requests(pool: &DbPool) -> Result<Vec<OutstandingRequest>, StorageError> {
    let rows = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {REQUEST_COLUMNS} FROM outstanding_requests WHERE status IN ('pending', 'sent') ORDER BY period_year, period_month, recipient"
    ))
    .fetch_all(pool)
    .await?;

    requests_from_rows(rows)
}

/// Guarded status change on an existing connection, so callers can run it
/// inside a wider transaction.
pub(crate) async fn transition(
    conn: &mut SqliteConnection,
    id: RequestId,
    from: &[RequestStatus],
    to: RequestStatus,
) -> Result<(), StorageError> {
    let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let placeholders = vec!["?"; allowed.len()].join(", ");
    let sql = format!(
        "UPDATE outstanding_requests SET status = ? WHERE id = ? AND status IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql).bind(to.as_str()).bind(id.0);
    for status in &allowed {
        query = query.bind(*status);
    }
    let updated = query.execute(&mut *conn).await?;

    if updated.rows_affected() == 1 {
        tracing::info!(request = %id, status = %to, "request status changed");
        return Ok(());
    }
    match get_request(&mut *conn, id).await? {
        None => Err(StorageError::RequestNotFound(id)),
        Some(current) => Err(StorageError::IllegalTransition {
            id,
            from: current.status,
            to,
        }),
    }
}

/// Pending -> Sent once the payment request has gone out.
pub async fn mark_request_sent(pool: &DbPool, id: RequestId) -> Result<(), StorageError> {
    let mut conn = pool.acquire().await?;
    transition(&mut conn, id, &[RequestStatus::Pending], RequestStatus::Sent).await
}

/// Manual write-off. Never invoked by automatic matching.
pub async fn forego_request(pool: &DbPool, id: RequestId) -> Result<(), StorageError> {
    let mut conn = pool.acquire().await?;
    transition(
        &mut conn,
        id,
        &[RequestStatus::Pending, RequestStatus::Sent],
        RequestStatus::Foregone,
    )
    .await
}
