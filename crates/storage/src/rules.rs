use chrono::{DateTime, Utc};
use rentledger_core::{ClassificationResult, Money, RawTransaction, TransactionDirection};
use rentledger_engine::{ClassificationRule, RuleAction};

use crate::db::DbPool;
use crate::error::StorageError;

pub async fn save_classification_rule(
    pool: &DbPool,
    rule: &ClassificationRule,
) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO classification_rules (name, priority, pattern, payee_pattern, amount_min_cents, amount_max_cents, category, merchant, action, active) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&rule.name)
    .bind(rule.priority)
    .bind(&rule.pattern)
    .bind(&rule.payee_pattern)
    .bind(rule.amount_min_cents)
    .bind(rule.amount_max_cents)
    .bind(&rule.category)
    .bind(&rule.merchant)
    .bind(rule.action.as_str())
    .bind(rule.active)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

pub async fn set_classification_rule_active(
    pool: &DbPool,
    id: i64,
    active: bool,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE classification_rules SET active = ? WHERE id = ?")
        .bind(active)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Active rules in evaluation order: priority descending, then insertion id.
/// Rows with an unknown action are logged and left out.
pub async fn get_active_classification_rules(
    pool: &DbPool,
) -> Result<Vec<ClassificationRule>, StorageError> {
    let rows = sqlx::query_as::<
        _,
        (
            i64,
            String,
            i32,
            String,
            Option<String>,
            Option<i64>,
            Option<i64>,
            Option<String>,
            Option<String>,
            String,
        ),
    >(
        "SELECT id, name, priority, pattern, payee_pattern, amount_min_cents, amount_max_cents, category, merchant, action FROM classification_rules WHERE active = 1 ORDER BY priority DESC, id ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|r| {
            let action = match r.9.parse::<RuleAction>() {
                Ok(action) => action,
                Err(e) => {
                    tracing::warn!(rule = %r.1, error = %e, "skipping stored rule");
                    return None;
                }
            };
            Some(ClassificationRule {
                id: r.0,
                name: r.1,
                priority: r.2,
                pattern: r.3,
                payee_pattern: r.4,
                amount_min_cents: r.5,
                amount_max_cents: r.6,
                category: r.7,
                merchant: r.8,
                action,
                active: true,
            })
        })
        .collect())
}

pub async fn insert_raw_transaction(
    pool: &DbPool,
    tx: &RawTransaction,
) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO raw_transactions (amount_cents, description, payee, occurred_at, direction) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(tx.amount.to_cents())
    .bind(&tx.description)
    .bind(&tx.payee)
    .bind(tx.timestamp)
    .bind(tx.direction.as_str())
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// Writes the engine's classification. A transaction is classified once;
/// later changes must go through [`override_classification`].
pub async fn record_classification(
    pool: &DbPool,
    id: i64,
    result: &ClassificationResult,
    at: DateTime<Utc>,
) -> Result<(), StorageError> {
    let updated = write_classification(
        pool,
        id,
        result,
        at,
        false,
        "AND classified_at IS NULL",
    )
    .await?;
    if updated == 0 {
        return Err(StorageError::AlreadyClassified(id));
    }
    Ok(())
}

pub async fn override_classification(
    pool: &DbPool,
    id: i64,
    result: &ClassificationResult,
    at: DateTime<Utc>,
) -> Result<(), StorageError> {
    write_classification(pool, id, result, at, true, "").await?;
    Ok(())
}

async fn write_classification(
    pool: &DbPool,
    id: i64,
    result: &ClassificationResult,
    at: DateTime<Utc>,
    manual: bool,
    guard: &str,
) -> Result<u64, StorageError> {
    let sql = format!(
        "UPDATE raw_transactions SET category = ?, merchant = ?, confidence = ?, auto_approve = ?, excluded = ?, exclude_reason = ?, rule_id = ?, classified_at = ?, manually_overridden = ? WHERE id = ? {guard}"
    );
    let updated = sqlx::query(&sql)
        .bind(&result.category)
        .bind(&result.merchant)
        .bind(result.confidence)
        .bind(result.auto_approve)
        .bind(result.excluded)
        .bind(&result.exclude_reason)
        .bind(result.rule_id)
        .bind(at)
        .bind(manual)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(updated.rows_affected())
}

type TransactionRow = (
    i64,
    i64,
    String,
    Option<String>,
    DateTime<Utc>,
    String,
    Option<String>,
    Option<String>,
    Option<f64>,
    i64,
    i64,
    Option<String>,
    Option<i64>,
    Option<DateTime<Utc>>,
    i64,
);

pub async fn get_raw_transaction(
    pool: &DbPool,
    id: i64,
) -> Result<Option<RawTransaction>, StorageError> {
    let row = sqlx::query_as::<_, TransactionRow>(
        "SELECT id, amount_cents, description, payee, occurred_at, direction, category, merchant, confidence, auto_approve, excluded, exclude_reason, rule_id, classified_at, manually_overridden FROM raw_transactions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(r) = row else {
        return Ok(None);
    };
    let direction = r.5.parse::<TransactionDirection>()?;
    let classification = r.13.map(|_| ClassificationResult {
        category: r.6,
        merchant: r.7,
        confidence: r.8.unwrap_or_default(),
        auto_approve: r.9 != 0,
        excluded: r.10 != 0,
        exclude_reason: r.11,
        rule_id: r.12,
    });

    Ok(Some(RawTransaction {
        id: Some(r.0),
        amount: Money::from_cents(r.1),
        description: r.2,
        payee: r.3,
        timestamp: r.4,
        direction,
        classification,
        manually_overridden: r.14 != 0,
    }))
}
