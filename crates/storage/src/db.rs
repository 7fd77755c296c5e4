use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;

pub type DbPool = Pool<Sqlite>;

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    configure(&pool).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Private in-memory database; lives as long as the pool's single connection.
pub async fn create_memory_db() -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    configure(&pool).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

async fn configure(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classification_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            priority INTEGER NOT NULL,
            pattern TEXT NOT NULL,
            payee_pattern TEXT,
            amount_min_cents INTEGER,
            amount_max_cents INTEGER,
            category TEXT,
            merchant TEXT,
            action TEXT NOT NULL CHECK (action IN ('categorize', 'approve', 'exclude')),
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            amount_cents INTEGER NOT NULL,
            description TEXT NOT NULL,
            payee TEXT,
            occurred_at TEXT NOT NULL,
            direction TEXT NOT NULL,
            category TEXT,
            merchant TEXT,
            confidence REAL,
            auto_approve INTEGER NOT NULL DEFAULT 0,
            excluded INTEGER NOT NULL DEFAULT 0,
            exclude_reason TEXT,
            rule_id INTEGER,
            classified_at TEXT,
            manually_overridden INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outstanding_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            amount_cents INTEGER NOT NULL,
            recipient TEXT NOT NULL,
            category TEXT NOT NULL,
            period_year INTEGER NOT NULL,
            period_month INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'sent', 'paid', 'foregone')),
            tracking_code TEXT NOT NULL,
            created_at TEXT NOT NULL,
            paid_at TEXT,
            UNIQUE (recipient, period_year, period_month, category)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_requests_status_amount ON outstanding_requests (status, amount_cents)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payment_events (
            external_id TEXT PRIMARY KEY,
            direction TEXT NOT NULL,
            in_reply_to_request INTEGER NOT NULL DEFAULT 0,
            actor TEXT,
            amount_cents INTEGER,
            note TEXT,
            tracking_code TEXT,
            occurred_at TEXT NOT NULL,
            recorded_at TEXT NOT NULL DEFAULT (datetime('now')),
            consumed_at TEXT,
            match_method TEXT,
            match_confidence REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One reconciliation per request and per event, enforced here rather than
    // in process so that every entry point is covered.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconciliations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id INTEGER NOT NULL UNIQUE,
            event_id TEXT NOT NULL UNIQUE,
            method TEXT NOT NULL,
            confidence REAL NOT NULL,
            reconciled_at TEXT NOT NULL,
            FOREIGN KEY (request_id) REFERENCES outstanding_requests(id),
            FOREIGN KEY (event_id) REFERENCES payment_events(external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manual_reviews (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL UNIQUE,
            reason TEXT NOT NULL,
            candidates TEXT NOT NULL,
            created_at TEXT NOT NULL,
            resolved_at TEXT,
            FOREIGN KEY (event_id) REFERENCES payment_events(external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id INTEGER NOT NULL UNIQUE,
            event_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (request_id) REFERENCES outstanding_requests(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
