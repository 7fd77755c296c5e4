use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rentledger_core::{
    BillCategory, BillingPeriod, ClassificationResult, EngineConfig, Money, NewRequest,
    Notification, RawTransaction, RequestId,
};
use rentledger_engine::{parse_rule_file, RuleEngine};
use rentledger_storage as storage;
use serde::Serialize;

use crate::{Cli, Command};

#[derive(Debug, Serialize)]
struct ClassifiedOutput {
    id: Option<i64>,
    description: String,
    amount: Money,
    classification: ClassificationResult,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    EngineConfig::from_toml(&content).with_context(|| format!("loading config {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let db = storage::create_db(&cli.db)
        .await
        .with_context(|| format!("opening database {}", cli.db.display()))?;

    match cli.command {
        Command::ImportRules { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let rules = parse_rule_file(&content)?;
            let mut ids = Vec::with_capacity(rules.len());
            for rule in &rules {
                ids.push(storage::save_classification_rule(&db, rule).await?);
            }
            tracing::info!(count = ids.len(), "rules imported");
            print_json(&ids)
        }
        Command::Classify { file, dry_run } => {
            let transactions: Vec<RawTransaction> = read_json(&file)?;
            let rules = storage::get_active_classification_rules(&db).await?;
            let engine = RuleEngine::new(rules, config.rules.clone());
            tracing::info!(rules = engine.rule_count(), transactions = transactions.len(), "classifying");

            let results = engine.classify_batch(&transactions);
            let mut output = Vec::with_capacity(transactions.len());
            for (tx, result) in transactions.into_iter().zip(results) {
                let id = if dry_run {
                    None
                } else {
                    let id = storage::insert_raw_transaction(&db, &tx).await?;
                    storage::record_classification(&db, id, &result, Utc::now()).await?;
                    Some(id)
                };
                output.push(ClassifiedOutput {
                    id,
                    description: tx.description,
                    amount: tx.amount,
                    classification: result,
                });
            }
            print_json(&output)
        }
        Command::Override {
            transaction,
            category,
        } => {
            let Some(mut tx) = storage::get_raw_transaction(&db, transaction).await? else {
                bail!("transaction {transaction} not found");
            };
            let category = category.parse::<BillCategory>()?;
            let result = ClassificationResult {
                category: Some(category.as_str().to_string()),
                confidence: 1.0,
                auto_approve: true,
                ..ClassificationResult::uncategorized()
            };
            storage::override_classification(&db, transaction, &result, Utc::now()).await?;
            tx.override_classification(result);
            print_json(&tx)
        }
        Command::Bill {
            recipient,
            category,
            year,
            month,
            amount,
        } => {
            let request = NewRequest {
                amount: amount.parse::<Money>()?,
                recipient,
                category: category.parse::<BillCategory>()?,
                period: BillingPeriod::new(year, month)?,
            };
            let created = storage::create_request(&db, &request, Utc::now()).await?;
            print_json(&created)
        }
        Command::Requests => print_json(&storage::get_open_requests(&db).await?),
        Command::Reconcile { file } => {
            let notifications: Vec<Notification> = read_json(&file)?;
            let reconciler =
                storage::Reconciler::new(db, &config, Box::new(storage::LogNotifier));
            let report = reconciler.reconcile_batch(&notifications).await?;
            print_json(&report)
        }
        Command::Reprocess => {
            let reconciler =
                storage::Reconciler::new(db, &config, Box::new(storage::LogNotifier));
            print_json(&reconciler.reprocess_unconsumed().await?)
        }
        Command::Reviews => print_json(&storage::get_open_manual_reviews(&db).await?),
        Command::Resolve { event, request } => {
            let reconciler =
                storage::Reconciler::new(db, &config, Box::new(storage::LogNotifier));
            let entry = reconciler
                .resolve_manually(&event, RequestId(request))
                .await
                .with_context(|| format!("resolving {event} to request {request}"))?;
            print_json(&entry)
        }
        Command::Sent { request } => {
            storage::mark_request_sent(&db, RequestId(request)).await?;
            print_json(&storage::get_request(&db, RequestId(request)).await?)
        }
        Command::Forego { request } => {
            storage::forego_request(&db, RequestId(request)).await?;
            print_json(&storage::get_request(&db, RequestId(request)).await?)
        }
    }
}
