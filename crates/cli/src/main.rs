use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Classify bank transactions and reconcile payment notifications against
/// outstanding rent and utility requests.
#[derive(Parser, Debug)]
#[command(name = "rentledger", version)]
pub struct Cli {
    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// SQLite database file, created on first use.
    #[arg(long, global = true, value_name = "PATH", default_value = "rentledger.db")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store the rules of a `[[rules]]` TOML file.
    ImportRules { file: PathBuf },
    /// Classify a JSON array of transactions and store the results.
    Classify {
        file: PathBuf,
        /// Classify without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Manually re-categorize a stored transaction.
    Override {
        transaction: i64,
        #[arg(long)]
        category: String,
    },
    /// Create the request for one recipient's share of a bill.
    Bill {
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
        /// Amount in dollars, e.g. 173.40
        #[arg(long)]
        amount: String,
    },
    /// List pending and sent requests.
    Requests,
    /// Reconcile a JSON array of payment notifications.
    Reconcile { file: PathBuf },
    /// Retry every recorded event that was never applied.
    Reprocess,
    /// List events waiting for manual review.
    Reviews,
    /// Apply an event to a request chosen by hand.
    Resolve { event: String, request: i64 },
    /// Mark a pending request as sent.
    Sent { request: i64 },
    /// Write off a request that will not be paid.
    Forego { request: i64 },
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = commands::run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "rentledger",
            "reconcile",
            "inbox.json",
            "--db",
            "/tmp/ledger.db",
            "--config",
            "engine.toml",
        ])
        .unwrap();
        assert_eq!(cli.db, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(cli.config, Some(PathBuf::from("engine.toml")));
        assert!(matches!(cli.command, Command::Reconcile { .. }));
    }

    #[test]
    fn bill_requires_all_fields() {
        assert!(Cli::try_parse_from(["rentledger", "bill", "--recipient", "John Doe"]).is_err());
        let cli = Cli::try_parse_from([
            "rentledger", "bill", "--recipient", "John Doe", "--category", "water",
            "--year", "2025", "--month", "7", "--amount", "41.20",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Bill { month: 7, .. }));
    }

    #[test]
    fn resolve_takes_event_and_request() {
        let cli = Cli::try_parse_from(["rentledger", "resolve", "a1@mail.example", "4"]).unwrap();
        match cli.command {
            Command::Resolve { event, request } => {
                assert_eq!(event, "a1@mail.example");
                assert_eq!(request, 4);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
