use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trade_analytics::config::AppConfig;
use trade_analytics::database::Database;
use trade_analytics::types::Trade;
use trade_analytics::{AnalyticsEngine, AnalyticsService, AnalyticsSnapshot, SnapshotKey, SnapshotStore};

#[derive(Parser)]
#[command(name = "trade-analytics")]
#[command(version = "0.1.0")]
#[command(about = "Daily, weekly, monthly and per-symbol performance analytics for closed trades", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import trades from a JSON array into the database
    Import {
        /// Path to the JSON file
        #[arg(short, long)]
        file: String,
        /// Rebuild snapshots for every imported user afterwards
        #[arg(long)]
        rebuild: bool,
    },
    /// Compute one snapshot from a JSON file without touching the database
    Compute {
        /// Path to the JSON file
        #[arg(short, long)]
        file: String,
        #[arg(short, long)]
        user: String,
        #[arg(short, long, value_enum)]
        kind: ScopeKind,
        /// Reference date (YYYY-MM-DD) for daily, weekly and monthly scopes
        #[arg(short, long)]
        date: Option<String>,
        #[arg(short, long)]
        symbol: Option<String>,
        #[arg(short, long)]
        exchange: Option<String>,
    },
    /// Recompute and store one snapshot from the database
    Refresh {
        #[arg(short, long)]
        user: String,
        #[arg(short, long, value_enum)]
        kind: ScopeKind,
        /// Reference date (YYYY-MM-DD) for daily, weekly and monthly scopes
        #[arg(short, long)]
        date: Option<String>,
        #[arg(short, long)]
        symbol: Option<String>,
        #[arg(short, long)]
        exchange: Option<String>,
    },
    /// Recompute every snapshot of one user, or of all users
    Rebuild {
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Print stored snapshots
    Show {
        #[arg(short, long)]
        user: String,
        #[arg(short, long, value_enum)]
        kind: Option<ScopeKind>,
        /// Scope key, e.g. 2024-01-15, 2024-W03, 2024-01 or NSE:RELIANCE
        #[arg(long)]
        key: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScopeKind {
    Daily,
    Weekly,
    Monthly,
    Symbol,
}

impl ScopeKind {
    fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Daily => "daily",
            ScopeKind::Weekly => "weekly",
            ScopeKind::Monthly => "monthly",
            ScopeKind::Symbol => "symbol",
        }
    }
}

/// Target of a compute or refresh command.
enum Target {
    Period(ScopeKind, NaiveDate),
    Symbol(String, String),
}

impl Target {
    fn from_args(
        kind: ScopeKind,
        date: Option<String>,
        symbol: Option<String>,
        exchange: Option<String>,
    ) -> Result<Self> {
        match kind {
            ScopeKind::Symbol => {
                let symbol = symbol.ok_or_else(|| anyhow!("--symbol is required for symbol scope"))?;
                let exchange = exchange.ok_or_else(|| anyhow!("--exchange is required for symbol scope"))?;
                Ok(Target::Symbol(symbol, exchange))
            }
            _ => {
                let date = date.ok_or_else(|| anyhow!("--date is required for {} scope", kind.as_str()))?;
                Ok(Target::Period(kind, parse_date(&date)?))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let config = AppConfig::load(&cli.config)?;
    init_logging(&config, cli.verbose)?;

    info!("Trade Analytics v0.1.0");

    let engine = AnalyticsEngine::new(config.analytics.utc_offset()?);

    match cli.command {
        Commands::Import { file, rebuild } => {
            import_trades(&config, engine, &file, rebuild).await?;
        }
        Commands::Compute { file, user, kind, date, symbol, exchange } => {
            let target = Target::from_args(kind, date, symbol, exchange)?;
            compute_from_file(engine, &file, &user, target).await?;
        }
        Commands::Refresh { user, kind, date, symbol, exchange } => {
            let target = Target::from_args(kind, date, symbol, exchange)?;
            refresh(&config, engine, &user, target).await?;
        }
        Commands::Rebuild { user } => {
            rebuild(&config, engine, user).await?;
        }
        Commands::Show { user, kind, key } => {
            show(&config, &user, kind, key).await?;
        }
    }

    Ok(())
}

fn init_logging(config: &AppConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    Ok(())
}

async fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    let db = Database::new(&config.database.url, config.database.max_connections).await?;
    Ok(Arc::new(db))
}

fn build_service(engine: AnalyticsEngine, db: &Arc<Database>) -> AnalyticsService {
    AnalyticsService::new(engine, Arc::clone(db) as _, Arc::clone(db) as _)
}

async fn read_trades(path: &str) -> Result<Vec<Trade>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let trades: Vec<Trade> =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse trades in {}", path))?;
    info!("Loaded {} trades from {}", trades.len(), path);
    Ok(trades)
}

async fn import_trades(config: &AppConfig, engine: AnalyticsEngine, path: &str, rebuild_after: bool) -> Result<()> {
    let trades = read_trades(path).await?;
    let db = open_database(config).await?;
    let stored = db.insert_trades(&trades).await?;
    println!("Imported {} trades", stored);

    if rebuild_after {
        let service = build_service(engine, &db);
        let users: BTreeSet<&str> = trades.iter().map(|t| t.user_id.as_str()).collect();
        for user in users {
            let keys = service.rebuild_user(user).await?;
            println!("Rebuilt {} snapshots for {}", keys.len(), user);
        }
    }

    Ok(())
}

async fn compute_from_file(engine: AnalyticsEngine, path: &str, user: &str, target: Target) -> Result<()> {
    let trades = read_trades(path).await?;

    let snapshot = match target {
        Target::Period(ScopeKind::Daily, date) => engine.compute_daily(user, date, &trades)?,
        Target::Period(ScopeKind::Weekly, date) => engine.compute_weekly(user, date, &trades)?,
        Target::Period(_, date) => engine.compute_monthly(user, date, &trades)?,
        Target::Symbol(symbol, exchange) => engine.compute_symbol(user, &symbol, &exchange, &trades)?,
    };

    match snapshot {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => println!("No closed trades in scope, no data"),
    }

    Ok(())
}

async fn refresh(config: &AppConfig, engine: AnalyticsEngine, user: &str, target: Target) -> Result<()> {
    let db = open_database(config).await?;
    let service = build_service(engine, &db);

    let outcome = match target {
        Target::Period(ScopeKind::Daily, date) => service.refresh_daily(user, date).await?,
        Target::Period(ScopeKind::Weekly, date) => service.refresh_weekly(user, date).await?,
        Target::Period(_, date) => service.refresh_monthly(user, date).await?,
        Target::Symbol(symbol, exchange) => service.refresh_symbol(user, &symbol, &exchange).await?,
    };

    println!("{}", outcome);
    Ok(())
}

async fn rebuild(config: &AppConfig, engine: AnalyticsEngine, user: Option<String>) -> Result<()> {
    let db = open_database(config).await?;
    let service = build_service(engine, &db);

    let users = match user {
        Some(user) => vec![user],
        None => db.get_user_ids().await?,
    };
    if users.is_empty() {
        warn!("No trades stored, nothing to rebuild");
    }

    for user in &users {
        let keys = service.rebuild_user(user).await?;
        println!("Rebuilt {} snapshots for {}", keys.len(), user);
    }

    Ok(())
}

async fn show(config: &AppConfig, user: &str, kind: Option<ScopeKind>, key: Option<String>) -> Result<()> {
    let db = open_database(config).await?;

    if let (Some(kind), Some(key)) = (kind, key.as_deref()) {
        let snapshot_key = SnapshotKey {
            user_id: user.to_string(),
            kind: kind.as_str().to_string(),
            key: key.to_string(),
        };
        match db.get_snapshot(&snapshot_key).await? {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => println!("No snapshot stored for {}", snapshot_key),
        }
        return Ok(());
    }

    let snapshots = db.list_snapshots(user).await?;
    let mut shown = 0;
    for snapshot in snapshots
        .iter()
        .filter(|s| kind.map_or(true, |k| s.scope.kind() == k.as_str()))
    {
        print_summary(snapshot);
        shown += 1;
    }
    println!("{} snapshots", shown);

    Ok(())
}

fn print_summary(snapshot: &AnalyticsSnapshot) {
    let aggregate = &snapshot.aggregate;
    println!(
        "{:<24} trades={:<5} net={:>12} win_rate={:>6}% pf={:>7} days={}",
        snapshot.scope.to_string(),
        aggregate.total_trades,
        aggregate.net_pnl,
        aggregate.win_rate,
        aggregate.profit_factor,
        snapshot.trading_days
    );
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| anyhow!("Invalid date '{}': {}", s, e))
}
