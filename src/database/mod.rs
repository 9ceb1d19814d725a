use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::analytics::{AnalyticsSnapshot, SnapshotKey};
use crate::service::{SnapshotStore, TradeQuery, TradeSource};
use crate::types::{Charges, Trade, TradePnl};

const TRADE_COLUMNS: &str = "id, user_id, symbol, exchange, segment, trade_type, position, status, \
     entry_price, exit_price, quantity, entry_date, exit_date, charges, \
     gross_pnl, net_pnl, pnl_pct";

/// SQLite-backed trade and snapshot storage.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database with schema
    pub async fn new(db_url: &str, max_connections: u32) -> Result<Self> {
        info!("Initializing SQLite database at: {}", db_url);

        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;

        info!("Database initialized successfully");
        Ok(db)
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same memory store.
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:", 1).await
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                segment TEXT NOT NULL,
                trade_type TEXT NOT NULL,
                position TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT,
                quantity TEXT NOT NULL,
                entry_date TEXT NOT NULL,
                exit_date TEXT,
                charges TEXT NOT NULL,
                gross_pnl TEXT,
                net_pnl TEXT,
                pnl_pct TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trades_user_exit ON trades(user_id, status, exit_date)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trades_user_symbol ON trades(user_id, symbol, exchange)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analytics_snapshots (
                user_id TEXT NOT NULL,
                scope_kind TEXT NOT NULL,
                scope_key TEXT NOT NULL,
                version INTEGER NOT NULL,
                total_trades INTEGER NOT NULL,
                net_pnl TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, scope_kind, scope_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a trade, replacing any stored trade with the same id
    pub async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, user_id, symbol, exchange, segment, trade_type, position, status,
                entry_price, exit_price, quantity, entry_date, exit_date, charges,
                gross_pnl, net_pnl, pnl_pct
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                symbol = excluded.symbol,
                exchange = excluded.exchange,
                segment = excluded.segment,
                trade_type = excluded.trade_type,
                position = excluded.position,
                status = excluded.status,
                entry_price = excluded.entry_price,
                exit_price = excluded.exit_price,
                quantity = excluded.quantity,
                entry_date = excluded.entry_date,
                exit_date = excluded.exit_date,
                charges = excluded.charges,
                gross_pnl = excluded.gross_pnl,
                net_pnl = excluded.net_pnl,
                pnl_pct = excluded.pnl_pct
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.user_id)
        .bind(&trade.symbol)
        .bind(&trade.exchange)
        .bind(trade.segment.as_str())
        .bind(trade.trade_type.as_str())
        .bind(trade.position.as_str())
        .bind(trade.status.as_str())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.map(|p| p.to_string()))
        .bind(trade.quantity.to_string())
        .bind(timestamp(trade.entry_date))
        .bind(trade.exit_date.map(timestamp))
        .bind(trade.charges.total.to_string())
        .bind(trade.pnl.map(|p| p.gross.to_string()))
        .bind(trade.pnl.map(|p| p.net.to_string()))
        .bind(trade.pnl.map(|p| p.percentage.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_trades(&self, trades: &[Trade]) -> Result<usize> {
        for trade in trades {
            self.insert_trade(trade).await?;
        }
        info!("Stored {} trades", trades.len());
        Ok(trades.len())
    }

    /// Closed trades of a user matching `query`, ordered by exit time
    pub async fn get_closed_trades(&self, user_id: &str, query: &TradeQuery) -> Result<Vec<Trade>> {
        let rows = match query {
            TradeQuery::Window { start, end } => {
                let sql = format!(
                    "SELECT {} FROM trades
                     WHERE user_id = ? AND status = 'closed' AND exit_date >= ? AND exit_date <= ?
                     ORDER BY exit_date ASC, id ASC",
                    TRADE_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(timestamp(*start))
                    .bind(timestamp(*end))
                    .fetch_all(&self.pool)
                    .await?
            }
            TradeQuery::Symbol { symbol, exchange } => {
                let sql = format!(
                    "SELECT {} FROM trades
                     WHERE user_id = ? AND status = 'closed' AND symbol = ? AND exchange = ?
                     ORDER BY exit_date ASC, id ASC",
                    TRADE_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(symbol)
                    .bind(exchange)
                    .fetch_all(&self.pool)
                    .await?
            }
            TradeQuery::All => {
                let sql = format!(
                    "SELECT {} FROM trades
                     WHERE user_id = ? AND status = 'closed'
                     ORDER BY exit_date ASC, id ASC",
                    TRADE_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        debug!("Fetched {} closed trades for {} ({:?})", rows.len(), user_id, query);
        rows.iter().map(trade_from_row).collect()
    }

    /// Users that own at least one trade
    pub async fn get_user_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT user_id FROM trades ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }

    /// Create or fully replace the snapshot stored under the snapshot's key
    pub async fn save_snapshot(&self, snapshot: &AnalyticsSnapshot) -> Result<()> {
        let key = snapshot.key();
        let payload = serde_json::to_string(snapshot)?;

        sqlx::query(
            r#"
            INSERT INTO analytics_snapshots (
                user_id, scope_kind, scope_key, version, total_trades, net_pnl, payload, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, scope_kind, scope_key) DO UPDATE SET
                version = excluded.version,
                total_trades = excluded.total_trades,
                net_pnl = excluded.net_pnl,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.kind)
        .bind(&key.key)
        .bind(i64::from(snapshot.version))
        .bind(i64::try_from(snapshot.aggregate.total_trades)?)
        .bind(snapshot.aggregate.net_pnl.to_string())
        .bind(payload)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        debug!("Upserted snapshot {}", key);
        Ok(())
    }

    pub async fn load_snapshot(&self, key: &SnapshotKey) -> Result<Option<AnalyticsSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT payload
            FROM analytics_snapshots
            WHERE user_id = ? AND scope_kind = ? AND scope_key = ?
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.kind)
        .bind(&key.key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| parse_snapshot(row.get("payload"))).transpose()
    }

    pub async fn load_snapshots(&self, user_id: &str) -> Result<Vec<AnalyticsSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM analytics_snapshots
            WHERE user_id = ?
            ORDER BY scope_kind ASC, scope_key ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| parse_snapshot(row.get("payload"))).collect()
    }
}

#[async_trait]
impl TradeSource for Database {
    async fn fetch_trades(&self, user_id: &str, query: &TradeQuery) -> Result<Vec<Trade>> {
        self.get_closed_trades(user_id, query).await
    }
}

#[async_trait]
impl SnapshotStore for Database {
    async fn upsert_snapshot(&self, snapshot: &AnalyticsSnapshot) -> Result<()> {
        self.save_snapshot(snapshot).await
    }

    async fn get_snapshot(&self, key: &SnapshotKey) -> Result<Option<AnalyticsSnapshot>> {
        self.load_snapshot(key).await
    }

    async fn list_snapshots(&self, user_id: &str) -> Result<Vec<AnalyticsSnapshot>> {
        self.load_snapshots(user_id).await
    }
}

/// Fixed-width UTC timestamps so that text comparison orders instants.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    let pnl = match (
        row.get::<Option<String>, _>("gross_pnl"),
        row.get::<Option<String>, _>("net_pnl"),
        row.get::<Option<String>, _>("pnl_pct"),
    ) {
        (Some(gross), Some(net), Some(percentage)) => Some(TradePnl {
            gross: Decimal::from_str(&gross)?,
            net: Decimal::from_str(&net)?,
            percentage: Decimal::from_str(&percentage)?,
        }),
        _ => None,
    };

    Ok(Trade {
        id: row.get("id"),
        user_id: row.get("user_id"),
        symbol: row.get("symbol"),
        exchange: row.get("exchange"),
        segment: parse_label(row.get("segment"))?,
        trade_type: parse_label(row.get("trade_type"))?,
        position: parse_label(row.get("position"))?,
        status: parse_label(row.get("status"))?,
        entry_price: Decimal::from_str(row.get("entry_price"))?,
        exit_price: parse_optional_decimal(row.get("exit_price"))?,
        quantity: Decimal::from_str(row.get("quantity"))?,
        entry_date: parse_timestamp(row.get("entry_date"))?,
        exit_date: row
            .get::<Option<&str>, _>("exit_date")
            .map(parse_timestamp)
            .transpose()?,
        charges: Charges {
            total: Decimal::from_str(row.get("charges"))?,
        },
        pnl,
    })
}

fn parse_label<T: FromStr<Err = String>>(s: &str) -> Result<T> {
    T::from_str(s).map_err(|e| anyhow!(e))
}

fn parse_optional_decimal(s: Option<&str>) -> Result<Option<Decimal>> {
    s.map(Decimal::from_str).transpose().map_err(Into::into)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn parse_snapshot(payload: &str) -> Result<AnalyticsSnapshot> {
    serde_json::from_str(payload).map_err(|e| anyhow!("Corrupt snapshot payload: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AnalyticsEngine;
    use crate::types::fixtures::{closed_trade, trade_with_net};
    use crate::types::{PositionSide, TradeStatus};
    use chrono::{Duration, NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_trade_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        let derived = closed_trade("derived", PositionSide::Short, dec!(200.5), dec!(180), dec!(5), dec!(5.25), at);
        let precomputed = trade_with_net("pre", dec!(-12.5), 2024, 1, 16);

        db.insert_trades(&[derived.clone(), precomputed.clone()]).await.unwrap();

        let trades = db.get_closed_trades("user-1", &TradeQuery::All).await.unwrap();
        assert_eq!(trades, vec![derived, precomputed]);
    }

    #[tokio::test]
    async fn test_insert_trade_replaces_by_id() {
        let db = Database::in_memory().await.unwrap();
        let mut trade = trade_with_net("t1", dec!(10), 2024, 1, 15);
        db.insert_trade(&trade).await.unwrap();

        trade.status = TradeStatus::Cancelled;
        db.insert_trade(&trade).await.unwrap();

        assert!(db.get_closed_trades("user-1", &TradeQuery::All).await.unwrap().is_empty());
        assert_eq!(db.get_user_ids().await.unwrap(), vec!["user-1".to_string()]);
    }

    #[tokio::test]
    async fn test_window_query_is_inclusive() {
        let db = Database::in_memory().await.unwrap();
        let window = AnalyticsEngine::default()
            .bucketizer()
            .window(crate::analytics::PeriodKind::Week, date(2024, 1, 17))
            .unwrap();

        let at = |id: &str, exit: DateTime<Utc>| {
            closed_trade(id, PositionSide::Long, dec!(1), dec!(2), dec!(1), dec!(0), exit)
        };
        let mut other_user = at("other", window.start);
        other_user.user_id = "user-2".to_string();
        db.insert_trades(&[
            at("first", window.start),
            at("last", window.end),
            at("before", window.start - Duration::milliseconds(1)),
            at("after", window.end + Duration::milliseconds(1)),
            other_user,
        ])
        .await
        .unwrap();

        let query = TradeQuery::Window {
            start: window.start,
            end: window.end,
        };
        let ids: Vec<String> = db
            .get_closed_trades("user-1", &query)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["first".to_string(), "last".to_string()]);
    }

    #[tokio::test]
    async fn test_symbol_query_excludes_open_trades() {
        let db = Database::in_memory().await.unwrap();
        let mut open = trade_with_net("open", dec!(1), 2024, 1, 15);
        open.status = TradeStatus::Open;
        let mut tcs = trade_with_net("tcs", dec!(1), 2024, 1, 15);
        tcs.symbol = "TCS".to_string();
        db.insert_trades(&[open, tcs, trade_with_net("rel", dec!(1), 2024, 1, 15)])
            .await
            .unwrap();

        let query = TradeQuery::Symbol {
            symbol: "RELIANCE".to_string(),
            exchange: "NSE".to_string(),
        };
        let trades = db.get_closed_trades("user-1", &query).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id, "rel");
    }

    #[tokio::test]
    async fn test_snapshot_upsert_replaces() {
        let db = Database::in_memory().await.unwrap();
        let engine = AnalyticsEngine::default();
        let day = date(2024, 1, 15);

        let first = engine
            .compute_daily("user-1", day, &[trade_with_net("a", dec!(10), 2024, 1, 15)])
            .unwrap()
            .unwrap();
        db.upsert_snapshot(&first).await.unwrap();
        db.upsert_snapshot(&first).await.unwrap();
        assert_eq!(db.load_snapshots("user-1").await.unwrap().len(), 1);

        let second = engine
            .compute_daily(
                "user-1",
                day,
                &[
                    trade_with_net("a", dec!(10), 2024, 1, 15),
                    trade_with_net("b", dec!(-3), 2024, 1, 15),
                ],
            )
            .unwrap()
            .unwrap();
        db.upsert_snapshot(&second).await.unwrap();

        let stored = db.get_snapshot(&first.key()).await.unwrap().unwrap();
        assert_eq!(stored, second);
        assert_eq!(stored.aggregate.net_pnl, dec!(7));
        assert_eq!(db.list_snapshots("user-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_none() {
        let db = Database::in_memory().await.unwrap();
        let key = SnapshotKey::new("user-1", &crate::analytics::SnapshotScope::month_of(date(2024, 1, 1)));
        assert!(db.get_snapshot(&key).await.unwrap().is_none());
        assert!(db.list_snapshots("user-1").await.unwrap().is_empty());
    }
}
