use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::analytics::{AnalyticsSnapshot, PeriodKind, SnapshotKey, SnapshotScope};
use crate::engine::AnalyticsEngine;
use crate::types::Trade;

/// Which closed trades a caller needs from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeQuery {
    /// Closed trades whose exit instant lies in `[start, end]`.
    Window { start: DateTime<Utc>, end: DateTime<Utc> },
    /// Closed trades on one instrument.
    Symbol { symbol: String, exchange: String },
    /// Every closed trade of the user.
    All,
}

/// Read side of trade storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeSource: Send + Sync {
    async fn fetch_trades(&self, user_id: &str, query: &TradeQuery) -> Result<Vec<Trade>>;
}

/// Persistence for computed snapshots.
///
/// `upsert_snapshot` must create or fully replace the row for the snapshot's
/// key; writing the same snapshot twice leaves one identical row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn upsert_snapshot(&self, snapshot: &AnalyticsSnapshot) -> Result<()>;

    async fn get_snapshot(&self, key: &SnapshotKey) -> Result<Option<AnalyticsSnapshot>>;

    async fn list_snapshots(&self, user_id: &str) -> Result<Vec<AnalyticsSnapshot>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshOutcome {
    Written(SnapshotKey),
    /// The scope had no closed trades; nothing was written.
    Skipped(SnapshotScope),
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Written(key) => write!(f, "written {}", key),
            Self::Skipped(scope) => write!(f, "skipped {} (no closed trades)", scope),
        }
    }
}

/// Fetches trades, runs the engine and hands results to the snapshot store.
pub struct AnalyticsService {
    engine: AnalyticsEngine,
    trades: Arc<dyn TradeSource>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl AnalyticsService {
    pub fn new(
        engine: AnalyticsEngine,
        trades: Arc<dyn TradeSource>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            engine,
            trades,
            snapshots,
        }
    }

    pub async fn refresh_daily(&self, user_id: &str, date: NaiveDate) -> Result<RefreshOutcome> {
        let trades = self.fetch_window(user_id, PeriodKind::Day, date).await?;
        let snapshot = self.engine.compute_daily(user_id, date, &trades)?;
        self.persist(snapshot, SnapshotScope::day(date)).await
    }

    pub async fn refresh_weekly(&self, user_id: &str, date: NaiveDate) -> Result<RefreshOutcome> {
        let trades = self.fetch_window(user_id, PeriodKind::Week, date).await?;
        let snapshot = self.engine.compute_weekly(user_id, date, &trades)?;
        self.persist(snapshot, SnapshotScope::week_of(date)).await
    }

    pub async fn refresh_monthly(&self, user_id: &str, date: NaiveDate) -> Result<RefreshOutcome> {
        let trades = self.fetch_window(user_id, PeriodKind::Month, date).await?;
        let snapshot = self.engine.compute_monthly(user_id, date, &trades)?;
        self.persist(snapshot, SnapshotScope::month_of(date)).await
    }

    pub async fn refresh_symbol(
        &self,
        user_id: &str,
        symbol: &str,
        exchange: &str,
    ) -> Result<RefreshOutcome> {
        let query = TradeQuery::Symbol {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
        };
        let trades = self.trades.fetch_trades(user_id, &query).await?;
        let snapshot = self.engine.compute_symbol(user_id, symbol, exchange, &trades)?;
        self.persist(snapshot, SnapshotScope::symbol(symbol, exchange)).await
    }

    /// Recomputes the day, week, month and symbol scopes a closed trade falls into.
    ///
    /// Open or undated trades touch no scope and return an empty list.
    pub async fn refresh_for_trade(&self, trade: &Trade) -> Result<Vec<RefreshOutcome>> {
        let exit = match trade.exit_date {
            Some(exit) if trade.is_closed() => exit,
            _ => {
                warn!("Trade {} is not closed with an exit date, nothing to refresh", trade.id);
                return Ok(Vec::new());
            }
        };
        let date = self.engine.bucketizer().local_date(exit);
        let user_id = trade.user_id.as_str();

        let (daily, weekly, monthly, symbol) = tokio::try_join!(
            self.refresh_daily(user_id, date),
            self.refresh_weekly(user_id, date),
            self.refresh_monthly(user_id, date),
            self.refresh_symbol(user_id, &trade.symbol, &trade.exchange),
        )?;

        Ok(vec![daily, weekly, monthly, symbol])
    }

    /// Recomputes every scope present in the user's closed trade history.
    ///
    /// The history is partitioned once, so each scope only scans its own trades.
    pub async fn rebuild_user(&self, user_id: &str) -> Result<Vec<SnapshotKey>> {
        let trades = self.trades.fetch_trades(user_id, &TradeQuery::All).await?;
        let history = HistoryPartition::new(&self.engine, &trades);

        let mut snapshots = Vec::new();
        for (date, day) in &history.days {
            snapshots.extend(self.engine.compute_daily(user_id, *date, day)?);
        }
        for (date, week) in history.weeks.values() {
            snapshots.extend(self.engine.compute_weekly(user_id, *date, week)?);
        }
        for (date, month) in history.months.values() {
            snapshots.extend(self.engine.compute_monthly(user_id, *date, month)?);
        }
        for ((symbol, exchange), instrument) in &history.symbols {
            snapshots.extend(self.engine.compute_symbol(user_id, symbol, exchange, instrument)?);
        }

        try_join_all(
            snapshots
                .iter()
                .map(|snapshot| self.snapshots.upsert_snapshot(snapshot)),
        )
        .await?;

        info!(
            "Rebuilt {} snapshots for {} ({} days, {} weeks, {} months, {} symbols)",
            snapshots.len(),
            user_id,
            history.days.len(),
            history.weeks.len(),
            history.months.len(),
            history.symbols.len()
        );

        Ok(snapshots.iter().map(AnalyticsSnapshot::key).collect())
    }

    async fn fetch_window(&self, user_id: &str, kind: PeriodKind, date: NaiveDate) -> Result<Vec<Trade>> {
        let window = self.engine.bucketizer().window(kind, date)?;
        let query = TradeQuery::Window {
            start: window.start,
            end: window.end,
        };
        self.trades.fetch_trades(user_id, &query).await
    }

    async fn persist(
        &self,
        snapshot: Option<AnalyticsSnapshot>,
        scope: SnapshotScope,
    ) -> Result<RefreshOutcome> {
        match snapshot {
            Some(snapshot) => {
                self.snapshots.upsert_snapshot(&snapshot).await?;
                let key = snapshot.key();
                info!("Snapshot {} written", key);
                Ok(RefreshOutcome::Written(key))
            }
            None => Ok(RefreshOutcome::Skipped(scope)),
        }
    }
}

/// Closed, dated trades grouped by every scope they fall into.
///
/// Week and month groups keep the first local date seen as the reference
/// date handed to the engine.
struct HistoryPartition {
    days: BTreeMap<NaiveDate, Vec<Trade>>,
    weeks: BTreeMap<(i32, u32), (NaiveDate, Vec<Trade>)>,
    months: BTreeMap<(i32, u32), (NaiveDate, Vec<Trade>)>,
    symbols: BTreeMap<(String, String), Vec<Trade>>,
}

impl HistoryPartition {
    fn new(engine: &AnalyticsEngine, trades: &[Trade]) -> Self {
        let bucketizer = engine.bucketizer();
        let mut history = Self {
            days: BTreeMap::new(),
            weeks: BTreeMap::new(),
            months: BTreeMap::new(),
            symbols: BTreeMap::new(),
        };

        for trade in trades.iter().filter(|t| t.is_closed()) {
            let Some(exit) = trade.exit_date else {
                continue;
            };
            let date = bucketizer.local_date(exit);
            let iso = date.iso_week();

            history.days.entry(date).or_default().push(trade.clone());
            history
                .weeks
                .entry((iso.year(), iso.week()))
                .or_insert_with(|| (date, Vec::new()))
                .1
                .push(trade.clone());
            history
                .months
                .entry((date.year(), date.month()))
                .or_insert_with(|| (date, Vec::new()))
                .1
                .push(trade.clone());
            history
                .symbols
                .entry((trade.symbol.clone(), trade.exchange.clone()))
                .or_default()
                .push(trade.clone());
        }

        history
    }
}
