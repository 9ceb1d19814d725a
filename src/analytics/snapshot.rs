use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::aggregate::{round_money, AggregateResult};
use super::drawdown::DrawdownResult;
use super::period::{best_and_worst_days, rounded_series, DailyPnLEntry, PeriodWindow};
use super::streaks::StreakResult;

/// Layout version written with every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// What a snapshot summarises.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SnapshotScope {
    Day { date: NaiveDate },
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
    Symbol { symbol: String, exchange: String },
}

impl SnapshotScope {
    pub fn day(date: NaiveDate) -> Self {
        Self::Day { date }
    }

    /// ISO week containing `date`.
    pub fn week_of(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self::Week {
            year: iso.year(),
            week: iso.week(),
        }
    }

    pub fn month_of(date: NaiveDate) -> Self {
        Self::Month {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn symbol(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self::Symbol {
            symbol: symbol.into(),
            exchange: exchange.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Day { .. } => "daily",
            Self::Week { .. } => "weekly",
            Self::Month { .. } => "monthly",
            Self::Symbol { .. } => "symbol",
        }
    }

    /// Stable identifier of the scope within its kind.
    pub fn key(&self) -> String {
        match self {
            Self::Day { date } => date.format("%Y-%m-%d").to_string(),
            Self::Week { year, week } => format!("{}-W{:02}", year, week),
            Self::Month { year, month } => format!("{}-{:02}", year, month),
            Self::Symbol { symbol, exchange } => format!("{}:{}", exchange, symbol),
        }
    }
}

impl fmt::Display for SnapshotScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.key())
    }
}

/// Upsert key for a snapshot: `(user, scope kind, scope key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub user_id: String,
    pub kind: String,
    pub key: String,
}

impl SnapshotKey {
    pub fn new(user_id: impl Into<String>, scope: &SnapshotScope) -> Self {
        Self {
            user_id: user_id.into(),
            kind: scope.kind().to_string(),
            key: scope.key(),
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.user_id, self.kind, self.key)
    }
}

/// A fully computed analytics record for one `(user, scope)`.
///
/// Snapshots replace any earlier snapshot with the same key; they are never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub version: u32,
    pub user_id: String,
    pub scope: SnapshotScope,
    pub window: Option<PeriodWindow>,
    #[serde(flatten)]
    pub aggregate: AggregateResult,
    pub trading_days: u32,
    #[serde(rename = "averageDailyPnL")]
    pub average_daily_pnl: Decimal,
    pub best_day: Option<DailyPnLEntry>,
    pub worst_day: Option<DailyPnLEntry>,
    #[serde(rename = "dailyPnL")]
    pub daily_pnl: Vec<DailyPnLEntry>,
    pub streaks: Option<StreakResult>,
    pub drawdown: Option<DrawdownResult>,
}

impl AnalyticsSnapshot {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(&self.user_id, &self.scope)
    }
}

/// Assembles an [`AnalyticsSnapshot`] from already computed parts. No I/O.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    user_id: String,
    scope: SnapshotScope,
    aggregate: AggregateResult,
    daily_pnl: Vec<DailyPnLEntry>,
    window: Option<PeriodWindow>,
    streaks: Option<StreakResult>,
    drawdown: Option<DrawdownResult>,
    best_worst: bool,
}

impl SnapshotBuilder {
    pub fn new(
        user_id: impl Into<String>,
        scope: SnapshotScope,
        aggregate: AggregateResult,
        daily_pnl: Vec<DailyPnLEntry>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            scope,
            aggregate,
            daily_pnl,
            window: None,
            streaks: None,
            drawdown: None,
            best_worst: false,
        }
    }

    pub fn window(mut self, window: PeriodWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn streaks(mut self, streaks: StreakResult) -> Self {
        self.streaks = Some(streaks);
        self
    }

    pub fn drawdown(mut self, drawdown: DrawdownResult) -> Self {
        self.drawdown = Some(drawdown);
        self
    }

    /// Includes best and worst single-day P&L.
    pub fn best_worst_days(mut self) -> Self {
        self.best_worst = true;
        self
    }

    pub fn build(self) -> AnalyticsSnapshot {
        let trading_days = u32::try_from(self.daily_pnl.len()).unwrap_or(u32::MAX);
        let average_daily_pnl = if trading_days > 0 {
            round_money(self.aggregate.net_pnl / Decimal::from(trading_days))
        } else {
            Decimal::ZERO
        };

        // Extremes are picked on exact totals, then rounded like the series.
        let (best_day, worst_day) = match best_and_worst_days(&self.daily_pnl) {
            Some((best, worst)) if self.best_worst => (Some(rounded(best)), Some(rounded(worst))),
            _ => (None, None),
        };
        let daily_pnl = rounded_series(&self.daily_pnl);

        AnalyticsSnapshot {
            version: SNAPSHOT_VERSION,
            user_id: self.user_id,
            scope: self.scope,
            window: self.window,
            aggregate: self.aggregate,
            trading_days,
            average_daily_pnl,
            best_day,
            worst_day,
            daily_pnl,
            streaks: self.streaks,
            drawdown: self.drawdown,
        }
    }
}

fn rounded(entry: DailyPnLEntry) -> DailyPnLEntry {
    DailyPnLEntry {
        pnl: round_money(entry.pnl),
        ..entry
    }
}
