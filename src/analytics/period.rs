use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::AnalyticsError;
use crate::types::Trade;

use super::aggregate::round_money;

/// Calendar granularity of a period window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Day,
    Week,
    Month,
}

/// Bounds of a calendar window, as UTC instants.
///
/// `end` is the last millisecond of the window, for display and storage
/// queries. Membership is decided against the next window's start so that
/// sub-millisecond instants after `end` still belong to this window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeriodWindow {
    /// First instant of the following window.
    pub fn next_start(&self) -> DateTime<Utc> {
        self.end + Duration::milliseconds(1)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.next_start()
    }
}

/// Net P&L for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPnLEntry {
    pub date: NaiveDate,
    pub pnl: Decimal,
}

/// Trades falling inside one window plus their per-day net P&L, ascending by date.
#[derive(Debug, Clone)]
pub struct PeriodBucket<'a> {
    pub window: PeriodWindow,
    pub trades: Vec<&'a Trade>,
    pub daily_pnl: Vec<DailyPnLEntry>,
}

/// Partitions trades into day, ISO week and calendar month windows.
///
/// Boundaries are evaluated in a fixed UTC offset; a trade belongs to a
/// window when its exit instant is at or after the window start and before
/// the next window's start.
#[derive(Debug, Clone, Copy)]
pub struct PeriodBucketizer {
    offset: FixedOffset,
}

impl Default for PeriodBucketizer {
    fn default() -> Self {
        Self::utc()
    }
}

impl PeriodBucketizer {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar date of an instant in this bucketizer's zone.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    pub fn bucket_daily<'a>(
        &self,
        trades: &'a [Trade],
        reference_date: NaiveDate,
    ) -> Result<Option<PeriodBucket<'a>>, AnalyticsError> {
        self.bucket(PeriodKind::Day, trades, reference_date)
    }

    pub fn bucket_weekly<'a>(
        &self,
        trades: &'a [Trade],
        reference_date: NaiveDate,
    ) -> Result<Option<PeriodBucket<'a>>, AnalyticsError> {
        self.bucket(PeriodKind::Week, trades, reference_date)
    }

    pub fn bucket_monthly<'a>(
        &self,
        trades: &'a [Trade],
        reference_date: NaiveDate,
    ) -> Result<Option<PeriodBucket<'a>>, AnalyticsError> {
        self.bucket(PeriodKind::Month, trades, reference_date)
    }

    /// Filters closed trades into the window around `reference_date`.
    ///
    /// Returns `Ok(None)` for an empty window; callers must not build or
    /// persist anything in that case.
    pub fn bucket<'a>(
        &self,
        kind: PeriodKind,
        trades: &'a [Trade],
        reference_date: NaiveDate,
    ) -> Result<Option<PeriodBucket<'a>>, AnalyticsError> {
        let window = self.window(kind, reference_date)?;

        let filtered: Vec<&Trade> = trades
            .iter()
            .filter(|t| t.is_closed())
            .filter(|t| t.exit_date.map_or(false, |exit| window.contains(exit)))
            .collect();

        if filtered.is_empty() {
            debug!(
                "Empty {:?} window {} .. {}",
                kind, window.start, window.end
            );
            return Ok(None);
        }

        let daily_pnl = self.group_daily(filtered.iter().copied())?;

        Ok(Some(PeriodBucket {
            window,
            trades: filtered,
            daily_pnl,
        }))
    }

    /// Sums net P&L per exit day, sorted ascending. Trades without an exit
    /// date are ignored.
    pub fn group_daily<'a, I>(&self, trades: I) -> Result<Vec<DailyPnLEntry>, AnalyticsError>
    where
        I: IntoIterator<Item = &'a Trade>,
    {
        let mut by_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();

        for trade in trades {
            let Some(exit) = trade.exit_date else {
                continue;
            };
            let pnl = trade
                .resolve_pnl()
                .map_err(|reason| AnalyticsError::invalid_trade(&trade.id, reason))?;
            let day = by_day.entry(self.local_date(exit)).or_insert(Decimal::ZERO);
            *day = day.checked_add(pnl.net).ok_or_else(|| {
                AnalyticsError::invalid_trade(&trade.id, "daily P&L total overflows")
            })?;
        }

        Ok(by_day
            .into_iter()
            .map(|(date, pnl)| DailyPnLEntry { date, pnl })
            .collect())
    }

    /// Computes the window of `kind` containing `reference_date`.
    pub fn window(
        &self,
        kind: PeriodKind,
        reference_date: NaiveDate,
    ) -> Result<PeriodWindow, AnalyticsError> {
        let (first_day, next_first_day) = match kind {
            PeriodKind::Day => (reference_date, reference_date.succ_opt()),
            PeriodKind::Week => {
                let back = Duration::days(i64::from(reference_date.weekday().num_days_from_monday()));
                let monday = reference_date.checked_sub_signed(back).ok_or_else(|| {
                    AnalyticsError::InvalidWindow(format!("no Monday before {}", reference_date))
                })?;
                (monday, monday.checked_add_signed(Duration::days(7)))
            }
            PeriodKind::Month => {
                let first = reference_date.with_day(1).ok_or_else(|| {
                    AnalyticsError::InvalidWindow(format!("no first day for {}", reference_date))
                })?;
                let next = if first.month() == 12 {
                    NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
                };
                (first, next)
            }
        };

        let next_first_day = next_first_day.ok_or_else(|| {
            AnalyticsError::InvalidWindow(format!("{:?} after {} is out of range", kind, reference_date))
        })?;

        let start = self.start_of_day(first_day)?;
        let end = self.start_of_day(next_first_day)? - Duration::milliseconds(1);

        Ok(PeriodWindow { start, end })
    }

    fn start_of_day(&self, date: NaiveDate) -> Result<DateTime<Utc>, AnalyticsError> {
        date.and_hms_opt(0, 0, 0)
            .and_then(|midnight| self.offset.from_local_datetime(&midnight).single())
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| AnalyticsError::InvalidWindow(format!("no midnight for {}", date)))
    }
}

/// Best and worst day by net P&L. Ties keep the earliest entry.
pub fn best_and_worst_days(daily_pnl: &[DailyPnLEntry]) -> Option<(DailyPnLEntry, DailyPnLEntry)> {
    let first = *daily_pnl.first()?;
    let (best, worst) = daily_pnl.iter().skip(1).fold((first, first), |(best, worst), entry| {
        let best = if entry.pnl > best.pnl { *entry } else { best };
        let worst = if entry.pnl < worst.pnl { *entry } else { worst };
        (best, worst)
    });
    Some((best, worst))
}

/// Rounds each entry's P&L to cents for output.
pub fn rounded_series(daily_pnl: &[DailyPnLEntry]) -> Vec<DailyPnLEntry> {
    daily_pnl
        .iter()
        .map(|entry| DailyPnLEntry {
            date: entry.date,
            pnl: round_money(entry.pnl),
        })
        .collect()
}
