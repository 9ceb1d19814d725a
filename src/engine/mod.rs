use chrono::{FixedOffset, NaiveDate};
use tracing::debug;

use crate::analytics::{
    scan_daily_series, AggregateReducer, AnalyticsSnapshot, PeriodBucket, PeriodBucketizer,
    PeriodKind, SnapshotBuilder, SnapshotScope,
};
use crate::error::AnalyticsError;
use crate::types::Trade;

/// In-process entry points of the analytics core.
///
/// Every method is a pure function of its arguments. `Ok(None)` means the
/// scope has no closed trades and nothing should be persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticsEngine {
    bucketizer: PeriodBucketizer,
}

impl AnalyticsEngine {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            bucketizer: PeriodBucketizer::new(offset),
        }
    }

    pub fn bucketizer(&self) -> &PeriodBucketizer {
        &self.bucketizer
    }

    /// Aggregate for one calendar day.
    pub fn compute_daily(
        &self,
        user_id: &str,
        date: NaiveDate,
        trades: &[Trade],
    ) -> Result<Option<AnalyticsSnapshot>, AnalyticsError> {
        let Some(bucket) = self.bucketizer.bucket_daily(trades, date)? else {
            return Ok(None);
        };

        let aggregate = AggregateReducer::reduce(bucket.trades.iter().copied())?;
        debug!(
            "Daily {} for {}: {} trades, net {}",
            date, user_id, aggregate.total_trades, aggregate.net_pnl
        );

        Ok(Some(
            SnapshotBuilder::new(user_id, SnapshotScope::day(date), aggregate, bucket.daily_pnl)
                .window(bucket.window)
                .build(),
        ))
    }

    /// Aggregate, streaks and drawdown for the ISO week containing `date`.
    pub fn compute_weekly(
        &self,
        user_id: &str,
        date: NaiveDate,
        trades: &[Trade],
    ) -> Result<Option<AnalyticsSnapshot>, AnalyticsError> {
        self.compute_series_period(user_id, PeriodKind::Week, date, trades)
    }

    /// Aggregate, streaks and drawdown for the calendar month containing `date`.
    pub fn compute_monthly(
        &self,
        user_id: &str,
        date: NaiveDate,
        trades: &[Trade],
    ) -> Result<Option<AnalyticsSnapshot>, AnalyticsError> {
        self.compute_series_period(user_id, PeriodKind::Month, date, trades)
    }

    /// Lifetime aggregate for one instrument. Symbol and exchange match exactly.
    pub fn compute_symbol(
        &self,
        user_id: &str,
        symbol: &str,
        exchange: &str,
        trades: &[Trade],
    ) -> Result<Option<AnalyticsSnapshot>, AnalyticsError> {
        let matching: Vec<&Trade> = trades
            .iter()
            .filter(|t| t.is_closed() && t.exit_date.is_some())
            .filter(|t| t.symbol == symbol && t.exchange == exchange)
            .collect();

        if matching.is_empty() {
            debug!("No closed trades for {}:{} ({})", exchange, symbol, user_id);
            return Ok(None);
        }

        let aggregate = AggregateReducer::reduce(matching.iter().copied())?;
        let daily_pnl = self.bucketizer.group_daily(matching.iter().copied())?;
        debug!(
            "Symbol {}:{} for {}: {} trades over {} days",
            exchange,
            symbol,
            user_id,
            aggregate.total_trades,
            daily_pnl.len()
        );

        Ok(Some(
            SnapshotBuilder::new(user_id, SnapshotScope::symbol(symbol, exchange), aggregate, daily_pnl)
                .best_worst_days()
                .build(),
        ))
    }

    fn compute_series_period(
        &self,
        user_id: &str,
        kind: PeriodKind,
        date: NaiveDate,
        trades: &[Trade],
    ) -> Result<Option<AnalyticsSnapshot>, AnalyticsError> {
        let Some(bucket) = self.bucketizer.bucket(kind, trades, date)? else {
            return Ok(None);
        };
        let PeriodBucket {
            window,
            trades: filtered,
            daily_pnl,
            ..
        } = bucket;

        let aggregate = AggregateReducer::reduce(filtered.iter().copied())?;
        let (streaks, drawdown) = scan_daily_series(&daily_pnl);
        let scope = match kind {
            PeriodKind::Week => SnapshotScope::week_of(date),
            PeriodKind::Month => SnapshotScope::month_of(date),
            PeriodKind::Day => SnapshotScope::day(date),
        };
        debug!(
            "{} for {}: {} trades, max drawdown {}",
            scope, user_id, aggregate.total_trades, drawdown.max_drawdown
        );

        Ok(Some(
            SnapshotBuilder::new(user_id, scope, aggregate, daily_pnl)
                .window(window)
                .streaks(streaks)
                .drawdown(drawdown)
                .best_worst_days()
                .build(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{DailyPnLEntry, PROFIT_FACTOR_NO_LOSSES};
    use crate::types::fixtures::{closed_trade, trade_with_net};
    use crate::types::{PositionSide, TradeStatus};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_compute_daily_scenario_a() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        let trades = vec![
            closed_trade("long", PositionSide::Long, dec!(100), dec!(120), dec!(10), dec!(10), at),
            closed_trade("short", PositionSide::Short, dec!(200), dec!(180), dec!(5), dec!(5), at),
            closed_trade("flat", PositionSide::Long, dec!(50), dec!(50), dec!(2), dec!(0), at),
        ];

        let snapshot = AnalyticsEngine::default()
            .compute_daily("user-1", date(2024, 1, 15), &trades)
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.scope, SnapshotScope::day(date(2024, 1, 15)));
        assert_eq!(snapshot.aggregate.total_trades, 3);
        assert_eq!(snapshot.aggregate.winning_trades, 2);
        assert_eq!(snapshot.aggregate.break_even_trades, 1);
        assert_eq!(snapshot.aggregate.net_pnl, dec!(285));
        assert_eq!(snapshot.aggregate.total_charges, dec!(15));
        assert_eq!(snapshot.aggregate.profit_factor, PROFIT_FACTOR_NO_LOSSES);
        assert_eq!(snapshot.aggregate.win_rate, dec!(66.67));
        assert_eq!(snapshot.trading_days, 1);
        assert!(snapshot.streaks.is_none());
        assert!(snapshot.drawdown.is_none());
        assert!(snapshot.window.is_some());
    }

    #[test]
    fn test_empty_windows_yield_none() {
        let engine = AnalyticsEngine::default();
        let trades = vec![trade_with_net("a", dec!(10), 2024, 1, 15)];

        assert!(engine.compute_daily("user-1", date(2024, 1, 16), &trades).unwrap().is_none());
        assert!(engine.compute_weekly("user-1", date(2024, 1, 22), &trades).unwrap().is_none());
        assert!(engine.compute_monthly("user-1", date(2024, 2, 1), &[]).unwrap().is_none());
        assert!(engine.compute_symbol("user-1", "TCS", "NSE", &trades).unwrap().is_none());
    }

    #[test]
    fn test_compute_monthly_runs_series_scans() {
        // Scenario C spread over January.
        let trades = vec![
            trade_with_net("a", dec!(100), 2024, 1, 2),
            trade_with_net("b", dec!(-50), 2024, 1, 3),
            trade_with_net("c", dec!(-80), 2024, 1, 4),
            trade_with_net("d", dec!(30), 2024, 1, 5),
            trade_with_net("feb", dec!(999), 2024, 2, 1),
        ];

        let snapshot = AnalyticsEngine::default()
            .compute_monthly("user-1", date(2024, 1, 20), &trades)
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.scope.key(), "2024-01");
        assert_eq!(snapshot.aggregate.total_trades, 4);
        assert_eq!(snapshot.trading_days, 4);
        let drawdown = snapshot.drawdown.unwrap();
        assert_eq!(drawdown.max_drawdown, dec!(130));
        assert_eq!(drawdown.max_drawdown_date, Some(date(2024, 1, 4)));
        let streaks = snapshot.streaks.unwrap();
        assert_eq!(streaks.max_loss_streak, 2);
        assert_eq!(streaks.current_win_streak, 1);
        assert_eq!(
            snapshot.best_day,
            Some(DailyPnLEntry { date: date(2024, 1, 2), pnl: dec!(100) })
        );
        assert_eq!(snapshot.worst_day.unwrap().date, date(2024, 1, 4));
    }

    #[test]
    fn test_compute_weekly_key_and_bounds() {
        // Monday 15th to Sunday 21st; the 22nd is next week.
        let trades = vec![
            trade_with_net("mon", dec!(5), 2024, 1, 15),
            trade_with_net("sun", dec!(-2), 2024, 1, 21),
            trade_with_net("next", dec!(40), 2024, 1, 22),
        ];

        let snapshot = AnalyticsEngine::default()
            .compute_weekly("user-1", date(2024, 1, 17), &trades)
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.scope.key(), "2024-W03");
        assert_eq!(snapshot.aggregate.total_trades, 2);
        assert_eq!(snapshot.aggregate.net_pnl, dec!(3));
    }

    #[test]
    fn test_compute_symbol_matches_exactly() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        let mut other_exchange = closed_trade("bse", PositionSide::Long, dec!(10), dec!(11), dec!(1), dec!(0), at);
        other_exchange.exchange = "BSE".to_string();
        let mut lower = closed_trade("lower", PositionSide::Long, dec!(10), dec!(11), dec!(1), dec!(0), at);
        lower.symbol = "reliance".to_string();
        let mut open = closed_trade("open", PositionSide::Long, dec!(10), dec!(11), dec!(1), dec!(0), at);
        open.status = TradeStatus::Open;
        let trades = vec![
            closed_trade("a", PositionSide::Long, dec!(10), dec!(15), dec!(2), dec!(1), at),
            closed_trade("b", PositionSide::Short, dec!(10), dec!(12), dec!(1), dec!(0), at + chrono::Duration::days(3)),
            other_exchange,
            lower,
            open,
        ];

        let snapshot = AnalyticsEngine::default()
            .compute_symbol("user-1", "RELIANCE", "NSE", &trades)
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.scope.key(), "NSE:RELIANCE");
        assert_eq!(snapshot.aggregate.total_trades, 2);
        assert_eq!(snapshot.aggregate.net_pnl, dec!(7));
        assert_eq!(snapshot.trading_days, 2);
        assert_eq!(snapshot.best_day.unwrap().pnl, dec!(9));
        assert_eq!(snapshot.worst_day.unwrap().pnl, dec!(-2));
        assert!(snapshot.window.is_none());
    }

    #[test]
    fn test_malformed_trade_fails_whole_call() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        let mut broken = closed_trade("broken", PositionSide::Long, dec!(10), dec!(11), dec!(1), dec!(0), at);
        broken.exit_price = None;
        let trades = vec![trade_with_net("ok", dec!(5), 2024, 1, 15), broken];

        let err = AnalyticsEngine::default()
            .compute_weekly("user-1", date(2024, 1, 15), &trades)
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidTrade { ref trade_id, .. } if trade_id == "broken"));
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let trades = vec![
            trade_with_net("a", dec!(12.345), 2024, 3, 1),
            trade_with_net("b", dec!(-7.5), 2024, 3, 2),
        ];
        let engine = AnalyticsEngine::new(FixedOffset::east_opt(19800).unwrap());
        let first = engine.compute_monthly("user-1", date(2024, 3, 9), &trades).unwrap();
        let second = engine.compute_monthly("user-1", date(2024, 3, 9), &trades).unwrap();
        assert_eq!(first, second);
    }
}
