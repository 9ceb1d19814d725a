use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use tracing::debug;

use crate::error::AnalyticsError;
use crate::types::{PositionSide, Segment, Trade, TradeType};

/// Profit factor reported when there are winners but no losers.
pub const PROFIT_FACTOR_NO_LOSSES: Decimal = dec!(999.99);

/// Rounds a value to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// A closed set of labels that P&L can be broken down by.
///
/// `slot` indexes into a fixed accumulator table, so a new category only
/// needs a variant in `ALL`.
pub trait Category: Copy + Ord + 'static {
    const ALL: &'static [Self];

    fn slot(self) -> usize;
}

impl Category for Segment {
    const ALL: &'static [Self] = &Segment::ALL;

    fn slot(self) -> usize {
        self as usize
    }
}

impl Category for TradeType {
    const ALL: &'static [Self] = &TradeType::ALL;

    fn slot(self) -> usize {
        self as usize
    }
}

impl Category for PositionSide {
    const ALL: &'static [Self] = &PositionSide::ALL;

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone)]
struct CategoryTable<K: Category> {
    slots: Vec<Decimal>,
    marker: PhantomData<K>,
}

impl<K: Category> CategoryTable<K> {
    fn new() -> Self {
        Self {
            slots: vec![Decimal::ZERO; K::ALL.len()],
            marker: PhantomData,
        }
    }

    /// `None` when the slot total would overflow.
    fn add(&mut self, key: K, value: Decimal) -> Option<()> {
        let slot = self.slots.get_mut(key.slot())?;
        *slot = slot.checked_add(value)?;
        Some(())
    }

    fn into_rounded_map(self) -> BTreeMap<K, Decimal> {
        K::ALL
            .iter()
            .map(|key| {
                let value = self.slots.get(key.slot()).copied().unwrap_or_default();
                (*key, round_money(value))
            })
            .collect()
    }
}

/// Summary statistics over a set of closed trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub break_even_trades: u64,
    #[serde(rename = "grossPnL")]
    pub gross_pnl: Decimal,
    #[serde(rename = "netPnL")]
    pub net_pnl: Decimal,
    pub total_charges: Decimal,
    pub total_volume: Decimal,
    pub capital_used: Decimal,
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub average_return_pct: Decimal,
    #[serde(rename = "segmentPnL")]
    pub segment_pnl: BTreeMap<Segment, Decimal>,
    #[serde(rename = "tradeTypePnL")]
    pub trade_type_pnl: BTreeMap<TradeType, Decimal>,
    #[serde(rename = "positionPnL")]
    pub position_pnl: BTreeMap<PositionSide, Decimal>,
}

#[derive(Debug, Clone)]
struct Accumulator {
    total_trades: u64,
    winning_trades: u64,
    losing_trades: u64,
    break_even_trades: u64,
    gross_pnl: Decimal,
    net_pnl: Decimal,
    total_charges: Decimal,
    total_volume: Decimal,
    capital_used: Decimal,
    total_wins: Decimal,
    total_losses: Decimal,
    largest_win: Decimal,
    largest_loss: Decimal,
    return_pct_sum: Decimal,
    by_segment: CategoryTable<Segment>,
    by_trade_type: CategoryTable<TradeType>,
    by_position: CategoryTable<PositionSide>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            break_even_trades: 0,
            gross_pnl: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            total_charges: Decimal::ZERO,
            total_volume: Decimal::ZERO,
            capital_used: Decimal::ZERO,
            total_wins: Decimal::ZERO,
            total_losses: Decimal::ZERO,
            largest_win: Decimal::ZERO,
            largest_loss: Decimal::ZERO,
            return_pct_sum: Decimal::ZERO,
            by_segment: CategoryTable::new(),
            by_trade_type: CategoryTable::new(),
            by_position: CategoryTable::new(),
        }
    }

    fn push(&mut self, trade: &Trade) -> Result<(), AnalyticsError> {
        let invalid = |reason: String| AnalyticsError::invalid_trade(&trade.id, reason);
        trade.validate_closed().map_err(invalid)?;
        let pnl = trade.resolve_pnl().map_err(invalid)?;
        let entry_value = trade
            .entry_value()
            .ok_or_else(|| invalid(format!("entry value of {} overflows", trade.id)))?;

        let sum = |total: Decimal, value: Decimal| {
            total
                .checked_add(value)
                .ok_or_else(|| invalid("running totals overflow".to_string()))
        };

        self.gross_pnl = sum(self.gross_pnl, pnl.gross)?;
        self.net_pnl = sum(self.net_pnl, pnl.net)?;
        self.total_charges = sum(self.total_charges, trade.charges.total)?;
        self.total_volume = sum(self.total_volume, trade.quantity)?;
        self.capital_used = sum(self.capital_used, entry_value)?;
        self.return_pct_sum = sum(self.return_pct_sum, pnl.percentage)?;

        if pnl.net > Decimal::ZERO {
            self.total_wins = sum(self.total_wins, pnl.net)?;
            self.winning_trades += 1;
            self.largest_win = self.largest_win.max(pnl.net);
        } else if pnl.net < Decimal::ZERO {
            self.total_losses = sum(self.total_losses, pnl.net.abs())?;
            self.losing_trades += 1;
            self.largest_loss = self.largest_loss.min(pnl.net);
        } else {
            self.break_even_trades += 1;
        }

        let overflow = || invalid("category totals overflow".to_string());
        self.by_segment.add(trade.segment, pnl.net).ok_or_else(overflow)?;
        self.by_trade_type.add(trade.trade_type, pnl.net).ok_or_else(overflow)?;
        self.by_position.add(trade.position, pnl.net).ok_or_else(overflow)?;
        self.total_trades += 1;

        Ok(())
    }

    fn finish(self) -> AggregateResult {
        let win_rate = if self.total_trades > 0 {
            Decimal::from(self.winning_trades) / Decimal::from(self.total_trades) * dec!(100)
        } else {
            Decimal::ZERO
        };

        // A ratio too large for Decimal reads as "no meaningful losses".
        let profit_factor = if self.total_losses > Decimal::ZERO {
            self.total_wins
                .checked_div(self.total_losses)
                .unwrap_or(PROFIT_FACTOR_NO_LOSSES)
        } else if self.total_wins > Decimal::ZERO {
            PROFIT_FACTOR_NO_LOSSES
        } else {
            Decimal::ZERO
        };

        let average_win = if self.winning_trades > 0 {
            self.total_wins / Decimal::from(self.winning_trades)
        } else {
            Decimal::ZERO
        };

        let average_loss = if self.losing_trades > 0 {
            self.total_losses / Decimal::from(self.losing_trades)
        } else {
            Decimal::ZERO
        };

        let average_return_pct = if self.total_trades > 0 {
            self.return_pct_sum / Decimal::from(self.total_trades)
        } else {
            Decimal::ZERO
        };

        AggregateResult {
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            break_even_trades: self.break_even_trades,
            gross_pnl: round_money(self.gross_pnl),
            net_pnl: round_money(self.net_pnl),
            total_charges: round_money(self.total_charges),
            total_volume: self.total_volume,
            capital_used: round_money(self.capital_used),
            win_rate: round_money(win_rate),
            profit_factor: round_money(profit_factor),
            average_win: round_money(average_win),
            average_loss: round_money(average_loss),
            largest_win: round_money(self.largest_win),
            largest_loss: round_money(self.largest_loss),
            average_return_pct: round_money(average_return_pct),
            segment_pnl: self.by_segment.into_rounded_map(),
            trade_type_pnl: self.by_trade_type.into_rounded_map(),
            position_pnl: self.by_position.into_rounded_map(),
        }
    }
}

/// Single-pass reducer producing [`AggregateResult`] from closed trades.
pub struct AggregateReducer;

impl AggregateReducer {
    /// Aggregates closed trades in one pass.
    ///
    /// Trades that are not `closed` are skipped. A closed trade that breaks its
    /// input contract (no exit price, negative price, quantity or charges)
    /// fails the whole call.
    pub fn reduce<'a, I>(trades: I) -> Result<AggregateResult, AnalyticsError>
    where
        I: IntoIterator<Item = &'a Trade>,
    {
        let mut acc = Accumulator::new();
        let mut skipped = 0usize;

        for trade in trades {
            if !trade.is_closed() {
                skipped += 1;
                continue;
            }
            acc.push(trade)?;
        }

        if skipped > 0 {
            debug!("Skipped {} non-closed trades during aggregation", skipped);
        }

        Ok(acc.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::{closed_trade, trade_with_net};
    use crate::types::{TradeStatus, TradePnl};
    use chrono::{TimeZone, Utc};

    fn scenario_a() -> Vec<Trade> {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        vec![
            closed_trade("long", PositionSide::Long, dec!(100), dec!(120), dec!(10), dec!(10), at),
            closed_trade("short", PositionSide::Short, dec!(200), dec!(180), dec!(5), dec!(5), at),
            closed_trade("flat", PositionSide::Long, dec!(50), dec!(50), dec!(2), dec!(0), at),
        ]
    }

    #[test]
    fn test_scenario_a() {
        let result = AggregateReducer::reduce(&scenario_a()).unwrap();

        assert_eq!(result.total_trades, 3);
        assert_eq!(result.winning_trades, 2);
        assert_eq!(result.losing_trades, 0);
        assert_eq!(result.break_even_trades, 1);
        assert_eq!(result.gross_pnl, dec!(300));
        assert_eq!(result.net_pnl, dec!(285));
        assert_eq!(result.total_charges, dec!(15));
        assert_eq!(result.profit_factor, PROFIT_FACTOR_NO_LOSSES);
        assert_eq!(result.win_rate, dec!(66.67));
        assert_eq!(result.largest_win, dec!(190));
        assert_eq!(result.largest_loss, Decimal::ZERO);
        assert_eq!(result.average_win, dec!(142.5));
        assert_eq!(result.total_volume, dec!(17));
        assert_eq!(result.capital_used, dec!(2100));
    }

    #[test]
    fn test_breakdowns_use_net_pnl() {
        let mut trades = scenario_a();
        trades[1].segment = Segment::Futures;
        trades[1].trade_type = TradeType::Swing;

        let result = AggregateReducer::reduce(&trades).unwrap();

        assert_eq!(result.segment_pnl[&Segment::Equity], dec!(190));
        assert_eq!(result.segment_pnl[&Segment::Futures], dec!(95));
        assert_eq!(result.segment_pnl[&Segment::Options], Decimal::ZERO);
        assert_eq!(result.segment_pnl.len(), Segment::ALL.len());
        assert_eq!(result.trade_type_pnl[&TradeType::Swing], dec!(95));
        assert_eq!(result.position_pnl[&PositionSide::Long], dec!(190));
        assert_eq!(result.position_pnl[&PositionSide::Short], dec!(95));
    }

    #[test]
    fn test_mixed_wins_and_losses() {
        let trades = vec![
            trade_with_net("a", dec!(300), 2024, 2, 1),
            trade_with_net("b", dec!(-100), 2024, 2, 2),
            trade_with_net("c", dec!(-50), 2024, 2, 3),
            trade_with_net("d", dec!(100), 2024, 2, 4),
        ];
        let result = AggregateReducer::reduce(&trades).unwrap();

        assert_eq!(result.win_rate, dec!(50));
        assert_eq!(result.profit_factor, dec!(2.67));
        assert_eq!(result.average_win, dec!(200));
        assert_eq!(result.average_loss, dec!(75));
        assert_eq!(result.largest_loss, dec!(-100));
        assert_eq!(result.net_pnl, dec!(250));
        assert_eq!(
            result.winning_trades + result.losing_trades + result.break_even_trades,
            result.total_trades
        );
    }

    #[test]
    fn test_empty_input() {
        let result = AggregateReducer::reduce(&Vec::<Trade>::new()).unwrap();
        assert_eq!(result.total_trades, 0);
        assert_eq!(result.win_rate, Decimal::ZERO);
        assert_eq!(result.profit_factor, Decimal::ZERO);
        assert_eq!(result.average_win, Decimal::ZERO);
        assert_eq!(result.segment_pnl.len(), Segment::ALL.len());
    }

    #[test]
    fn test_all_break_even_profit_factor_is_zero() {
        let trades = vec![
            trade_with_net("a", dec!(0), 2024, 2, 1),
            trade_with_net("b", dec!(0), 2024, 2, 2),
        ];
        let result = AggregateReducer::reduce(&trades).unwrap();
        assert_eq!(result.profit_factor, Decimal::ZERO);
        assert_eq!(result.break_even_trades, 2);
        assert_eq!(result.win_rate, Decimal::ZERO);
    }

    #[test]
    fn test_skips_non_closed_trades() {
        let mut trades = scenario_a();
        trades[0].status = TradeStatus::Open;
        trades[0].exit_price = None;
        trades[1].status = TradeStatus::Cancelled;

        let result = AggregateReducer::reduce(&trades).unwrap();
        assert_eq!(result.total_trades, 1);
        assert_eq!(result.break_even_trades, 1);
    }

    #[test]
    fn test_malformed_closed_trade_fails_call() {
        let mut trades = scenario_a();
        trades[2].exit_price = None;

        let err = AggregateReducer::reduce(&trades).unwrap_err();
        assert_eq!(
            err,
            AnalyticsError::invalid_trade("flat", "closed trade has no exit price")
        );

        let mut trades = scenario_a();
        trades[0].quantity = dec!(-10);
        assert!(matches!(
            AggregateReducer::reduce(&trades),
            Err(AnalyticsError::InvalidTrade { .. })
        ));
    }

    #[test]
    fn test_totals_overflow_is_an_error() {
        let big = dec!(50_000_000_000_000_000_000_000_000_000);
        let trades = vec![
            trade_with_net("a", big, 2024, 2, 1),
            trade_with_net("b", big, 2024, 2, 2),
        ];

        let err = AggregateReducer::reduce(&trades).unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidTrade { ref trade_id, .. } if trade_id == "b"));
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(round_money(dec!(1.005)), dec!(1.01));
        assert_eq!(round_money(dec!(-1.005)), dec!(-1.01));
        assert_eq!(round_money(dec!(2.004)), dec!(2.00));

        let mut trade = trade_with_net("a", dec!(0), 2024, 2, 1);
        trade.pnl = Some(TradePnl {
            gross: dec!(10.125),
            net: dec!(10.125),
            percentage: dec!(1),
        });
        let result = AggregateReducer::reduce(&[trade]).unwrap();
        assert_eq!(result.net_pnl, dec!(10.13));
        assert_eq!(result.net_pnl, result.net_pnl.round_dp(2));
    }

    #[test]
    fn test_reduce_is_repeatable() {
        let trades = scenario_a();
        assert_eq!(
            AggregateReducer::reduce(&trades).unwrap(),
            AggregateReducer::reduce(&trades).unwrap()
        );
    }

    #[test]
    fn test_category_slots_match_order() {
        for (idx, segment) in Segment::ALL.iter().enumerate() {
            assert_eq!(segment.slot(), idx);
        }
        for (idx, kind) in TradeType::ALL.iter().enumerate() {
            assert_eq!(kind.slot(), idx);
        }
        for (idx, side) in PositionSide::ALL.iter().enumerate() {
            assert_eq!(side.slot(), idx);
        }
    }
}
