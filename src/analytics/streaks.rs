use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::period::DailyPnLEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakResult {
    pub current_win_streak: u32,
    pub current_loss_streak: u32,
    pub max_win_streak: u32,
    pub max_loss_streak: u32,
}

/// Fold state for the streak scan.
///
/// A flat day (`pnl == 0`) leaves both running counters untouched, so it
/// neither extends nor breaks a streak in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreakState {
    temp_win: u32,
    temp_loss: u32,
    max_win: u32,
    max_loss: u32,
    last_sign: i8,
}

impl StreakState {
    pub fn step(self, entry: &DailyPnLEntry) -> Self {
        if entry.pnl > Decimal::ZERO {
            let temp_win = self.temp_win + 1;
            Self {
                temp_win,
                temp_loss: 0,
                max_win: self.max_win.max(temp_win),
                last_sign: 1,
                ..self
            }
        } else if entry.pnl < Decimal::ZERO {
            let temp_loss = self.temp_loss + 1;
            Self {
                temp_loss,
                temp_win: 0,
                max_loss: self.max_loss.max(temp_loss),
                last_sign: -1,
                ..self
            }
        } else {
            Self { last_sign: 0, ..self }
        }
    }

    /// Current streaks are reported only when the last day moved in that direction.
    pub fn finish(self) -> StreakResult {
        StreakResult {
            current_win_streak: if self.last_sign > 0 { self.temp_win } else { 0 },
            current_loss_streak: if self.last_sign < 0 { self.temp_loss } else { 0 },
            max_win_streak: self.max_win,
            max_loss_streak: self.max_loss,
        }
    }
}

pub struct StreakCalculator;

impl StreakCalculator {
    /// Scans date-ordered daily P&L once. Empty input yields all zeros.
    pub fn compute_streaks(daily_pnl: &[DailyPnLEntry]) -> StreakResult {
        daily_pnl
            .iter()
            .fold(StreakState::default(), StreakState::step)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn series(values: &[Decimal]) -> Vec<DailyPnLEntry> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, pnl)| DailyPnLEntry {
                date: start + chrono::Duration::days(i as i64),
                pnl: *pnl,
            })
            .collect()
    }

    #[test]
    fn test_scenario_b() {
        let result = StreakCalculator::compute_streaks(&series(&[
            dec!(1),
            dec!(2),
            dec!(-1),
            dec!(-1),
            dec!(-1),
            dec!(5),
        ]));

        assert_eq!(
            result,
            StreakResult {
                current_win_streak: 1,
                current_loss_streak: 0,
                max_win_streak: 2,
                max_loss_streak: 3,
            }
        );
    }

    #[test]
    fn test_empty_series() {
        assert_eq!(StreakCalculator::compute_streaks(&[]), StreakResult::default());
    }

    #[test]
    fn test_flat_day_neither_extends_nor_breaks() {
        let result = StreakCalculator::compute_streaks(&series(&[
            dec!(10),
            dec!(0),
            dec!(5),
        ]));
        assert_eq!(result.max_win_streak, 2);
        assert_eq!(result.current_win_streak, 2);
    }

    #[test]
    fn test_trailing_flat_day_clears_current_streak() {
        let result = StreakCalculator::compute_streaks(&series(&[
            dec!(-3),
            dec!(-4),
            dec!(0),
        ]));
        assert_eq!(result.max_loss_streak, 2);
        assert_eq!(result.current_loss_streak, 0);
        assert_eq!(result.current_win_streak, 0);
    }

    #[test]
    fn test_ending_on_losses() {
        let result = StreakCalculator::compute_streaks(&series(&[
            dec!(1),
            dec!(1),
            dec!(1),
            dec!(-2),
            dec!(-2),
        ]));
        assert_eq!(result.current_loss_streak, 2);
        assert_eq!(result.current_win_streak, 0);
        assert_eq!(result.max_win_streak, 3);
    }
}
