pub mod aggregate;
pub mod drawdown;
pub mod period;
pub mod snapshot;
pub mod streaks;

pub use aggregate::*;
pub use drawdown::*;
pub use period::*;
pub use snapshot::*;
pub use streaks::*;

/// Runs the streak and drawdown folds together in a single pass over the series.
pub fn scan_daily_series(daily_pnl: &[DailyPnLEntry]) -> (StreakResult, DrawdownResult) {
    let (streaks, drawdown) = daily_pnl.iter().fold(
        (StreakState::default(), DrawdownState::default()),
        |(streaks, drawdown), entry| (streaks.step(entry), drawdown.step(entry)),
    );
    (streaks.finish(), drawdown.finish())
}
