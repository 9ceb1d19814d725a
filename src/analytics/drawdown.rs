use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::aggregate::round_money;
use super::period::DailyPnLEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawdownResult {
    /// Largest peak-to-trough decline of cumulative net P&L, in currency.
    pub max_drawdown: Decimal,
    /// Date of the trough, `None` when no drawdown occurred.
    pub max_drawdown_date: Option<NaiveDate>,
    /// Calendar days from the trough until the running total first exceeds
    /// the peak in force at the trough. `None` while unrecovered.
    pub recovery_days: Option<i64>,
}

/// Fold state for the running-peak drawdown scan. Equity and peak start at 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawdownState {
    running_total: Decimal,
    peak: Decimal,
    max_drawdown: Decimal,
    max_drawdown_date: Option<NaiveDate>,
    trough_peak: Decimal,
    recovered_on: Option<NaiveDate>,
}

impl DrawdownState {
    pub fn step(self, entry: &DailyPnLEntry) -> Self {
        let running_total = self.running_total.saturating_add(entry.pnl);
        let peak = self.peak.max(running_total);
        let drawdown = peak.saturating_sub(running_total);

        if drawdown > self.max_drawdown {
            return Self {
                running_total,
                peak,
                max_drawdown: drawdown,
                max_drawdown_date: Some(entry.date),
                trough_peak: peak,
                recovered_on: None,
            };
        }

        let recovered_on = match (self.max_drawdown_date, self.recovered_on) {
            (Some(_), None) if running_total > self.trough_peak => Some(entry.date),
            (_, recovered) => recovered,
        };

        Self {
            running_total,
            peak,
            recovered_on,
            ..self
        }
    }

    pub fn finish(self) -> DrawdownResult {
        let recovery_days = match (self.max_drawdown_date, self.recovered_on) {
            (Some(trough), Some(recovered)) => Some((recovered - trough).num_days()),
            _ => None,
        };

        DrawdownResult {
            max_drawdown: round_money(self.max_drawdown),
            max_drawdown_date: self.max_drawdown_date,
            recovery_days,
        }
    }
}

pub struct DrawdownCalculator;

impl DrawdownCalculator {
    /// Scans date-ordered daily P&L once, tracking the equity curve and its running peak.
    pub fn compute_drawdown(daily_pnl: &[DailyPnLEntry]) -> DrawdownResult {
        daily_pnl
            .iter()
            .fold(DrawdownState::default(), DrawdownState::step)
            .finish()
    }
}
