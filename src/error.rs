use thiserror::Error;

/// Errors raised by the analytics engine.
///
/// Empty windows are not errors; they surface as `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsError {
    #[error("Invalid trade {trade_id}: {reason}")]
    InvalidTrade { trade_id: String, reason: String },

    #[error("Cannot build calendar window: {0}")]
    InvalidWindow(String),
}

impl AnalyticsError {
    pub fn invalid_trade(trade_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTrade {
            trade_id: trade_id.into(),
            reason: reason.into(),
        }
    }
}
