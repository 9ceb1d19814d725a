use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market segment a trade was placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Equity,
    Futures,
    Options,
    Commodity,
}

impl Segment {
    pub const ALL: [Segment; 4] = [
        Segment::Equity,
        Segment::Futures,
        Segment::Options,
        Segment::Commodity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Equity => "equity",
            Segment::Futures => "futures",
            Segment::Options => "options",
            Segment::Commodity => "commodity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Intraday,
    Positional,
    Swing,
}

impl TradeType {
    pub const ALL: [TradeType; 3] = [TradeType::Intraday, TradeType::Positional, TradeType::Swing];

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Intraday => "intraday",
            TradeType::Positional => "positional",
            TradeType::Swing => "swing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub const ALL: [PositionSide; 2] = [PositionSide::Long, PositionSide::Short];

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    /// +1 for long, -1 for short. Applied to the raw price move.
    pub fn direction(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
    Partial,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
            TradeStatus::Partial => "partial",
            TradeStatus::Cancelled => "cancelled",
        }
    }
}

macro_rules! impl_str_enum {
    ($ty:ident, $label:literal, [$($variant:ident),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($ty::$variant.as_str()) {
                        return Ok($ty::$variant);
                    }
                )+
                Err(format!("Unknown {}: {}", $label, s))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

impl_str_enum!(Segment, "segment", [Equity, Futures, Options, Commodity]);
impl_str_enum!(TradeType, "trade type", [Intraday, Positional, Swing]);
impl_str_enum!(PositionSide, "position", [Long, Short]);
impl_str_enum!(TradeStatus, "status", [Open, Closed, Partial, Cancelled]);

/// Fees, taxes and brokerage attached to a trade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Charges {
    pub total: Decimal,
}

/// P&L figures for a single trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradePnl {
    pub gross: Decimal,
    pub net: Decimal,
    /// Net P&L as a percentage of entry value.
    pub percentage: Decimal,
}

/// A journal trade as handed to the analytics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub exchange: String,
    pub segment: Segment,
    pub trade_type: TradeType,
    pub position: PositionSide,
    pub status: TradeStatus,
    pub entry_price: Decimal,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    pub quantity: Decimal,
    pub entry_date: DateTime<Utc>,
    #[serde(default)]
    pub exit_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub charges: Charges,
    /// Precomputed P&L. When absent it is derived from prices.
    #[serde(default)]
    pub pnl: Option<TradePnl>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    /// Entry notional, `entry_price * quantity`. `None` on overflow.
    pub fn entry_value(&self) -> Option<Decimal> {
        self.entry_price.checked_mul(self.quantity)
    }

    /// Returns the precomputed P&L or derives it from prices and charges.
    ///
    /// Fails when there is no exit price to derive from or when the result
    /// leaves the `Decimal` range.
    pub fn resolve_pnl(&self) -> Result<TradePnl, String> {
        if let Some(pnl) = self.pnl {
            return Ok(pnl);
        }

        let exit_price = self
            .exit_price
            .ok_or_else(|| "closed trade has no exit price".to_string())?;
        let overflow = || format!("P&L of {} x {} overflows", exit_price, self.quantity);

        let gross = exit_price
            .checked_sub(self.entry_price)
            .and_then(|diff| diff.checked_mul(self.quantity))
            .and_then(|gross| gross.checked_mul(self.position.direction()))
            .ok_or_else(overflow)?;
        let net = gross.checked_sub(self.charges.total).ok_or_else(overflow)?;
        let entry_value = self.entry_value().ok_or_else(overflow)?;
        let percentage = if entry_value.is_zero() {
            Decimal::ZERO
        } else {
            net.checked_div(entry_value)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                .ok_or_else(overflow)?
        };

        Ok(TradePnl { gross, net, percentage })
    }

    /// Checks the invariants a closed trade must satisfy before it can be aggregated.
    pub fn validate_closed(&self) -> Result<(), String> {
        let Some(exit_price) = self.exit_price else {
            return Err("closed trade has no exit price".to_string());
        };
        if self.entry_price.is_sign_negative() {
            return Err(format!("negative entry price {}", self.entry_price));
        }
        if exit_price.is_sign_negative() {
            return Err(format!("negative exit price {}", exit_price));
        }
        if self.quantity.is_sign_negative() {
            return Err(format!("negative quantity {}", self.quantity));
        }
        if self.charges.total.is_sign_negative() {
            return Err(format!("negative charges {}", self.charges.total));
        }
        Ok(())
    }
}
