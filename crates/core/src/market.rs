use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// One OHLCV bar, aligned to the session's timeframe boundary.
///
/// Candle sequences handed to the indicators are always ordered by
/// `timestamp` ascending (newest last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time in Unix milliseconds.
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Typical price (HLC/3).
    #[must_use]
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / dec!(3)
    }

    /// Weighted price (HLCC/4).
    #[must_use]
    pub fn weighted_price(&self) -> Decimal {
        (self.high + self.low + self.close + self.close) / dec!(4)
    }
}

/// Position direction on a perpetual-futures symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side string used in trade events ("BUY"/"SELL").
    #[must_use]
    pub const fn order_side(&self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }

    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

/// Entry signal produced by the strategy's indicator evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "NONE")]
    Neutral,
}

impl Signal {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Neutral => "NONE",
        }
    }
}

/// An open position as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub id: String,
    pub side: Side,
    pub avg_entry: Decimal,
    pub qty: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: u32,
}

/// Acknowledgement returned by the exchange for an accepted open order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    /// Average fill price when the exchange reports it; callers fall back to
    /// the last ticker price otherwise.
    pub filled_price: Option<Decimal>,
}

/// Result of closing a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedFill {
    pub realized_pnl: Decimal,
}
