//! Session lifecycle events delivered to the upstream platform.
//!
//! Every event becomes a webhook body `{"event", "timestamp", "data"}`; the
//! emitter injects `userId`/`userBotId` into `data` so the payload structs
//! here carry only the event-specific fields.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::market::Signal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    TradeOpened(TradeOpened),
    TradeClosed(TradeClosed),
    StatusUpdate(Box<StatusSnapshot>),
    StatusChanged(StatusChanged),
    ErrorOccurred(ErrorOccurred),
    BalanceWarning(BalanceWarning),
    GlobalLimitHit(GlobalLimitHit),
}

impl SessionEvent {
    /// Wire name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TradeOpened(_) => "trade_opened",
            Self::TradeClosed(_) => "trade_closed",
            Self::StatusUpdate(_) => "status_update",
            Self::StatusChanged(_) => "status_changed",
            Self::ErrorOccurred(_) => "error_occurred",
            Self::BalanceWarning(_) => "balance_warning",
            Self::GlobalLimitHit(_) => "global_limit_hit",
        }
    }

    /// Event payload as the webhook `data` object.
    #[must_use]
    pub fn data(&self) -> Value {
        let result = match self {
            Self::TradeOpened(p) => serde_json::to_value(p),
            Self::TradeClosed(p) => serde_json::to_value(p),
            Self::StatusUpdate(p) => serde_json::to_value(p),
            Self::StatusChanged(p) => serde_json::to_value(p),
            Self::ErrorOccurred(p) => serde_json::to_value(p),
            Self::BalanceWarning(p) => serde_json::to_value(p),
            Self::GlobalLimitHit(p) => serde_json::to_value(p),
        };
        result.unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOpened {
    pub trade: OpenedTrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedTrade {
    pub id: String,
    pub exchange_order_id: String,
    pub pair: String,
    /// "BUY" or "SELL".
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub cost: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub grid_level: usize,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeClosed {
    pub trade: ClosedTrade,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub id: String,
    pub pair: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub amount: Decimal,
    /// Exit price.
    pub price: Decimal,
    pub entry_price: Decimal,
    pub pnl: Decimal,
    pub pnl_percent: Decimal,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    pub previous_status: String,
    pub new_status: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorOccurred {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceWarning {
    pub current_balance: Decimal,
    pub required_balance: Decimal,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalLimitHit {
    pub symbol: String,
    pub total_pnl: Decimal,
    /// "PROFIT" or "LOSS".
    pub limit_type: String,
    pub limit_value: Decimal,
    pub message: String,
}

/// Real-time session snapshot mirrored to the platform every few ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub symbol: String,
    pub current_price: Decimal,
    pub indicators: IndicatorReport,
    pub balance: Decimal,
    pub positions: PositionsReport,
    pub grid: GridReport,
    pub profit: ProfitReport,
    pub performance: PerformanceReport,
    pub runtime: RuntimeReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorReport {
    pub sma: Decimal,
    pub sar: Decimal,
    pub cci: Decimal,
    pub signal: Signal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsReport {
    pub buy: Vec<PositionReport>,
    pub sell: Vec<PositionReport>,
    pub buy_count: usize,
    pub sell_count: usize,
    pub buy_pnl: Decimal,
    pub sell_pnl: Decimal,
    pub total_pnl: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionReport {
    pub price: Decimal,
    pub lot: Decimal,
    pub order_id: String,
    pub grid_level: usize,
    pub pnl: Decimal,
    pub pnl_percent: Decimal,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridReport {
    pub multiplier: Decimal,
    pub space_percent: Decimal,
    pub max_buy_orders: usize,
    pub max_sell_orders: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitReport {
    pub single_order_profit: Decimal,
    pub pair_global_profit: Decimal,
    pub global_profit: Decimal,
    pub max_loss: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate: f64,
    #[serde(rename = "totalPnL")]
    pub total_pnl: Decimal,
    #[serde(rename = "unrealizedPnL")]
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeReport {
    pub tick: u64,
    /// Seconds since the session started.
    pub uptime: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_trade_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn event_kinds_match_wire_names() {
        let event = SessionEvent::StatusChanged(StatusChanged {
            previous_status: "idle".into(),
            new_status: "running".into(),
            reason: "Trading started".into(),
        });
        assert_eq!(event.kind(), "status_changed");

        let data = event.data();
        assert_eq!(data["previousStatus"], "idle");
        assert_eq!(data["newStatus"], "running");
    }

    #[test]
    fn opened_trade_serializes_camel_case() {
        let event = SessionEvent::TradeOpened(TradeOpened {
            trade: OpenedTrade {
                id: "ord-1".into(),
                exchange_order_id: "ord-1".into(),
                pair: "BTCUSDT".into(),
                side: "BUY".into(),
                order_type: "MARKET".into(),
                amount: dec!(0.001),
                price: dec!(100),
                cost: dec!(0.1),
                fee: Decimal::ZERO,
                fee_currency: "USDT".into(),
                grid_level: 0,
                opened_at: Utc::now(),
            },
        });
        let data = event.data();
        assert_eq!(data["trade"]["exchangeOrderId"], "ord-1");
        assert_eq!(data["trade"]["type"], "MARKET");
        assert_eq!(data["trade"]["gridLevel"], 0);
    }

    #[test]
    fn performance_report_keeps_pnl_casing() {
        let report = PerformanceReport {
            total_trades: 3,
            winning_trades: 2,
            losing_trades: 1,
            win_rate: 66.67,
            total_pnl: dec!(1.5),
            unrealized_pnl: dec!(-0.2),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("totalPnL").is_some());
        assert!(value.get("unrealizedPnL").is_some());
    }
}
