//! [`ExchangeAdapter`] implementation over the Bitget mix v2 endpoints.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use grid_hedge_core::error::ExchangeError;
use grid_hedge_core::market::{Candle, ClosedFill, ExchangePosition, OrderAck, Side};
use grid_hedge_core::traits::ExchangeAdapter;

use crate::client::BitgetClient;
use crate::types::{RawAccount, RawOrderAck, RawPosition, RawTicker};

const PRODUCT_TYPE: &str = "USDT-FUTURES";
const MARGIN_COIN: &str = "USDT";

/// A fill this adapter opened, kept so closes can be sized and priced by
/// order id. The exchange itself aggregates per side; per-rung accounting
/// lives here.
#[derive(Debug, Clone)]
struct OpenOrder {
    side: Side,
    lot: Decimal,
    entry_price: Decimal,
    leverage: u32,
}

pub struct BitgetAdapter {
    client: BitgetClient,
    open_orders: RwLock<HashMap<String, OpenOrder>>,
}

impl BitgetAdapter {
    #[must_use]
    pub fn new(client: BitgetClient) -> Self {
        Self {
            client,
            open_orders: RwLock::new(HashMap::new()),
        }
    }

    async fn place_order(
        &self,
        symbol: &str,
        order_side: &str,
        trade_side: &str,
        size: Decimal,
    ) -> Result<String, ExchangeError> {
        let body = json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "marginMode": "crossed",
            "marginCoin": MARGIN_COIN,
            "side": order_side,
            "tradeSide": trade_side,
            "orderType": "market",
            "size": size.to_string(),
            "force": "GTC",
        });
        let data = self.client.post("/api/v2/mix/order/place-order", body).await?;
        let ack: RawOrderAck = serde_json::from_value(data)?;
        Ok(ack.order_id)
    }

    async fn raw_positions(&self, symbol: &str) -> Result<Vec<RawPosition>, ExchangeError> {
        let params = [
            ("productType", PRODUCT_TYPE.to_string()),
            ("marginCoin", MARGIN_COIN.to_string()),
            ("symbol", symbol.to_string()),
        ];
        let data = self
            .client
            .get("/api/v2/mix/position/all-position", &params)
            .await?;
        if data.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(data)?)
    }
}

#[async_trait]
impl ExchangeAdapter for BitgetAdapter {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("productType", PRODUCT_TYPE.to_string()),
            ("granularity", timeframe.to_string()),
            ("limit", limit.to_string()),
        ];
        let data = self.client.get("/api/v2/mix/market/candles", &params).await?;
        parse_candles(&data)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("productType", PRODUCT_TYPE.to_string()),
        ];
        let data = self.client.get("/api/v2/mix/market/ticker", &params).await?;

        // The ticker endpoint wraps the single entry in an array.
        let entry = match &data {
            serde_json::Value::Array(items) => items.first().cloned().ok_or_else(|| {
                ExchangeError::SymbolNotFound {
                    symbol: symbol.to_string(),
                }
            })?,
            other => other.clone(),
        };
        let ticker: RawTicker = serde_json::from_value(entry)?;
        let raw = ticker
            .last_pr
            .or(ticker.last)
            .ok_or_else(|| ExchangeError::Serialization("ticker missing last price".into()))?;
        let price = parse_decimal(&raw, "last price")?;
        if price <= Decimal::ZERO {
            return Err(ExchangeError::Serialization(format!(
                "non-positive last price: {raw}"
            )));
        }
        Ok(price)
    }

    async fn get_balance(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        let params = [("productType", PRODUCT_TYPE.to_string())];
        let data = self
            .client
            .get("/api/v2/mix/account/accounts", &params)
            .await?;
        if data.is_null() {
            return Ok(Decimal::ZERO);
        }
        let accounts: Vec<RawAccount> = serde_json::from_value(data)?;
        for account in accounts {
            if account.margin_coin == MARGIN_COIN {
                return parse_decimal(&account.available, "available balance");
            }
        }
        Ok(Decimal::ZERO)
    }

    async fn get_positions(&self, symbol: &str) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let raw = self.raw_positions(symbol).await?;
        let mut positions = Vec::new();
        for item in raw {
            let qty = parse_decimal(&item.total, "position size")?;
            if qty <= Decimal::ZERO {
                continue;
            }
            let side = match item.hold_side.as_str() {
                "long" => Side::Long,
                "short" => Side::Short,
                other => {
                    warn!(hold_side = other, "unknown hold side in position, skipping");
                    continue;
                }
            };
            positions.push(ExchangePosition {
                // The exchange aggregates one position per side.
                id: format!("{symbol}-{}", item.hold_side),
                side,
                avg_entry: parse_decimal(&item.open_price_avg, "entry price")?,
                qty,
                unrealized_pnl: Decimal::from_str(&item.unrealized_pl).unwrap_or(Decimal::ZERO),
                leverage: item.leverage.parse().unwrap_or(1),
            });
        }
        Ok(positions)
    }

    async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        lot: Decimal,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError> {
        let order_side = match side {
            Side::Long => "buy",
            Side::Short => "sell",
        };
        let order_id = self
            .place_order(symbol, order_side, "open", lot)
            .await
            .map_err(refine_open_error)?;

        // Market order: the last trade price is the best fill estimate the
        // order endpoint gives us.
        let filled_price = self.get_ticker(symbol).await.ok();
        if let Some(price) = filled_price {
            self.open_orders.write().await.insert(
                order_id.clone(),
                OpenOrder {
                    side,
                    lot,
                    entry_price: price,
                    leverage,
                },
            );
        }
        debug!(%order_id, ?side, %lot, "order opened");
        Ok(OrderAck {
            order_id,
            filled_price,
        })
    }

    async fn close_position(
        &self,
        symbol: &str,
        position_id: &str,
    ) -> Result<ClosedFill, ExchangeError> {
        // Prefer the per-order ledger for rung-level closes.
        let ledger_entry = self.open_orders.write().await.remove(position_id);
        if let Some(order) = ledger_entry {
            let close_side = match order.side {
                Side::Long => "sell",
                Side::Short => "buy",
            };
            let result = self
                .place_order(symbol, close_side, "close", order.lot)
                .await
                .map_err(|e| refine_close_error(e, position_id));
            match result {
                Ok(_) => {
                    let exit = self.get_ticker(symbol).await.unwrap_or(order.entry_price);
                    let delta = match order.side {
                        Side::Long => exit - order.entry_price,
                        Side::Short => order.entry_price - exit,
                    };
                    return Ok(ClosedFill {
                        realized_pnl: delta * order.lot * Decimal::from(order.leverage),
                    });
                }
                Err(e) => {
                    // Keep the rung out of the ledger only if the exchange
                    // says it is gone; otherwise restore for a later retry.
                    if !matches!(e, ExchangeError::PositionNotFound { .. }) {
                        self.open_orders
                            .write()
                            .await
                            .insert(position_id.to_string(), order);
                    }
                    return Err(e);
                }
            }
        }

        // Fall back to the exchange's aggregated per-side position (ids are
        // synthesized as "<symbol>-<side>" after a sync).
        let positions = self.get_positions(symbol).await?;
        let Some(position) = positions.into_iter().find(|p| p.id == position_id) else {
            return Err(ExchangeError::PositionNotFound {
                position_id: position_id.to_string(),
            });
        };
        let close_side = match position.side {
            Side::Long => "sell",
            Side::Short => "buy",
        };
        self.place_order(symbol, close_side, "close", position.qty)
            .await
            .map_err(|e| refine_close_error(e, position_id))?;
        Ok(ClosedFill {
            realized_pnl: position.unrealized_pnl,
        })
    }
}

/// Parses a candle array response: `[[ts, open, high, low, close, volume, ...], ...]`.
fn parse_candles(data: &serde_json::Value) -> Result<Vec<Candle>, ExchangeError> {
    let rows = data
        .as_array()
        .ok_or_else(|| ExchangeError::Serialization("candle payload is not an array".into()))?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = row
            .as_array()
            .ok_or_else(|| ExchangeError::Serialization("candle row is not an array".into()))?;
        if fields.len() < 5 {
            return Err(ExchangeError::Serialization(format!(
                "candle row too short: {} fields",
                fields.len()
            )));
        }
        let text = |i: usize| -> String {
            match &fields[i] {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        };
        candles.push(Candle {
            timestamp: text(0).parse().map_err(|_| {
                ExchangeError::Serialization(format!("bad candle timestamp: {}", text(0)))
            })?,
            open: parse_decimal(&text(1), "open")?,
            high: parse_decimal(&text(2), "high")?,
            low: parse_decimal(&text(3), "low")?,
            close: parse_decimal(&text(4), "close")?,
            volume: if fields.len() > 5 {
                Decimal::from_str(&text(5)).unwrap_or(Decimal::ZERO)
            } else {
                Decimal::ZERO
            },
        });
    }
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

fn parse_decimal(raw: &str, what: &str) -> Result<Decimal, ExchangeError> {
    if raw.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(raw)
        .map_err(|_| ExchangeError::Serialization(format!("bad {what}: {raw}")))
}

/// Refines a generic envelope error from an open order into the rejection
/// kinds the engine distinguishes.
fn refine_open_error(err: ExchangeError) -> ExchangeError {
    if let ExchangeError::Exchange { code, message } = &err {
        let lower = message.to_lowercase();
        if lower.contains("insufficient") || lower.contains("balance") || code == "40754" {
            return ExchangeError::InsufficientMargin(format!("[{code}] {message}"));
        }
        if lower.contains("size") || lower.contains("amount") || lower.contains("qty") {
            return ExchangeError::InvalidSize(format!("[{code}] {message}"));
        }
    }
    err
}

/// The exchange reports "no position to close" as code 22002.
fn refine_close_error(err: ExchangeError, position_id: &str) -> ExchangeError {
    if let ExchangeError::Exchange { code, message } = &err {
        if code == "22002" || message.to_lowercase().contains("no position") {
            return ExchangeError::PositionNotFound {
                position_id: position_id.to_string(),
            };
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn candles_parse_and_sort_ascending() {
        let data = serde_json::json!([
            ["1700003600000", "101", "102", "100", "101.5", "12.5"],
            ["1700000000000", "100", "101", "99", "100.5", "10"],
        ]);
        let candles = parse_candles(&data).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, 1_700_000_000_000);
        assert_eq!(candles[0].close, dec!(100.5));
        assert_eq!(candles[1].volume, dec!(12.5));
    }

    #[test]
    fn short_candle_rows_are_rejected() {
        let data = serde_json::json!([["1700000000000", "100"]]);
        assert!(parse_candles(&data).is_err());
    }

    #[test]
    fn non_array_candle_payload_is_rejected() {
        let data = serde_json::json!({"unexpected": true});
        assert!(matches!(
            parse_candles(&data),
            Err(ExchangeError::Serialization(_))
        ));
    }

    #[test]
    fn open_rejections_refine_to_margin_and_size() {
        let margin = refine_open_error(ExchangeError::Exchange {
            code: "40754".into(),
            message: "Insufficient balance".into(),
        });
        assert!(matches!(margin, ExchangeError::InsufficientMargin(_)));

        let size = refine_open_error(ExchangeError::Exchange {
            code: "45110".into(),
            message: "The order size is below the minimum".into(),
        });
        assert!(matches!(size, ExchangeError::InvalidSize(_)));

        let passthrough = refine_open_error(ExchangeError::Exchange {
            code: "50000".into(),
            message: "System busy".into(),
        });
        assert!(matches!(passthrough, ExchangeError::Exchange { .. }));
    }

    #[test]
    fn close_rejections_refine_to_position_not_found() {
        let err = refine_close_error(
            ExchangeError::Exchange {
                code: "22002".into(),
                message: "No position to close".into(),
            },
            "ord-1",
        );
        assert!(matches!(
            err,
            ExchangeError::PositionNotFound { position_id } if position_id == "ord-1"
        ));
    }

    #[test]
    fn empty_decimal_fields_default_to_zero() {
        assert_eq!(parse_decimal("", "x").unwrap(), Decimal::ZERO);
        assert_eq!(parse_decimal("1.25", "x").unwrap(), dec!(1.25));
        assert!(parse_decimal("abc", "x").is_err());
    }
}
