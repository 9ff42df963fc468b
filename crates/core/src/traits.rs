use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::events::SessionEvent;
use crate::market::{Candle, ClosedFill, ExchangePosition, OrderAck, Side};

/// Signed-REST exchange surface the trading engine depends on.
///
/// Implementations hide signing, clock skew, rate limiting, and transient
/// retry policy. Demo accounts are indistinguishable from live ones at this
/// boundary.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Candles ordered ascending by timestamp.
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Last traded price; always positive on success.
    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Available margin for the symbol's settlement currency.
    async fn get_balance(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Open positions for the symbol as the exchange reports them.
    async fn get_positions(&self, symbol: &str) -> Result<Vec<ExchangePosition>, ExchangeError>;

    /// Opens a market position. Completes only once the exchange accepts the
    /// order.
    async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        lot: Decimal,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError>;

    /// Closes a previously opened position by id, reporting the realized PnL.
    async fn close_position(
        &self,
        symbol: &str,
        position_id: &str,
    ) -> Result<ClosedFill, ExchangeError>;
}

/// Destination for session lifecycle events.
///
/// The engine composes with a sink rather than knowing about webhooks; the
/// webhook emitter is one implementation, [`NullSink`] is another.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: SessionEvent);
}

/// Sink that discards every event. Used for sessions without a webhook
/// destination and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: SessionEvent) {}
}
