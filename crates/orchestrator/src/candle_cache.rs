use std::time::{Duration, Instant};

use tracing::warn;

use grid_hedge_core::market::Candle;
use grid_hedge_core::traits::ExchangeAdapter;

/// Maximum candles kept per session.
pub const MAX_CANDLES: usize = 200;

/// Fresh-enough window: fetches inside it are served from cache.
const SERVE_WINDOW: Duration = Duration::from_secs(1);

/// Cache older than this is refetched in full instead of merged.
const FULL_REFRESH_AFTER: Duration = Duration::from_secs(60);

/// Candles fetched per incremental refresh; covers the forming candle plus
/// a few finalized ones.
const INCREMENTAL_FETCH: usize = 5;

/// Per-session candle cache.
///
/// Owned by the engine task, so no locking is needed: one tick runs at a
/// time. A failed fetch serves the stale cache with a warning rather than
/// aborting the tick.
pub struct CandleCache {
    candles: Vec<Candle>,
    max_size: usize,
    last_fetch: Option<Instant>,
}

impl CandleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_size(MAX_CANDLES)
    }

    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            candles: Vec::new(),
            max_size: max_size.max(1),
            last_fetch: None,
        }
    }

    /// Returns up to `count` trailing candles, refreshing from the adapter
    /// when the cache is older than the serve window.
    pub async fn get(
        &mut self,
        adapter: &dyn ExchangeAdapter,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Vec<Candle> {
        let now = Instant::now();
        let age = self.last_fetch.map(|t| now.duration_since(t));

        if !self.candles.is_empty() {
            if let Some(age) = age {
                if age < SERVE_WINDOW {
                    return self.tail(count);
                }
            }
        }

        let full = self.candles.is_empty() || age.map_or(true, |a| a > FULL_REFRESH_AFTER);
        let limit = if full { count } else { INCREMENTAL_FETCH };

        match adapter.get_candles(symbol, timeframe, limit).await {
            Ok(fetched) if full => {
                self.candles = fetched;
                self.candles.sort_by_key(|c| c.timestamp);
                self.trim();
                self.last_fetch = Some(now);
            }
            Ok(fetched) => {
                self.merge(fetched);
                self.last_fetch = Some(now);
            }
            Err(e) => {
                warn!(%symbol, error = %e, "candle fetch failed, serving cached data");
            }
        }

        self.tail(count)
    }

    /// Merges an incremental fetch: same-timestamp candles are replaced (the
    /// forming candle updates in place), newer ones append.
    fn merge(&mut self, fetched: Vec<Candle>) {
        if fetched.is_empty() {
            return;
        }
        for candle in fetched {
            match self
                .candles
                .iter_mut()
                .find(|c| c.timestamp == candle.timestamp)
            {
                Some(existing) => *existing = candle,
                None => self.candles.push(candle),
            }
        }
        self.candles.sort_by_key(|c| c.timestamp);
        self.trim();
    }

    fn trim(&mut self) {
        if self.candles.len() > self.max_size {
            let excess = self.candles.len() - self.max_size;
            self.candles.drain(..excess);
        }
    }

    fn tail(&self, count: usize) -> Vec<Candle> {
        let skip = self.candles.len().saturating_sub(count);
        self.candles[skip..].to_vec()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

impl Default for CandleCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use grid_hedge_core::error::ExchangeError;
    use grid_hedge_core::market::{ClosedFill, ExchangePosition, OrderAck, Side};

    struct ScriptedAdapter {
        candles: Mutex<Vec<Candle>>,
        calls: AtomicUsize,
        fail: Mutex<bool>,
    }

    impl ScriptedAdapter {
        fn new(candles: Vec<Candle>) -> Self {
            Self {
                candles: Mutex::new(candles),
                calls: AtomicUsize::new(0),
                fail: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl ExchangeAdapter for ScriptedAdapter {
        async fn get_candles(
            &self,
            _symbol: &str,
            _timeframe: &str,
            limit: usize,
        ) -> Result<Vec<Candle>, ExchangeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().unwrap() {
                return Err(ExchangeError::Network("scripted failure".into()));
            }
            let candles = self.candles.lock().unwrap();
            let skip = candles.len().saturating_sub(limit);
            Ok(candles[skip..].to_vec())
        }

        async fn get_ticker(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
            Ok(dec!(100))
        }

        async fn get_balance(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
            Ok(dec!(1000))
        }

        async fn get_positions(
            &self,
            _symbol: &str,
        ) -> Result<Vec<ExchangePosition>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn open_position(
            &self,
            _symbol: &str,
            _side: Side,
            _lot: Decimal,
            _leverage: u32,
        ) -> Result<OrderAck, ExchangeError> {
            Err(ExchangeError::Configuration("not scripted".into()))
        }

        async fn close_position(
            &self,
            _symbol: &str,
            position_id: &str,
        ) -> Result<ClosedFill, ExchangeError> {
            Err(ExchangeError::PositionNotFound {
                position_id: position_id.to_string(),
            })
        }
    }

    fn candle(ts: i64, close: Decimal) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
        }
    }

    #[tokio::test]
    async fn first_fetch_fills_the_cache() {
        let adapter = ScriptedAdapter::new(vec![candle(1, dec!(1)), candle(2, dec!(2))]);
        let mut cache = CandleCache::new();

        let got = cache.get(&adapter, "BTCUSDT", "1H", 100).await;
        assert_eq!(got.len(), 2);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_cache_skips_the_adapter() {
        let adapter = ScriptedAdapter::new(vec![candle(1, dec!(1))]);
        let mut cache = CandleCache::new();

        cache.get(&adapter, "BTCUSDT", "1H", 100).await;
        cache.get(&adapter, "BTCUSDT", "1H", 100).await;
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_failure_serves_stale_cache() {
        let adapter = ScriptedAdapter::new(vec![candle(1, dec!(1))]);
        let mut cache = CandleCache::new();
        cache.get(&adapter, "BTCUSDT", "1H", 100).await;

        *adapter.fail.lock().unwrap() = true;
        cache.last_fetch = None; // force a refetch attempt
        let got = cache.get(&adapter, "BTCUSDT", "1H", 100).await;
        assert_eq!(got.len(), 1, "stale cache should still be served");
    }

    #[test]
    fn merge_replaces_the_forming_candle_and_appends_new() {
        let mut cache = CandleCache::new();
        cache.candles = vec![candle(1, dec!(1)), candle(2, dec!(2))];

        cache.merge(vec![candle(2, dec!(2.5)), candle(3, dec!(3))]);

        assert_eq!(cache.candles.len(), 3);
        assert_eq!(cache.candles[1].close, dec!(2.5));
        assert_eq!(cache.candles[2].timestamp, 3);
    }

    #[test]
    fn merge_ignores_empty_batches() {
        let mut cache = CandleCache::new();
        cache.candles = vec![candle(1, dec!(1))];
        cache.merge(Vec::new());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_is_bounded() {
        let mut cache = CandleCache::with_max_size(3);
        cache.merge((0..10).map(|i| candle(i, dec!(1))).collect());
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.candles[0].timestamp, 7);
    }
}
