use std::collections::VecDeque;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::market::Candle;

/// Maximum retained CCI values.
const MAX_HISTORY: usize = 100;

/// Commodity Channel Index with a bounded value history.
///
/// The history supports level-crossing detection and is small enough to
/// persist alongside the SAR state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CciState {
    history: VecDeque<Decimal>,
}

impl CciState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a state from a persisted history tail (oldest first).
    #[must_use]
    pub fn from_history(values: Vec<Decimal>) -> Self {
        let mut history: VecDeque<Decimal> = values.into();
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
        Self { history }
    }

    /// Computes the CCI for the trailing `period` candles and appends it to
    /// the history. Returns zero when not enough candles exist or the mean
    /// deviation is zero.
    pub fn update(&mut self, candles: &[Candle], period: usize) -> Decimal {
        let cci = compute_cci(candles, period);
        self.history.push_back(cci);
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
        cci
    }

    /// Latest computed value (zero before any update).
    #[must_use]
    pub fn value(&self) -> Decimal {
        self.history.back().copied().unwrap_or(Decimal::ZERO)
    }

    /// Value before the latest one.
    #[must_use]
    pub fn previous(&self) -> Decimal {
        if self.history.len() < 2 {
            return Decimal::ZERO;
        }
        self.history[self.history.len() - 2]
    }

    /// True when the last update moved from below `level` to at-or-above it.
    #[must_use]
    pub fn crossed_above(&self, level: Decimal) -> bool {
        self.history.len() >= 2 && self.previous() < level && self.value() >= level
    }

    /// True when the last update moved from above `level` to at-or-below it.
    #[must_use]
    pub fn crossed_below(&self, level: Decimal) -> bool {
        self.history.len() >= 2 && self.previous() > level && self.value() <= level
    }

    /// Trailing `count` values, oldest first. Used for persistence.
    #[must_use]
    pub fn tail(&self, count: usize) -> Vec<Decimal> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// `cci = (tp - sma(tp)) / (0.015 * mean_deviation)` over typical prices.
fn compute_cci(candles: &[Candle], period: usize) -> Decimal {
    if period == 0 || candles.len() < period {
        return Decimal::ZERO;
    }

    let recent = &candles[candles.len() - period..];
    let typical: Vec<Decimal> = recent.iter().map(Candle::typical_price).collect();
    let count = Decimal::from(typical.len() as u64);

    let sma: Decimal = typical.iter().copied().sum::<Decimal>() / count;
    let mean_dev: Decimal = typical.iter().map(|tp| (*tp - sma).abs()).sum::<Decimal>() / count;

    if mean_dev.is_zero() {
        return Decimal::ZERO;
    }

    let current = typical[typical.len() - 1];
    (current - sma) / (dec!(0.015) * mean_dev)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_candle(ts: i64, price: Decimal) -> Candle {
        Candle {
            timestamp: ts,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: dec!(1),
        }
    }

    #[test]
    fn zero_without_enough_candles() {
        let mut cci = CciState::new();
        assert_eq!(cci.update(&[], 14), Decimal::ZERO);
        let candles = vec![flat_candle(0, dec!(100))];
        assert_eq!(cci.update(&candles, 14), Decimal::ZERO);
    }

    #[test]
    fn zero_mean_deviation_yields_zero() {
        let mut cci = CciState::new();
        let candles: Vec<Candle> = (0..14).map(|i| flat_candle(i, dec!(100))).collect();
        assert_eq!(cci.update(&candles, 14), Decimal::ZERO);
    }

    #[test]
    fn rising_close_produces_positive_cci() {
        let mut cci = CciState::new();
        let mut candles: Vec<Candle> = (0..13).map(|i| flat_candle(i, dec!(100))).collect();
        candles.push(flat_candle(13, dec!(110)));
        assert!(cci.update(&candles, 14) > Decimal::ZERO);
    }

    #[test]
    fn known_value_for_small_window() {
        // Typical prices 10, 10, 16: sma = 12, mean_dev = 8/3,
        // cci = (16 - 12) / (0.015 * 8/3) = 100.
        let mut cci = CciState::new();
        let candles = vec![
            flat_candle(0, dec!(10)),
            flat_candle(1, dec!(10)),
            flat_candle(2, dec!(16)),
        ];
        assert_eq!(cci.update(&candles, 3), dec!(100));
    }

    #[test]
    fn crossing_detection_fires_only_on_the_crossing_update() {
        let mut cci = CciState::from_history(vec![dec!(50)]);
        let candles = vec![
            flat_candle(0, dec!(10)),
            flat_candle(1, dec!(10)),
            flat_candle(2, dec!(16)),
        ];
        cci.update(&candles, 3); // history: 50, 100
        assert!(cci.crossed_above(dec!(100)));
        assert!(!cci.crossed_below(dec!(100)));

        cci.update(&candles, 3); // history: 50, 100, 100 -- prev no longer below
        assert!(!cci.crossed_above(dec!(100)));
    }

    #[test]
    fn crossed_below_uses_strict_previous() {
        let mut cci = CciState::from_history(vec![dec!(-50), dec!(-120)]);
        assert!(cci.crossed_below(dec!(-100)));
        // Equal previous value does not count as "above".
        cci = CciState::from_history(vec![dec!(-100), dec!(-120)]);
        assert!(!cci.crossed_below(dec!(-100)));
    }

    #[test]
    fn history_is_bounded() {
        let mut cci = CciState::new();
        let candles = vec![
            flat_candle(0, dec!(10)),
            flat_candle(1, dec!(10)),
            flat_candle(2, dec!(16)),
        ];
        for _ in 0..(MAX_HISTORY + 20) {
            cci.update(&candles, 3);
        }
        assert_eq!(cci.len(), MAX_HISTORY);
    }

    #[test]
    fn tail_round_trips_through_from_history() {
        let mut cci = CciState::new();
        let candles = vec![
            flat_candle(0, dec!(10)),
            flat_candle(1, dec!(12)),
            flat_candle(2, dec!(16)),
        ];
        cci.update(&candles, 3);
        cci.update(&candles, 3);

        let restored = CciState::from_history(cci.tail(50));
        assert_eq!(restored.value(), cci.value());
        assert_eq!(restored.previous(), cci.previous());
    }
}
