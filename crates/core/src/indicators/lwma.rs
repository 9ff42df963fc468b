use rust_decimal::Decimal;

use crate::market::Candle;

/// Which end of the window carries the heaviest weight.
///
/// The MQL-derived convention weights the newest candle heaviest (linear
/// weights 1..N applied oldest to newest). The reversed direction is exposed
/// for callers that want the mirror convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightDirection {
    #[default]
    NewestHeaviest,
    OldestHeaviest,
}

/// Linear weighted moving average over the weighted price `(h + l + 2c) / 4`.
///
/// Returns zero when fewer than `period` candles are available.
#[must_use]
pub fn lwma(candles: &[Candle], period: usize, direction: WeightDirection) -> Decimal {
    if period == 0 || candles.len() < period {
        return Decimal::ZERO;
    }

    let recent = &candles[candles.len() - period..];
    let mut weighted_sum = Decimal::ZERO;
    let mut weight_sum = Decimal::ZERO;

    for (i, candle) in recent.iter().enumerate() {
        let raw = match direction {
            WeightDirection::NewestHeaviest => i + 1,
            WeightDirection::OldestHeaviest => period - i,
        };
        let weight = Decimal::from(raw as u64);
        weighted_sum += candle.weighted_price() * weight;
        weight_sum += weight;
    }

    if weight_sum.is_zero() {
        Decimal::ZERO
    } else {
        weighted_sum / weight_sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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
    fn returns_zero_below_period() {
        let candles = vec![flat_candle(0, dec!(100))];
        assert_eq!(lwma(&candles, 3, WeightDirection::default()), Decimal::ZERO);
        assert_eq!(lwma(&[], 3, WeightDirection::default()), Decimal::ZERO);
    }

    #[test]
    fn flat_series_returns_the_price() {
        let candles: Vec<Candle> = (0..5).map(|i| flat_candle(i, dec!(42))).collect();
        assert_eq!(lwma(&candles, 5, WeightDirection::default()), dec!(42));
    }

    #[test]
    fn newest_heaviest_pulls_toward_recent_prices() {
        // Prices 1, 2, 3 with weights 1, 2, 3: (1 + 4 + 9) / 6
        let candles = vec![
            flat_candle(0, dec!(1)),
            flat_candle(1, dec!(2)),
            flat_candle(2, dec!(3)),
        ];
        let value = lwma(&candles, 3, WeightDirection::NewestHeaviest);
        assert_eq!(value, dec!(14) / dec!(6));
    }

    #[test]
    fn oldest_heaviest_is_the_mirror() {
        // Weights 3, 2, 1: (3 + 4 + 3) / 6
        let candles = vec![
            flat_candle(0, dec!(1)),
            flat_candle(1, dec!(2)),
            flat_candle(2, dec!(3)),
        ];
        let value = lwma(&candles, 3, WeightDirection::OldestHeaviest);
        assert_eq!(value, dec!(10) / dec!(6));
    }

    #[test]
    fn only_the_trailing_window_is_used() {
        let mut candles: Vec<Candle> = (0..10).map(|i| flat_candle(i, dec!(1000))).collect();
        candles.extend((10..13).map(|i| flat_candle(i, dec!(5))));
        assert_eq!(lwma(&candles, 3, WeightDirection::default()), dec!(5));
    }
}
