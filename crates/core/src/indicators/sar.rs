use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
}

/// Parabolic SAR state: the full indicator is these four values.
///
/// The state is a plain serializable tuple so it can be persisted across
/// restarts; stepping it with the same candle history always reproduces the
/// same sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SarState {
    pub trend: Trend,
    /// Extreme point of the current trend.
    pub ep: Decimal,
    pub sar: Decimal,
    /// Current acceleration factor.
    pub af: Decimal,
}

impl SarState {
    /// Seeds the indicator from the trailing five candles.
    ///
    /// Trend direction comes from the last two closes; the extreme point and
    /// the initial SAR come from the window's highs and lows. Returns `None`
    /// until five candles exist.
    #[must_use]
    pub fn init(candles: &[Candle], af_start: Decimal) -> Option<Self> {
        if candles.len() < 5 {
            return None;
        }

        let seed = &candles[candles.len() - 5..];
        let high = seed.iter().map(|c| c.high).max()?;
        let low = seed.iter().map(|c| c.low).min()?;

        let state = if seed[4].close > seed[3].close {
            Self {
                trend: Trend::Up,
                ep: high,
                sar: low,
                af: af_start,
            }
        } else {
            Self {
                trend: Trend::Down,
                ep: low,
                sar: high,
                af: af_start,
            }
        };
        Some(state)
    }

    /// Advances the state by the newest candle in `candles`.
    ///
    /// `candles` must end with the candle being applied; the two candles
    /// before it clamp the provisional SAR. Fewer than two candles leaves the
    /// state unchanged.
    #[must_use]
    pub fn step(self, candles: &[Candle], af_start: Decimal, af_max: Decimal) -> Self {
        let n = candles.len();
        if n < 2 {
            return self;
        }
        let current = candles[n - 1];
        let prev = candles[n - 2];

        let mut next = self;
        let mut sar = next.sar + next.af * (next.ep - next.sar);

        match next.trend {
            Trend::Up => {
                // SAR never rises above the prior two lows.
                sar = sar.min(prev.low);
                if n >= 3 {
                    sar = sar.min(candles[n - 3].low);
                }

                if current.low < sar {
                    next.trend = Trend::Down;
                    sar = next.ep;
                    next.ep = current.low;
                    next.af = af_start;
                } else if current.high > next.ep {
                    next.ep = current.high;
                    next.af = (next.af + af_start).min(af_max);
                }
            }
            Trend::Down => {
                // SAR never falls below the prior two highs.
                sar = sar.max(prev.high);
                if n >= 3 {
                    sar = sar.max(candles[n - 3].high);
                }

                if current.high > sar {
                    next.trend = Trend::Up;
                    sar = next.ep;
                    next.ep = current.high;
                    next.af = af_start;
                } else if current.low < next.ep {
                    next.ep = current.low;
                    next.af = (next.af + af_start).min(af_max);
                }
            }
        }

        next.sar = sar;
        next
    }
}
