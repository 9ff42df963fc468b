use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Running trade statistics for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Performance {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    /// Accumulated PnL from closed positions since the session was created.
    pub realized_pnl: Decimal,
    /// Mark-to-market PnL of the open ladders, refreshed every tick.
    pub unrealized_pnl: Decimal,
    pub started_at: DateTime<Utc>,
}

impl Performance {
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            started_at: Utc::now(),
        }
    }

    /// Records one closed position.
    pub fn record_close(&mut self, realized: Decimal) {
        self.realized_pnl += realized;
        if realized > Decimal::ZERO {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
    }

    /// Win rate in percent over closed trades.
    #[must_use]
    pub fn win_rate(&self) -> f64 {
        let closed = self.winning_trades + self.losing_trades;
        if closed == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.winning_trades as f64 / closed as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }
}

impl Default for Performance {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn record_close_tracks_wins_and_losses() {
        let mut perf = Performance::new();
        perf.record_close(dec!(1.5));
        perf.record_close(dec!(-0.5));
        perf.record_close(dec!(2.0));

        assert_eq!(perf.winning_trades, 2);
        assert_eq!(perf.losing_trades, 1);
        assert_eq!(perf.realized_pnl, dec!(3.0));
    }

    #[test]
    fn zero_pnl_counts_as_a_loss() {
        let mut perf = Performance::new();
        perf.record_close(Decimal::ZERO);
        assert_eq!(perf.losing_trades, 1);
    }

    #[test]
    fn win_rate_rounds_to_two_decimals() {
        let mut perf = Performance::new();
        perf.record_close(dec!(1));
        perf.record_close(dec!(1));
        perf.record_close(dec!(-1));
        assert!((perf.win_rate() - 66.67).abs() < 1e-9);
        assert_eq!(Performance::new().win_rate(), 0.0);
    }
}
