use std::path::PathBuf;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Hard ceiling on the martingale factor `multiplier^n`.
pub const MAX_MARTINGALE_FACTOR: Decimal = dec!(10);

/// Number of grid levels per session.
pub const GRID_LEVELS: usize = 4;

/// Exchange API credentials for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    /// Demo (paper) account. Indistinguishable from live at the adapter
    /// contract; the client adds the exchange's paper-trading header.
    pub demo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSettings {
    pub symbol: String,
    pub leverage: u32,
}

/// One rung of the grid ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLevel {
    /// Adverse price distance from the most adverse entry, in percent.
    pub percent: Decimal,
    /// How many orders this level admits before the ladder advances.
    pub max_orders: usize,
    /// Fixed lot for this level when martingale is disabled.
    pub lot_size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSettings {
    /// Martingale multiplier; zero switches to fixed per-level lots.
    pub multiplier: Decimal,
    pub levels: [GridLevel; GRID_LEVELS],
}

impl GridSettings {
    /// Total order budget for one side of the ladder.
    #[must_use]
    pub fn max_orders_per_side(&self) -> usize {
        self.levels.iter().map(|l| l.max_orders).sum()
    }

    /// First level whose cumulative order budget exceeds `count`, clamped to
    /// the last level. The n-th insertion (0-based `count = n - 1`) on a side
    /// lands on `level_for_count(n - 1)`.
    #[must_use]
    pub fn level_for_count(&self, count: usize) -> usize {
        let mut cumulative = 0;
        for (i, level) in self.levels.iter().enumerate() {
            cumulative += level.max_orders;
            if count < cumulative {
                return i;
            }
        }
        GRID_LEVELS - 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySettings {
    pub use_sma_sar: bool,
    pub sma_period: usize,
    pub sar_af: Decimal,
    pub sar_max: Decimal,
    /// Swap the SMA/SAR buy and sell conditions.
    pub reverse_order: bool,
    /// Zero disables the CCI override.
    pub cci_period: usize,
    pub cci_max: Decimal,
    pub cci_min: Decimal,
    pub timeframe: String,
    pub open_on_new_candle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitSettings {
    /// Per-position take profit in percent; zero disables.
    pub single_order_profit: Decimal,
    /// Aggregate percent target across both sides; zero disables.
    pub pair_global_profit: Decimal,
    /// Realized-PnL target that stops the session; zero disables.
    pub global_profit: Decimal,
    /// Realized-loss limit (positive number) that stops the session; zero
    /// disables.
    pub max_loss: Decimal,
    pub trades_per_day: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneySettings {
    pub base_lot: Decimal,
    pub min_lot: Decimal,
    pub max_lot: Decimal,
}

/// UTC trading window. Start and finish of 00:00-23:59 means 24h trading;
/// a finish before the start wraps overnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeFilter {
    pub start_hour: u32,
    pub start_minute: u32,
    pub finish_hour: u32,
    pub finish_minute: u32,
}

impl Default for TimeFilter {
    fn default() -> Self {
        Self {
            start_hour: 0,
            start_minute: 0,
            finish_hour: 23,
            finish_minute: 59,
        }
    }
}

impl TimeFilter {
    #[must_use]
    pub fn is_24h(&self) -> bool {
        self.start_hour == 0
            && self.start_minute == 0
            && self.finish_hour == 23
            && self.finish_minute >= 59
    }

    /// Whether the given UTC time falls inside the trading window.
    #[must_use]
    pub fn allows(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        use chrono::Timelike;

        if self.is_24h() {
            return true;
        }

        let current = now.hour() * 60 + now.minute();
        let start = self.start_hour * 60 + self.start_minute;
        let finish = self.finish_hour * 60 + self.finish_minute;

        if start <= finish {
            (start..=finish).contains(&current)
        } else {
            current >= start || current <= finish
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub tick_interval_ms: u64,
    /// Close all open positions when the session stops.
    pub close_on_stop: bool,
    /// Directory for indicator snapshots; `None` disables persistence.
    pub state_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            close_on_stop: true,
            state_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    pub url: String,
    pub secret: String,
}

/// Complete configuration for one trading session, validated before any
/// engine is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub user_id: String,
    pub user_bot_id: String,
    pub exchange: ExchangeCredentials,
    pub trading: TradingSettings,
    pub grid: GridSettings,
    pub entry: EntrySettings,
    pub profit: ProfitSettings,
    pub money: MoneySettings,
    #[serde(default)]
    pub time_filter: TimeFilter,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub webhook: Option<WebhookSettings>,
}

impl SessionConfig {
    /// Validates the whole configuration, collecting every error instead of
    /// failing on the first. Invalid values are rejected, never coerced.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.user_id.is_empty() {
            errors.push("user_id must not be empty".to_string());
        }
        if self.trading.symbol.is_empty() {
            errors.push("symbol must not be empty".to_string());
        }
        if !(1..=125).contains(&self.trading.leverage) {
            errors.push(format!(
                "leverage {} out of range (1-125)",
                self.trading.leverage
            ));
        }

        if self.grid.multiplier < Decimal::ZERO {
            errors.push("multiplier must not be negative".to_string());
        }
        for (i, level) in self.grid.levels.iter().enumerate() {
            if level.percent <= Decimal::ZERO {
                errors.push(format!("grid level {i}: percent must be positive"));
            }
            if level.max_orders == 0 {
                errors.push(format!("grid level {i}: max_orders must be at least 1"));
            }
            if level.lot_size <= Decimal::ZERO {
                errors.push(format!("grid level {i}: lot_size must be positive"));
            }
        }
        for pair in self.grid.levels.windows(2) {
            if pair[1].percent <= pair[0].percent {
                errors.push(format!(
                    "grid level percents must be strictly increasing ({} then {})",
                    pair[0].percent, pair[1].percent
                ));
                break;
            }
        }

        if !self.entry.use_sma_sar && self.entry.cci_period == 0 {
            errors.push("at least one entry method must be enabled (SMA/SAR or CCI)".to_string());
        }
        if self.entry.use_sma_sar && self.entry.sma_period == 0 {
            errors.push("sma_period must be at least 1".to_string());
        }
        if self.entry.sar_af <= Decimal::ZERO {
            errors.push("sar_af must be positive".to_string());
        }
        if self.entry.sar_af > self.entry.sar_max {
            errors.push(format!(
                "sar_af ({}) must not exceed sar_max ({})",
                self.entry.sar_af, self.entry.sar_max
            ));
        }

        if self.money.min_lot <= Decimal::ZERO {
            errors.push("min_lot must be positive".to_string());
        }
        if self.money.base_lot < self.money.min_lot {
            errors.push(format!(
                "base_lot ({}) below min_lot ({})",
                self.money.base_lot, self.money.min_lot
            ));
        }
        if self.money.base_lot > self.money.max_lot {
            errors.push(format!(
                "base_lot ({}) above max_lot ({})",
                self.money.base_lot, self.money.max_lot
            ));
        }

        if self.time_filter.start_hour > 23 || self.time_filter.finish_hour > 23 {
            errors.push("time filter hours must be 0-23".to_string());
        }
        if self.time_filter.start_minute > 59 || self.time_filter.finish_minute > 59 {
            errors.push("time filter minutes must be 0-59".to_string());
        }

        if self.engine.tick_interval_ms == 0 {
            errors.push("tick_interval_ms must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { errors })
        }
    }
}
