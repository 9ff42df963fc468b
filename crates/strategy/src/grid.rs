use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use grid_hedge_core::config::{SessionConfig, MAX_MARTINGALE_FACTOR};
use grid_hedge_core::indicators::{lwma, CciState, SarState, WeightDirection};
use grid_hedge_core::market::{Candle, ExchangePosition, Side, Signal};

use crate::performance::Performance;

/// One rung of an open ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPosition {
    /// Exchange order id from the opening fill.
    pub id: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub lot: Decimal,
    pub grid_level: usize,
    pub opened_at: DateTime<Utc>,
}

impl GridPosition {
    /// Leveraged PnL in quote units.
    #[must_use]
    pub fn pnl(&self, price: Decimal, leverage: u32) -> Decimal {
        self.pnl_unleveraged(price) * Decimal::from(leverage)
    }

    /// Raw `lot * price_delta` PnL, signed by side.
    #[must_use]
    pub fn pnl_unleveraged(&self, price: Decimal) -> Decimal {
        match self.side {
            Side::Long => (price - self.entry_price) * self.lot,
            Side::Short => (self.entry_price - price) * self.lot,
        }
    }

    /// Percentage move from the entry, signed by side (5 = 5%).
    #[must_use]
    pub fn pnl_percent(&self, price: Decimal) -> Decimal {
        if self.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let change = match self.side {
            Side::Long => price - self.entry_price,
            Side::Short => self.entry_price - price,
        };
        change / self.entry_price * dec!(100)
    }
}

/// Outcome of the profit-target evaluation, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfitDecision {
    None,
    /// Close these positions individually (single-order take profit).
    CloseSingles(Vec<String>),
    /// Close every open position (pair global take profit).
    ClosePair,
    /// Close every open position and stop the session.
    GlobalLimit(GlobalLimitKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalLimitKind {
    Profit,
    Loss,
}

impl GlobalLimitKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Profit => "PROFIT",
            Self::Loss => "LOSS",
        }
    }
}

/// Per-session trading state: dual position ladders, indicator values, and
/// profit bookkeeping. Pure of I/O; the engine executes its decisions
/// through the exchange adapter.
pub struct GridStrategy {
    config: SessionConfig,
    pub buy_positions: Vec<GridPosition>,
    pub sell_positions: Vec<GridPosition>,
    pub performance: Performance,

    sar_state: Option<SarState>,
    cci: CciState,
    sma_value: Decimal,
    last_candle_ts: i64,

    balance: Decimal,
    last_price: Decimal,

    stop_trading: bool,
    today: Option<NaiveDate>,
    today_trades: u32,
}

impl GridStrategy {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            buy_positions: Vec::new(),
            sell_positions: Vec::new(),
            performance: Performance::new(),
            sar_state: None,
            cci: CciState::new(),
            sma_value: Decimal::ZERO,
            last_candle_ts: 0,
            balance: Decimal::ZERO,
            last_price: Decimal::ZERO,
            stop_trading: false,
            today: None,
            today_trades: 0,
        }
    }

    // ------------------------------------------------------------------
    // Market state
    // ------------------------------------------------------------------

    pub fn update_market(&mut self, price: Decimal) {
        self.last_price = price;
        self.performance.unrealized_pnl = self
            .all_positions()
            .map(|p| p.pnl_unleveraged(price))
            .sum();
    }

    pub fn update_balance(&mut self, balance: Decimal) {
        self.balance = balance;
    }

    #[must_use]
    pub fn last_price(&self) -> Decimal {
        self.last_price
    }

    #[must_use]
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    // ------------------------------------------------------------------
    // Indicators
    // ------------------------------------------------------------------

    /// Refreshes indicator values from the candle history.
    ///
    /// The SAR steps once per finalized candle (keyed by the newest candle's
    /// timestamp); the SMA and CCI recompute on every call.
    pub fn update_indicators(&mut self, candles: &[Candle]) {
        if candles.is_empty() {
            return;
        }

        if self.config.entry.use_sma_sar {
            self.sma_value = lwma(
                candles,
                self.config.entry.sma_period,
                WeightDirection::default(),
            );

            let newest_ts = candles[candles.len() - 1].timestamp;
            let new_candle = newest_ts > self.last_candle_ts;
            match self.sar_state {
                None => {
                    self.sar_state = SarState::init(candles, self.config.entry.sar_af);
                    self.last_candle_ts = newest_ts;
                }
                Some(state) if new_candle => {
                    self.sar_state = Some(state.step(
                        candles,
                        self.config.entry.sar_af,
                        self.config.entry.sar_max,
                    ));
                    self.last_candle_ts = newest_ts;
                }
                Some(_) => {}
            }
        }

        if self.config.entry.cci_period > 0 {
            self.cci.update(candles, self.config.entry.cci_period);
        }
    }

    #[must_use]
    pub fn sma(&self) -> Decimal {
        self.sma_value
    }

    #[must_use]
    pub fn sar(&self) -> Decimal {
        self.sar_state.map_or(Decimal::ZERO, |s| s.sar)
    }

    #[must_use]
    pub fn cci_value(&self) -> Decimal {
        self.cci.value()
    }

    #[must_use]
    pub fn sar_state(&self) -> Option<SarState> {
        self.sar_state
    }

    /// Trailing CCI history for persistence, oldest first.
    #[must_use]
    pub fn cci_tail(&self, count: usize) -> Vec<Decimal> {
        self.cci.tail(count)
    }

    /// Restores persisted indicator state from a snapshot.
    pub fn restore_indicators(&mut self, sar: Option<SarState>, cci_history: Vec<Decimal>) {
        self.sar_state = sar;
        self.cci = CciState::from_history(cci_history);
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    /// Evaluates the entry signal from the current indicator values.
    ///
    /// SMA/SAR produce the base direction; an enabled CCI overrides it, but
    /// only on the update where the level was actually crossed.
    #[must_use]
    pub fn evaluate_signal(&self) -> Signal {
        let mut signal = Signal::Neutral;

        if self.config.entry.use_sma_sar {
            let sma = self.sma_value;
            let sar = self.sar();
            if !sma.is_zero() && !sar.is_zero() {
                signal = if sar > sma {
                    Signal::Buy
                } else if sar < sma {
                    Signal::Sell
                } else {
                    Signal::Neutral
                };
                if self.config.entry.reverse_order {
                    signal = match signal {
                        Signal::Buy => Signal::Sell,
                        Signal::Sell => Signal::Buy,
                        Signal::Neutral => Signal::Neutral,
                    };
                }
            }
        }

        if self.config.entry.cci_period > 0 {
            if self.cci.crossed_above(self.config.entry.cci_max) {
                signal = Signal::Sell;
            } else if self.cci.crossed_below(self.config.entry.cci_min) {
                signal = Signal::Buy;
            }
        }

        signal
    }

    // ------------------------------------------------------------------
    // Grid logic
    // ------------------------------------------------------------------

    #[must_use]
    pub fn side_positions(&self, side: Side) -> &[GridPosition] {
        match side {
            Side::Long => &self.buy_positions,
            Side::Short => &self.sell_positions,
        }
    }

    pub fn all_positions(&self) -> impl Iterator<Item = &GridPosition> {
        self.buy_positions.iter().chain(self.sell_positions.iter())
    }

    #[must_use]
    pub fn total_positions(&self) -> usize {
        self.buy_positions.len() + self.sell_positions.len()
    }

    /// Grid level the next insertion on `side` would land on.
    #[must_use]
    pub fn level_for_next(&self, side: Side) -> usize {
        self.config
            .grid
            .level_for_count(self.side_positions(side).len())
    }

    /// Whether a new order may open on `side` at `price`, and with what lot.
    ///
    /// An empty side is always allowed its base entry lot; a populated side
    /// must breach the current level's adverse trigger distance and stay
    /// within the order budget.
    #[must_use]
    pub fn can_add_grid_order(&self, side: Side, price: Decimal) -> Option<Decimal> {
        let positions = self.side_positions(side);
        if positions.is_empty() {
            return Some(self.calc_lot(0));
        }

        let per_side = self.config.grid.max_orders_per_side();
        if positions.len() >= per_side || self.total_positions() >= 2 * per_side {
            return None;
        }

        let level = self.config.grid.level_for_count(positions.len());
        let distance = self.config.grid.levels[level].percent;

        let (anchor, trigger_hit) = match side {
            Side::Long => {
                let lowest = positions.iter().map(|p| p.entry_price).min()?;
                let trigger = lowest * (Decimal::ONE - distance / dec!(100));
                (trigger, price <= trigger)
            }
            Side::Short => {
                let highest = positions.iter().map(|p| p.entry_price).max()?;
                let trigger = highest * (Decimal::ONE + distance / dec!(100));
                (trigger, price >= trigger)
            }
        };

        if trigger_hit {
            debug!(side = ?side, trigger = %anchor, %price, "grid trigger breached");
            Some(self.calc_lot(positions.len()))
        } else {
            None
        }
    }

    /// Lot for the n-th order on a side (0-based).
    ///
    /// Martingale mode scales the base lot by `multiplier^n` with a hard cap
    /// on the factor and a balance-derived safety ceiling; fixed mode takes
    /// the lot from the grid level. Either way the result is clamped to the
    /// configured lot bounds.
    #[must_use]
    pub fn calc_lot(&self, n: usize) -> Decimal {
        let money = &self.config.money;
        let lot = if self.config.grid.multiplier > Decimal::ZERO {
            let mut factor = Decimal::ONE;
            for _ in 0..n {
                factor = (factor * self.config.grid.multiplier).min(MAX_MARTINGALE_FACTOR);
            }
            let mut lot = money.base_lot * factor;
            if self.balance > Decimal::ZERO && self.last_price > Decimal::ZERO {
                let ceiling = self.balance * dec!(0.1)
                    / (Decimal::from(self.config.trading.leverage) * self.last_price);
                lot = lot.min(ceiling);
            }
            lot
        } else {
            let level = self.config.grid.level_for_count(n);
            self.config.grid.levels[level].lot_size
        };
        lot.clamp(money.min_lot, money.max_lot)
    }

    // ------------------------------------------------------------------
    // Position management
    // ------------------------------------------------------------------

    pub fn add_position(
        &mut self,
        side: Side,
        id: String,
        entry_price: Decimal,
        lot: Decimal,
        grid_level: usize,
    ) -> GridPosition {
        let position = GridPosition {
            id,
            side,
            entry_price,
            lot,
            grid_level,
            opened_at: Utc::now(),
        };
        info!(
            side = position.side.order_side(),
            lot = %position.lot,
            price = %position.entry_price,
            level = position.grid_level,
            "position added"
        );
        self.performance.total_trades += 1;
        match side {
            Side::Long => self.buy_positions.push(position.clone()),
            Side::Short => self.sell_positions.push(position.clone()),
        }
        position
    }

    /// Removes a position by id from whichever ladder holds it.
    pub fn remove_position(&mut self, id: &str) -> Option<GridPosition> {
        if let Some(idx) = self.buy_positions.iter().position(|p| p.id == id) {
            return Some(self.buy_positions.remove(idx));
        }
        if let Some(idx) = self.sell_positions.iter().position(|p| p.id == id) {
            return Some(self.sell_positions.remove(idx));
        }
        None
    }

    #[must_use]
    pub fn find_position(&self, id: &str) -> Option<&GridPosition> {
        self.all_positions().find(|p| p.id == id)
    }

    /// Books the realized PnL of one closed position.
    pub fn record_close(&mut self, realized: Decimal) {
        self.performance.record_close(realized);
    }

    /// Leveraged mark-to-market PnL of one side.
    #[must_use]
    pub fn side_pnl(&self, side: Side, price: Decimal) -> Decimal {
        self.side_positions(side)
            .iter()
            .map(|p| p.pnl(price, self.config.trading.leverage))
            .sum()
    }

    #[must_use]
    pub fn average_entry(&self, side: Side) -> Decimal {
        let positions = self.side_positions(side);
        let total_lot: Decimal = positions.iter().map(|p| p.lot).sum();
        if total_lot.is_zero() {
            return Decimal::ZERO;
        }
        let value: Decimal = positions.iter().map(|p| p.entry_price * p.lot).sum();
        value / total_lot
    }

    #[must_use]
    pub fn total_lots(&self, side: Side) -> Decimal {
        self.side_positions(side).iter().map(|p| p.lot).sum()
    }

    // ------------------------------------------------------------------
    // Profit taking
    // ------------------------------------------------------------------

    /// Profit-target evaluation in strict priority order; the first rule
    /// that fires wins.
    #[must_use]
    pub fn check_profit_targets(&self, price: Decimal) -> ProfitDecision {
        let profit = &self.config.profit;

        // 1. Single-order take profit, per position.
        if profit.single_order_profit > Decimal::ZERO {
            let ids: Vec<String> = self
                .all_positions()
                .filter(|p| p.pnl_percent(price) >= profit.single_order_profit)
                .map(|p| p.id.clone())
                .collect();
            if !ids.is_empty() {
                return ProfitDecision::CloseSingles(ids);
            }
        }

        // 2. Pair global take profit over the aggregate percent. A single
        // open position is already covered by rule 1.
        if profit.pair_global_profit > Decimal::ZERO && self.total_positions() >= 2 {
            let aggregate: Decimal = self.all_positions().map(|p| p.pnl_percent(price)).sum();
            if aggregate >= profit.pair_global_profit {
                return ProfitDecision::ClosePair;
            }
        }

        // 3. Global profit target on realized PnL.
        if profit.global_profit > Decimal::ZERO
            && self.performance.realized_pnl >= profit.global_profit
        {
            return ProfitDecision::GlobalLimit(GlobalLimitKind::Profit);
        }

        // 4. Maximum loss on realized PnL.
        if profit.max_loss > Decimal::ZERO && self.performance.realized_pnl <= -profit.max_loss {
            return ProfitDecision::GlobalLimit(GlobalLimitKind::Loss);
        }

        ProfitDecision::None
    }

    // ------------------------------------------------------------------
    // Exchange sync
    // ------------------------------------------------------------------

    /// Replaces the local ladders with the exchange's reported positions.
    ///
    /// Grid levels are re-derived from entry-price adversity (longs from the
    /// highest entry down, shorts from the lowest up), so a manual external
    /// close cannot leave the ladder on a stale level. Known ids keep their
    /// original open timestamps.
    pub fn sync_from_exchange(&mut self, positions: Vec<ExchangePosition>, _last_price: Decimal) {
        let opened_at_by_id: std::collections::HashMap<String, DateTime<Utc>> = self
            .all_positions()
            .map(|p| (p.id.clone(), p.opened_at))
            .collect();

        let mut longs: Vec<ExchangePosition> = Vec::new();
        let mut shorts: Vec<ExchangePosition> = Vec::new();
        for position in positions {
            if position.qty <= Decimal::ZERO {
                continue;
            }
            match position.side {
                Side::Long => longs.push(position),
                Side::Short => shorts.push(position),
            }
        }

        // Ladder order: least adverse entry first.
        longs.sort_by(|a, b| b.avg_entry.cmp(&a.avg_entry));
        shorts.sort_by(|a, b| a.avg_entry.cmp(&b.avg_entry));

        let rebuild = |side: Side, source: Vec<ExchangePosition>, grid: &grid_hedge_core::config::GridSettings| {
            source
                .into_iter()
                .enumerate()
                .map(|(i, p)| GridPosition {
                    opened_at: opened_at_by_id.get(&p.id).copied().unwrap_or_else(Utc::now),
                    id: p.id,
                    side,
                    entry_price: p.avg_entry,
                    lot: p.qty,
                    grid_level: grid.level_for_count(i),
                })
                .collect::<Vec<_>>()
        };

        let before = self.total_positions();
        self.buy_positions = rebuild(Side::Long, longs, &self.config.grid);
        self.sell_positions = rebuild(Side::Short, shorts, &self.config.grid);

        if self.total_positions() != before {
            warn!(
                before,
                after = self.total_positions(),
                "position count changed during exchange sync"
            );
        }
    }

    // ------------------------------------------------------------------
    // Trading state
    // ------------------------------------------------------------------

    pub fn request_stop(&mut self) {
        self.stop_trading = true;
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_trading
    }

    /// Daily entry budget with UTC day rollover.
    pub fn can_trade_today(&mut self) -> bool {
        let today = Utc::now().date_naive();
        if self.today != Some(today) {
            self.today = Some(today);
            self.today_trades = 0;
        }
        self.today_trades < self.config.profit.trades_per_day
    }

    pub fn record_entry_today(&mut self) {
        self.today_trades += 1;
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_hedge_core::config::{
        EngineSettings, EntrySettings, ExchangeCredentials, GridLevel, GridSettings,
        MoneySettings, ProfitSettings, TimeFilter, TradingSettings,
    };

    fn config(multiplier: Decimal, base_lot: Decimal) -> SessionConfig {
        SessionConfig {
            user_id: "user-1".into(),
            user_bot_id: "bot-1".into(),
            exchange: ExchangeCredentials {
                api_key: "k".into(),
                api_secret: "s".into(),
                passphrase: "p".into(),
                demo: true,
            },
            trading: TradingSettings {
                symbol: "BTCUSDT".into(),
                leverage: 1,
            },
            grid: GridSettings {
                multiplier,
                levels: [
                    GridLevel {
                        percent: dec!(0.5),
                        max_orders: 5,
                        lot_size: dec!(0.001),
                    },
                    GridLevel {
                        percent: dec!(1),
                        max_orders: 5,
                        lot_size: dec!(0.002),
                    },
                    GridLevel {
                        percent: dec!(2),
                        max_orders: 5,
                        lot_size: dec!(0.003),
                    },
                    GridLevel {
                        percent: dec!(3),
                        max_orders: 5,
                        lot_size: dec!(0.004),
                    },
                ],
            },
            entry: EntrySettings {
                use_sma_sar: true,
                sma_period: 5,
                sar_af: dec!(0.1),
                sar_max: dec!(0.8),
                reverse_order: false,
                cci_period: 0,
                cci_max: dec!(100),
                cci_min: dec!(-100),
                timeframe: "1H".into(),
                open_on_new_candle: true,
            },
            profit: ProfitSettings {
                single_order_profit: dec!(3.0),
                pair_global_profit: dec!(1.0),
                global_profit: Decimal::ZERO,
                max_loss: Decimal::ZERO,
                trades_per_day: 99,
            },
            money: MoneySettings {
                base_lot,
                min_lot: dec!(0.001),
                max_lot: dec!(50),
            },
            time_filter: TimeFilter::default(),
            engine: EngineSettings::default(),
            webhook: None,
        }
    }

    fn strategy_with(multiplier: Decimal) -> GridStrategy {
        let mut strategy = GridStrategy::new(config(multiplier, dec!(0.001)));
        strategy.update_balance(dec!(10000));
        strategy.update_market(dec!(100));
        strategy
    }

    fn open(strategy: &mut GridStrategy, side: Side, id: &str, price: Decimal, lot: Decimal) {
        let level = strategy.level_for_next(side);
        strategy.add_position(side, id.into(), price, lot, level);
    }

    // ==================== Lot sizing ====================

    #[test]
    fn martingale_lots_follow_the_multiplier_and_cap() {
        let strategy = strategy_with(dec!(2));
        // multiplier^n capped at 10: 1, 2, 4, 8, 10, 10.
        let expected = [
            dec!(0.001),
            dec!(0.002),
            dec!(0.004),
            dec!(0.008),
            dec!(0.010),
            dec!(0.010),
        ];
        for (n, want) in expected.iter().enumerate() {
            assert_eq!(strategy.calc_lot(n), *want, "lot for n={n}");
        }
    }

    #[test]
    fn fixed_mode_uses_per_level_lots() {
        let strategy = strategy_with(Decimal::ZERO);
        assert_eq!(strategy.calc_lot(0), dec!(0.001));
        assert_eq!(strategy.calc_lot(4), dec!(0.001)); // still level 0
        assert_eq!(strategy.calc_lot(5), dec!(0.002)); // level 1
        assert_eq!(strategy.calc_lot(10), dec!(0.003));
        assert_eq!(strategy.calc_lot(15), dec!(0.004));
    }

    #[test]
    fn martingale_lot_respects_balance_ceiling() {
        let mut strategy = strategy_with(dec!(2));
        // ceiling = 10 * 0.1 / (1 * 100) = 0.01, exactly the capped lot
        strategy.update_balance(dec!(10));
        assert_eq!(strategy.calc_lot(5), dec!(0.01));
        // A tighter balance clamps below the martingale lot, then min_lot wins.
        strategy.update_balance(dec!(0.5));
        assert_eq!(strategy.calc_lot(5), dec!(0.001));
    }

    #[test]
    fn lots_always_sit_inside_the_bounds() {
        let strategy = strategy_with(dec!(3));
        for n in 0..30 {
            let lot = strategy.calc_lot(n);
            assert!(lot >= dec!(0.001) && lot <= dec!(50), "lot {lot} for n={n}");
        }
    }

    // ==================== Grid additions ====================

    #[test]
    fn empty_side_gets_the_base_entry_lot() {
        let strategy = strategy_with(Decimal::ZERO);
        assert_eq!(
            strategy.can_add_grid_order(Side::Long, dec!(100)),
            Some(dec!(0.001))
        );
    }

    #[test]
    fn long_grid_triggers_on_the_adverse_move() {
        let mut strategy = strategy_with(Decimal::ZERO);
        open(&mut strategy, Side::Long, "ord-1", dec!(100), dec!(0.001));

        // 0.5% below 100 is the level-0 trigger.
        assert_eq!(strategy.can_add_grid_order(Side::Long, dec!(99.6)), None);
        assert_eq!(
            strategy.can_add_grid_order(Side::Long, dec!(99.5)),
            Some(dec!(0.001))
        );
    }

    #[test]
    fn short_grid_triggers_above_the_highest_entry() {
        let mut strategy = strategy_with(Decimal::ZERO);
        open(&mut strategy, Side::Short, "ord-1", dec!(100), dec!(0.001));

        assert_eq!(strategy.can_add_grid_order(Side::Short, dec!(100.4)), None);
        assert_eq!(
            strategy.can_add_grid_order(Side::Short, dec!(100.5)),
            Some(dec!(0.001))
        );
    }

    #[test]
    fn trigger_anchors_to_the_most_adverse_entry() {
        let mut strategy = strategy_with(Decimal::ZERO);
        open(&mut strategy, Side::Long, "ord-1", dec!(100), dec!(0.001));
        open(&mut strategy, Side::Long, "ord-2", dec!(99.5), dec!(0.001));

        // Next trigger hangs off 99.5, not 100.
        let trigger = dec!(99.5) * (Decimal::ONE - dec!(0.005));
        assert_eq!(strategy.can_add_grid_order(Side::Long, trigger + dec!(0.01)), None);
        assert!(strategy.can_add_grid_order(Side::Long, trigger).is_some());
    }

    #[test]
    fn side_budget_caps_the_ladder() {
        let mut strategy = strategy_with(Decimal::ZERO);
        for i in 0..20 {
            open(
                &mut strategy,
                Side::Long,
                &format!("ord-{i}"),
                dec!(100) - Decimal::from(i as u64),
                dec!(0.001),
            );
        }
        // 20 = sum of max_orders per side; deeply adverse price changes nothing.
        assert_eq!(strategy.can_add_grid_order(Side::Long, dec!(1)), None);
        assert!(strategy.total_positions() <= 2 * strategy.config().grid.max_orders_per_side());
    }

    #[test]
    fn insertion_levels_walk_the_ladder() {
        let mut strategy = strategy_with(Decimal::ZERO);
        let mut levels = Vec::new();
        for i in 0..7 {
            let level = strategy.level_for_next(Side::Long);
            levels.push(level);
            open(
                &mut strategy,
                Side::Long,
                &format!("ord-{i}"),
                dec!(100),
                dec!(0.001),
            );
        }
        assert_eq!(levels, vec![0, 0, 0, 0, 0, 1, 1]);
    }

    // ==================== Profit targets ====================

    #[test]
    fn single_order_tp_fires_per_position() {
        let mut strategy = strategy_with(Decimal::ZERO);
        open(&mut strategy, Side::Long, "ord-1", dec!(100), dec!(0.001));

        // +3.1% crosses the 3.0% target.
        match strategy.check_profit_targets(dec!(103.1)) {
            ProfitDecision::CloseSingles(ids) => assert_eq!(ids, vec!["ord-1".to_string()]),
            other => panic!("expected CloseSingles, got {other:?}"),
        }
        assert_eq!(
            strategy.check_profit_targets(dec!(102.9)),
            ProfitDecision::None
        );
    }

    #[test]
    fn pair_global_tp_sums_percents_across_sides() {
        let mut strategy = strategy_with(Decimal::ZERO);
        open(&mut strategy, Side::Long, "buy-1", dec!(99.4), dec!(0.001));
        open(&mut strategy, Side::Short, "sell-1", dec!(100.5), dec!(0.001));

        // At 100: long +0.6036%, short +0.4975% -- aggregate above 1.0%.
        assert_eq!(
            strategy.check_profit_targets(dec!(100)),
            ProfitDecision::ClosePair
        );
    }

    #[test]
    fn pair_global_tp_needs_two_positions() {
        let mut strategy = strategy_with(Decimal::ZERO);
        open(&mut strategy, Side::Long, "buy-1", dec!(99), dec!(0.001));
        // +1.01% on one position: rule 1 target is 3%, rule 2 needs >= 2.
        assert_eq!(
            strategy.check_profit_targets(dec!(100)),
            ProfitDecision::None
        );
    }

    #[test]
    fn global_profit_fires_on_realized_pnl() {
        let mut config = config(Decimal::ZERO, dec!(0.001));
        config.profit.global_profit = dec!(100);
        let mut strategy = GridStrategy::new(config);
        strategy.update_market(dec!(100));

        strategy.performance.realized_pnl = dec!(99.9);
        assert_eq!(
            strategy.check_profit_targets(dec!(100)),
            ProfitDecision::None
        );

        strategy.performance.realized_pnl = dec!(100);
        assert_eq!(
            strategy.check_profit_targets(dec!(100)),
            ProfitDecision::GlobalLimit(GlobalLimitKind::Profit)
        );
    }

    #[test]
    fn max_loss_fires_on_negative_realized_pnl() {
        let mut config = config(Decimal::ZERO, dec!(0.001));
        config.profit.max_loss = dec!(50);
        let mut strategy = GridStrategy::new(config);

        strategy.performance.realized_pnl = dec!(-49);
        assert_eq!(
            strategy.check_profit_targets(dec!(100)),
            ProfitDecision::None
        );

        strategy.performance.realized_pnl = dec!(-50);
        assert_eq!(
            strategy.check_profit_targets(dec!(100)),
            ProfitDecision::GlobalLimit(GlobalLimitKind::Loss)
        );
    }

    #[test]
    fn disabled_targets_never_fire() {
        let mut config = config(Decimal::ZERO, dec!(0.001));
        config.profit.single_order_profit = Decimal::ZERO;
        config.profit.pair_global_profit = Decimal::ZERO;
        let mut strategy = GridStrategy::new(config);
        strategy.add_position(Side::Long, "ord-1".into(), dec!(100), dec!(0.001), 0);

        assert_eq!(
            strategy.check_profit_targets(dec!(200)),
            ProfitDecision::None
        );
    }

    // ==================== Exchange sync ====================

    fn exchange_position(id: &str, side: Side, entry: Decimal, qty: Decimal) -> ExchangePosition {
        ExchangePosition {
            id: id.into(),
            side,
            avg_entry: entry,
            qty,
            unrealized_pnl: Decimal::ZERO,
            leverage: 1,
        }
    }

    #[test]
    fn sync_replaces_local_state_with_the_exchange_view() {
        let mut strategy = strategy_with(Decimal::ZERO);
        open(&mut strategy, Side::Long, "stale-1", dec!(101), dec!(0.001));

        strategy.sync_from_exchange(
            vec![
                exchange_position("ex-1", Side::Long, dec!(100), dec!(0.001)),
                exchange_position("ex-2", Side::Short, dec!(102), dec!(0.002)),
            ],
            dec!(100),
        );

        let buy_ids: Vec<&str> = strategy.buy_positions.iter().map(|p| p.id.as_str()).collect();
        let sell_ids: Vec<&str> = strategy.sell_positions.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(buy_ids, vec!["ex-1"]);
        assert_eq!(sell_ids, vec!["ex-2"]);
    }

    #[test]
    fn sync_orders_longs_by_descending_entry_for_levels() {
        let mut config = config(Decimal::ZERO, dec!(0.001));
        config.grid.levels[0].max_orders = 1;
        config.grid.levels[1].max_orders = 1;
        config.grid.levels[2].max_orders = 1;
        let mut strategy = GridStrategy::new(config);

        strategy.sync_from_exchange(
            vec![
                exchange_position("low", Side::Long, dec!(98), dec!(0.001)),
                exchange_position("high", Side::Long, dec!(100), dec!(0.001)),
                exchange_position("mid", Side::Long, dec!(99), dec!(0.001)),
            ],
            dec!(97),
        );

        let order: Vec<(&str, usize)> = strategy
            .buy_positions
            .iter()
            .map(|p| (p.id.as_str(), p.grid_level))
            .collect();
        assert_eq!(order, vec![("high", 0), ("mid", 1), ("low", 2)]);
    }

    #[test]
    fn sync_drops_zero_quantity_positions() {
        let mut strategy = strategy_with(Decimal::ZERO);
        strategy.sync_from_exchange(
            vec![exchange_position("ex-1", Side::Long, dec!(100), Decimal::ZERO)],
            dec!(100),
        );
        assert_eq!(strategy.total_positions(), 0);
    }

    // ==================== Signals ====================

    fn candle(ts: i64, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high,
            low,
            close,
            volume: dec!(1),
        }
    }

    fn falling_candles() -> Vec<Candle> {
        (0..6)
            .map(|i| {
                let base = dec!(110) - Decimal::from(2 * i as u64);
                candle(i as i64 * 3_600_000, base + dec!(1), base - dec!(1), base)
            })
            .collect()
    }

    #[test]
    fn downtrend_sar_above_sma_signals_buy() {
        let mut strategy = strategy_with(Decimal::ZERO);
        strategy.update_indicators(&falling_candles());
        // Falling closes seed a downtrend: SAR sits on the window high,
        // above the weighted-price SMA.
        assert!(strategy.sar() > strategy.sma());
        assert_eq!(strategy.evaluate_signal(), Signal::Buy);
    }

    #[test]
    fn reverse_order_flips_the_signal() {
        let mut config = config(Decimal::ZERO, dec!(0.001));
        config.entry.reverse_order = true;
        let mut strategy = GridStrategy::new(config);
        strategy.update_indicators(&falling_candles());
        assert_eq!(strategy.evaluate_signal(), Signal::Sell);
    }

    #[test]
    fn neutral_before_indicators_warm_up() {
        let strategy = strategy_with(Decimal::ZERO);
        assert_eq!(strategy.evaluate_signal(), Signal::Neutral);
    }

    #[test]
    fn cci_crossing_overrides_sma_sar() {
        let mut config = config(Decimal::ZERO, dec!(0.001));
        config.entry.cci_period = 3;
        let mut strategy = GridStrategy::new(config);

        strategy.update_indicators(&falling_candles());
        let base_signal = strategy.evaluate_signal();
        assert_eq!(base_signal, Signal::Buy);

        // Force a crossing above cci_max: a flat run then a spike.
        strategy.restore_indicators(strategy.sar_state(), vec![dec!(50)]);
        let mut candles = falling_candles();
        let spike_base = dec!(130);
        candles.push(candle(
            6 * 3_600_000,
            spike_base + dec!(1),
            spike_base - dec!(1),
            spike_base,
        ));
        strategy.update_indicators(&candles);
        assert!(strategy.cci_value() >= dec!(100));
        assert_eq!(strategy.evaluate_signal(), Signal::Sell);
    }

    #[test]
    fn sar_steps_only_on_new_candles() {
        let mut strategy = strategy_with(Decimal::ZERO);
        let candles = falling_candles();
        strategy.update_indicators(&candles);
        let first = strategy.sar_state();
        // Same candle set again: the SAR must not advance.
        strategy.update_indicators(&candles);
        assert_eq!(strategy.sar_state(), first);
    }

    // ==================== Daily limit ====================

    #[test]
    fn daily_entry_budget_is_enforced() {
        let mut config = config(Decimal::ZERO, dec!(0.001));
        config.profit.trades_per_day = 2;
        let mut strategy = GridStrategy::new(config);

        assert!(strategy.can_trade_today());
        strategy.record_entry_today();
        assert!(strategy.can_trade_today());
        strategy.record_entry_today();
        assert!(!strategy.can_trade_today());
    }

    // ==================== PnL ====================

    #[test]
    fn position_pnl_is_signed_by_side_and_scaled_by_leverage() {
        let long = GridPosition {
            id: "l".into(),
            side: Side::Long,
            entry_price: dec!(100),
            lot: dec!(0.001),
            grid_level: 0,
            opened_at: Utc::now(),
        };
        assert_eq!(long.pnl(dec!(103.1), 100), dec!(0.31));
        assert_eq!(long.pnl_percent(dec!(103.1)), dec!(3.1));

        let short = GridPosition {
            side: Side::Short,
            ..long.clone()
        };
        assert_eq!(short.pnl(dec!(103.1), 100), dec!(-0.31));
    }

    #[test]
    fn unrealized_pnl_refreshes_with_the_market() {
        let mut strategy = strategy_with(Decimal::ZERO);
        open(&mut strategy, Side::Long, "ord-1", dec!(100), dec!(0.01));
        strategy.update_market(dec!(110));
        assert_eq!(strategy.performance.unrealized_pnl, dec!(0.1));
    }
}
