use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use grid_hedge_core::config::SessionConfig;
use grid_hedge_core::error::ExchangeError;
use grid_hedge_core::events::{
    BalanceWarning, ClosedTrade, ErrorDetail, ErrorOccurred, GlobalLimitHit, GridReport,
    IndicatorReport, OpenedTrade, PerformanceReport, PositionReport, PositionsReport,
    ProfitReport, RuntimeReport, SessionEvent, StatusChanged, StatusSnapshot, TradeClosed,
    TradeOpened,
};
use grid_hedge_core::market::{Candle, Side};
use grid_hedge_core::traits::{EventSink, ExchangeAdapter};
use grid_hedge_strategy::{GlobalLimitKind, GridPosition, GridStrategy, ProfitDecision};

use crate::candle_cache::CandleCache;
use crate::commands::{SessionCommand, SessionState, SessionStatus};
use crate::persistence::{IndicatorPersistence, IndicatorSnapshot, CCI_TAIL};

/// Balance refresh cadence, in ticks.
const BALANCE_UPDATE_INTERVAL: u64 = 5;

/// Exchange position reconciliation cadence, in ticks.
const SYNC_INTERVAL: u64 = 30;

/// Status snapshot emission cadence, in ticks.
const STATUS_INTERVAL: u64 = 5;

/// Indicator snapshot persistence cadence, in ticks.
const SNAPSHOT_INTERVAL: u64 = 60;

/// Candles requested per refresh.
const CANDLE_FETCH_COUNT: usize = 100;

/// Consecutive balance-fetch failures before the staleness warning.
const STALE_BALANCE_WARN_AFTER: u32 = 3;

/// Margin buffer applied to the pre-open balance check.
const MARGIN_BUFFER: Decimal = dec!(1.1);

/// Per-session trading engine.
///
/// One engine runs as one task: a command mailbox multiplexed with the tick
/// interval. Ticks are strictly serial; a new tick never starts before the
/// previous one finishes, and stop requests take effect at the loop head.
pub struct SessionEngine {
    config: SessionConfig,
    adapter: Arc<dyn ExchangeAdapter>,
    sink: Arc<dyn EventSink>,
    strategy: GridStrategy,
    cache: CandleCache,
    rx: mpsc::Receiver<SessionCommand>,
    persistence: Option<IndicatorPersistence>,

    state: SessionState,
    tick_count: u64,
    last_price: Decimal,
    balance: Decimal,
    stale_balance_ticks: u32,
    last_bar_time: i64,
    started_at: Option<DateTime<Utc>>,
    last_trade_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl SessionEngine {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        adapter: Arc<dyn ExchangeAdapter>,
        sink: Arc<dyn EventSink>,
        rx: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let persistence = config
            .engine
            .state_dir
            .as_deref()
            .map(|dir| IndicatorPersistence::for_session(dir, &config.user_id));
        let strategy = GridStrategy::new(config.clone());
        Self {
            config,
            adapter,
            sink,
            strategy,
            cache: CandleCache::new(),
            rx,
            persistence,
            state: SessionState::Idle,
            tick_count: 0,
            last_price: Decimal::ZERO,
            balance: Decimal::ZERO,
            stale_balance_ticks: 0,
            last_bar_time: 0,
            started_at: None,
            last_trade_at: None,
            error: None,
        }
    }

    /// Runs the engine until shutdown. Consumes the engine; the registry
    /// spawns this as the session's task.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.engine.tick_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(SessionCommand::Start) => {
                        if let Err(e) = self.start().await {
                            self.fail(format!("start failed: {e}")).await;
                        }
                    }
                    Some(SessionCommand::Stop) => self.stop("Trading stopped").await,
                    Some(SessionCommand::GetStatus(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    Some(SessionCommand::ForceClosePositions(reply)) => {
                        let closed = self.close_all_positions("MANUAL_CLOSE").await;
                        let _ = reply.send(closed);
                    }
                    Some(SessionCommand::Shutdown) | None => {
                        if matches!(self.state, SessionState::Running | SessionState::Starting) {
                            self.stop("Session shutting down").await;
                        }
                        break;
                    }
                },
                _ = ticker.tick(), if self.state == SessionState::Running => {
                    if self.strategy.should_stop() {
                        self.stop("Trading halted by limits").await;
                        continue;
                    }
                    if let Err(e) = self.tick().await {
                        self.fail(format!("exchange rejected credentials: {e}")).await;
                    }
                }
            }
        }

        info!(user_id = %self.config.user_id, "session task exited");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Transitions Idle -> Starting -> Running: restores persisted indicator
    /// state, refreshes the balance, and reconciles positions from the
    /// exchange.
    ///
    /// # Errors
    /// Returns authentication-class errors; everything else degrades with a
    /// warning.
    pub async fn start(&mut self) -> Result<(), ExchangeError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Running | SessionState::Starting => return Ok(()),
            terminal => {
                warn!(
                    user_id = %self.config.user_id,
                    state = terminal.as_str(),
                    "start ignored; session must be re-created"
                );
                return Ok(());
            }
        }

        self.state = SessionState::Starting;
        info!(user_id = %self.config.user_id, symbol = %self.config.trading.symbol, "session starting");

        if let Some(persistence) = &self.persistence {
            match persistence.load() {
                Ok(Some(snapshot)) => {
                    self.strategy
                        .restore_indicators(snapshot.sar, snapshot.cci_history);
                    info!(user_id = %self.config.user_id, "indicator state restored");
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to load indicator snapshot"),
            }
        }

        let symbol = self.config.trading.symbol.clone();
        match self.adapter.get_balance(&symbol).await {
            Ok(balance) => {
                self.balance = balance;
                self.strategy.update_balance(balance);
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => warn!(error = %e, "initial balance fetch failed"),
        }

        match self.adapter.get_ticker(&symbol).await {
            Ok(price) => {
                self.last_price = price;
                self.strategy.update_market(price);
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => warn!(error = %e, "initial ticker fetch failed"),
        }

        match self.adapter.get_positions(&symbol).await {
            Ok(positions) => self.strategy.sync_from_exchange(positions, self.last_price),
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => warn!(error = %e, "initial position sync failed"),
        }

        self.started_at = Some(Utc::now());
        self.tick_count = 0;
        let previous = SessionState::Idle;
        self.state = SessionState::Running;
        self.emit_status_changed(previous, "Trading started").await;
        Ok(())
    }

    /// Cooperative stop: Running/Starting -> Stopping -> Stopped. Idempotent.
    pub async fn stop(&mut self, reason: &str) {
        if !matches!(self.state, SessionState::Running | SessionState::Starting) {
            return;
        }
        let previous = self.state;
        self.state = SessionState::Stopping;
        info!(user_id = %self.config.user_id, reason, "session stopping");

        if self.config.engine.close_on_stop && self.strategy.total_positions() > 0 {
            self.close_all_positions("SESSION_STOP").await;
        }
        self.save_indicators();

        self.state = SessionState::Stopped;
        self.emit_status_changed(previous, reason).await;
        info!(user_id = %self.config.user_id, "session stopped");
    }

    async fn fail(&mut self, message: String) {
        error!(user_id = %self.config.user_id, "session error: {message}");
        let previous = self.state;
        self.state = SessionState::Error;
        self.error = Some(message.clone());
        self.sink
            .emit(SessionEvent::ErrorOccurred(ErrorOccurred {
                error: ErrorDetail {
                    code: "SESSION_ERROR".to_string(),
                    message,
                    severity: "high".to_string(),
                },
            }))
            .await;
        self.sink
            .emit(SessionEvent::StatusChanged(StatusChanged {
                previous_status: previous.as_str().to_string(),
                new_status: SessionState::Error.as_str().to_string(),
                reason: "Session error".to_string(),
            }))
            .await;
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// One trading tick. Transient adapter failures warn and continue; only
    /// authentication failures propagate (and terminate the session).
    pub async fn tick(&mut self) -> Result<(), ExchangeError> {
        self.tick_count += 1;
        let symbol = self.config.trading.symbol.clone();

        // Market price first; without it nothing else is meaningful.
        match self.adapter.get_ticker(&symbol).await {
            Ok(price) => {
                self.last_price = price;
                self.strategy.update_market(price);
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                warn!(error = %e, "ticker fetch failed, skipping tick");
                return Ok(());
            }
        }

        // Periodic balance refresh; a failure keeps the last known value.
        if self.tick_count % BALANCE_UPDATE_INTERVAL == 0 {
            match self.adapter.get_balance(&symbol).await {
                Ok(balance) => {
                    self.balance = balance;
                    self.strategy.update_balance(balance);
                    self.stale_balance_ticks = 0;
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    self.stale_balance_ticks += 1;
                    if self.stale_balance_ticks >= STALE_BALANCE_WARN_AFTER {
                        warn!(
                            stale_intervals = self.stale_balance_ticks,
                            error = %e,
                            "balance is stale, still using last known value"
                        );
                    }
                }
            }
        }

        // Periodic position reconciliation.
        if self.tick_count % SYNC_INTERVAL == 0 {
            self.sync_positions().await?;
        }

        // Candles and indicators.
        let candles = self
            .cache
            .get(
                self.adapter.as_ref(),
                &symbol,
                &self.config.entry.timeframe,
                CANDLE_FETCH_COUNT,
            )
            .await;
        let is_new_bar = self.is_new_bar(&candles);
        self.strategy.update_indicators(&candles);

        let in_window = self.config.time_filter.allows(Utc::now());
        if in_window {
            // Initial entries: on a fresh bar, or whenever a side is empty.
            let evaluate = (self.config.entry.open_on_new_candle && is_new_bar)
                || self.strategy.buy_positions.is_empty()
                || self.strategy.sell_positions.is_empty();
            if evaluate {
                self.check_initial_entries().await?;
            }

            // Grid additions on populated sides.
            for side in [Side::Long, Side::Short] {
                if self.strategy.side_positions(side).is_empty() {
                    continue;
                }
                if let Some(lot) = self.strategy.can_add_grid_order(side, self.last_price) {
                    self.try_open(side, lot).await?;
                }
            }
        }

        // Profit targets, in priority order.
        match self.strategy.check_profit_targets(self.last_price) {
            ProfitDecision::CloseSingles(ids) => {
                for id in ids {
                    self.close_position_by_id(&id, "PROFIT_TARGET").await?;
                }
            }
            ProfitDecision::ClosePair => {
                info!(user_id = %self.config.user_id, "pair global profit hit");
                self.close_all_positions("PAIR_PROFIT_TARGET").await;
            }
            ProfitDecision::GlobalLimit(kind) => {
                self.handle_global_limit(kind).await;
            }
            ProfitDecision::None => {}
        }

        if self.tick_count % STATUS_INTERVAL == 0 {
            self.sink
                .emit(SessionEvent::StatusUpdate(Box::new(self.snapshot())))
                .await;
        }

        if self.tick_count % SNAPSHOT_INTERVAL == 0 {
            self.save_indicators();
        }

        Ok(())
    }

    async fn check_initial_entries(&mut self) -> Result<(), ExchangeError> {
        if !self.strategy.can_trade_today() {
            return Ok(());
        }

        let signal = self.strategy.evaluate_signal();
        let side = match signal {
            grid_hedge_core::market::Signal::Buy => Side::Long,
            grid_hedge_core::market::Signal::Sell => Side::Short,
            grid_hedge_core::market::Signal::Neutral => return Ok(()),
        };

        if !self.strategy.side_positions(side).is_empty() {
            return Ok(());
        }
        let Some(lot) = self.strategy.can_add_grid_order(side, self.last_price) else {
            return Ok(());
        };
        if self.try_open(side, lot).await? {
            self.strategy.record_entry_today();
        }
        Ok(())
    }

    /// Attempts one market open. A rejection never reserves the grid slot;
    /// the next tick simply re-evaluates.
    async fn try_open(&mut self, side: Side, lot: Decimal) -> Result<bool, ExchangeError> {
        let symbol = self.config.trading.symbol.clone();
        let leverage = self.config.trading.leverage;

        // Margin pre-check with a 10% buffer.
        if leverage > 0 && self.last_price > Decimal::ZERO {
            let required = lot * self.last_price / Decimal::from(leverage);
            if self.balance < required * MARGIN_BUFFER {
                warn!(
                    side = side.order_side(),
                    %required,
                    balance = %self.balance,
                    "insufficient balance for order"
                );
                self.sink
                    .emit(SessionEvent::BalanceWarning(BalanceWarning {
                        current_balance: self.balance,
                        required_balance: required,
                        message: format!(
                            "Balance too low for {} order of {lot}",
                            side.order_side()
                        ),
                    }))
                    .await;
                return Ok(false);
            }
        }

        match self.adapter.open_position(&symbol, side, lot, leverage).await {
            Ok(ack) => {
                let entry = ack.filled_price.unwrap_or(self.last_price);
                let level = self.strategy.level_for_next(side);
                let position =
                    self.strategy
                        .add_position(side, ack.order_id, entry, lot, level);
                self.last_trade_at = Some(Utc::now());
                self.sink
                    .emit(SessionEvent::TradeOpened(TradeOpened {
                        trade: OpenedTrade {
                            id: position.id.clone(),
                            exchange_order_id: position.id.clone(),
                            pair: symbol,
                            side: side.order_side().to_string(),
                            order_type: "MARKET".to_string(),
                            amount: position.lot,
                            price: position.entry_price,
                            cost: position.entry_price * position.lot,
                            fee: Decimal::ZERO,
                            fee_currency: "USDT".to_string(),
                            grid_level: position.grid_level,
                            opened_at: position.opened_at,
                        },
                    }))
                    .await;
                Ok(true)
            }
            Err(e) if e.is_auth() => Err(e),
            Err(ExchangeError::InsufficientMargin(message)) => {
                warn!(side = side.order_side(), "order rejected: {message}");
                self.sink
                    .emit(SessionEvent::BalanceWarning(BalanceWarning {
                        current_balance: self.balance,
                        required_balance: lot * self.last_price
                            / Decimal::from(leverage.max(1)),
                        message,
                    }))
                    .await;
                Ok(false)
            }
            Err(ExchangeError::InvalidSize(message)) => {
                warn!(side = side.order_side(), "order rejected: {message}");
                self.sink
                    .emit(SessionEvent::ErrorOccurred(ErrorOccurred {
                        error: ErrorDetail {
                            code: "ORDER_REJECTED".to_string(),
                            message,
                            severity: "medium".to_string(),
                        },
                    }))
                    .await;
                Ok(false)
            }
            Err(e) => {
                warn!(side = side.order_side(), error = %e, "order open failed");
                Ok(false)
            }
        }
    }

    /// Closes one position by id. `trade_closed` is emitted only after the
    /// exchange confirms the close; a vanished position reconciles via sync.
    async fn close_position_by_id(
        &mut self,
        id: &str,
        reason: &str,
    ) -> Result<(), ExchangeError> {
        let symbol = self.config.trading.symbol.clone();
        let Some(position) = self.strategy.find_position(id).cloned() else {
            return Ok(());
        };

        match self.adapter.close_position(&symbol, id).await {
            Ok(fill) => {
                self.strategy.remove_position(id);
                self.strategy.record_close(fill.realized_pnl);
                self.last_trade_at = Some(Utc::now());
                self.emit_trade_closed(&position, fill.realized_pnl, reason)
                    .await;
            }
            Err(ExchangeError::PositionNotFound { .. }) => {
                warn!(%id, "position already gone on exchange, reconciling");
                self.strategy.remove_position(id);
                self.sync_positions().await?;
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                // Kept locally; the close retries on a later tick.
                warn!(%id, error = %e, "position close failed");
            }
        }
        Ok(())
    }

    /// Closes every open position, returning how many closed. Errors are
    /// absorbed here: failed closes stay local and retry on later ticks.
    pub async fn close_all_positions(&mut self, reason: &str) -> usize {
        let ids: Vec<String> = self.strategy.all_positions().map(|p| p.id.clone()).collect();
        let mut closed = 0;
        for id in ids {
            let before = self.strategy.total_positions();
            if let Err(e) = self.close_position_by_id(&id, reason).await {
                warn!(%id, error = %e, "close failed during close-all");
                continue;
            }
            if self.strategy.total_positions() < before {
                closed += 1;
            }
        }
        closed
    }

    async fn handle_global_limit(&mut self, kind: GlobalLimitKind) {
        let limit_value = match kind {
            GlobalLimitKind::Profit => self.config.profit.global_profit,
            GlobalLimitKind::Loss => self.config.profit.max_loss,
        };
        warn!(
            user_id = %self.config.user_id,
            limit = kind.as_str(),
            "global limit hit, closing all positions"
        );

        // Positions close before the session stops.
        self.close_all_positions("GLOBAL_LIMIT").await;

        let total_pnl = self.strategy.performance.realized_pnl;
        self.sink
            .emit(SessionEvent::GlobalLimitHit(GlobalLimitHit {
                symbol: self.config.trading.symbol.clone(),
                total_pnl,
                limit_type: kind.as_str().to_string(),
                limit_value,
                message: format!(
                    "Global {} limit reached: {total_pnl} USDT",
                    kind.as_str().to_lowercase()
                ),
            }))
            .await;

        self.strategy.request_stop();
        self.stop("Global limit reached").await;
    }

    async fn sync_positions(&mut self) -> Result<(), ExchangeError> {
        let symbol = self.config.trading.symbol.clone();
        match self.adapter.get_positions(&symbol).await {
            Ok(positions) => {
                self.strategy.sync_from_exchange(positions, self.last_price);
                Ok(())
            }
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                warn!(error = %e, "position sync failed, retrying next interval");
                Ok(())
            }
        }
    }

    fn is_new_bar(&mut self, candles: &[Candle]) -> bool {
        let Some(last) = candles.last() else {
            return false;
        };
        if last.timestamp > self.last_bar_time {
            self.last_bar_time = last.timestamp;
            return true;
        }
        false
    }

    fn save_indicators(&self) {
        if let Some(persistence) = &self.persistence {
            let snapshot = IndicatorSnapshot::new(
                self.strategy.sar_state(),
                self.strategy.cci_tail(CCI_TAIL),
            );
            if let Err(e) = persistence.save(&snapshot) {
                warn!(error = %e, "failed to save indicator snapshot");
            }
        }
    }

    // ------------------------------------------------------------------
    // Events and status
    // ------------------------------------------------------------------

    async fn emit_status_changed(&self, previous: SessionState, reason: &str) {
        self.sink
            .emit(SessionEvent::StatusChanged(StatusChanged {
                previous_status: previous.as_str().to_string(),
                new_status: self.state.as_str().to_string(),
                reason: reason.to_string(),
            }))
            .await;
    }

    async fn emit_trade_closed(&self, position: &GridPosition, realized: Decimal, reason: &str) {
        debug!(
            id = %position.id,
            pnl = %realized,
            reason,
            "position closed"
        );
        self.sink
            .emit(SessionEvent::TradeClosed(TradeClosed {
                trade: ClosedTrade {
                    id: position.id.clone(),
                    pair: self.config.trading.symbol.clone(),
                    side: position.side.order_side().to_string(),
                    order_type: "MARKET".to_string(),
                    amount: position.lot,
                    price: self.last_price,
                    entry_price: position.entry_price,
                    pnl: realized,
                    pnl_percent: position.pnl_percent(self.last_price),
                    closed_at: Utc::now(),
                },
                reason: reason.to_string(),
            }))
            .await;
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            user_id: self.config.user_id.clone(),
            user_bot_id: self.config.user_bot_id.clone(),
            symbol: self.config.trading.symbol.clone(),
            state: self.state,
            demo: self.config.exchange.demo,
            current_price: self.last_price,
            balance: self.balance,
            tick_count: self.tick_count,
            buy_positions: self.strategy.buy_positions.len(),
            sell_positions: self.strategy.sell_positions.len(),
            total_trades: self.strategy.performance.total_trades,
            winning_trades: self.strategy.performance.winning_trades,
            realized_pnl: self.strategy.performance.realized_pnl,
            unrealized_pnl: self.strategy.performance.unrealized_pnl,
            started_at: self.started_at,
            uptime_secs: self.uptime_secs(),
            error: self.error.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn strategy(&self) -> &GridStrategy {
        &self.strategy
    }

    pub fn strategy_mut(&mut self) -> &mut GridStrategy {
        &mut self.strategy
    }

    fn uptime_secs(&self) -> i64 {
        self.started_at
            .map_or(0, |t| (Utc::now() - t).num_seconds())
    }

    /// Builds the `status_update` snapshot mirrored to the platform.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let price = self.last_price;
        let report = |p: &GridPosition| PositionReport {
            price: p.entry_price,
            lot: p.lot,
            order_id: p.id.clone(),
            grid_level: p.grid_level,
            pnl: p.pnl_unleveraged(price),
            pnl_percent: p.pnl_percent(price),
            opened_at: p.opened_at,
        };

        let buy: Vec<PositionReport> = self.strategy.buy_positions.iter().map(report).collect();
        let sell: Vec<PositionReport> = self.strategy.sell_positions.iter().map(report).collect();
        let buy_pnl: Decimal = buy.iter().map(|p| p.pnl).sum();
        let sell_pnl: Decimal = sell.iter().map(|p| p.pnl).sum();

        let performance = &self.strategy.performance;
        StatusSnapshot {
            symbol: self.config.trading.symbol.clone(),
            current_price: price,
            indicators: IndicatorReport {
                sma: self.strategy.sma(),
                sar: self.strategy.sar(),
                cci: self.strategy.cci_value(),
                signal: self.strategy.evaluate_signal(),
            },
            balance: self.balance,
            positions: PositionsReport {
                buy_count: buy.len(),
                sell_count: sell.len(),
                buy_pnl,
                sell_pnl,
                total_pnl: buy_pnl + sell_pnl,
                buy,
                sell,
            },
            grid: GridReport {
                multiplier: self.config.grid.multiplier,
                space_percent: self.config.grid.levels[0].percent,
                max_buy_orders: self.config.grid.max_orders_per_side(),
                max_sell_orders: self.config.grid.max_orders_per_side(),
            },
            profit: ProfitReport {
                single_order_profit: self.config.profit.single_order_profit,
                pair_global_profit: self.config.profit.pair_global_profit,
                global_profit: self.config.profit.global_profit,
                max_loss: self.config.profit.max_loss,
            },
            performance: PerformanceReport {
                total_trades: performance.total_trades,
                winning_trades: performance.winning_trades,
                losing_trades: performance.losing_trades,
                win_rate: performance.win_rate(),
                total_pnl: performance.realized_pnl,
                unrealized_pnl: performance.unrealized_pnl,
            },
            runtime: RuntimeReport {
                tick: self.tick_count,
                uptime: self.uptime_secs(),
                started_at: self.started_at,
                last_trade_at: self.last_trade_at,
            },
        }
    }
}
