//! Grid Engine (§4.6): startup sequence, event loop, fill reactions, and
//! the Risk Monitor.
//!
//! Owns every other kernel component behind async methods: a single struct
//! composing order placement, position tracking, and risk gating, driven
//! by the closure-invariant grid math this crate implements.

use crate::config::{EngineConfig, GridConfig};
use crate::error::{GridEngineError, Result};
use crate::grid::{GridCalculator, PositionSizer};
use crate::order::OrderManager;
use crate::persistence::{PersistedOrder, PersistedTrade, PersistenceStore};
use crate::position::PositionTracker;
use crate::risk::{CircuitBreaker, SafetyCheckResult, SafetyChecker, StopLossMonitor};
use crate::types::{EngineState, GridLevel, GridLevelStatus, GridOrder, OrderSide, PositionMode};
use crate::venue::{ExchangeAdapter, StreamChannel, StreamMessage, SymbolPrecisionRegistry};
use chrono::Utc;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

const PRICE_VERIFY_ATTEMPTS: u32 = 3;
const PRICE_VERIFY_BACKOFF: Duration = Duration::from_secs(2);
const POSITION_TOLERANCE_PCT: f64 = 10.0;
const BAND_EXIT_PCT: f64 = 0.05;
const STATE_PERSIST_INTERVAL_SECS: u64 = 60;
/// Price tolerance for mapping a resting venue order onto a grid level
/// (§4.6 step 6).
const ORDER_MATCH_TOLERANCE_PCT: f64 = 0.1;
/// Prefix identifying an order this crate placed, used to filter resting
/// orders during startup reconciliation (§4.6 step 6).
const CLIENT_ID_PREFIX: &str = "grid_";

pub struct GridEngine {
    config: EngineConfig,
    adapter: Arc<dyn ExchangeAdapter>,
    persistence: Arc<dyn PersistenceStore>,
    precision: SymbolPrecisionRegistry,
    levels: RwLock<Vec<GridLevel>>,
    order_manager: Arc<OrderManager>,
    position_tracker: RwLock<PositionTracker>,
    circuit_breaker: RwLock<CircuitBreaker>,
    stop_loss: RwLock<StopLossMonitor>,
    state: RwLock<EngineState>,
    last_safety_check: RwLock<Option<SafetyCheckResult>>,
    fill_rx: RwLock<Option<mpsc::Receiver<GridOrder>>>,
    stream_rx: RwLock<Option<mpsc::Receiver<StreamMessage>>>,
    streaming: RwLock<bool>,
}

impl GridEngine {
    pub fn new(
        config: EngineConfig,
        adapter: Arc<dyn ExchangeAdapter>,
        persistence: Arc<dyn PersistenceStore>,
        precision: SymbolPrecisionRegistry,
    ) -> Self {
        let grid = &config.grid;
        let order_manager = Arc::new(OrderManager::new(
            adapter.clone(),
            grid.symbol.clone(),
            grid.time_in_force,
            config.min_order_gap_ms,
        ));
        let position_tracker = PositionTracker::new(grid.symbol.clone(), config.fee_rate);
        let stop_loss = StopLossMonitor::new(grid.stop_loss, grid.take_profit, grid.position_direction);

        Self {
            config,
            adapter,
            persistence,
            precision,
            levels: RwLock::new(Vec::new()),
            order_manager,
            position_tracker: RwLock::new(position_tracker),
            circuit_breaker: RwLock::new(CircuitBreaker::new()),
            stop_loss: RwLock::new(stop_loss),
            state: RwLock::new(EngineState::Initialized),
            last_safety_check: RwLock::new(None),
            fill_rx: RwLock::new(None),
            stream_rx: RwLock::new(None),
            streaming: RwLock::new(false),
        }
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    fn grid(&self) -> &GridConfig {
        &self.config.grid
    }

    /// Startup sequence (§4.6). Aborts on the first failure.
    pub async fn start(&self) -> Result<()> {
        // 1. Validate config.
        self.grid().require_valid()?;

        // 2. Fetch current price.
        let current_price = self.fetch_price().await?;

        // 3. Safety Checker gate.
        let report = SafetyChecker::check(self.grid(), current_price, None, &self.precision);
        let allowed = report.allows_startup(self.grid().accept_high_risk);
        *self.last_safety_check.write().await = Some(report.clone());
        if !allowed {
            return Err(GridEngineError::SafetyBlocked(format!(
                "risk_score={:.1}, errors={:?}",
                report.risk_score, report.errors
            )));
        }

        // 4. Ensure one-way position mode.
        let mode = self.adapter.fetch_position_mode(&self.grid().symbol).await?;
        if mode != PositionMode::OneWay {
            self.adapter
                .set_position_mode(&self.grid().symbol, PositionMode::OneWay)
                .await
                .map_err(|e| GridEngineError::ModeMismatch(e.to_string()))?;
        }

        let mut levels = GridCalculator::build_levels(self.grid(), current_price);
        let (initial_qty, initial_side) = PositionSizer::size(
            &mut levels,
            self.grid().position_direction,
            self.grid().total_investment,
            self.grid().leverage,
            current_price,
            &self.grid().symbol,
            &self.precision,
        );

        // 5. Query existing position; resume, close, or abort per config
        // (§4.6 step 5's three documented options).
        let positions = self.adapter.fetch_positions().await?;
        let existing = positions.into_iter().find(|p| p.symbol == self.grid().symbol);
        let has_existing = existing.as_ref().map(|p| p.size != 0.0).unwrap_or(false);

        if let Some(pos) = existing.filter(|_| has_existing) {
            if self.config.auto_resume {
                self.position_tracker.write().await.adopt(pos.size, pos.entry_price);
                info!("resumed existing position: size={} entry={}", pos.size, pos.entry_price);
            } else if self.config.close_existing_on_conflict {
                warn!(
                    "existing position found for {} and auto_resume is disabled; closing it before start",
                    self.grid().symbol
                );
                self.close_position_at_market(pos.size, usize::MAX - 2).await?;
                if initial_qty > 0.0 {
                    self.place_initial_position(initial_qty, initial_side).await?;
                }
            } else {
                return Err(GridEngineError::PositionVerificationFailed(format!(
                    "existing position of size {} found for {}; pass --resume or --close-existing, or close it manually before starting",
                    pos.size,
                    self.grid().symbol
                )));
            }
        } else if initial_qty > 0.0 {
            // 7. No existing position: place the sized initial market order.
            self.place_initial_position(initial_qty, initial_side).await?;
        }

        *self.levels.write().await = levels;

        // 6. Reconcile resting orders left over from a prior run before
        // placing anything new.
        self.reconcile_existing_orders(current_price).await?;

        // 8. Place the remaining ladder: skip crossing/too-close levels and
        // anything step 6 already mapped onto a resting order.
        let levels_snapshot = self.levels.read().await.clone();
        let initial_orders: Vec<GridLevel> = GridCalculator::initial_orders(&levels_snapshot, current_price)
            .into_iter()
            .filter(|level| !level.is_active())
            .collect();
        let position_snapshot = self.position_tracker.read().await.position().clone();
        self.order_manager
            .place_initial_orders(&initial_orders, self.grid().position_direction, &position_snapshot)
            .await?;

        // 9. Connect the event stream; fall back to polling on failure.
        let (fill_tx, fill_rx) = mpsc::channel(256);
        self.order_manager.on_fill(fill_tx).await;
        *self.fill_rx.write().await = Some(fill_rx);

        match self
            .adapter
            .connect_stream(&[StreamChannel::Ticker, StreamChannel::Orders, StreamChannel::Positions])
            .await
        {
            Ok(Some(stream)) => {
                *self.stream_rx.write().await = Some(stream);
                *self.streaming.write().await = true;
                info!("event stream connected for {}", self.grid().symbol);
            }
            Ok(None) => {
                *self.streaming.write().await = false;
                info!("adapter has no streaming support, falling back to REST polling");
            }
            Err(e) => {
                *self.streaming.write().await = false;
                warn!("stream connect failed, falling back to REST polling: {e}");
            }
        }

        *self.state.write().await = EngineState::Running;
        info!("grid engine started for {}", self.grid().symbol);
        Ok(())
    }

    /// Startup step 6 (§4.6, §9 Open Question 1): map already-resting
    /// `grid_`-prefixed orders onto the local ladder so a restart doesn't
    /// place duplicates on top of orders the venue still holds. Exact
    /// duplicates (same side, same price to the grid's own tick) collapse
    /// to one kept order with the rest cancelled; a kept order maps to its
    /// nearest same-side level within `ORDER_MATCH_TOLERANCE_PCT`.
    async fn reconcile_existing_orders(&self, current_price: f64) -> Result<()> {
        let resting = self.adapter.fetch_orders(&self.grid().symbol).await?;
        let grid_orders: Vec<_> = resting
            .into_iter()
            .filter(|o| o.client_id.starts_with(CLIENT_ID_PREFIX))
            .collect();
        if grid_orders.is_empty() {
            return Ok(());
        }

        let mut dedup: HashMap<(OrderSide, i64), String> = HashMap::new();
        let mut to_cancel = Vec::new();
        let mut kept = Vec::new();
        for order in grid_orders {
            let bucket = (order.side, (order.price * 1e6).round() as i64);
            if dedup.contains_key(&bucket) {
                to_cancel.push(order.order_id.clone());
            } else {
                dedup.insert(bucket, order.order_id.clone());
                kept.push(order);
            }
        }

        for order_id in to_cancel {
            if let Err(e) = self.adapter.cancel_order(&order_id, &self.grid().symbol).await {
                warn!("failed to cancel duplicate resting order {order_id}: {e}");
            }
        }

        let tolerance = current_price * ORDER_MATCH_TOLERANCE_PCT / 100.0;
        let mut levels = self.levels.write().await;
        for order in kept {
            let nearest = levels
                .iter_mut()
                .filter(|l| l.side == order.side && !l.is_active())
                .min_by(|a, b| {
                    (a.price - order.price)
                        .abs()
                        .partial_cmp(&(b.price - order.price).abs())
                        .unwrap()
                });
            match nearest {
                Some(level) if (level.price - order.price).abs() <= tolerance => {
                    level.status = GridLevelStatus::Placed;
                    level.order_id = Some(order.order_id.clone());
                    self.order_manager
                        .adopt_existing(GridOrder {
                            grid_index: level.index,
                            order_id: order.order_id,
                            client_order_id: order.client_id,
                            symbol: order.symbol,
                            side: order.side,
                            price: order.price,
                            quantity: order.qty,
                            status: GridLevelStatus::Placed,
                            created_at: Utc::now(),
                            filled_at: None,
                            fill_price: None,
                            commission: None,
                        })
                        .await;
                }
                _ => warn!(
                    "resting order {} at {} does not map to any grid level within tolerance; leaving it untouched",
                    order.order_id, order.price
                ),
            }
        }
        Ok(())
    }

    /// Flatten the current position with a reduce-only market order. Shared
    /// by `stop`'s close-position branch and the step-5 close-on-conflict
    /// resolution.
    async fn close_position_at_market(&self, size: f64, id_tag: usize) -> Result<()> {
        if size == 0.0 {
            return Ok(());
        }
        use crate::types::{OrderType, TimeInForce};
        use crate::venue::PlaceOrderRequest;

        let side = if size > 0.0 { OrderSide::Sell } else { OrderSide::Buy };
        let request = PlaceOrderRequest {
            symbol: self.grid().symbol.clone(),
            side,
            order_type: OrderType::Market,
            qty: size.abs(),
            price: None,
            client_id: GridOrder::client_order_id_for(&self.grid().symbol, id_tag),
            time_in_force: TimeInForce::Gtc,
            reduce_only: true,
        };
        self.adapter.place_order(request).await?;
        self.position_tracker.write().await.adopt(0.0, 0.0);
        Ok(())
    }

    async fn fetch_price(&self) -> Result<f64> {
        let tickers = self.adapter.fetch_tickers().await?;
        tickers
            .into_iter()
            .find(|t| t.symbol == self.grid().symbol)
            .map(|t| t.last_price)
            .ok_or_else(|| GridEngineError::VenueTransient("no ticker for symbol".to_string()))
    }

    async fn place_initial_position(&self, qty: f64, side: OrderSide) -> Result<()> {
        use crate::venue::PlaceOrderRequest;
        use crate::types::{OrderType, TimeInForce};

        let request = PlaceOrderRequest {
            symbol: self.grid().symbol.clone(),
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
            client_id: GridOrder::client_order_id_for(&self.grid().symbol, usize::MAX),
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
        };
        self.adapter.place_order(request).await?;

        for attempt in 1..=PRICE_VERIFY_ATTEMPTS {
            let positions = self.adapter.fetch_positions().await?;
            if let Some(pos) = positions.into_iter().find(|p| p.symbol == self.grid().symbol) {
                let expected_sign = matches!(side, OrderSide::Buy);
                let actual_sign = pos.size >= 0.0;
                let within_tolerance = (pos.size.abs() - qty).abs() / qty.max(1e-9) * 100.0 <= POSITION_TOLERANCE_PCT;
                if expected_sign == actual_sign && within_tolerance {
                    self.position_tracker.write().await.adopt(pos.size, pos.entry_price);
                    return Ok(());
                }
            }
            if attempt < PRICE_VERIFY_ATTEMPTS {
                tokio::time::sleep(PRICE_VERIFY_BACKOFF).await;
            }
        }

        Err(GridEngineError::PositionVerificationFailed(
            "initial position size/side did not match expectation within tolerance".to_string(),
        ))
    }

    /// Process one fill notification: record it against the Position
    /// Tracker, persist it, and place the mirror order at the adjacent
    /// level (§4.6 Fill reaction).
    pub async fn handle_fill(&self, order: GridOrder) -> Result<()> {
        let trade = self.position_tracker.write().await.apply_fill(&order);

        self.persistence
            .record_order(&PersistedOrder::from_grid_order(&order))
            .await?;

        if let Some(trade) = trade {
            self.circuit_breaker.write().await.record_trade(trade.profit);
            self.persistence
                .record_trade(&PersistedTrade::from_grid_trade(&self.grid().symbol, &trade))
                .await?;
        }

        self.place_mirror_order(&order).await
    }

    async fn place_mirror_order(&self, filled: &GridOrder) -> Result<()> {
        let mirror_index = match filled.side {
            OrderSide::Buy => filled.grid_index.checked_add(1),
            OrderSide::Sell => filled.grid_index.checked_sub(1),
        };
        let Some(mirror_index) = mirror_index else {
            return Ok(());
        };

        if self.order_manager.is_index_active(mirror_index).await {
            return Ok(());
        }

        let levels = self.levels.read().await;
        let Some(level) = levels.iter().find(|l| l.index == mirror_index) else {
            return Ok(());
        };
        let level = level.clone();
        drop(levels);

        if self.allow_order_placement().await {
            let position = self.position_tracker.read().await.position().clone();
            self.order_manager
                .place_grid_order(&level, self.grid().position_direction, &position)
                .await?;
        }
        Ok(())
    }

    /// Risk Monitor (§4.6): evaluated every tick while Running.
    pub async fn evaluate_risk(&self, current_price: f64) -> bool {
        self.position_tracker.write().await.update_current_price(current_price);

        let stop_loss_triggered = self.stop_loss.read().await.should_stop_loss(current_price);
        let take_profit_triggered = {
            let tracker = self.position_tracker.read().await;
            let pct = tracker.position().pnl_percentage();
            self.stop_loss.read().await.should_take_profit(pct)
        };

        let drawdown_triggered = {
            let tracker = self.position_tracker.read().await;
            let total_profit = tracker.stats().total_profit;
            if let Some(max_dd_pct) = self.grid().max_drawdown_percentage {
                total_profit < 0.0
                    && (tracker.current_drawdown() / total_profit.abs()) * 100.0 >= max_dd_pct
            } else {
                false
            }
        };

        if stop_loss_triggered {
            error!("risk monitor: stop-loss triggered at {current_price}");
        }
        if take_profit_triggered {
            info!("risk monitor: take-profit triggered");
        }
        if drawdown_triggered {
            error!("risk monitor: drawdown limit triggered");
        }

        stop_loss_triggered || take_profit_triggered || drawdown_triggered
    }

    async fn allow_order_placement(&self) -> bool {
        let state = *self.state.read().await;
        if state != EngineState::Running {
            return false;
        }
        !self.circuit_breaker.write().await.is_frozen()
    }

    /// Re-ladder if the price has exited the band by `BAND_EXIT_PCT` and
    /// trailing is enabled (§4.1, §4.6).
    pub async fn maybe_reladder(&self, current_price: f64) -> Result<bool> {
        let Some((lower, upper)) = GridCalculator::trailing_band(self.grid(), current_price) else {
            return Ok(false);
        };
        let _ = (lower, upper, BAND_EXIT_PCT);

        info!("trailing breakout detected, cancelling all orders and re-laddering");
        self.order_manager.cancel_all().await;

        let mut grid = self.grid().clone();
        grid.lower_price = lower;
        grid.upper_price = upper;
        let levels = GridCalculator::build_levels(&grid, current_price);
        *self.levels.write().await = levels.clone();

        let initial_orders = GridCalculator::initial_orders(&levels, current_price);
        let position = self.position_tracker.read().await.position().clone();
        self.order_manager
            .place_initial_orders(&initial_orders, grid.position_direction, &position)
            .await?;

        Ok(true)
    }

    /// Persist the current bot state snapshot (called at ~60s boundaries
    /// and on stop, §4.6 / §6).
    pub async fn persist_state(&self) -> Result<()> {
        let tracker = self.position_tracker.read().await;
        let blob = serde_json::json!({
            "position": tracker.position(),
            "stats": tracker.stats(),
        })
        .to_string();
        self.persistence.upsert_bot_state(&self.grid().symbol, &blob).await
    }

    pub async fn pause(&self) {
        *self.state.write().await = EngineState::Paused;
        info!("grid engine paused");
    }

    pub async fn resume(&self) {
        *self.state.write().await = EngineState::Running;
        info!("grid engine resumed");
    }

    /// Stop: disconnect the stream, optionally cancel orders / flatten,
    /// persist final state (§4.6).
    pub async fn stop(&self, cancel_orders: bool, close_position: bool) -> Result<()> {
        *self.state.write().await = EngineState::Stopped;
        self.adapter.disconnect_stream().await;

        if cancel_orders {
            let (ok, failed) = self.order_manager.cancel_all().await;
            info!("stop: cancelled {ok} orders, {failed} failed");
        }

        if close_position {
            let position = self.position_tracker.read().await.position().clone();
            self.close_position_at_market(position.size, usize::MAX - 1).await?;
        }

        self.persist_state().await?;
        let tracker = self.position_tracker.read().await;
        info!(
            "grid engine stopped: trades={} win_rate={:.1}% total_profit={:.2}",
            tracker.stats().total_trades,
            tracker.stats().win_rate,
            tracker.stats().total_profit
        );
        Ok(())
    }

    pub async fn position_tracker_snapshot(&self) -> crate::types::GridPosition {
        self.position_tracker.read().await.position().clone()
    }

    pub async fn stats_snapshot(&self) -> crate::types::GridStats {
        self.position_tracker.read().await.stats().clone()
    }

    pub async fn last_safety_check(&self) -> Option<SafetyCheckResult> {
        self.last_safety_check.read().await.clone()
    }

    /// Take ownership of the fill-notification receiver, draining one
    /// event at a time into `handle_fill` (the stream-dispatcher task,
    /// §5). Returns `None` if already taken.
    pub async fn take_fill_receiver(&self) -> Option<mpsc::Receiver<GridOrder>> {
        self.fill_rx.write().await.take()
    }

    /// Take ownership of the venue stream receiver, for the stream
    /// dispatcher task spawned in `run_event_loop` (§5). Returns `None` if
    /// already taken or if no stream was ever connected.
    async fn take_stream_receiver(&self) -> Option<mpsc::Receiver<StreamMessage>> {
        self.stream_rx.write().await.take()
    }

    /// REST polling fallback for fill/cancel detection when the event
    /// stream isn't connected (§4.6 step 9, §5): routed through the same
    /// `update_order_status`/`handle_fill` path the stream dispatcher uses,
    /// so the two are idempotent with each other.
    async fn poll_orders(&self) -> Result<()> {
        let resting = self.adapter.fetch_orders(&self.grid().symbol).await?;
        for order in resting {
            if !order.client_id.starts_with(CLIENT_ID_PREFIX) {
                continue;
            }
            let Some(status) = Self::parse_venue_status(&order.status) else {
                continue;
            };
            if let Some(grid_order) = self
                .order_manager
                .update_order_status(&order.order_id, status, Some(order.price))
                .await?
            {
                if grid_order.status == GridLevelStatus::Filled {
                    self.handle_fill(grid_order).await?;
                }
            }
        }
        Ok(())
    }

    fn parse_venue_status(status: &str) -> Option<GridLevelStatus> {
        match status.to_ascii_lowercase().as_str() {
            "filled" => Some(GridLevelStatus::Filled),
            "cancelled" | "canceled" => Some(GridLevelStatus::Cancelled),
            "open" | "new" | "placed" | "accepted" => Some(GridLevelStatus::Placed),
            _ => None,
        }
    }

    /// Run the monitor task: poll price/orders at `monitor_interval_ms`,
    /// drain fill notifications, persist state at ~60 s boundaries, and
    /// re-ladder on a trailing breakout (§4.6 event loop, §5 task model).
    /// Spawns the stream-dispatcher task when a venue stream is connected;
    /// otherwise polls `fetch_orders` on every monitor tick. Returns when
    /// the engine leaves the `Running` state.
    pub async fn run_event_loop(self: &Arc<Self>) -> Result<()> {
        let mut fill_rx = self
            .take_fill_receiver()
            .await
            .ok_or_else(|| GridEngineError::StreamDisconnected("fill receiver already taken".to_string()))?;

        if let Some(mut stream_rx) = self.take_stream_receiver().await {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(message) = stream_rx.recv().await {
                    if let Err(e) = engine.handle_stream_message(message).await {
                        warn!("stream dispatcher: failed to handle message: {e}");
                    }
                }
            });
        }

        let mut monitor = tokio::time::interval(Duration::from_millis(self.config.monitor_interval_ms));
        let mut last_persist = tokio::time::Instant::now();
        let persist_interval = Duration::from_secs(STATE_PERSIST_INTERVAL_SECS);

        loop {
            if self.state().await != EngineState::Running {
                break;
            }

            tokio::select! {
                _ = monitor.tick() => {
                    let price = match self.fetch_price().await {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("monitor tick: price fetch failed: {e}");
                            continue;
                        }
                    };
                    if !*self.streaming.read().await {
                        if let Err(e) = self.poll_orders().await {
                            warn!("monitor tick: order poll failed: {e}");
                        }
                    }
                    self.evaluate_risk(price).await;
                    if self.maybe_reladder(price).await? {
                        continue;
                    }
                    if last_persist.elapsed() >= persist_interval {
                        self.persist_state().await?;
                        last_persist = tokio::time::Instant::now();
                    }
                }
                Some(order) = fill_rx.recv() => {
                    self.handle_fill(order).await?;
                }
                else => break,
            }
        }

        Ok(())
    }

    /// Drain a demultiplexed stream message into the appropriate reaction
    /// (§4.6 event loop, §9 message-passing over shared locks).
    pub async fn handle_stream_message(&self, message: StreamMessage) -> Result<()> {
        match message {
            StreamMessage::Ticker(ticker) => {
                self.evaluate_risk(ticker.last_price).await;
            }
            StreamMessage::OrderUpdate(order) => {
                if let Some(status) = Self::parse_venue_status(&order.status) {
                    if let Some(grid_order) = self
                        .order_manager
                        .update_order_status(&order.order_id, status, Some(order.price))
                        .await?
                    {
                        if grid_order.status == GridLevelStatus::Filled {
                            self.handle_fill(grid_order).await?;
                        }
                    }
                }
            }
            StreamMessage::PositionUpdate(position) => {
                self.position_tracker
                    .write()
                    .await
                    .update_current_price(position.mark_price);
            }
        }
        Ok(())
    }
}
