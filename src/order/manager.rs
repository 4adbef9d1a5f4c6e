//! Order Manager (§4.4): places, tracks, and reconciles grid orders.
//!
//! Owns the `active_orders`/`by_index` tables and a single `last_submit`
//! rate gate enforcing the one invariant the kernel actually needs: a
//! minimum gap between any two outbound order submissions.

use crate::error::Result;
use crate::types::{GridLevel, GridLevelStatus, GridOrder, GridPosition, OrderSide, PositionDirection, TimeInForce};
use crate::venue::{ExchangeAdapter, PlaceOrderRequest};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;

const BATCH_SIZE: usize = 10;
const INTER_BATCH_DELAY: Duration = Duration::from_millis(500);

struct Tables {
    active_orders: HashMap<String, GridOrder>,
    by_index: HashMap<usize, String>,
}

pub struct OrderManager {
    adapter: Arc<dyn ExchangeAdapter>,
    symbol: String,
    time_in_force: TimeInForce,
    min_gap: Duration,
    last_submit: Mutex<Instant>,
    tables: RwLock<Tables>,
    fill_tx: RwLock<Option<mpsc::Sender<GridOrder>>>,
}

impl OrderManager {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        symbol: impl Into<String>,
        time_in_force: TimeInForce,
        min_gap_ms: u64,
    ) -> Self {
        Self {
            adapter,
            symbol: symbol.into(),
            time_in_force,
            min_gap: Duration::from_millis(min_gap_ms),
            last_submit: Mutex::new(Instant::now() - Duration::from_secs(1)),
            tables: RwLock::new(Tables {
                active_orders: HashMap::new(),
                by_index: HashMap::new(),
            }),
            fill_tx: RwLock::new(None),
        }
    }

    /// Register the channel that receives exactly one notification per
    /// order's first transition to `Filled` (§4.4, §5 idempotent dispatch).
    pub async fn on_fill(&self, tx: mpsc::Sender<GridOrder>) {
        *self.fill_tx.write().await = Some(tx);
    }

    async fn throttle(&self) {
        let mut last = self.last_submit.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_gap {
            tokio::time::sleep(self.min_gap - elapsed).await;
        }
        *last = Instant::now();
    }

    fn reduce_only(direction: PositionDirection, side: OrderSide, position: &GridPosition) -> bool {
        match direction {
            PositionDirection::Long => side == OrderSide::Sell && position.size > 0.0,
            PositionDirection::Short => side == OrderSide::Buy && position.size < 0.0,
            PositionDirection::Neutral => false,
        }
    }

    /// Place every given level in index order, batching submissions in
    /// groups of `BATCH_SIZE` with a 500 ms gap between batches; each
    /// individual submission within a batch still pays the 100 ms rate
    /// gate via `place_grid_order` (§4.4).
    pub async fn place_initial_orders(
        &self,
        levels: &[GridLevel],
        direction: PositionDirection,
        position: &GridPosition,
    ) -> Result<(usize, usize)> {
        let mut ok = 0;
        let mut failed = 0;
        for (batch_index, batch) in levels.chunks(BATCH_SIZE).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(INTER_BATCH_DELAY).await;
            }
            for level in batch {
                match self.place_grid_order(level, direction, position).await {
                    Ok(_) => ok += 1,
                    Err(e) => {
                        warn!("failed to place level {}: {e}", level.index);
                        failed += 1;
                    }
                }
            }
        }
        info!("placed initial orders: {ok} ok, {failed} failed");
        Ok((ok, failed))
    }

    /// Register an order the engine found already resting at the venue
    /// (startup step 6 reconciliation) without submitting a new one.
    pub async fn adopt_existing(&self, order: GridOrder) {
        let mut tables = self.tables.write().await;
        tables.by_index.insert(order.grid_index, order.order_id.clone());
        tables.active_orders.insert(order.order_id.clone(), order);
    }

    pub async fn place_grid_order(
        &self,
        level: &GridLevel,
        direction: PositionDirection,
        position: &GridPosition,
    ) -> Result<GridOrder> {
        self.throttle().await;

        let client_id = GridOrder::client_order_id_for(&self.symbol, level.index);
        let reduce_only = Self::reduce_only(direction, level.side, position);

        let request = PlaceOrderRequest {
            symbol: self.symbol.clone(),
            side: level.side,
            order_type: crate::types::OrderType::Limit,
            qty: level.quantity,
            price: Some(level.price),
            client_id: client_id.clone(),
            time_in_force: self.time_in_force,
            reduce_only,
        };

        let result = self.adapter.place_order(request).await?;

        let order = GridOrder {
            grid_index: level.index,
            order_id: result.order_id.clone(),
            client_order_id: client_id,
            symbol: self.symbol.clone(),
            side: level.side,
            price: level.price,
            quantity: level.quantity,
            status: GridLevelStatus::Placed,
            created_at: Utc::now(),
            filled_at: None,
            fill_price: None,
            commission: None,
        };

        let mut tables = self.tables.write().await;
        tables.by_index.insert(level.index, order.order_id.clone());
        tables.active_orders.insert(order.order_id.clone(), order.clone());
        debug!("placed order {} at level {} ({:?} {} @ {})", order.order_id, level.index, level.side, level.quantity, level.price);

        Ok(order)
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        self.throttle().await;
        self.adapter.cancel_order(order_id, &self.symbol).await?;
        let mut tables = self.tables.write().await;
        if let Some(order) = tables.active_orders.remove(order_id) {
            tables.by_index.remove(&order.grid_index);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Best-effort cancel of every tracked order, paying the rate gate
    /// between each individual call (§4.4).
    pub async fn cancel_all(&self) -> (usize, usize) {
        let order_ids: Vec<String> = {
            let tables = self.tables.read().await;
            tables.active_orders.keys().cloned().collect()
        };
        let mut ok = 0;
        let mut failed = 0;
        for order_id in order_ids {
            match self.cancel_order(&order_id).await {
                Ok(true) => ok += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("cancel failed for {order_id}: {e}");
                    failed += 1;
                }
            }
        }
        (ok, failed)
    }

    /// The single reconciliation entrypoint for both the streaming and
    /// polling paths. Idempotent: a terminal status is only applied once
    /// per order (§5).
    pub async fn update_order_status(
        &self,
        order_id: &str,
        status: GridLevelStatus,
        fill_price: Option<f64>,
    ) -> Result<Option<GridOrder>> {
        let mut tables = self.tables.write().await;
        let Some(order) = tables.active_orders.get_mut(order_id) else {
            return Ok(None);
        };

        if order.status.is_terminal() {
            return Ok(None);
        }

        let became_filled = status == GridLevelStatus::Filled && order.status != GridLevelStatus::Filled;
        order.status = status;
        if status == GridLevelStatus::Filled {
            order.filled_at = Some(Utc::now());
            order.fill_price = fill_price;
        }
        let snapshot = order.clone();

        if status.is_terminal() {
            tables.by_index.remove(&snapshot.grid_index);
            tables.active_orders.remove(order_id);
        }
        drop(tables);

        if became_filled {
            if let Some(tx) = self.fill_tx.read().await.clone() {
                let _ = tx.send(snapshot.clone()).await;
            }
        }

        Ok(Some(snapshot))
    }

    pub async fn replace_order(
        &self,
        level: &GridLevel,
        direction: PositionDirection,
        position: &GridPosition,
    ) -> Result<GridOrder> {
        if let Some(order_id) = self.order_id_for(level.index).await {
            self.cancel_order(&order_id).await?;
        }
        self.place_grid_order(level, direction, position).await
    }

    pub async fn order_id_for(&self, grid_index: usize) -> Option<String> {
        self.tables.read().await.by_index.get(&grid_index).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.tables.read().await.active_orders.len()
    }

    pub async fn is_index_active(&self, grid_index: usize) -> bool {
        self.tables.read().await.by_index.contains_key(&grid_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::SimulatedAdapter;

    fn flat_position(symbol: &str) -> GridPosition {
        GridPosition::flat(symbol)
    }

    #[tokio::test]
    async fn place_and_fill_round_trips_through_tables() {
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(SimulatedAdapter::new("BTCUSDT", 43500.0));
        let manager = OrderManager::new(adapter, "BTCUSDT", TimeInForce::Gtc, 1);
        let level = GridLevel::new(0, 42000.0, OrderSide::Buy, 0.01);
        let order = manager
            .place_grid_order(&level, PositionDirection::Long, &flat_position("BTCUSDT"))
            .await
            .unwrap();
        assert_eq!(manager.active_count().await, 1);

        let updated = manager
            .update_order_status(&order.order_id, GridLevelStatus::Filled, Some(42000.0))
            .await
            .unwrap();
        assert!(updated.is_some());
        assert_eq!(manager.active_count().await, 0);

        // Second call on the same terminal order is a no-op (idempotent).
        let again = manager
            .update_order_status(&order.order_id, GridLevelStatus::Filled, Some(42000.0))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn reduce_only_set_for_long_sell_with_open_position() {
        let mut position = flat_position("BTCUSDT");
        position.size = 0.01;
        assert!(OrderManager::reduce_only(PositionDirection::Long, OrderSide::Sell, &position));
        assert!(!OrderManager::reduce_only(PositionDirection::Long, OrderSide::Buy, &position));
    }
}
