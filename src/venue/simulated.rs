//! Deterministic in-memory venue.
//!
//! Fills resting limit orders as a driven price path crosses them and
//! reports a position that mirrors those fills — used by integration
//! tests, the CLI's `--dry-run`, and scenario replays (S1-S6).

use super::{
    ExchangeAdapter, PlaceOrderRequest, PlaceOrderResult, StreamChannel, StreamMessage,
    StreamState, Ticker, VenueOrder, VenuePosition,
};
use crate::error::{GridEngineError, Result};
use crate::types::{OrderSide, OrderType, PositionMode};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

struct RestingOrder {
    client_id: String,
    symbol: String,
    side: OrderSide,
    price: f64,
    qty: f64,
    status: String,
}

struct SimState {
    price: f64,
    position: VenuePosition,
    orders: HashMap<String, RestingOrder>,
    position_mode: PositionMode,
    next_id: u64,
    stream_tx: Option<mpsc::Sender<StreamMessage>>,
    stream_state: StreamState,
}

pub struct SimulatedAdapter {
    symbol: String,
    state: Arc<RwLock<SimState>>,
}

impl SimulatedAdapter {
    pub fn new(symbol: impl Into<String>, initial_price: f64) -> Self {
        let symbol = symbol.into();
        Self {
            state: Arc::new(RwLock::new(SimState {
                price: initial_price,
                position: VenuePosition {
                    symbol: symbol.clone(),
                    size: 0.0,
                    entry_price: 0.0,
                    mark_price: initial_price,
                    pnl: 0.0,
                },
                orders: HashMap::new(),
                position_mode: PositionMode::OneWay,
                next_id: 1,
                stream_tx: None,
                stream_state: StreamState::Disconnected,
            })),
            symbol,
        }
    }

    /// Drive the venue's mark price forward one step. Crossing limit
    /// orders fill fully at their resting price; filled orders are removed
    /// and the simulated position updated to mirror the fill.
    pub async fn set_price(&self, price: f64) {
        let mut state = self.state.write().await;
        state.price = price;
        state.position.mark_price = price;

        let crossed: Vec<String> = state
            .orders
            .iter()
            .filter(|(_, o)| match o.side {
                OrderSide::Buy => price <= o.price,
                OrderSide::Sell => price >= o.price,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for order_id in crossed {
            if let Some(order) = state.orders.remove(&order_id) {
                Self::apply_fill(&mut state.position, order.side, order.qty, order.price);
                debug!(
                    "simulated fill: {:?} {} @ {} (order {})",
                    order.side, order.qty, order.price, order_id
                );
                if let Some(tx) = state.stream_tx.clone() {
                    let msg = StreamMessage::OrderUpdate(VenueOrder {
                        order_id: order_id.clone(),
                        client_id: order.client_id,
                        symbol: order.symbol,
                        side: order.side,
                        price: order.price,
                        qty: order.qty,
                        status: "filled".to_string(),
                    });
                    let _ = tx.try_send(msg);
                }
            }
        }

        if let Some(tx) = state.stream_tx.clone() {
            let _ = tx.try_send(StreamMessage::Ticker(Ticker {
                symbol: self.symbol.clone(),
                last_price: price,
            }));
        }
    }

    fn apply_fill(position: &mut VenuePosition, side: OrderSide, qty: f64, price: f64) {
        match side {
            OrderSide::Buy => {
                let new_size = position.size + qty;
                if position.size >= 0.0 {
                    let total_cost = position.size * position.entry_price + qty * price;
                    position.entry_price = if new_size > 0.0 { total_cost / new_size } else { 0.0 };
                } else if new_size >= 0.0 {
                    position.entry_price = price;
                }
                position.size = new_size;
            }
            OrderSide::Sell => {
                let new_size = position.size - qty;
                if position.size > 0.0 {
                    if new_size <= 0.0 {
                        position.entry_price = price;
                    }
                } else {
                    let total_cost = position.size.abs() * position.entry_price + qty * price;
                    let new_size_abs = new_size.abs();
                    position.entry_price = if new_size_abs > 0.0 { total_cost / new_size_abs } else { 0.0 };
                }
                position.size = new_size;
            }
        }
    }
}

#[async_trait]
impl ExchangeAdapter for SimulatedAdapter {
    async fn fetch_tickers(&self) -> Result<Vec<Ticker>> {
        let state = self.state.read().await;
        Ok(vec![Ticker {
            symbol: self.symbol.clone(),
            last_price: state.price,
        }])
    }

    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>> {
        let state = self.state.read().await;
        Ok(vec![state.position.clone()])
    }

    async fn fetch_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .filter(|(_, o)| o.symbol == symbol)
            .map(|(id, o)| VenueOrder {
                order_id: id.clone(),
                client_id: o.client_id.clone(),
                symbol: o.symbol.clone(),
                side: o.side,
                price: o.price,
                qty: o.qty,
                status: o.status.clone(),
            })
            .collect())
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResult> {
        let mut state = self.state.write().await;
        let order_id = format!("sim-{}", state.next_id);
        state.next_id += 1;

        match req.order_type {
            OrderType::Market => {
                let fill_price = state.price;
                Self::apply_fill(&mut state.position, req.side, req.qty, fill_price);
            }
            OrderType::Limit => {
                let price = req.price.ok_or_else(|| {
                    GridEngineError::VenueRejection("limit order requires a price".to_string())
                })?;
                state.orders.insert(
                    order_id.clone(),
                    RestingOrder {
                        client_id: req.client_id,
                        symbol: req.symbol,
                        side: req.side,
                        price,
                        qty: req.qty,
                        status: "placed".to_string(),
                    },
                );
            }
        }

        Ok(PlaceOrderResult { order_id })
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.orders.remove(order_id);
        Ok(())
    }

    async fn fetch_position_mode(&self, _symbol: &str) -> Result<PositionMode> {
        Ok(self.state.read().await.position_mode)
    }

    async fn set_position_mode(&self, _symbol: &str, mode: PositionMode) -> Result<()> {
        self.state.write().await.position_mode = mode;
        Ok(())
    }

    async fn connect_stream(
        &self,
        _channels: &[StreamChannel],
    ) -> Result<Option<mpsc::Receiver<StreamMessage>>> {
        let (tx, rx) = mpsc::channel(256);
        let mut state = self.state.write().await;
        state.stream_tx = Some(tx);
        state.stream_state = StreamState::Authenticated;
        Ok(Some(rx))
    }

    async fn stream_state(&self) -> StreamState {
        self.state.read().await.stream_state
    }

    async fn disconnect_stream(&self) {
        let mut state = self.state.write().await;
        state.stream_tx = None;
        state.stream_state = StreamState::Disconnected;
    }
}
