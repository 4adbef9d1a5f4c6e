//! Exchange adapter boundary (§6, §9).
//!
//! The kernel never talks to a venue directly: every module that needs
//! market data or order placement takes an `Arc<dyn ExchangeAdapter>`. All
//! adapter calls are logically callback-style (`{Success(T), Failure(E)}`)
//! at the venue boundary; this trait already wraps that into a bounded,
//! awaitable `Result`, so business code upstream never sees callback
//! vocabulary, per §9.

pub mod precision;
pub mod rest;
pub mod simulated;

use crate::error::Result;
use crate::types::{OrderSide, OrderType, PositionMode, TimeInForce};
use async_trait::async_trait;
use std::time::Duration;

pub use precision::{SymbolPrecision, SymbolPrecisionRegistry};
pub use simulated::SimulatedAdapter;

/// Venue call timeouts (§5).
pub const PLACE_CANCEL_TIMEOUT: Duration = Duration::from_secs(5);
pub const TICKER_TIMEOUT: Duration = Duration::from_secs(2);
pub const POSITION_MODE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
}

#[derive(Debug, Clone)]
pub struct VenuePosition {
    pub symbol: String,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone)]
pub struct VenueOrder {
    pub order_id: String,
    pub client_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub qty: f64,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: f64,
    pub price: Option<f64>,
    pub client_id: String,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderResult {
    pub order_id: String,
}

/// Streaming channel kinds (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamChannel {
    Ticker,
    Orders,
    Positions,
}

/// Streaming connection state machine (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connected,
    Authenticated,
    Reconnecting,
    Error,
}

/// A demultiplexed message from the event stream, handed to the
/// stream-dispatcher task for routing into Order Manager / Position
/// Tracker mutation paths (§5, §9: message-passing over shared locks).
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Ticker(Ticker),
    OrderUpdate(VenueOrder),
    PositionUpdate(VenuePosition),
}

/// Required capabilities of a perp-futures exchange adapter (§6).
///
/// Implementors are vendor-neutral; the kernel depends only on this trait.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn fetch_tickers(&self) -> Result<Vec<Ticker>>;
    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>>;
    async fn fetch_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>>;
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResult>;
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<()>;
    async fn fetch_position_mode(&self, symbol: &str) -> Result<PositionMode>;
    async fn set_position_mode(&self, symbol: &str, mode: PositionMode) -> Result<()>;

    /// Connect the event stream. Returns a receiver fed by the adapter's
    /// internal dispatch loop; `None` if the adapter has no live streaming
    /// (the engine falls back to REST polling, per §4.6 step 9).
    async fn connect_stream(
        &self,
        channels: &[StreamChannel],
    ) -> Result<Option<tokio::sync::mpsc::Receiver<StreamMessage>>>;

    async fn stream_state(&self) -> StreamState;
    async fn disconnect_stream(&self);
}
