//! Core data model: the entities shared by every kernel component.
//!
//! These types carry no behavior of their own beyond small derived accessors;
//! the components in `grid`, `order`, `position`, and `risk` own the logic
//! that mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grid spacing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridType {
    Arithmetic,
    Geometric,
}

/// Side of a resting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Which side(s) of the market the grid is allowed to hold inventory on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionDirection {
    Long,
    Short,
    Neutral,
}

/// Venue position mode. Reduce-only correctness requires `OneWay` (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionMode {
    OneWay,
    Hedge,
}

/// Order type understood by the exchange adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

/// Time-in-force instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    PostOnly,
}

/// Lifecycle status of a single grid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridLevelStatus {
    Pending,
    Placed,
    Filled,
    Cancelled,
}

impl GridLevelStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled)
    }
}

/// A single rung of the ladder: a price, a side, and a target quantity.
///
/// Invariant: within a run, `(index, side)` uniquely identifies a level and
/// at most one live order references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridLevel {
    pub index: usize,
    pub price: f64,
    pub side: OrderSide,
    pub quantity: f64,
    pub status: GridLevelStatus,
    pub order_id: Option<String>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl GridLevel {
    pub fn new(index: usize, price: f64, side: OrderSide, quantity: f64) -> Self {
        Self {
            index,
            price,
            side,
            quantity,
            status: GridLevelStatus::Pending,
            order_id: None,
            filled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == GridLevelStatus::Placed && self.order_id.is_some()
    }
}

/// A venue order tied to a grid level.
///
/// Lifecycle: Pending → Placed → (Filled | Cancelled); terminal states are
/// final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridOrder {
    pub grid_index: usize,
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub status: GridLevelStatus,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub fill_price: Option<f64>,
    pub commission: Option<f64>,
}

impl GridOrder {
    pub fn client_order_id_for(symbol: &str, index: usize) -> String {
        format!("grid_{}_{}_{}", symbol, index, &uuid::Uuid::new_v4().simple().to_string()[..8])
    }
}

/// A closed round-trip: a buy and a sell that shared a grid index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridTrade {
    pub buy_order: GridOrder,
    pub sell_order: GridOrder,
    pub profit: f64,
    pub profit_pct: f64,
    pub completed_at: DateTime<Utc>,
}

/// Running position for the traded symbol.
///
/// Invariant: on a side flip, the closing portion contributes to
/// `realized_pnl` and the remainder re-establishes `entry_price` at the
/// fill price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPosition {
    pub symbol: String,
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub total_trades: u64,
}

impl GridPosition {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            size: 0.0,
            entry_price: 0.0,
            current_price: 0.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            total_trades: 0,
        }
    }

    pub fn pnl_percentage(&self) -> f64 {
        if self.entry_price == 0.0 {
            0.0
        } else {
            (self.current_price - self.entry_price) / self.entry_price * 100.0
        }
    }

    pub fn side_label(&self) -> &'static str {
        if self.size > 0.0 {
            "LONG"
        } else if self.size < 0.0 {
            "SHORT"
        } else {
            "FLAT"
        }
    }
}

/// Aggregate counters for the running session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridStats {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_volume: f64,
    pub grid_profit: f64,
    pub position_profit: f64,
    pub total_profit: f64,
    pub fees_paid: f64,
    pub uptime_seconds: u64,
    pub roi: f64,
    pub win_rate: f64,
    pub average_profit_per_trade: f64,
    pub max_drawdown: f64,
    pub current_drawdown: f64,
}

impl GridStats {
    pub fn update_metrics(&mut self) {
        if self.total_trades > 0 {
            self.win_rate = self.winning_trades as f64 / self.total_trades as f64 * 100.0;
            self.average_profit_per_trade = self.grid_profit / self.total_trades as f64;
        }
        self.total_profit = self.grid_profit + self.position_profit;
    }
}

/// Engine lifecycle state (§3 EngineState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Initialized,
    Running,
    Paused,
    Stopped,
    Error,
}
