//! Local persisted state (§6): bot state snapshots, trade history, order
//! history, behind a `PersistenceStore` trait so the kernel and its tests
//! never depend on SQLite directly.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::{GridOrder, GridTrade};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedBotState {
    pub symbol: String,
    pub state_blob: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTrade {
    pub id: i64,
    pub symbol: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub quantity: f64,
    pub profit: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedOrder {
    pub id: i64,
    pub symbol: String,
    pub order_id: String,
    pub side: String,
    pub price: f64,
    pub quantity: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl PersistedTrade {
    pub fn from_grid_trade(symbol: &str, trade: &GridTrade) -> Self {
        Self {
            id: 0,
            symbol: symbol.to_string(),
            buy_price: trade.buy_order.price,
            sell_price: trade.sell_order.price,
            quantity: trade.buy_order.quantity,
            profit: trade.profit,
            completed_at: trade.completed_at,
        }
    }
}

impl PersistedOrder {
    pub fn from_grid_order(order: &GridOrder) -> Self {
        Self {
            id: 0,
            symbol: order.symbol.clone(),
            order_id: order.order_id.clone(),
            side: format!("{:?}", order.side),
            price: order.price,
            quantity: order.quantity,
            status: format!("{:?}", order.status),
            created_at: order.created_at,
        }
    }
}

/// Storage boundary for the three persisted tables (§6). The kernel
/// depends only on this trait; `SqliteStore` and `MemoryStore` are its two
/// implementors.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn upsert_bot_state(&self, symbol: &str, state_blob: &str) -> Result<()>;
    async fn load_bot_state(&self, symbol: &str) -> Result<Option<PersistedBotState>>;
    async fn record_trade(&self, trade: &PersistedTrade) -> Result<()>;
    async fn record_order(&self, order: &PersistedOrder) -> Result<()>;
    async fn trade_history(&self, symbol: &str) -> Result<Vec<PersistedTrade>>;
    async fn order_history(&self, symbol: &str) -> Result<Vec<PersistedOrder>>;
}
