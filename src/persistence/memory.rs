//! In-memory fake implementing `PersistenceStore` for unit tests (§6).

use super::{PersistedBotState, PersistedOrder, PersistedTrade, PersistenceStore};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    bot_state: Mutex<Option<PersistedBotState>>,
    trades: Mutex<Vec<PersistedTrade>>,
    orders: Mutex<Vec<PersistedOrder>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn upsert_bot_state(&self, symbol: &str, state_blob: &str) -> Result<()> {
        let mut guard = self.bot_state.lock().unwrap();
        let now = Utc::now();
        match guard.as_mut() {
            Some(existing) if existing.symbol == symbol => {
                existing.state_blob = state_blob.to_string();
                existing.updated_at = now;
            }
            _ => {
                *guard = Some(PersistedBotState {
                    symbol: symbol.to_string(),
                    state_blob: state_blob.to_string(),
                    created_at: now,
                    updated_at: now,
                });
            }
        }
        Ok(())
    }

    async fn load_bot_state(&self, symbol: &str) -> Result<Option<PersistedBotState>> {
        Ok(self
            .bot_state
            .lock()
            .unwrap()
            .clone()
            .filter(|s| s.symbol == symbol))
    }

    async fn record_trade(&self, trade: &PersistedTrade) -> Result<()> {
        let mut trades = self.trades.lock().unwrap();
        let mut trade = trade.clone();
        trade.id = trades.len() as i64 + 1;
        trades.push(trade);
        Ok(())
    }

    async fn record_order(&self, order: &PersistedOrder) -> Result<()> {
        let mut orders = self.orders.lock().unwrap();
        let mut order = order.clone();
        order.id = orders.len() as i64 + 1;
        orders.push(order);
        Ok(())
    }

    async fn trade_history(&self, symbol: &str) -> Result<Vec<PersistedTrade>> {
        Ok(self
            .trades
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn order_history(&self, symbol: &str) -> Result<Vec<PersistedOrder>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_replaces_existing_state_for_same_symbol() {
        let store = MemoryStore::new();
        store.upsert_bot_state("BTCUSDT", "{\"v\":1}").await.unwrap();
        store.upsert_bot_state("BTCUSDT", "{\"v\":2}").await.unwrap();
        let state = store.load_bot_state("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(state.state_blob, "{\"v\":2}");
    }

    #[tokio::test]
    async fn trade_history_filters_by_symbol() {
        let store = MemoryStore::new();
        store
            .record_trade(&PersistedTrade {
                id: 0,
                symbol: "BTCUSDT".to_string(),
                buy_price: 42000.0,
                sell_price: 43000.0,
                quantity: 0.01,
                profit: 10.0,
                completed_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .record_trade(&PersistedTrade {
                id: 0,
                symbol: "ETHUSDT".to_string(),
                buy_price: 2000.0,
                sell_price: 2100.0,
                quantity: 0.1,
                profit: 10.0,
                completed_at: Utc::now(),
            })
            .await
            .unwrap();
        let history = store.trade_history("BTCUSDT").await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
