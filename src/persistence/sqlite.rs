//! `sqlx`-backed SQLite implementation of `PersistenceStore` (§6).
//! Persisted bot state, trade history, and order history are in-scope for
//! the kernel, not optional tooling, so this store is a default dependency.

use super::{PersistedBotState, PersistedOrder, PersistedTrade, PersistenceStore};
use crate::error::{GridEngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| GridEngineError::ConfigInvalid(format!("sqlite connect failed: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bot_state (
                symbol TEXT PRIMARY KEY,
                state_blob TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trade_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                buy_price REAL NOT NULL,
                sell_price REAL NOT NULL,
                quantity REAL NOT NULL,
                profit REAL NOT NULL,
                completed_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS order_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                order_id TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                quantity REAL NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> GridEngineError {
    GridEngineError::ConfigInvalid(format!("sqlite error: {e}"))
}

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn upsert_bot_state(&self, symbol: &str, state_blob: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO bot_state (symbol, state_blob, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(symbol) DO UPDATE SET state_blob = ?2, updated_at = ?3",
        )
        .bind(symbol)
        .bind(state_blob)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_bot_state(&self, symbol: &str) -> Result<Option<PersistedBotState>> {
        let row = sqlx::query(
            "SELECT symbol, state_blob, created_at, updated_at FROM bot_state WHERE symbol = ?1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| PersistedBotState {
            symbol: r.get("symbol"),
            state_blob: r.get("state_blob"),
            created_at: parse_ts(r.get("created_at")),
            updated_at: parse_ts(r.get("updated_at")),
        }))
    }

    async fn record_trade(&self, trade: &PersistedTrade) -> Result<()> {
        sqlx::query(
            "INSERT INTO trade_history (symbol, buy_price, sell_price, quantity, profit, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&trade.symbol)
        .bind(trade.buy_price)
        .bind(trade.sell_price)
        .bind(trade.quantity)
        .bind(trade.profit)
        .bind(trade.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_order(&self, order: &PersistedOrder) -> Result<()> {
        sqlx::query(
            "INSERT INTO order_history (symbol, order_id, side, price, quantity, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&order.symbol)
        .bind(&order.order_id)
        .bind(&order.side)
        .bind(order.price)
        .bind(order.quantity)
        .bind(&order.status)
        .bind(order.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn trade_history(&self, symbol: &str) -> Result<Vec<PersistedTrade>> {
        let rows = sqlx::query(
            "SELECT id, symbol, buy_price, sell_price, quantity, profit, completed_at
             FROM trade_history WHERE symbol = ?1 ORDER BY id ASC",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| PersistedTrade {
                id: r.get("id"),
                symbol: r.get("symbol"),
                buy_price: r.get("buy_price"),
                sell_price: r.get("sell_price"),
                quantity: r.get("quantity"),
                profit: r.get("profit"),
                completed_at: parse_ts(r.get("completed_at")),
            })
            .collect())
    }

    async fn order_history(&self, symbol: &str) -> Result<Vec<PersistedOrder>> {
        let rows = sqlx::query(
            "SELECT id, symbol, order_id, side, price, quantity, status, created_at
             FROM order_history WHERE symbol = ?1 ORDER BY id ASC",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| PersistedOrder {
                id: r.get("id"),
                symbol: r.get("symbol"),
                order_id: r.get("order_id"),
                side: r.get("side"),
                price: r.get("price"),
                quantity: r.get("quantity"),
                status: r.get("status"),
                created_at: parse_ts(r.get("created_at")),
            })
            .collect())
    }
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_bot_state_through_sqlite() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.upsert_bot_state("BTCUSDT", "{\"size\":0.01}").await.unwrap();
        let loaded = store.load_bot_state("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(loaded.state_blob, "{\"size\":0.01}");
    }

    #[tokio::test]
    async fn records_and_lists_trades() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store
            .record_trade(&PersistedTrade {
                id: 0,
                symbol: "BTCUSDT".to_string(),
                buy_price: 42000.0,
                sell_price: 43000.0,
                quantity: 0.01,
                profit: 9.0,
                completed_at: Utc::now(),
            })
            .await
            .unwrap();
        let history = store.trade_history("BTCUSDT").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].profit, 9.0);
    }
}
