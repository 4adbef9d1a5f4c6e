//! Position Tracker (§4.5): weighted-average sizing, grid-trade pairing,
//! and drawdown tracking.
//!
//! Owns the buy/sell, long/short, flip/partial position-update branches
//! and the pending-slot pairing per grid index behind one struct.

use crate::types::{GridOrder, GridPosition, GridStats, GridTrade, OrderSide};
use chrono::Utc;
use log::info;
use std::collections::HashMap;

struct PendingFill {
    price: f64,
    qty: f64,
}

pub struct PositionTracker {
    position: GridPosition,
    stats: GridStats,
    pending_buys: HashMap<usize, PendingFill>,
    pending_sells: HashMap<usize, PendingFill>,
    trades: Vec<GridTrade>,
    peak: f64,
    current_dd: f64,
    max_dd: f64,
    fee_rate: f64,
}

impl PositionTracker {
    pub fn new(symbol: impl Into<String>, fee_rate: f64) -> Self {
        Self {
            position: GridPosition::flat(symbol),
            stats: GridStats::default(),
            pending_buys: HashMap::new(),
            pending_sells: HashMap::new(),
            trades: Vec::new(),
            peak: 0.0,
            current_dd: 0.0,
            max_dd: 0.0,
            fee_rate,
        }
    }

    /// Seed the tracker with an adopted venue position (startup step 5,
    /// "resume" path).
    pub fn adopt(&mut self, size: f64, entry_price: f64) {
        self.position.size = size;
        self.position.entry_price = entry_price;
    }

    pub fn position(&self) -> &GridPosition {
        &self.position
    }

    pub fn stats(&self) -> &GridStats {
        &self.stats
    }

    pub fn trades(&self) -> &[GridTrade] {
        &self.trades
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_dd
    }

    pub fn current_drawdown(&self) -> f64 {
        self.current_dd
    }

    /// Apply a fill to the running position, update weighted-average
    /// entry and realized P&L per the five size-update rules, and route
    /// the fill into the pending-pairing tables. Returns the completed
    /// `GridTrade` if this fill paired with a prior fill at the same
    /// index.
    pub fn apply_fill(&mut self, order: &GridOrder) -> Option<GridTrade> {
        let qty = order.quantity;
        let price = order.fill_price.unwrap_or(order.price);

        match order.side {
            OrderSide::Buy => self.apply_buy(qty, price),
            OrderSide::Sell => self.apply_sell(qty, price),
        }

        self.stats.total_volume += qty * price;

        let completed = match order.side {
            OrderSide::Buy => {
                self.pending_buys.insert(order.grid_index, PendingFill { price, qty });
                self.try_complete(order.grid_index)
            }
            OrderSide::Sell => {
                self.pending_sells.insert(order.grid_index, PendingFill { price, qty });
                self.try_complete(order.grid_index)
            }
        };

        if let Some(trade) = &completed {
            self.record_trade(trade.clone());
        }

        completed
    }

    fn apply_buy(&mut self, qty: f64, price: f64) {
        let size = self.position.size;
        if size >= 0.0 {
            let new_size = size + qty;
            self.position.entry_price = if new_size > 0.0 {
                (size * self.position.entry_price + qty * price) / new_size
            } else {
                self.position.entry_price
            };
            self.position.size = new_size;
        } else {
            let new_size = size + qty;
            if new_size >= 0.0 {
                let realized = (self.position.entry_price - price) * size.abs();
                self.position.realized_pnl += realized;
                self.position.entry_price = price;
                self.position.size = new_size;
            } else {
                let realized = (self.position.entry_price - price) * qty;
                self.position.realized_pnl += realized;
                self.position.size = new_size;
            }
        }
    }

    fn apply_sell(&mut self, qty: f64, price: f64) {
        let size = self.position.size;
        if size > 0.0 {
            let new_size = size - qty;
            if new_size <= 0.0 {
                let realized = (price - self.position.entry_price) * size;
                self.position.realized_pnl += realized;
                self.position.entry_price = price;
                self.position.size = new_size;
            } else {
                let realized = (price - self.position.entry_price) * qty;
                self.position.realized_pnl += realized;
                self.position.size = new_size;
            }
        } else {
            let abs_size = size.abs();
            let new_abs = abs_size + qty;
            self.position.entry_price = if new_abs > 0.0 {
                (abs_size * self.position.entry_price + qty * price) / new_abs
            } else {
                self.position.entry_price
            };
            self.position.size = size - qty;
        }
    }

    fn try_complete(&mut self, index: usize) -> Option<GridTrade> {
        let buy = self.pending_buys.get(&index)?;
        let sell = self.pending_sells.get(&index)?;

        let gross = sell.price * sell.qty - buy.price * buy.qty;
        let fees = (buy.price * buy.qty + sell.price * sell.qty) * self.fee_rate;
        let profit = gross - fees;
        let profit_pct = if buy.price * buy.qty != 0.0 {
            profit / (buy.price * buy.qty) * 100.0
        } else {
            0.0
        };

        let buy_order = GridOrder {
            grid_index: index,
            order_id: String::new(),
            client_order_id: String::new(),
            symbol: self.position.symbol.clone(),
            side: OrderSide::Buy,
            price: buy.price,
            quantity: buy.qty,
            status: crate::types::GridLevelStatus::Filled,
            created_at: Utc::now(),
            filled_at: Some(Utc::now()),
            fill_price: Some(buy.price),
            commission: None,
        };
        let sell_order = GridOrder {
            grid_index: index,
            order_id: String::new(),
            client_order_id: String::new(),
            symbol: self.position.symbol.clone(),
            side: OrderSide::Sell,
            price: sell.price,
            quantity: sell.qty,
            status: crate::types::GridLevelStatus::Filled,
            created_at: Utc::now(),
            filled_at: Some(Utc::now()),
            fill_price: Some(sell.price),
            commission: None,
        };

        let trade = GridTrade {
            buy_order,
            sell_order,
            profit,
            profit_pct,
            completed_at: Utc::now(),
        };

        self.pending_buys.remove(&index);
        self.pending_sells.remove(&index);
        Some(trade)
    }

    fn record_trade(&mut self, trade: GridTrade) {
        self.stats.total_trades += 1;
        if trade.profit > 0.0 {
            self.stats.winning_trades += 1;
        } else {
            self.stats.losing_trades += 1;
        }
        self.stats.grid_profit += trade.profit;
        self.stats.fees_paid += (trade.buy_order.price * trade.buy_order.quantity
            + trade.sell_order.price * trade.sell_order.quantity)
            * self.fee_rate;
        self.stats.update_metrics();
        self.position.total_trades += 1;
        info!(
            "grid trade completed at index {}: profit={:.4} ({:.2}%)",
            trade.buy_order.grid_index, trade.profit, trade.profit_pct
        );
        self.trades.push(trade);
    }

    /// Recompute unrealized P&L and drive drawdown tracking (§4.5).
    pub fn update_current_price(&mut self, price: f64) {
        self.position.current_price = price;
        self.position.unrealized_pnl = if self.position.size > 0.0 {
            (price - self.position.entry_price) * self.position.size
        } else if self.position.size < 0.0 {
            (self.position.entry_price - price) * self.position.size.abs()
        } else {
            0.0
        };
        self.update_drawdown();
    }

    fn update_drawdown(&mut self) {
        let current_value = self.position.realized_pnl + self.position.unrealized_pnl;
        if current_value > self.peak {
            self.peak = current_value;
            self.current_dd = 0.0;
        } else {
            self.current_dd = self.peak - current_value;
        }
        self.max_dd = self.max_dd.max(self.current_dd);
        self.stats.current_drawdown = self.current_dd;
        self.stats.max_drawdown = self.max_dd;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GridLevelStatus;

    fn order(index: usize, side: OrderSide, price: f64, qty: f64) -> GridOrder {
        GridOrder {
            grid_index: index,
            order_id: format!("o-{index}"),
            client_order_id: format!("c-{index}"),
            symbol: "BTCUSDT".to_string(),
            side,
            price,
            quantity: qty,
            status: GridLevelStatus::Filled,
            created_at: Utc::now(),
            filled_at: Some(Utc::now()),
            fill_price: Some(price),
            commission: None,
        }
    }

    #[test]
    fn buy_into_long_updates_weighted_average_entry() {
        let mut tracker = PositionTracker::new("BTCUSDT", 0.001);
        tracker.apply_fill(&order(0, OrderSide::Buy, 42000.0, 0.01));
        assert_eq!(tracker.position().size, 0.01);
        assert_eq!(tracker.position().entry_price, 42000.0);

        tracker.apply_fill(&order(1, OrderSide::Buy, 44000.0, 0.01));
        assert_eq!(tracker.position().size, 0.02);
        assert!((tracker.position().entry_price - 43000.0).abs() < 1e-9);
    }

    #[test]
    fn grid_trade_pairs_by_index_and_computes_profit_like_s4() {
        let mut tracker = PositionTracker::new("BTCUSDT", 0.001);
        tracker.apply_fill(&order(12, OrderSide::Buy, 42666.67, 0.004));
        let trade = tracker.apply_fill(&order(12, OrderSide::Sell, 43000.0, 0.004));
        let trade = trade.expect("pair should complete");
        assert!((trade.profit - 0.991).abs() < 0.01, "profit={}", trade.profit);
        assert_eq!(tracker.stats().total_trades, 1);
        assert_eq!(tracker.stats().winning_trades, 1);
    }

    #[test]
    fn flip_from_long_to_short_realizes_pnl_and_resets_entry() {
        let mut tracker = PositionTracker::new("BTCUSDT", 0.001);
        tracker.apply_fill(&order(0, OrderSide::Buy, 42000.0, 0.01));
        tracker.apply_fill(&order(1, OrderSide::Sell, 43000.0, 0.02));
        assert!((tracker.position().size - (-0.01)).abs() < 1e-9);
        assert_eq!(tracker.position().entry_price, 43000.0);
        assert!(tracker.position().realized_pnl > 0.0);
    }

    #[test]
    fn drawdown_tracks_peak_and_resets_on_new_high() {
        let mut tracker = PositionTracker::new("BTCUSDT", 0.001);
        tracker.apply_fill(&order(0, OrderSide::Buy, 42000.0, 0.01));
        tracker.update_current_price(43000.0);
        assert_eq!(tracker.current_drawdown(), 0.0);
        tracker.update_current_price(41000.0);
        assert!(tracker.current_drawdown() > 0.0);
        assert_eq!(tracker.max_drawdown(), tracker.current_drawdown());
    }
}
