//! Closure-invariant capital sizing (§4.2).
//!
//! Long/Short/Neutral derivations in plain `f64`, with explicit rounding
//! through a precision helper at every boundary and no intermediate
//! fixed-point type. Distinct from Kelly-criterion bet sizing against a
//! win-rate estimate — this solves a different problem, closing the grid's
//! inventory to zero on full execution.

use crate::types::{GridLevel, OrderSide, PositionDirection};
use crate::venue::SymbolPrecisionRegistry;

#[derive(Debug, Clone)]
pub struct SizingReport {
    pub total_capital_usd: f64,
    pub total_capital_base: f64,
    pub initial_position: f64,
    pub initial_side: OrderSide,
    pub grid_totals: (f64, f64),
    pub capital_deployed: f64,
    pub capital_utilization: f64,
    pub will_close_to_zero: bool,
    pub final_position: f64,
}

pub struct PositionSizer;

impl PositionSizer {
    /// Size every level's quantity in place and return the initial
    /// position that must be opened before the ladder is placed, so that
    /// executing the full ladder returns net size to zero.
    pub fn size(
        levels: &mut [GridLevel],
        direction: PositionDirection,
        total_investment: f64,
        leverage: u32,
        current_price: f64,
        symbol: &str,
        precision: &SymbolPrecisionRegistry,
    ) -> (f64, OrderSide) {
        let capital_usd = total_investment * leverage as f64;
        let capital_base = capital_usd / current_price;

        let buy_count = levels.iter().filter(|l| l.side == OrderSide::Buy).count();
        let sell_count = levels.iter().filter(|l| l.side == OrderSide::Sell).count();

        let (raw_qty_buy, raw_qty_sell, _raw_initial, initial_side) = match direction {
            PositionDirection::Long => {
                Self::size_long(capital_base, buy_count, sell_count)
            }
            PositionDirection::Short => {
                Self::size_short(capital_base, buy_count, sell_count)
            }
            PositionDirection::Neutral => {
                Self::size_neutral(capital_base, buy_count, sell_count)
            }
        };

        for level in levels.iter_mut() {
            let raw = match level.side {
                OrderSide::Buy => raw_qty_buy,
                OrderSide::Sell => raw_qty_sell,
            };
            level.quantity = precision.floor_quantity(symbol, raw);
        }

        // Floors never silently break closure: recompute `initial` from the
        // actual post-floor per-level quantities (§4.2).
        let actual_buy_total: f64 = levels
            .iter()
            .filter(|l| l.side == OrderSide::Buy)
            .map(|l| l.quantity)
            .sum();
        let actual_sell_total: f64 = levels
            .iter()
            .filter(|l| l.side == OrderSide::Sell)
            .map(|l| l.quantity)
            .sum();

        let recomputed_initial = match direction {
            PositionDirection::Long => (actual_sell_total - actual_buy_total).max(0.0),
            PositionDirection::Short => (actual_buy_total - actual_sell_total).max(0.0),
            PositionDirection::Neutral => {
                if actual_sell_total > actual_buy_total {
                    actual_sell_total - actual_buy_total
                } else {
                    actual_buy_total - actual_sell_total
                }
            }
        };
        let initial = precision.floor_quantity(symbol, recomputed_initial.max(0.0));
        let initial = if recomputed_initial < precision.quantity_tick(symbol) {
            0.0
        } else {
            initial
        };

        (initial, initial_side)
    }

    fn size_long(capital_base: f64, buy_count: usize, sell_count: usize) -> (f64, f64, f64, OrderSide) {
        if sell_count == 0 {
            return (0.0, 0.0, capital_base, OrderSide::Buy);
        }
        let q_s = capital_base / sell_count as f64;
        if buy_count == 0 {
            return (0.0, q_s, sell_count as f64 * q_s, OrderSide::Buy);
        }
        let q_b = (sell_count as f64 * q_s / (buy_count as f64 + 1.0)).min(capital_base / buy_count as f64);
        let initial = sell_count as f64 * q_s - buy_count as f64 * q_b;
        (q_b, q_s, initial, OrderSide::Buy)
    }

    fn size_short(capital_base: f64, buy_count: usize, sell_count: usize) -> (f64, f64, f64, OrderSide) {
        // Mirror of `size_long` with Buy/Sell roles swapped (§4.2).
        if buy_count == 0 {
            return (0.0, 0.0, capital_base, OrderSide::Sell);
        }
        let q_b = capital_base / buy_count as f64;
        if sell_count == 0 {
            return (q_b, 0.0, buy_count as f64 * q_b, OrderSide::Sell);
        }
        let q_s = (buy_count as f64 * q_b / (sell_count as f64 + 1.0)).min(capital_base / sell_count as f64);
        let initial = buy_count as f64 * q_b - sell_count as f64 * q_s;
        (q_b, q_s, initial, OrderSide::Sell)
    }

    fn size_neutral(capital_base: f64, buy_count: usize, sell_count: usize) -> (f64, f64, f64, OrderSide) {
        let total_levels = buy_count + sell_count;
        if total_levels == 0 {
            return (0.0, 0.0, capital_base, OrderSide::Buy);
        }
        let q = capital_base / total_levels as f64;
        let buy_total = buy_count as f64 * q;
        let sell_total = sell_count as f64 * q;
        if sell_total > buy_total {
            (q, q, sell_total - buy_total, OrderSide::Buy)
        } else {
            (q, q, buy_total - sell_total, OrderSide::Sell)
        }
    }

    /// Assemble the verification report (§4.2 Verification).
    pub fn verify(
        levels: &[GridLevel],
        initial_qty: f64,
        initial_side: OrderSide,
        total_investment: f64,
        leverage: u32,
        current_price: f64,
        symbol: &str,
        precision: &SymbolPrecisionRegistry,
    ) -> SizingReport {
        let capital_usd = total_investment * leverage as f64;
        let capital_base = capital_usd / current_price;

        let buy_total: f64 = levels
            .iter()
            .filter(|l| l.side == OrderSide::Buy)
            .map(|l| l.quantity)
            .sum();
        let sell_total: f64 = levels
            .iter()
            .filter(|l| l.side == OrderSide::Sell)
            .map(|l| l.quantity)
            .sum();

        let signed_initial = match initial_side {
            OrderSide::Buy => initial_qty,
            OrderSide::Sell => -initial_qty,
        };
        let final_position = signed_initial + buy_total - sell_total;

        let deployed = initial_qty * current_price
            + levels.iter().map(|l| l.quantity * l.price).sum::<f64>();

        SizingReport {
            total_capital_usd: capital_usd,
            total_capital_base: capital_base,
            initial_position: initial_qty,
            initial_side,
            grid_totals: (buy_total, sell_total),
            capital_deployed: deployed,
            capital_utilization: if capital_usd != 0.0 {
                deployed / capital_usd * 100.0
            } else {
                0.0
            },
            will_close_to_zero: final_position.abs() < precision.quantity_tick(symbol),
            final_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridCalculator;
    use crate::types::GridType;

    fn level(index: usize, price: f64, side: OrderSide) -> GridLevel {
        GridLevel::new(index, price, side, 0.0)
    }

    #[test]
    fn balanced_long_grid_has_zero_initial() {
        let registry = SymbolPrecisionRegistry::new();
        let mut levels = vec![
            level(0, 42000.0, OrderSide::Buy),
            level(1, 42500.0, OrderSide::Buy),
            level(2, 44500.0, OrderSide::Sell),
            level(3, 45000.0, OrderSide::Sell),
        ];
        let (initial, side) = PositionSizer::size(
            &mut levels,
            PositionDirection::Long,
            1000.0,
            1,
            43500.0,
            "BTCUSDT",
            &registry,
        );
        assert_eq!(side, OrderSide::Buy);
        assert!(initial < registry.quantity_tick("BTCUSDT") * 2.0);
    }

    #[test]
    fn imbalanced_long_grid_closes_to_zero() {
        let registry = SymbolPrecisionRegistry::new();
        let mut levels = vec![
            level(0, 42000.0, OrderSide::Buy),
            level(1, 44000.0, OrderSide::Sell),
            level(2, 44500.0, OrderSide::Sell),
            level(3, 45000.0, OrderSide::Sell),
        ];
        let (initial, side) = PositionSizer::size(
            &mut levels,
            PositionDirection::Long,
            1000.0,
            1,
            43500.0,
            "BTCUSDT",
            &registry,
        );
        let report = PositionSizer::verify(
            &levels, initial, side, 1000.0, 1, 43500.0, "BTCUSDT", &registry,
        );
        assert!(report.will_close_to_zero, "final_position={}", report.final_position);
    }

    #[test]
    fn neutral_grid_assigns_initial_to_smaller_side() {
        let registry = SymbolPrecisionRegistry::new();
        let mut levels = vec![
            level(0, 42000.0, OrderSide::Buy),
            level(1, 44000.0, OrderSide::Sell),
            level(2, 44500.0, OrderSide::Sell),
        ];
        let (initial, side) = PositionSizer::size(
            &mut levels,
            PositionDirection::Neutral,
            1000.0,
            1,
            43500.0,
            "BTCUSDT",
            &registry,
        );
        assert_eq!(side, OrderSide::Buy);
        assert!(initial > 0.0);
    }

    #[test]
    fn s1_balanced_ladder_deploys_full_capital_ignoring_calculator_warning() {
        let registry = SymbolPrecisionRegistry::new();
        let config = crate::config::GridConfig {
            symbol: "BTCUSDT".to_string(),
            grid_type: GridType::Arithmetic,
            position_direction: PositionDirection::Long,
            lower_price: 42000.0,
            upper_price: 45000.0,
            grid_count: 10,
            total_investment: 1000.0,
            leverage: 1,
            stop_loss: None,
            take_profit: None,
            max_position_size: None,
            max_drawdown_percentage: None,
            order_type: crate::types::OrderType::Limit,
            time_in_force: crate::types::TimeInForce::Gtc,
            post_only: true,
            trailing_up: false,
            trailing_down: false,
            cancel_orders_on_stop: true,
            close_position_on_stop: false,
            accept_high_risk: false,
        };
        let mut levels = GridCalculator::build_levels(&config, 43500.0);
        let (initial, side) = PositionSizer::size(
            &mut levels,
            config.position_direction,
            config.total_investment,
            config.leverage,
            43500.0,
            &config.symbol,
            &registry,
        );
        let report = PositionSizer::verify(
            &levels, initial, side, config.total_investment, config.leverage, 43500.0,
            &config.symbol, &registry,
        );
        assert!(report.will_close_to_zero);
    }
}
