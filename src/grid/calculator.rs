//! Ladder construction, side assignment, and trailing re-centering (§4.1).
//!
//! Generalizes a fixed "N levels either side of the last trade price" loop
//! into an explicit lower/upper/N ladder with two spacing schemes, plus a
//! band shift on breakout for trailing grids.

use crate::config::GridConfig;
use crate::types::{GridLevel, GridType, OrderSide};

/// Minimum distance from `p*`, as a fraction of price, below which a level
/// would execute immediately on placement or provide no edge (§4.1).
pub const MIN_DISTANCE_PCT: f64 = 0.0005;

pub struct GridCalculator;

impl GridCalculator {
    /// Raw ladder prices, no side assignment yet. `price[0] == lower`,
    /// `price[N-1] == upper` exactly for arithmetic, within one tick for
    /// geometric.
    pub fn ladder_prices(lower: f64, upper: f64, count: usize, grid_type: GridType) -> Vec<f64> {
        if count < 2 {
            return vec![lower];
        }
        match grid_type {
            GridType::Arithmetic => {
                let step = (upper - lower) / (count - 1) as f64;
                (0..count).map(|i| lower + step * i as f64).collect()
            }
            GridType::Geometric => {
                let ratio = (upper / lower).powf(1.0 / (count - 1) as f64);
                (0..count).map(|i| lower * ratio.powi(i as i32)).collect()
            }
        }
    }

    /// Assign a side to every level relative to the current price, per the
    /// direction's rule in §4.1.
    pub fn build_levels(config: &GridConfig, current_price: f64) -> Vec<GridLevel> {
        let prices = Self::ladder_prices(
            config.lower_price,
            config.upper_price,
            config.grid_count,
            config.grid_type,
        );
        let qty = config.investment_per_grid() / current_price;

        prices
            .into_iter()
            .enumerate()
            .map(|(index, price)| {
                let side = Self::assign_side(config.position_direction, price, current_price);
                GridLevel::new(index, price, side, qty)
            })
            .collect()
    }

    fn assign_side(
        direction: crate::types::PositionDirection,
        price: f64,
        current_price: f64,
    ) -> OrderSide {
        use crate::types::PositionDirection::*;
        match direction {
            Long => {
                if price < current_price {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                }
            }
            Short => {
                if price > current_price {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                }
            }
            Neutral => {
                if price < current_price {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                }
            }
        }
    }

    /// Levels to actually place at startup: drop anything that would cross
    /// the book immediately, or that sits within `MIN_DISTANCE_PCT` of
    /// `p*` regardless of side (§4.1 initial-order skip filter).
    pub fn initial_orders(levels: &[GridLevel], current_price: f64) -> Vec<GridLevel> {
        levels
            .iter()
            .filter(|level| {
                let distance_pct = (level.price - current_price).abs() / current_price;
                if distance_pct < MIN_DISTANCE_PCT {
                    return false;
                }
                match level.side {
                    OrderSide::Buy => level.price <= current_price,
                    OrderSide::Sell => level.price >= current_price,
                }
            })
            .cloned()
            .collect()
    }

    /// New `(lower, upper)` band after a trailing breakout, or `None` if no
    /// re-ladder is warranted. Preserves `upper - lower`, split 40/60 below
    /// and above the new pivot (§4.1).
    pub fn trailing_band(
        config: &GridConfig,
        current_price: f64,
    ) -> Option<(f64, f64)> {
        let range = config.price_range();
        if config.trailing_up && current_price > config.upper_price * 1.05 {
            Some((current_price - range * 0.4, current_price + range * 0.6))
        } else if config.trailing_down && current_price < config.lower_price * 0.95 {
            Some((current_price - range * 0.6, current_price + range * 0.4))
        } else {
            None
        }
    }

    /// Net result of closing one grid round-trip: `(gross, fees, net)`
    /// (§4.1 profit formula).
    pub fn trade_profit(buy_price: f64, sell_price: f64, qty: f64, fee_rate: f64) -> (f64, f64, f64) {
        let gross = (sell_price - buy_price) * qty;
        let fees = (sell_price + buy_price) * qty * fee_rate;
        let net = gross - fees;
        (gross, fees, net)
    }

    /// `net / (buy_price * qty) * 100`, the percentage form of `trade_profit`.
    pub fn trade_profit_pct(buy_price: f64, qty: f64, net: f64) -> f64 {
        if buy_price * qty != 0.0 {
            net / (buy_price * qty) * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::types::{OrderType, PositionDirection, TimeInForce};

    fn base_config() -> GridConfig {
        GridConfig {
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
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            post_only: true,
            trailing_up: false,
            trailing_down: false,
            cancel_orders_on_stop: true,
            close_position_on_stop: false,
            accept_high_risk: false,
        }
    }

    #[test]
    fn arithmetic_ladder_matches_s1() {
        let prices = GridCalculator::ladder_prices(42000.0, 45000.0, 10, GridType::Arithmetic);
        assert_eq!(prices.first().copied(), Some(42000.0));
        assert_eq!(prices.last().copied(), Some(45000.0));
        assert!((prices[1] - 42333.333333).abs() < 1e-3);
    }

    #[test]
    fn geometric_ratio_is_constant() {
        let prices = GridCalculator::ladder_prices(42000.0, 45000.0, 10, GridType::Geometric);
        let r0 = prices[1] / prices[0];
        let r1 = prices[2] / prices[1];
        assert!((r0 - r1).abs() < 1e-9);
    }

    #[test]
    fn long_side_assignment_splits_at_pivot() {
        let config = base_config();
        let levels = GridCalculator::build_levels(&config, 43500.0);
        let buys = levels.iter().filter(|l| l.side == OrderSide::Buy).count();
        let sells = levels.iter().filter(|l| l.side == OrderSide::Sell).count();
        assert_eq!(buys, 5);
        assert_eq!(sells, 5);
    }

    #[test]
    fn trailing_up_recenters_band_40_60() {
        let mut config = base_config();
        config.trailing_up = true;
        let band = GridCalculator::trailing_band(&config, 47300.0);
        assert_eq!(band, Some((46100.0, 48100.0)));
    }

    #[test]
    fn no_reladder_without_trailing_flag() {
        let config = base_config();
        assert_eq!(GridCalculator::trailing_band(&config, 47300.0), None);
    }

    #[test]
    fn skip_filter_drops_crossing_and_too_close_levels() {
        let config = base_config();
        let levels = GridCalculator::build_levels(&config, 43500.0);
        let initial = GridCalculator::initial_orders(&levels, 43500.0);
        for level in &initial {
            match level.side {
                OrderSide::Buy => assert!(level.price <= 43500.0),
                OrderSide::Sell => assert!(level.price >= 43500.0),
            }
        }
    }
}
