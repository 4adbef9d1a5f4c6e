//! Configuration types and loading (§6 Configuration format).
//!
//! `GridConfig` is the kernel-facing document: one flat object, enum
//! fields as case-insensitive strings. `EngineConfig`
//! wraps it with the runtime knobs the engine needs to actually run
//! (exchange name, intervals, timeouts) that have no bearing on the grid
//! math itself.

mod loader;

pub use loader::ConfigLoader;

use crate::error::{GridEngineError, Result};
use crate::types::{GridType, OrderType, PositionDirection, TimeInForce};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GridConfig {
    pub symbol: String,
    pub grid_type: GridType,
    pub position_direction: PositionDirection,
    pub lower_price: f64,
    pub upper_price: f64,
    pub grid_count: usize,
    pub total_investment: f64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,

    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub max_position_size: Option<f64>,
    #[serde(default)]
    pub max_drawdown_percentage: Option<f64>,

    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    #[serde(default = "default_tif")]
    pub time_in_force: TimeInForce,
    #[serde(default = "default_true")]
    pub post_only: bool,

    #[serde(default)]
    pub trailing_up: bool,
    #[serde(default)]
    pub trailing_down: bool,
    #[serde(default = "default_true")]
    pub cancel_orders_on_stop: bool,
    #[serde(default)]
    pub close_position_on_stop: bool,

    /// Explicit override required to start despite Safety Checker errors or
    /// a risk_score above 50 (§4.3).
    #[serde(default)]
    pub accept_high_risk: bool,
}

fn default_leverage() -> u32 {
    1
}
fn default_order_type() -> OrderType {
    OrderType::Limit
}
fn default_tif() -> TimeInForce {
    TimeInForce::Gtc
}
fn default_true() -> bool {
    true
}

impl GridConfig {
    /// Validate and return a list of human-readable errors (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.upper_price <= self.lower_price {
            errors.push("upper_price must be greater than lower_price".to_string());
        }
        if self.grid_count < 2 {
            errors.push("grid_count must be at least 2".to_string());
        }
        if self.total_investment <= 0.0 {
            errors.push("total_investment must be positive".to_string());
        }
        if self.leverage < 1 || self.leverage > 125 {
            errors.push("leverage must be between 1 and 125".to_string());
        }
        if let Some(sl) = self.stop_loss {
            match self.position_direction {
                PositionDirection::Long if sl >= self.lower_price => {
                    errors.push("stop_loss must be below lower_price for long grids".to_string());
                }
                PositionDirection::Short if sl <= self.upper_price => {
                    errors.push("stop_loss must be above upper_price for short grids".to_string());
                }
                _ => {}
            }
        }

        errors
    }

    pub fn require_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GridEngineError::ConfigInvalid(errors.join("; ")))
        }
    }

    pub fn price_range(&self) -> f64 {
        self.upper_price - self.lower_price
    }

    /// 2% cushion reserved for fees/slippage — a contract, not a free parameter.
    pub fn investment_per_grid(&self) -> f64 {
        self.total_investment * 0.98 / self.grid_count as f64
    }
}

/// Runtime settings wrapping a `GridConfig` — exchange selection, polling
/// intervals, and the ambient knobs §5/§6 name that aren't part of the grid
/// math proper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    pub grid: GridConfig,
    #[serde(default = "default_exchange")]
    pub exchange_name: String,
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub auto_resume: bool,
    /// If a pre-existing position is found and `auto_resume` is false,
    /// close it via a market reduce-only order instead of aborting startup
    /// (§4.6 step 5, option b). Has no effect when `auto_resume` is set.
    #[serde(default)]
    pub close_existing_on_conflict: bool,
    #[serde(default = "default_min_order_gap_ms")]
    pub min_order_gap_ms: u64,
    #[serde(default = "default_venue_min_qty")]
    pub venue_min_qty: f64,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
}

fn default_exchange() -> String {
    "simulated".to_string()
}
fn default_monitor_interval_ms() -> u64 {
    1000
}
fn default_shutdown_timeout_secs() -> u64 {
    5
}
fn default_min_order_gap_ms() -> u64 {
    100
}
fn default_venue_min_qty() -> f64 {
    0.001
}
fn default_fee_rate() -> f64 {
    0.001
}

impl EngineConfig {
    pub fn auto_resume_from_env() -> bool {
        std::env::var("GRIDBOT_AUTO_RESUME")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}
