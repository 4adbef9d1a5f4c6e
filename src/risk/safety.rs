//! Pre-flight Safety Checker (§4.3).
//!
//! Eight sub-checks feeding one scoring table, written as a plain struct
//! with constants and a report (compare `risk/circuit_breaker.rs`'s
//! config-driven constants) rather than class-with-instance-state.

use crate::config::GridConfig;
use crate::types::PositionDirection;
use crate::venue::SymbolPrecisionRegistry;
use log::{info, warn};

const MAX_SAFE_LEVERAGE: u32 = 20;
const WARNING_LEVERAGE: u32 = 10;
const MIN_GRID_SPACING_PCT: f64 = 0.1;
const MAX_POSITION_PCT_OF_EQUITY: f64 = 50.0;
const MIN_LIQUIDATION_DISTANCE_PCT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    DoNotStart,
    ModifyRequired,
    ProceedWithCaution,
    SafeToProceed,
}

#[derive(Debug, Clone)]
pub struct SafetyCheckResult {
    pub passed: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub risk_score: f64,
    pub liquidation_price: f64,
    pub max_loss_usd: f64,
    pub recommendations: Vec<String>,
    pub action: Action,
}

impl SafetyCheckResult {
    /// Whether startup may proceed given the user's override flag (§4.3).
    pub fn allows_startup(&self, accept_high_risk: bool) -> bool {
        if !self.errors.is_empty() {
            return accept_high_risk;
        }
        if self.risk_score > 50.0 {
            return accept_high_risk;
        }
        true
    }
}

pub struct SafetyChecker;

impl SafetyChecker {
    pub fn check(
        config: &GridConfig,
        current_price: f64,
        equity: Option<f64>,
        precision: &SymbolPrecisionRegistry,
    ) -> SafetyCheckResult {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let mut recommendations = Vec::new();
        let mut risk_score = 0.0f64;

        let symbol_precision = precision.get(&config.symbol);
        let mm_rate = symbol_precision.maintenance_margin_rate;

        // 1. Leverage
        if config.leverage > MAX_SAFE_LEVERAGE {
            errors.push(format!(
                "leverage {} exceeds the maximum safe leverage of {}",
                config.leverage, MAX_SAFE_LEVERAGE
            ));
            risk_score += 40.0;
            recommendations.push(format!("reduce leverage to {} or below", MAX_SAFE_LEVERAGE.min(10)));
        } else if config.leverage > WARNING_LEVERAGE {
            warnings.push(format!(
                "leverage {} is above the conservative threshold of {}",
                config.leverage, WARNING_LEVERAGE
            ));
            risk_score += 20.0;
        }
        if config.leverage >= 50 {
            risk_score += (config.leverage as f64 - 50.0) * 0.5;
        }

        // 2 & 3. Liquidation distance
        let liq_distance_pct = (100.0 - mm_rate * 100.0) / config.leverage as f64;
        let liquidation_price = match config.position_direction {
            PositionDirection::Short => current_price * (1.0 + liq_distance_pct / 100.0),
            _ => current_price * (1.0 - liq_distance_pct / 100.0),
        };
        match config.position_direction {
            PositionDirection::Long => {
                if liquidation_price > config.lower_price {
                    errors.push(format!(
                        "liquidation price {liquidation_price:.2} intrudes into the grid band (lower {:.2})",
                        config.lower_price
                    ));
                    risk_score += 50.0;
                }
            }
            PositionDirection::Short => {
                if liquidation_price < config.upper_price {
                    errors.push(format!(
                        "liquidation price {liquidation_price:.2} intrudes into the grid band (upper {:.2})",
                        config.upper_price
                    ));
                    risk_score += 50.0;
                }
            }
            PositionDirection::Neutral => {}
        }
        let distance_to_liq_pct = if current_price != 0.0 {
            (liquidation_price - current_price).abs() / current_price * 100.0
        } else {
            0.0
        };
        if distance_to_liq_pct < MIN_LIQUIDATION_DISTANCE_PCT {
            warnings.push(format!(
                "liquidation is only {distance_to_liq_pct:.2}% away from the current price"
            ));
            risk_score += 20.0;
        }

        // 4. Grid spacing
        let spacing = config.price_range() / config.grid_count as f64;
        if spacing / config.lower_price * 100.0 < MIN_GRID_SPACING_PCT {
            warnings.push("grid spacing is below the recommended minimum of 0.1%".to_string());
            risk_score += 10.0;
        }
        if config.grid_count > 100 {
            warnings.push("grid_count above 100 increases venue rate-limit exposure".to_string());
            risk_score += 5.0;
            recommendations.push("reduce grid_count to 50".to_string());
        }

        // 5. Position vs equity
        if let Some(equity) = equity {
            if equity > 0.0 {
                let position_pct = config.total_investment * config.leverage as f64 / equity * 100.0;
                if position_pct > 80.0 {
                    errors.push(format!(
                        "position is {position_pct:.1}% of equity, exceeding the 80% hard limit"
                    ));
                    risk_score += 30.0;
                } else if position_pct > MAX_POSITION_PCT_OF_EQUITY {
                    warnings.push(format!(
                        "position is {position_pct:.1}% of equity, above the {MAX_POSITION_PCT_OF_EQUITY}% guideline"
                    ));
                    risk_score += 15.0;
                }
            }
        }

        // 6. Stop-loss
        match config.stop_loss {
            None => {
                warnings.push("no stop-loss configured".to_string());
                risk_score += 10.0;
                let suggested = match config.position_direction {
                    PositionDirection::Short => config.upper_price * 1.05,
                    _ => config.lower_price * 0.95,
                };
                recommendations.push(format!("set stop_loss near {suggested:.2}"));
            }
            Some(sl) => {
                let unprotected = match config.position_direction {
                    PositionDirection::Long => sl <= liquidation_price,
                    PositionDirection::Short => sl >= liquidation_price,
                    PositionDirection::Neutral => false,
                };
                if unprotected {
                    errors.push("stop-loss is beyond the liquidation price and offers no protection".to_string());
                    risk_score += 25.0;
                }
            }
        }

        // 7. Max loss at stop-loss / liquidation
        let loss_reference = config.stop_loss.unwrap_or(liquidation_price);
        let max_loss_usd = match config.position_direction {
            PositionDirection::Short => {
                (loss_reference - current_price).max(0.0) * config.total_investment * config.leverage as f64
                    / current_price
            }
            _ => {
                (current_price - loss_reference).max(0.0) * config.total_investment * config.leverage as f64
                    / current_price
            }
        };

        // 8. Minimum order size
        let per_level_qty = config.investment_per_grid() / current_price;
        if per_level_qty < symbol_precision.min_quantity {
            let avg_price = (config.upper_price + config.lower_price) / 2.0;
            let required_investment =
                symbol_precision.min_quantity * avg_price * config.grid_count as f64 / config.leverage as f64;
            errors.push(format!(
                "per-level quantity {per_level_qty:.6} is below the venue minimum {:.6}; total_investment must be at least {required_investment:.2}",
                symbol_precision.min_quantity
            ));
            risk_score += 50.0;
        }

        risk_score = risk_score.min(100.0);
        let action = if risk_score > 70.0 {
            Action::DoNotStart
        } else if risk_score > 50.0 {
            Action::ModifyRequired
        } else if risk_score > 30.0 {
            Action::ProceedWithCaution
        } else {
            Action::SafeToProceed
        };

        let passed = errors.is_empty();
        if passed {
            info!("safety check passed, risk_score={risk_score:.1}, action={action:?}");
        } else {
            warn!("safety check found {} error(s), risk_score={risk_score:.1}", errors.len());
        }

        SafetyCheckResult {
            passed,
            warnings,
            errors,
            risk_score,
            liquidation_price,
            max_loss_usd,
            recommendations,
            action,
        }
    }
}
