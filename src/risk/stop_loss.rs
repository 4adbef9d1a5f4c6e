//! Absolute stop-loss / take-profit triggers (§4.6 Risk Monitor).
//!
//! The kernel's stop-loss is a fixed price level chosen at configuration
//! time (`GridConfig::stop_loss`); no trailing high-water-mark bookkeeping
//! is needed, just the trigger-and-log check.

use crate::types::PositionDirection;
use log::{info, warn};

pub struct StopLossMonitor {
    stop_loss: Option<f64>,
    take_profit_pct: Option<f64>,
    direction: PositionDirection,
}

impl StopLossMonitor {
    pub fn new(
        stop_loss: Option<f64>,
        take_profit_pct: Option<f64>,
        direction: PositionDirection,
    ) -> Self {
        Self {
            stop_loss,
            take_profit_pct,
            direction,
        }
    }

    /// `p* <= stop_loss` for Long, `p* >= stop_loss` for Short (§4.6).
    pub fn should_stop_loss(&self, current_price: f64) -> bool {
        let Some(level) = self.stop_loss else {
            return false;
        };
        let triggered = match self.direction {
            PositionDirection::Long => current_price <= level,
            PositionDirection::Short => current_price >= level,
            PositionDirection::Neutral => false,
        };
        if triggered {
            warn!("stop-loss triggered at {current_price} (level {level})");
        }
        triggered
    }

    /// Triggers when unrealized P&L percentage crosses `take_profit_pct`.
    pub fn should_take_profit(&self, unrealized_pnl_pct: f64) -> bool {
        let Some(threshold) = self.take_profit_pct else {
            return false;
        };
        let triggered = unrealized_pnl_pct >= threshold;
        if triggered {
            info!("take-profit triggered at {unrealized_pnl_pct:.2}% (threshold {threshold:.2}%)");
        }
        triggered
    }
}
