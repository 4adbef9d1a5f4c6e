//! Per-symbol price/quantity precision.
//!
//! The reference implementation keeps this behind a process-wide singleton
//! (`SymbolPrecisionManager.get_instance(...)`). §9 is explicit that the
//! kernel must not do that: the registry is built once by the caller and
//! passed in as a collaborator to whatever needs it (Safety Checker,
//! Position Sizer, Order Manager).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct SymbolPrecision {
    pub price_decimals: u32,
    pub quantity_decimals: u32,
    pub min_quantity: f64,
    pub maintenance_margin_rate: f64,
}

impl Default for SymbolPrecision {
    fn default() -> Self {
        Self {
            price_decimals: 2,
            quantity_decimals: 3,
            min_quantity: 0.001,
            maintenance_margin_rate: 0.02,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolPrecisionRegistry {
    entries: HashMap<String, SymbolPrecision>,
    default: SymbolPrecision,
}

impl SymbolPrecisionRegistry {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            "BTCUSDT".to_string(),
            SymbolPrecision {
                price_decimals: 2,
                quantity_decimals: 4,
                min_quantity: 0.001,
                maintenance_margin_rate: 0.005,
            },
        );
        entries.insert(
            "ETHUSDT".to_string(),
            SymbolPrecision {
                price_decimals: 2,
                quantity_decimals: 3,
                min_quantity: 0.001,
                maintenance_margin_rate: 0.01,
            },
        );
        Self {
            entries,
            default: SymbolPrecision::default(),
        }
    }

    pub fn get(&self, symbol: &str) -> SymbolPrecision {
        self.entries.get(symbol).copied().unwrap_or(self.default)
    }

    pub fn insert(&mut self, symbol: impl Into<String>, precision: SymbolPrecision) {
        self.entries.insert(symbol.into(), precision);
    }

    /// Round a quantity down to the symbol's quantity precision, floored at
    /// the venue minimum (§4.2).
    pub fn floor_quantity(&self, symbol: &str, qty: f64) -> f64 {
        let p = self.get(symbol);
        let factor = 10f64.powi(p.quantity_decimals as i32);
        let floored = (qty.max(p.min_quantity) * factor).round() / factor;
        floored.max(p.min_quantity)
    }

    pub fn round_price(&self, symbol: &str, price: f64) -> f64 {
        let p = self.get(symbol);
        let factor = 10f64.powi(p.price_decimals as i32);
        (price * factor).round() / factor
    }

    /// One quantity tick for the symbol — the `ε` used by closure-invariant
    /// verification (§4.2, §8 invariant 3/4).
    pub fn quantity_tick(&self, symbol: &str) -> f64 {
        10f64.powi(-(self.get(symbol).quantity_decimals as i32))
    }
}

impl Default for SymbolPrecisionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
