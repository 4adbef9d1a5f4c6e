//! Perpetual-futures grid trading engine kernel.
//!
//! Given a price band, grid count, notional, leverage, and direction, the
//! engine computes a ladder of resting limit orders, seeds an initial
//! position sized so that full execution of the ladder returns inventory
//! to zero, places and reconciles orders against a pluggable exchange
//! adapter, reacts to fills, and enforces safety/risk policy.

#![warn(rust_2018_idioms, unreachable_pub)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod engine;
pub mod error;
pub mod grid;
pub mod order;
pub mod persistence;
pub mod position;
pub mod risk;
pub mod types;
pub mod venue;

pub use config::{ConfigLoader, EngineConfig, GridConfig};
pub use engine::GridEngine;
pub use error::{GridEngineError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub name: &'static str,
    pub rust_version: &'static str,
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
    version: VERSION,
    name: NAME,
    rust_version: "1.75",
};

/// Install the env_logger backend if `RUST_LOG` hasn't already selected one.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::try_init();
}

pub mod prelude {
    pub use crate::config::{EngineConfig, GridConfig};
    pub use crate::engine::GridEngine;
    pub use crate::error::{GridEngineError, Result};
    pub use crate::types::{GridLevel, GridOrder, GridPosition, GridTrade, OrderSide, PositionDirection};
    pub use crate::venue::{ExchangeAdapter, SimulatedAdapter, SymbolPrecisionRegistry};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
