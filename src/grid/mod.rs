//! Grid construction and capital sizing (§4.1, §4.2).

pub mod calculator;
pub mod sizer;

pub use calculator::GridCalculator;
pub use sizer::{PositionSizer, SizingReport};
