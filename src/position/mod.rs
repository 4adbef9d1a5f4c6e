//! Position and P&L tracking (§4.5).

pub mod tracker;

pub use tracker::PositionTracker;
