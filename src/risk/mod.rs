//! Risk management: pre-flight safety gate, stop-loss/take-profit, and the
//! consecutive-loss circuit breaker (§4.3, §4.6).

pub mod circuit_breaker;
pub mod safety;
pub mod stop_loss;

pub use circuit_breaker::CircuitBreaker;
pub use safety::{Action, SafetyCheckResult, SafetyChecker};
pub use stop_loss::StopLossMonitor;
