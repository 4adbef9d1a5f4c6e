//! Consecutive-loss circuit breaker (§4.6 Risk Monitor).
//!
//! Trip/cooldown/reset shape narrowed to the one trigger the kernel's Risk
//! Monitor owns here — daily-loss and drawdown limits are evaluated
//! directly against `GridStats` in the Risk Monitor instead.

use log::{error, info, warn};
use std::time::{Duration, Instant};

const MAX_CONSECUTIVE_LOSSES: u32 = 5;
const COOLDOWN_SECS: u64 = 300;

#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_losses: u32,
    tripped_at: Option<Instant>,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            consecutive_losses: 0,
            tripped_at: None,
            cooldown: Duration::from_secs(COOLDOWN_SECS),
        }
    }

    /// Record the outcome of a closed grid trade (§4.1 profit formula; a
    /// negative `net_profit` counts as a loss).
    pub fn record_trade(&mut self, net_profit: f64) {
        if net_profit < 0.0 {
            self.consecutive_losses += 1;
            warn!(
                "losing trade recorded, consecutive={}/{}",
                self.consecutive_losses, MAX_CONSECUTIVE_LOSSES
            );
            if self.consecutive_losses >= MAX_CONSECUTIVE_LOSSES && self.tripped_at.is_none() {
                self.trip();
            }
        } else if net_profit > 0.0 && self.consecutive_losses > 0 {
            info!("winning trade broke a {}-loss streak", self.consecutive_losses);
            self.consecutive_losses = 0;
        }
    }

    fn trip(&mut self) {
        error!(
            "circuit breaker tripped: {} consecutive losing trades, freezing placements for {}s",
            self.consecutive_losses,
            self.cooldown.as_secs()
        );
        self.tripped_at = Some(Instant::now());
    }

    /// Whether new order placements are currently frozen. Clears the trip
    /// once the cooldown has elapsed.
    pub fn is_frozen(&mut self) -> bool {
        match self.tripped_at {
            Some(at) if at.elapsed() >= self.cooldown => {
                info!("circuit breaker cooldown elapsed, resuming placements");
                self.tripped_at = None;
                self.consecutive_losses = 0;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.tripped_at.map(|at| {
            let elapsed = at.elapsed();
            if elapsed < self.cooldown {
                self.cooldown - elapsed
            } else {
                Duration::ZERO
            }
        })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_five_consecutive_losses() {
        let mut breaker = CircuitBreaker::new();
        for _ in 0..4 {
            breaker.record_trade(-10.0);
            assert!(!breaker.is_frozen());
        }
        breaker.record_trade(-10.0);
        assert!(breaker.is_frozen());
    }

    #[test]
    fn win_resets_streak() {
        let mut breaker = CircuitBreaker::new();
        for _ in 0..3 {
            breaker.record_trade(-10.0);
        }
        breaker.record_trade(10.0);
        assert_eq!(breaker.consecutive_losses(), 0);
        assert!(!breaker.is_frozen());
    }
}
