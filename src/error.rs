//! Error taxonomy (§7). Typed at module boundaries with `thiserror`;
//! `anyhow::Result` takes over at the CLI/integration layer where several
//! subsystems' errors need to be aggregated under one `Context`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridEngineError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("safety check blocked startup: {0}")]
    SafetyBlocked(String),

    #[error("venue call failed transiently: {0}")]
    VenueTransient(String),

    #[error("venue rejected request: {0}")]
    VenueRejection(String),

    #[error("initial position verification failed: {0}")]
    PositionVerificationFailed(String),

    #[error("position mode mismatch: {0}")]
    ModeMismatch(String),

    #[error("risk trigger active: {0}")]
    RiskTriggered(String),

    #[error("event stream disconnected: {0}")]
    StreamDisconnected(String),
}

pub type Result<T> = std::result::Result<T, GridEngineError>;
