//! Error taxonomy for the grid core (spec §7): transient transport, validation,
//! limit, duplicate, reconciliation divergence, state-store failure, unrecoverable.
//! Kinds, not exhaustive message catalogs — callers match on variant, log the cause.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transient transport error: {0}")]
    Transient(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request validation failed: {0}")]
    Validation(String),
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid price: {0}")]
    InvalidPrice(f64),
    #[error("duplicate price point at {0}")]
    DuplicatePricePoint(f64),
    #[error("order limit exceeded ({0} active)")]
    OrderLimitExceeded(usize),
    #[error("position limit exceeded")]
    PositionLimitExceeded,
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("tick size must be positive, got {0}")]
    NonPositiveTick(f64),
    #[error("lot size must be positive, got {0}")]
    NonPositiveLot(f64),
}
