use colony_core::{EventId, ResourceType, ValidationError};
use colony_econ::EconError;
use persistence::StoreError;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Failure of one engine operation.
///
/// An idempotency collision is not an error: the ledger reports it as a skip.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("insufficient {resource}: need {needed}, have {available}")]
    InsufficientResource {
        resource: ResourceType,
        needed: Decimal,
        available: Decimal,
    },
    #[error("no liquidity to fill {requested} {resource}")]
    InsufficientLiquidity {
        resource: ResourceType,
        requested: Decimal,
    },
    #[error("concurrent update of {0}, retry with fresh state")]
    ConcurrencyConflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("event {0} is not accepting participants")]
    EventClosed(EventId),
    #[error("unit timed out after {0:?}")]
    UnitTimeout(Duration),
    #[error("store failure: {0}")]
    Store(StoreError),
    #[error("economy failure: {0}")]
    Econ(#[from] EconError),
}

impl EngineError {
    /// Conflicts and timeouts may succeed when retried with fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ConcurrencyConflict(_) | EngineError::UnitTimeout(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(v) => EngineError::Validation(v),
            StoreError::Conflict(what) => EngineError::ConcurrencyConflict(what),
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Insufficient {
                resource,
                needed,
                available,
            } => EngineError::InsufficientResource {
                resource,
                needed,
                available,
            },
            other => EngineError::Store(other),
        }
    }
}
