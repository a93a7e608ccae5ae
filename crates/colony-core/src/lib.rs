#![deny(warnings)]

//! Core domain models and invariants for the colony economy.
//!
//! This crate defines the serializable types shared by the calculator,
//! market, event and persistence crates, the tunable [`EconomyConfig`], and
//! validation helpers guarding the invariants of player-facing inputs.

pub mod config;
pub mod model;
pub mod modifiers;

pub use config::*;
pub use model::*;
pub use modifiers::*;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Highest module level.
pub const MAX_MODULE_LEVEL: u8 = 10;

/// Decimal places kept for balances and resource quantities.
pub const QUANTITY_DP: u32 = 2;

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Text code that maps to no enum variant.
    #[error("unknown {kind}: {value}")]
    UnknownCode { kind: &'static str, value: String },
    /// Module level outside [1, 10].
    #[error("module level {0} is out of range [1, 10]")]
    LevelOutOfRange(u8),
    /// Quantities must be strictly positive.
    #[error("quantity must be > 0")]
    NonPositiveQuantity,
    /// Quantities are held in hundredths.
    #[error("quantity {0} has more than 2 decimal places")]
    QuantityTooPrecise(Decimal),
    /// Money must be non-negative.
    #[error("negative monetary value is invalid")]
    NegativeMoney,
    /// The base currency has no market.
    #[error("{0} is the base currency and cannot be traded")]
    BaseCurrencyNotTradable(ResourceType),
    /// Price bands need 0 < min <= current <= max.
    #[error("invalid price band for {0}")]
    InvalidPriceBand(ResourceType),
    /// Names must be non-empty.
    #[error("name must not be empty")]
    EmptyName,
    /// Event windows need start < end.
    #[error("event window must end after it starts")]
    InvalidEventWindow,
    /// Status transitions only move forward.
    #[error("cannot move event from {from} to {to}")]
    InvalidTransition { from: EventStatus, to: EventStatus },
    /// Producer already owns the maximum number of modules or crew.
    #[error("{kind} limit of {limit} reached")]
    LimitReached { kind: &'static str, limit: usize },
}

/// Validate a module level.
pub fn validate_module_level(level: u8) -> Result<(), ValidationError> {
    if !(1..=MAX_MODULE_LEVEL).contains(&level) {
        return Err(ValidationError::LevelOutOfRange(level));
    }
    Ok(())
}

/// Validate a display name.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(())
}

/// Validate a market order before any state is read.
pub fn validate_trade_request(
    resource: ResourceType,
    quantity: Decimal,
) -> Result<(), ValidationError> {
    if resource.is_base_currency() {
        return Err(ValidationError::BaseCurrencyNotTradable(resource));
    }
    if quantity <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveQuantity);
    }
    if quantity.normalize().scale() > QUANTITY_DP {
        return Err(ValidationError::QuantityTooPrecise(quantity));
    }
    Ok(())
}

/// Validate a persisted price row.
pub fn validate_resource_price(p: &ResourcePrice) -> Result<(), ValidationError> {
    if p.resource.is_base_currency() {
        return Err(ValidationError::BaseCurrencyNotTradable(p.resource));
    }
    if p.min_price <= Decimal::ZERO
        || p.min_price > p.max_price
        || p.current_price < p.min_price
        || p.current_price > p.max_price
    {
        return Err(ValidationError::InvalidPriceBand(p.resource));
    }
    Ok(())
}

/// Validate an event time window.
pub fn validate_event_window(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if ends_at <= starts_at {
        return Err(ValidationError::InvalidEventWindow);
    }
    Ok(())
}

/// Validate a status change.
pub fn validate_transition(from: EventStatus, to: EventStatus) -> Result<(), ValidationError> {
    if !from.can_transition_to(to) {
        return Err(ValidationError::InvalidTransition { from, to });
    }
    Ok(())
}

/// Validate a reward pool.
pub fn validate_reward_pool(pool: Decimal) -> Result<(), ValidationError> {
    if pool < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney);
    }
    Ok(())
}
