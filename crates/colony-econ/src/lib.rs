#![deny(warnings)]

//! Economic models for the colony economy.
//!
//! Everything here is pure and deterministic given its inputs (and a seed
//! where randomness is involved):
//! - Production output per module with crew, aging and modifiers
//! - Stochastic per-resource price ticks
//! - Synthetic order-book depth around a price
//! - Walking a book to fill an order, with VWAP and slippage

pub mod depth;
pub mod market;
pub mod production;
pub mod trade;

pub use depth::*;
pub use market::*;
pub use production::*;
pub use trade::*;

use colony_core::ResourceType;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Decimal places kept on currency and resource quantities.
pub const MONEY_SCALE: u32 = 2;

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Prices must be strictly positive.
    #[error("invalid price or cost value")]
    InvalidPrice,
    /// Order quantities must be strictly positive.
    #[error("quantity must be > 0")]
    InvalidQuantity,
    /// The book could not fill any part of the order.
    #[error("insufficient liquidity for {requested} units")]
    InsufficientLiquidity { requested: Decimal },
    /// No market parameters configured for the resource.
    #[error("no market configured for {0}")]
    MissingMarket(ResourceType),
    /// Numeric conversion to or from floating point failed.
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// Round a currency or quantity amount to cents, halves away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
