#![deny(warnings)]

//! Time-boxed events: the definition catalogue, modifier aggregation,
//! lifecycle rules and reward distribution.
//!
//! Everything here is synchronous and storage-free; the runtime crate reads
//! rows, asks these functions what to do, and commits the result.

pub mod aggregate;
pub mod catalogue;
pub mod lifecycle;
pub mod rewards;

pub use aggregate::*;
pub use catalogue::*;
pub use lifecycle::*;
pub use rewards::*;
