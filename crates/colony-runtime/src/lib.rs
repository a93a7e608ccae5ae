#![deny(warnings)]

//! Async engine driving the colony economy.
//!
//! [`Engine`] owns the store, configuration, event catalogue, RNG and the
//! summary-sync task. Cron jobs call the batch operations
//! (`run_production_cycle`, `run_market_tick`, `process_event_lifecycle`);
//! request handlers call the player actions. Every operation logs one
//! structured event tagged with a `category` field.

pub mod clock;
mod engine;
mod error;
pub mod events;
pub mod market;
pub mod production;
pub mod summary;

pub use clock::{AbortSignal, Clock, ManualClock, SystemClock};
pub use engine::Engine;
pub use error::EngineError;
pub use events::{Leaderboard, LifecycleReport};
pub use market::{MarketTickReport, TradeResult};
pub use production::{BatchSummary, UnitOutcome};
pub use summary::{SummarySync, SummaryUpdate};
