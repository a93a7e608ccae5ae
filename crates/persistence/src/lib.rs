#![deny(warnings)]

//! SQLite store for the colony economy.
//!
//! Only this crate talks to the database. Every multi-row mutation runs in
//! one transaction; balance and module rows are updated with a version
//! compare-and-set so concurrent writers fail with [`StoreError::Conflict`]
//! instead of overwriting each other.

use chrono::{DateTime, Utc};
use colony_core::{ResourceType, ValidationError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

pub mod events;
pub mod ledger;
pub mod market;
pub mod producers;
mod rows;
pub mod summaries;

pub use ledger::*;
pub use producers::*;
pub use summaries::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("{0} not found")]
    NotFound(String),
    /// A version or status compare-and-set matched no row.
    #[error("concurrent update of {0}")]
    Conflict(String),
    #[error("insufficient {resource}: need {needed}, have {available}")]
    Insufficient {
        resource: ResourceType,
        needed: Decimal,
        available: Decimal,
    },
    #[error("value out of range: {0}")]
    OutOfRange(Decimal),
}

/// Default on-disk database.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./data/colony.db"
}

/// Handle to the database. Cloning shares the pool.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

/// Open (creating if needed) the database at `url` and apply migrations.
pub async fn init_db(url: &str) -> Result<Store, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    let store = Store { pool };
    store.migrate().await?;
    info!(target: "persistence", url, "database ready");
    Ok(store)
}

impl Store {
    /// Private in-memory database. A single connection that never expires,
    /// since each SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Money or quantity to integer cents, rounding half away from zero.
pub fn decimal_to_cents_i64(value: Decimal) -> Result<i64, StoreError> {
    scaled_i64(value, 2)
}

pub fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Price to integer 1e-4 units.
pub fn price_to_e4(value: Decimal) -> Result<i64, StoreError> {
    scaled_i64(value, 4)
}

pub fn e4_to_price(units: i64) -> Decimal {
    Decimal::new(units, 4)
}

fn scaled_i64(value: Decimal, scale: u32) -> Result<i64, StoreError> {
    let rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    let factor = Decimal::from(10_i64.pow(scale));
    rounded
        .checked_mul(factor)
        .and_then(|v| v.to_i64())
        .ok_or(StoreError::OutOfRange(value))
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn cents_round_half_away() {
        assert_eq!(decimal_to_cents_i64(Decimal::new(10085, 3)).unwrap(), 1009);
        let negative = decimal_to_cents_i64(Decimal::new(-10085, 3)).unwrap();
        assert_eq!(negative, -1009);
        assert_eq!(cents_to_decimal(1009), Decimal::new(1009, 2));
        assert_eq!(price_to_e4(Decimal::new(1008, 2)).unwrap(), 100_800);
        assert!(matches!(
            decimal_to_cents_i64(Decimal::MAX),
            Err(StoreError::OutOfRange(_))
        ));
    }

    #[test]
    fn millis_roundtrip() {
        let at = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        assert_eq!(from_millis(to_millis(at)).unwrap(), at);
    }

    #[tokio::test]
    async fn memory_store_migrates() {
        let store = Store::in_memory().await.unwrap();
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'table' AND name = 'production_ledger'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(tables, 1);
        // Re-running is a no-op.
        store.migrate().await.unwrap();
    }

    proptest! {
        #[test]
        fn cents_are_exact_for_two_dp(c in -1_000_000_000i64..1_000_000_000) {
            prop_assert_eq!(decimal_to_cents_i64(cents_to_decimal(c)).unwrap(), c);
        }
    }
}
