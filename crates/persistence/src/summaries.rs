//! Per-producer rollups maintained off the hot path.

use chrono::{DateTime, NaiveDate, Utc};
use colony_core::ProducerId;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{cents_to_decimal, decimal_to_cents_i64, from_millis, to_millis, Store, StoreError};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProducerSummary {
    pub producer_id: ProducerId,
    /// Sum of every resource ever credited by production.
    pub lifetime_production: Decimal,
    pub active_modules: u32,
    pub last_cycle_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    producer_id: i64,
    lifetime_production_cents: i64,
    active_modules: i64,
    last_cycle_date: Option<String>,
    updated_at: i64,
}

impl Store {
    /// Fold one cycle's credited output into the producer's summary.
    pub async fn upsert_summary(
        &self,
        producer: ProducerId,
        produced: Decimal,
        active_modules: u32,
        cycle_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO producer_summaries
                (producer_id, lifetime_production_cents, active_modules, last_cycle_date, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (producer_id) DO UPDATE SET
                lifetime_production_cents = lifetime_production_cents + excluded.lifetime_production_cents,
                active_modules = excluded.active_modules,
                last_cycle_date = MAX(COALESCE(last_cycle_date, ''), excluded.last_cycle_date),
                updated_at = excluded.updated_at",
        )
        .bind(producer.0)
        .bind(decimal_to_cents_i64(produced)?)
        .bind(i64::from(active_modules))
        .bind(cycle_date.to_string())
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_summary(
        &self,
        producer: ProducerId,
    ) -> Result<Option<ProducerSummary>, StoreError> {
        let row: Option<SummaryRow> = sqlx::query_as(
            "SELECT producer_id, lifetime_production_cents, active_modules, last_cycle_date, updated_at
             FROM producer_summaries WHERE producer_id = ?",
        )
        .bind(producer.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            let last_cycle_date = row
                .last_cycle_date
                .as_deref()
                .map(|d| {
                    d.parse::<NaiveDate>()
                        .map_err(|e| StoreError::Corrupt(format!("summary date {d}: {e}")))
                })
                .transpose()?;
            Ok(ProducerSummary {
                producer_id: ProducerId(row.producer_id),
                lifetime_production: cents_to_decimal(row.lifetime_production_cents),
                active_modules: u32::try_from(row.active_modules).unwrap_or(0),
                last_cycle_date,
                updated_at: from_millis(row.updated_at)?,
            })
        })
        .transpose()
    }
}
