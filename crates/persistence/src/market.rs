//! Market state: live prices, bounded history, demand/supply inputs and
//! alert fan-out.

use chrono::{DateTime, Utc};
use colony_core::{ModuleType, PricePoint, ProducerId, ResourcePrice, ResourceType, Tier};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::rows::{parse_code, PriceRow};
use crate::{cents_to_decimal, e4_to_price, from_millis, price_to_e4, to_millis, Store, StoreError};

const PRICE_COLUMNS: &str = "resource, current_price_e4, base_price_e4, min_price_e4, \
     max_price_e4, change_24h, supply, demand, volatility, seasonal_phase, updated_at";

impl Store {
    /// Insert price rows that do not exist yet. Returns how many were new.
    pub async fn seed_prices(&self, prices: &[ResourcePrice]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for p in prices {
            colony_core::validate_resource_price(p)?;
            inserted += sqlx::query(&format!(
                "INSERT OR IGNORE INTO resource_prices ({PRICE_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(p.resource.as_str())
            .bind(price_to_e4(p.current_price)?)
            .bind(price_to_e4(p.base_price)?)
            .bind(price_to_e4(p.min_price)?)
            .bind(price_to_e4(p.max_price)?)
            .bind(p.change_24h)
            .bind(p.supply)
            .bind(p.demand)
            .bind(p.volatility)
            .bind(p.seasonal_phase)
            .bind(to_millis(p.updated_at))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn list_prices(&self) -> Result<Vec<ResourcePrice>, StoreError> {
        let rows: Vec<PriceRow> = sqlx::query_as(&format!(
            "SELECT {PRICE_COLUMNS} FROM resource_prices ORDER BY resource"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ResourcePrice::try_from).collect()
    }

    pub async fn get_price(
        &self,
        resource: ResourceType,
    ) -> Result<Option<ResourcePrice>, StoreError> {
        let row: Option<PriceRow> = sqlx::query_as(&format!(
            "SELECT {PRICE_COLUMNS} FROM resource_prices WHERE resource = ?"
        ))
        .bind(resource.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ResourcePrice::try_from).transpose()
    }

    /// Write one tick: update each price row, append a history snapshot,
    /// and prune history beyond the newest `retention` rows per resource.
    pub async fn apply_price_tick(
        &self,
        prices: &[ResourcePrice],
        retention: u32,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for p in prices {
            let current = price_to_e4(p.current_price)?;
            let done = sqlx::query(
                "UPDATE resource_prices
                 SET current_price_e4 = ?, change_24h = ?, supply = ?, demand = ?,
                     seasonal_phase = ?, updated_at = ?
                 WHERE resource = ?",
            )
            .bind(current)
            .bind(p.change_24h)
            .bind(p.supply)
            .bind(p.demand)
            .bind(p.seasonal_phase)
            .bind(to_millis(p.updated_at))
            .bind(p.resource.as_str())
            .execute(&mut *tx)
            .await?;
            if done.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("price row {}", p.resource)));
            }
            sqlx::query(
                "INSERT INTO price_history (resource, price_e4, supply, demand, recorded_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(p.resource.as_str())
            .bind(current)
            .bind(p.supply)
            .bind(p.demand)
            .bind(to_millis(p.updated_at))
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "DELETE FROM price_history WHERE resource = ? AND id NOT IN
                    (SELECT id FROM price_history WHERE resource = ? ORDER BY id DESC LIMIT ?)",
            )
            .bind(p.resource.as_str())
            .bind(p.resource.as_str())
            .bind(i64::from(retention))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Newest snapshot recorded at or before `at`.
    pub async fn price_at_or_before(
        &self,
        resource: ResourceType,
        at: DateTime<Utc>,
    ) -> Result<Option<Decimal>, StoreError> {
        let price: Option<i64> = sqlx::query_scalar(
            "SELECT price_e4 FROM price_history
             WHERE resource = ? AND recorded_at <= ? ORDER BY recorded_at DESC, id DESC LIMIT 1",
        )
        .bind(resource.as_str())
        .bind(to_millis(at))
        .fetch_optional(&self.pool)
        .await?;
        Ok(price.map(e4_to_price))
    }

    /// The newest `limit` snapshots, oldest first.
    pub async fn price_history(
        &self,
        resource: ResourceType,
        limit: u32,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let rows: Vec<(i64, f64, f64, i64)> = sqlx::query_as(
            "SELECT price_e4, supply, demand, recorded_at FROM
                (SELECT id, price_e4, supply, demand, recorded_at FROM price_history
                 WHERE resource = ? ORDER BY id DESC LIMIT ?)
             ORDER BY id ASC",
        )
        .bind(resource.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(price, supply, demand, at)| {
                Ok(PricePoint {
                    resource,
                    price: e4_to_price(price),
                    supply,
                    demand,
                    recorded_at: from_millis(at)?,
                })
            })
            .collect()
    }

    /// Active, non-deleted modules grouped by type and tier.
    pub async fn demand_counts(&self) -> Result<Vec<(ModuleType, Tier, i64)>, StoreError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT module_type, tier, COUNT(*) FROM modules
             WHERE active = 1 AND deleted_at IS NULL
             GROUP BY module_type, tier ORDER BY module_type, tier",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(t, tier, n)| Ok((parse_code(&t)?, parse_code(&tier)?, n)))
            .collect()
    }

    /// Production credited per resource since `since`, from the ledger.
    pub async fn realized_supply(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<ResourceType, Decimal>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT resource, COALESCE(SUM(amount_cents), 0) FROM production_ledger
             WHERE created_at >= ? GROUP BY resource",
        )
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(r, cents)| Ok((parse_code(&r)?, cents_to_decimal(cents))))
            .collect()
    }

    /// Notify producers active since `active_since`, lowest ids first, at
    /// most `cap` of them. Returns the number of notifications written.
    pub async fn fan_out_notification(
        &self,
        kind: &str,
        message: &str,
        active_since: DateTime<Utc>,
        cap: u32,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let done = sqlx::query(
            "INSERT INTO notifications (producer_id, kind, message, created_at)
             SELECT id, ?, ?, ? FROM producers WHERE last_active_at >= ? ORDER BY id LIMIT ?",
        )
        .bind(kind)
        .bind(message)
        .bind(to_millis(now))
        .bind(to_millis(active_since))
        .bind(i64::from(cap))
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }

    /// Unread notification messages of a producer, oldest first.
    pub async fn unread_notifications(
        &self,
        producer: ProducerId,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT kind, message FROM notifications
             WHERE producer_id = ? AND read_at IS NULL ORDER BY id",
        )
        .bind(producer.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
