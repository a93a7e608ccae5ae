//! Producers, their modules and crew.

use chrono::{DateTime, Utc};
use colony_core::{
    CrewId, CrewMember, CrewRole, Module, ModuleId, ModuleType, Producer, ProducerId,
    ResourceType, Tier, ValidationError,
};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;

use crate::rows::{parse_code, CrewRow, ModuleRow, ProducerRow};
use crate::{cents_to_decimal, decimal_to_cents_i64, from_millis, to_millis, Store, StoreError};

const MODULE_COLUMNS: &str = "id, producer_id, module_type, tier, level, efficiency, active, \
     age_cycles, last_collected_at, version";
const CREW_COLUMNS: &str = "id, producer_id, name, role, specialty, output_bonus_pct, \
     efficiency_bonus_pct, assigned_module_id";

/// Crew member to recruit.
#[derive(Clone, Debug)]
pub struct NewCrew {
    pub name: String,
    pub role: CrewRole,
    pub specialty: Option<ModuleType>,
    pub output_bonus_pct: u32,
    pub efficiency_bonus_pct: u32,
}

pub(crate) async fn load_producer(
    conn: &mut SqliteConnection,
    id: ProducerId,
) -> Result<Option<Producer>, StoreError> {
    let row: Option<ProducerRow> = sqlx::query_as(
        "SELECT id, name, balance_cents, level, alliance_id, last_active_at, version
         FROM producers WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let holdings: Vec<(String, i64)> = sqlx::query_as(
        "SELECT resource, amount_cents FROM producer_resources WHERE producer_id = ?",
    )
    .bind(id.0)
    .fetch_all(&mut *conn)
    .await?;
    let mut map = BTreeMap::new();
    for (resource, cents) in holdings {
        let resource: ResourceType = parse_code(&resource)?;
        map.insert(resource, cents_to_decimal(cents));
    }
    Ok(Some(Producer {
        id: ProducerId(row.id),
        name: row.name,
        balance: cents_to_decimal(row.balance_cents),
        level: u32::try_from(row.level).unwrap_or(1),
        alliance_id: row.alliance_id,
        last_active_at: from_millis(row.last_active_at)?,
        version: row.version,
        holdings: map,
    }))
}

/// Add `cents` of a non-currency resource, creating the holding row.
pub(crate) async fn credit_holding(
    conn: &mut SqliteConnection,
    producer: ProducerId,
    resource: ResourceType,
    cents: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO producer_resources (producer_id, resource, amount_cents) VALUES (?, ?, ?)
         ON CONFLICT (producer_id, resource) DO UPDATE SET amount_cents = amount_cents + excluded.amount_cents",
    )
    .bind(producer.0)
    .bind(resource.as_str())
    .bind(cents)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Balance change with a version compare-and-set.
pub(crate) async fn cas_balance(
    conn: &mut SqliteConnection,
    producer: ProducerId,
    expected_version: i64,
    delta_cents: i64,
) -> Result<(), StoreError> {
    let done = sqlx::query(
        "UPDATE producers SET balance_cents = balance_cents + ?, version = version + 1
         WHERE id = ? AND version = ?",
    )
    .bind(delta_cents)
    .bind(producer.0)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;
    if done.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!("producer {producer}")));
    }
    Ok(())
}

impl Store {
    pub async fn create_producer(
        &self,
        name: &str,
        alliance_id: Option<i64>,
        starting_balance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Producer, StoreError> {
        colony_core::validate_name(name)?;
        if starting_balance < Decimal::ZERO {
            return Err(ValidationError::NegativeMoney.into());
        }
        let id = sqlx::query(
            "INSERT INTO producers (name, balance_cents, alliance_id, last_active_at, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(decimal_to_cents_i64(starting_balance)?)
        .bind(alliance_id)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.require_producer(ProducerId(id)).await
    }

    pub async fn get_producer(&self, id: ProducerId) -> Result<Option<Producer>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        load_producer(&mut conn, id).await
    }

    pub async fn require_producer(&self, id: ProducerId) -> Result<Producer, StoreError> {
        self.get_producer(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("producer {id}")))
    }

    /// Record player activity. Does not bump the version.
    pub async fn touch_producer(
        &self,
        id: ProducerId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE producers SET last_active_at = ? WHERE id = ?")
            .bind(to_millis(now))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Non-deleted modules of a producer, by id.
    pub async fn list_modules(&self, producer: ProducerId) -> Result<Vec<Module>, StoreError> {
        let rows: Vec<ModuleRow> = sqlx::query_as(&format!(
            "SELECT {MODULE_COLUMNS} FROM modules
             WHERE producer_id = ? AND deleted_at IS NULL ORDER BY id"
        ))
        .bind(producer.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Module::try_from).collect()
    }

    pub async fn list_crew(&self, producer: ProducerId) -> Result<Vec<CrewMember>, StoreError> {
        let rows: Vec<CrewRow> = sqlx::query_as(&format!(
            "SELECT {CREW_COLUMNS} FROM crew_members
             WHERE producer_id = ? AND deleted_at IS NULL ORDER BY id"
        ))
        .bind(producer.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CrewMember::try_from).collect()
    }

    /// Insert a module unless the producer already owns `max_modules`.
    pub async fn insert_module(
        &self,
        producer: ProducerId,
        module_type: ModuleType,
        tier: Tier,
        level: u8,
        max_modules: usize,
        now: DateTime<Utc>,
    ) -> Result<Module, StoreError> {
        colony_core::validate_module_level(level)?;
        let mut tx = self.pool.begin().await?;
        let owned: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM modules WHERE producer_id = ? AND deleted_at IS NULL",
        )
        .bind(producer.0)
        .fetch_one(&mut *tx)
        .await?;
        if owned as usize >= max_modules {
            return Err(ValidationError::LimitReached {
                kind: "module",
                limit: max_modules,
            }
            .into());
        }
        let id = sqlx::query(
            "INSERT INTO modules (producer_id, module_type, tier, level, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(producer.0)
        .bind(module_type.as_str())
        .bind(tier.as_str())
        .bind(i64::from(level))
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        let row: ModuleRow =
            sqlx::query_as(&format!("SELECT {MODULE_COLUMNS} FROM modules WHERE id = ?"))
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        tx.commit().await?;
        Module::try_from(row)
    }

    pub async fn insert_crew(
        &self,
        producer: ProducerId,
        crew: &NewCrew,
        max_crew: usize,
        now: DateTime<Utc>,
    ) -> Result<CrewMember, StoreError> {
        colony_core::validate_name(&crew.name)?;
        let mut tx = self.pool.begin().await?;
        let owned: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM crew_members WHERE producer_id = ? AND deleted_at IS NULL",
        )
        .bind(producer.0)
        .fetch_one(&mut *tx)
        .await?;
        if owned as usize >= max_crew {
            return Err(ValidationError::LimitReached {
                kind: "crew",
                limit: max_crew,
            }
            .into());
        }
        let id = sqlx::query(
            "INSERT INTO crew_members
                (producer_id, name, role, specialty, output_bonus_pct, efficiency_bonus_pct, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(producer.0)
        .bind(&crew.name)
        .bind(crew.role.as_str())
        .bind(crew.specialty.map(|s| s.as_str()))
        .bind(i64::from(crew.output_bonus_pct))
        .bind(i64::from(crew.efficiency_bonus_pct))
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        let row: CrewRow =
            sqlx::query_as(&format!("SELECT {CREW_COLUMNS} FROM crew_members WHERE id = ?"))
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        tx.commit().await?;
        CrewMember::try_from(row)
    }

    /// Put a crew member on a module. Fails with `Conflict` when the module
    /// is already staffed.
    pub async fn assign_crew(
        &self,
        producer: ProducerId,
        crew: CrewId,
        module: ModuleId,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let owns_module: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM modules WHERE id = ? AND producer_id = ? AND deleted_at IS NULL",
        )
        .bind(module.0)
        .bind(producer.0)
        .fetch_optional(&mut *tx)
        .await?;
        if owns_module.is_none() {
            return Err(StoreError::NotFound(format!("module {module}")));
        }
        let result = sqlx::query(
            "UPDATE crew_members SET assigned_module_id = ?
             WHERE id = ? AND producer_id = ? AND deleted_at IS NULL",
        )
        .bind(module.0)
        .bind(crew.0)
        .bind(producer.0)
        .execute(&mut *tx)
        .await;
        match result {
            Ok(done) if done.rows_affected() == 0 => {
                Err(StoreError::NotFound(format!("crew member {crew}")))
            }
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Conflict(format!("module {module} already staffed")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn unassign_crew(
        &self,
        producer: ProducerId,
        crew: CrewId,
    ) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE crew_members SET assigned_module_id = NULL
             WHERE id = ? AND producer_id = ? AND deleted_at IS NULL",
        )
        .bind(crew.0)
        .bind(producer.0)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("crew member {crew}")));
        }
        Ok(())
    }

    /// Soft-delete a module and release its crew.
    pub async fn decommission_module(
        &self,
        producer: ProducerId,
        module: ModuleId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let done = sqlx::query(
            "UPDATE modules SET deleted_at = ?, active = 0, version = version + 1
             WHERE id = ? AND producer_id = ? AND deleted_at IS NULL",
        )
        .bind(to_millis(now))
        .bind(module.0)
        .bind(producer.0)
        .execute(&mut *tx)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("module {module}")));
        }
        sqlx::query(
            "UPDATE crew_members SET assigned_module_id = NULL WHERE assigned_module_id = ?",
        )
        .bind(module.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// One page of producers due for a production cycle: active since
    /// `active_since`, owning at least one active module, id above `after`.
    pub async fn fetch_eligible_producers(
        &self,
        after: Option<ProducerId>,
        limit: u32,
        active_since: DateTime<Utc>,
    ) -> Result<Vec<ProducerId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT p.id FROM producers p
             WHERE p.id > ? AND p.last_active_at >= ?
               AND EXISTS (SELECT 1 FROM modules m
                           WHERE m.producer_id = p.id AND m.active = 1 AND m.deleted_at IS NULL)
             ORDER BY p.id LIMIT ?",
        )
        .bind(after.map(|a| a.0).unwrap_or(0))
        .bind(to_millis(active_since))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(ProducerId).collect())
    }

    /// Alliances with at least `min_members` producers.
    pub async fn alliances_with_members(
        &self,
        min_members: u32,
    ) -> Result<Vec<(i64, u64)>, StoreError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT alliance_id, COUNT(*) FROM producers
             WHERE alliance_id IS NOT NULL GROUP BY alliance_id HAVING COUNT(*) >= ?
             ORDER BY alliance_id",
        )
        .bind(i64::from(min_members))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, n)| (id, u64::try_from(n).unwrap_or(0)))
            .collect())
    }

    pub async fn alliance_members(&self, alliance_id: i64) -> Result<Vec<ProducerId>, StoreError> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM producers WHERE alliance_id = ? ORDER BY id")
                .bind(alliance_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(ProducerId).collect())
    }

    /// Active, non-deleted modules of one type across all producers.
    pub async fn active_module_count(&self, module_type: ModuleType) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM modules
             WHERE module_type = ? AND active = 1 AND deleted_at IS NULL",
        )
        .bind(module_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    async fn store_with_producer() -> (Store, Producer) {
        let store = Store::in_memory().await.unwrap();
        let p = store
            .create_producer("Ceres", Some(4), Decimal::new(100, 0), now())
            .await
            .unwrap();
        (store, p)
    }

    fn engineer(specialty: Option<ModuleType>) -> NewCrew {
        NewCrew {
            name: "Vasquez".into(),
            role: CrewRole::Engineer,
            specialty,
            output_bonus_pct: 20,
            efficiency_bonus_pct: 10,
        }
    }

    #[tokio::test]
    async fn producer_roundtrip() {
        let (store, p) = store_with_producer().await;
        assert_eq!(p.balance, Decimal::new(100, 0));
        assert_eq!(p.version, 0);
        assert_eq!(p.alliance_id, Some(4));
        assert!(p.holdings.is_empty());
        assert!(store.get_producer(ProducerId(999)).await.unwrap().is_none());
        assert!(matches!(
            store.create_producer(" ", None, Decimal::ZERO, now()).await,
            Err(StoreError::Validation(ValidationError::EmptyName))
        ));
    }

    #[tokio::test]
    async fn module_limit_is_enforced() {
        let (store, p) = store_with_producer().await;
        for _ in 0..2 {
            store
                .insert_module(p.id, ModuleType::MiningRig, Tier::Common, 1, 2, now())
                .await
                .unwrap();
        }
        let err = store
            .insert_module(p.id, ModuleType::MiningRig, Tier::Common, 1, 2, now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::LimitReached { kind: "module", .. })
        ));
        assert!(store
            .insert_module(p.id, ModuleType::MiningRig, Tier::Common, 11, 5, now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn one_crew_member_per_module() {
        let (store, p) = store_with_producer().await;
        let m = store
            .insert_module(p.id, ModuleType::Refinery, Tier::Rare, 3, 12, now())
            .await
            .unwrap();
        let a = store
            .insert_crew(p.id, &engineer(None), 12, now())
            .await
            .unwrap();
        let b = store
            .insert_crew(p.id, &engineer(Some(ModuleType::Refinery)), 12, now())
            .await
            .unwrap();
        store.assign_crew(p.id, a.id, m.id).await.unwrap();
        assert!(matches!(
            store.assign_crew(p.id, b.id, m.id).await,
            Err(StoreError::Conflict(_))
        ));
        store.unassign_crew(p.id, a.id).await.unwrap();
        store.assign_crew(p.id, b.id, m.id).await.unwrap();
        let crew = store.list_crew(p.id).await.unwrap();
        assert_eq!(crew[0].assigned_module, None);
        assert_eq!(crew[1].assigned_module, Some(m.id));
        assert_eq!(crew[1].specialty, Some(ModuleType::Refinery));
    }

    #[tokio::test]
    async fn decommission_releases_crew_and_hides_module() {
        let (store, p) = store_with_producer().await;
        let m = store
            .insert_module(p.id, ModuleType::SolarArray, Tier::Common, 1, 12, now())
            .await
            .unwrap();
        let c = store
            .insert_crew(p.id, &engineer(None), 12, now())
            .await
            .unwrap();
        store.assign_crew(p.id, c.id, m.id).await.unwrap();
        store.decommission_module(p.id, m.id, now()).await.unwrap();
        assert!(store.list_modules(p.id).await.unwrap().is_empty());
        let crew = store.list_crew(p.id).await.unwrap();
        assert_eq!(crew[0].assigned_module, None);
        assert!(matches!(
            store.decommission_module(p.id, m.id, now()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn eligibility_scan_pages_by_id() {
        let store = Store::in_memory().await.unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            let p = store
                .create_producer(&format!("p{i}"), None, Decimal::ZERO, now())
                .await
                .unwrap();
            if i != 2 {
                store
                    .insert_module(p.id, ModuleType::MiningRig, Tier::Common, 1, 12, now())
                    .await
                    .unwrap();
            }
            ids.push(p.id);
        }
        // Idle producer drops out of the window.
        store
            .touch_producer(ids[4], now() - Duration::days(30))
            .await
            .unwrap();
        let since = now() - Duration::days(7);
        let first = store
            .fetch_eligible_producers(None, 2, since)
            .await
            .unwrap();
        assert_eq!(first, vec![ids[0], ids[1]]);
        let second = store
            .fetch_eligible_producers(first.last().copied(), 2, since)
            .await
            .unwrap();
        assert_eq!(second, vec![ids[3]]);
    }

    #[tokio::test]
    async fn alliance_and_module_counts() {
        let store = Store::in_memory().await.unwrap();
        for i in 0..3 {
            let p = store
                .create_producer(&format!("a{i}"), Some(1), Decimal::ZERO, now())
                .await
                .unwrap();
            store
                .insert_module(p.id, ModuleType::TradeHub, Tier::Epic, 2, 12, now())
                .await
                .unwrap();
        }
        store
            .create_producer("loner", Some(2), Decimal::ZERO, now())
            .await
            .unwrap();
        assert_eq!(store.alliances_with_members(2).await.unwrap(), vec![(1, 3)]);
        assert_eq!(store.alliance_members(2).await.unwrap().len(), 1);
        let hubs = store.active_module_count(ModuleType::TradeHub).await;
        assert_eq!(hubs.unwrap(), 3);
        let rigs = store.active_module_count(ModuleType::MiningRig).await;
        assert_eq!(rigs.unwrap(), 0);
    }
}
