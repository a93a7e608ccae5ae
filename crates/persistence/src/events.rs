//! Event rows, participants and reward claims.
//!
//! Status moves only through [`Store::transition_event`], a compare-and-set
//! on the status column, so each transition fires once however many
//! schedulers race on it.

use chrono::{DateTime, Utc};
use colony_core::{
    ActiveEvent, EventCategory, EventId, EventParticipant, EventScope, EventStatus, ProducerId,
    ResourceType, TransactionKind,
};
use colony_events::{LastSpawn, NewEvent};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet};

use crate::ledger::{append_audit, append_transaction};
use crate::producers::cas_balance;
use crate::rows::{parse_code, EventRow, ParticipantRow};
use crate::{decimal_to_cents_i64, from_millis, to_millis, Store, StoreError};

const EVENT_COLUMNS: &str = "id, event_type, category, status, starts_at, ends_at, modifiers, \
     is_global, reward_pool_cents, reward_tiers, created_at, completed_at";

async fn attach_targets(
    conn: &mut SqliteConnection,
    rows: Vec<EventRow>,
) -> Result<Vec<ActiveEvent>, StoreError> {
    let mut targets: BTreeMap<i64, BTreeSet<ProducerId>> = BTreeMap::new();
    for row in rows.iter().filter(|r| !r.is_global) {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT producer_id FROM event_targets WHERE event_id = ?")
                .bind(row.id)
                .fetch_all(&mut *conn)
                .await?;
        targets.insert(row.id, ids.into_iter().map(ProducerId).collect());
    }
    rows.into_iter()
        .map(|row| {
            let set = targets.remove(&row.id).unwrap_or_default();
            row.into_event(set)
        })
        .collect()
}

impl Store {
    /// Insert a spawned event and its target set.
    pub async fn insert_event(
        &self,
        event: &NewEvent,
        now: DateTime<Utc>,
    ) -> Result<ActiveEvent, StoreError> {
        colony_core::validate_event_window(event.starts_at, event.ends_at)?;
        colony_core::validate_reward_pool(event.reward_pool)?;
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query(
            "INSERT INTO active_events
                (event_type, trigger_key, category, status, starts_at, ends_at, modifiers,
                 is_global, reward_pool_cents, reward_tiers, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_type)
        .bind(&event.trigger_key)
        .bind(event.category.as_str())
        .bind(event.status.as_str())
        .bind(to_millis(event.starts_at))
        .bind(to_millis(event.ends_at))
        .bind(serde_json::to_string(&event.modifiers)?)
        .bind(event.scope.is_global())
        .bind(decimal_to_cents_i64(event.reward_pool)?)
        .bind(serde_json::to_string(&event.reward_tiers)?)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        if let EventScope::Targeted(ids) = &event.scope {
            for producer in ids {
                sqlx::query("INSERT INTO event_targets (event_id, producer_id) VALUES (?, ?)")
                    .bind(id)
                    .bind(producer.0)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        self.require_event(EventId(id)).await
    }

    pub async fn get_event(&self, id: EventId) -> Result<Option<ActiveEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM active_events WHERE id = ?"))
                .bind(id.0)
                .fetch_optional(&mut *conn)
                .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(attach_targets(&mut conn, vec![row]).await?.pop())
    }

    pub async fn require_event(&self, id: EventId) -> Result<ActiveEvent, StoreError> {
        self.get_event(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("event {id}")))
    }

    /// Events in `status`, oldest start first.
    pub async fn events_with_status(
        &self,
        status: EventStatus,
    ) -> Result<Vec<ActiveEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM active_events WHERE status = ? ORDER BY starts_at, id"
        ))
        .bind(status.as_str())
        .fetch_all(&mut *conn)
        .await?;
        attach_targets(&mut conn, rows).await
    }

    /// ACTIVE events whose window contains `now`.
    pub async fn live_events(&self, now: DateTime<Utc>) -> Result<Vec<ActiveEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM active_events
             WHERE status = 'ACTIVE' AND starts_at <= ? AND ends_at > ? ORDER BY id"
        ))
        .bind(to_millis(now))
        .bind(to_millis(now))
        .fetch_all(&mut *conn)
        .await?;
        attach_targets(&mut conn, rows).await
    }

    /// Compare-and-set on status. Returns false when the row was not in
    /// `from`. Terminal targets stamp `completed_at`.
    pub async fn transition_event(
        &self,
        id: EventId,
        from: EventStatus,
        to: EventStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        colony_core::validate_transition(from, to)?;
        let completed_at = to.is_terminal().then(|| to_millis(now));
        let done = sqlx::query(
            "UPDATE active_events SET status = ?, completed_at = COALESCE(?, completed_at)
             WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(completed_at)
        .bind(id.0)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    /// Most recent event spawned under `trigger_key`.
    pub async fn last_spawn(&self, trigger_key: &str) -> Result<Option<LastSpawn>, StoreError> {
        let row: Option<(String, i64, Option<i64>)> = sqlx::query_as(
            "SELECT status, created_at, completed_at FROM active_events
             WHERE trigger_key = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(trigger_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(status, created_at, completed_at)| {
            Ok(LastSpawn {
                status: parse_code(&status)?,
                created_at: from_millis(created_at)?,
                completed_at: completed_at.map(from_millis).transpose()?,
            })
        })
        .transpose()
    }

    /// PENDING or ACTIVE events of a category.
    pub async fn open_events_in_category(
        &self,
        category: EventCategory,
    ) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM active_events
             WHERE category = ? AND status IN ('PENDING', 'ACTIVE')",
        )
        .bind(category.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Add to a participant's score and action count, joining them on first
    /// contact. Negative deltas are treated as zero.
    pub async fn record_participation(
        &self,
        event: EventId,
        producer: ProducerId,
        score_delta: i64,
        actions_delta: i64,
        now: DateTime<Utc>,
    ) -> Result<EventParticipant, StoreError> {
        let row: ParticipantRow = sqlx::query_as(
            "INSERT INTO event_participants (event_id, producer_id, score, actions, joined_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (event_id, producer_id) DO UPDATE
                SET score = score + excluded.score, actions = actions + excluded.actions
             RETURNING id, event_id, producer_id, score, actions, reward_claimed",
        )
        .bind(event.0)
        .bind(producer.0)
        .bind(score_delta.max(0))
        .bind(actions_delta.max(0))
        .bind(to_millis(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    /// Participants in join order.
    pub async fn participants(&self, event: EventId) -> Result<Vec<EventParticipant>, StoreError> {
        let rows: Vec<ParticipantRow> = sqlx::query_as(
            "SELECT id, event_id, producer_id, score, actions, reward_claimed
             FROM event_participants WHERE event_id = ? ORDER BY id",
        )
        .bind(event.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EventParticipant::from).collect())
    }

    /// Pay one reward. Returns false if it was already claimed.
    pub async fn credit_reward(
        &self,
        event: EventId,
        producer: ProducerId,
        amount: Decimal,
        tier_label: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let cents = decimal_to_cents_i64(amount)?;
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query(
            "UPDATE event_participants SET reward_claimed = 1
             WHERE event_id = ? AND producer_id = ? AND reward_claimed = 0",
        )
        .bind(event.0)
        .bind(producer.0)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Ok(false);
        }
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM producers WHERE id = ?")
            .bind(producer.0)
            .fetch_optional(&mut *tx)
            .await?;
        let version = version.ok_or_else(|| StoreError::NotFound(format!("producer {producer}")))?;
        cas_balance(&mut tx, producer, version, cents).await?;
        append_transaction(
            &mut tx,
            producer,
            TransactionKind::EventReward,
            ResourceType::Credits,
            Decimal::ZERO,
            amount,
            None,
            &format!("event:{event}:{tier_label}"),
            now,
        )
        .await?;
        let detail = serde_json::json!({
            "event_id": event.0,
            "amount": amount.to_string(),
            "tier": tier_label,
        });
        append_audit(&mut tx, "reward", Some(producer), &detail, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Delete COMPLETED and CANCELLED events finished before `before`, with
    /// their targets and participants. Returns the number of events removed.
    pub async fn purge_events(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = to_millis(before);
        let mut tx = self.pool.begin().await?;
        let stale = "SELECT id FROM active_events
             WHERE status IN ('COMPLETED', 'CANCELLED') AND COALESCE(completed_at, created_at) < ?";
        sqlx::query(&format!("DELETE FROM event_participants WHERE event_id IN ({stale})"))
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM event_targets WHERE event_id IN ({stale})"))
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        let done = sqlx::query(&format!("DELETE FROM active_events WHERE id IN ({stale})"))
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(done.rows_affected())
    }
}
