//! Write-once production ledger, trade settlement, and the immutable
//! transaction and audit trails.

use chrono::{DateTime, NaiveDate, Utc};
use colony_core::{ModuleId, ProducerId, ResourceType, TradeSide, TransactionKind};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::producers::{cas_balance, credit_holding, load_producer};
use crate::rows::parse_code;
use crate::{
    cents_to_decimal, decimal_to_cents_i64, e4_to_price, from_millis, price_to_e4, to_millis,
    Store, StoreError,
};

/// Everything one producer earns for one date, plus the row versions it
/// was computed from.
#[derive(Clone, Debug)]
pub struct ProductionCommit {
    pub producer_id: ProducerId,
    pub expected_version: i64,
    pub date: NaiveDate,
    /// Output per resource. Zero amounts still claim their ledger key.
    pub credits: Vec<(ResourceType, Decimal)>,
    /// Modules that produced, with the version read.
    pub modules: Vec<ModuleStamp>,
    pub now: DateTime<Utc>,
}

/// A producing module as read before the commit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModuleStamp {
    pub id: ModuleId,
    pub version: i64,
    /// Resource the module yields; it ages only when this key is claimed.
    pub resource: ResourceType,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommitOutcome {
    /// Resources whose ledger key was new, and the balance afterwards.
    Credited {
        resources: Vec<(ResourceType, Decimal)>,
        balance: Decimal,
    },
    /// Every ledger key already existed.
    Skipped,
}

/// Trade to settle against a balance snapshot.
#[derive(Clone, Debug)]
pub struct TradeSettlement {
    pub producer_id: ProducerId,
    pub expected_version: i64,
    pub resource: ResourceType,
    pub side: TradeSide,
    pub quantity: Decimal,
    /// Currency paid (buy) or received (sell).
    pub amount: Decimal,
    pub avg_price: Decimal,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SettledTrade {
    pub transaction_id: i64,
    pub balance: Decimal,
    pub holding: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub producer_id: ProducerId,
    pub kind: TransactionKind,
    pub resource: ResourceType,
    pub quantity: Decimal,
    /// Signed change to the currency balance.
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub category: String,
    pub producer_id: Option<ProducerId>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    producer_id: i64,
    kind: String,
    resource: String,
    quantity_cents: i64,
    amount_cents: i64,
    price_e4: Option<i64>,
    reference: String,
    created_at: i64,
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(TransactionRecord {
            id: row.id,
            producer_id: ProducerId(row.producer_id),
            kind: parse_code(&row.kind)?,
            resource: parse_code(&row.resource)?,
            quantity: cents_to_decimal(row.quantity_cents),
            amount: cents_to_decimal(row.amount_cents),
            price: row.price_e4.map(e4_to_price),
            reference: row.reference,
            created_at: from_millis(row.created_at)?,
        })
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn append_transaction(
    conn: &mut SqliteConnection,
    producer: ProducerId,
    kind: TransactionKind,
    resource: ResourceType,
    quantity: Decimal,
    amount: Decimal,
    price: Option<Decimal>,
    reference: &str,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let price_e4 = price.map(price_to_e4).transpose()?;
    let id = sqlx::query(
        "INSERT INTO transactions
            (producer_id, kind, resource, quantity_cents, amount_cents, price_e4, reference, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(producer.0)
    .bind(kind.as_str())
    .bind(resource.as_str())
    .bind(decimal_to_cents_i64(quantity)?)
    .bind(decimal_to_cents_i64(amount)?)
    .bind(price_e4)
    .bind(reference)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub(crate) async fn append_audit(
    conn: &mut SqliteConnection,
    category: &str,
    producer: Option<ProducerId>,
    detail: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO audit_log (category, producer_id, detail, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(category)
    .bind(producer.map(|p| p.0))
    .bind(serde_json::to_string(detail)?)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl Store {
    /// Credit one producer's production for one date, exactly once.
    ///
    /// Ledger keys are inserted first; keys that already exist are ignored
    /// and only the newly claimed resources are credited. Fails with
    /// `Conflict` if the producer or any module changed since it was read,
    /// rolling everything back.
    pub async fn commit_production(
        &self,
        commit: &ProductionCommit,
    ) -> Result<CommitOutcome, StoreError> {
        let date = commit.date.to_string();
        let now_ms = to_millis(commit.now);
        let mut tx = self.pool.begin().await?;

        let mut claimed = Vec::new();
        for (resource, amount) in &commit.credits {
            let done = sqlx::query(
                "INSERT OR IGNORE INTO production_ledger
                    (producer_id, ledger_date, resource, amount_cents, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(commit.producer_id.0)
            .bind(&date)
            .bind(resource.as_str())
            .bind(decimal_to_cents_i64(*amount)?)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
            if done.rows_affected() == 1 {
                claimed.push((*resource, *amount));
            }
        }
        if claimed.is_empty() {
            debug!(
                target: "persistence",
                producer = %commit.producer_id,
                %date,
                "ledger keys exist"
            );
            return Ok(CommitOutcome::Skipped);
        }

        let currency: Decimal = claimed
            .iter()
            .filter(|(r, _)| r.is_base_currency())
            .map(|(_, a)| *a)
            .sum();
        cas_balance(
            &mut tx,
            commit.producer_id,
            commit.expected_version,
            decimal_to_cents_i64(currency)?,
        )
        .await?;
        for (resource, amount) in claimed.iter().filter(|(r, _)| !r.is_base_currency()) {
            credit_holding(
                &mut tx,
                commit.producer_id,
                *resource,
                decimal_to_cents_i64(*amount)?,
            )
            .await?;
        }

        let aged: Vec<&ModuleStamp> = commit
            .modules
            .iter()
            .filter(|m| claimed.iter().any(|(r, _)| *r == m.resource))
            .collect();
        for stamp in &aged {
            let done = sqlx::query(
                "UPDATE modules
                 SET age_cycles = age_cycles + 1, last_collected_at = ?, version = version + 1
                 WHERE id = ? AND version = ? AND deleted_at IS NULL",
            )
            .bind(now_ms)
            .bind(stamp.id.0)
            .bind(stamp.version)
            .execute(&mut *tx)
            .await?;
            if done.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!("module {}", stamp.id)));
            }
        }

        let reference = format!("production:{date}");
        for (resource, amount) in &claimed {
            let currency_delta = if resource.is_base_currency() {
                *amount
            } else {
                Decimal::ZERO
            };
            append_transaction(
                &mut tx,
                commit.producer_id,
                TransactionKind::Production,
                *resource,
                *amount,
                currency_delta,
                None,
                &reference,
                commit.now,
            )
            .await?;
        }
        let detail = serde_json::json!({
            "date": date,
            "credited": claimed
                .iter()
                .map(|(r, a)| (r.as_str(), a.to_string()))
                .collect::<std::collections::BTreeMap<_, _>>(),
            "modules": aged.len(),
        });
        append_audit(
            &mut tx,
            "production",
            Some(commit.producer_id),
            &detail,
            commit.now,
        )
        .await?;

        let balance: i64 = sqlx::query_scalar("SELECT balance_cents FROM producers WHERE id = ?")
            .bind(commit.producer_id.0)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(CommitOutcome::Credited {
            resources: claimed,
            balance: cents_to_decimal(balance),
        })
    }

    /// Apply a trade if the producer is still at `expected_version` and can
    /// cover it.
    pub async fn settle_trade(&self, trade: &TradeSettlement) -> Result<SettledTrade, StoreError> {
        let mut tx = self.pool.begin().await?;
        let producer = load_producer(&mut tx, trade.producer_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("producer {}", trade.producer_id)))?;
        if producer.version != trade.expected_version {
            return Err(StoreError::Conflict(format!("producer {}", trade.producer_id)));
        }
        let quantity_cents = decimal_to_cents_i64(trade.quantity)?;
        let amount_cents = decimal_to_cents_i64(trade.amount)?;
        let (kind, balance_delta) = match trade.side {
            TradeSide::Buy => {
                if producer.balance < trade.amount {
                    return Err(StoreError::Insufficient {
                        resource: ResourceType::Credits,
                        needed: trade.amount,
                        available: producer.balance,
                    });
                }
                (TransactionKind::TradeBuy, -amount_cents)
            }
            TradeSide::Sell => {
                let held = producer.holding(trade.resource);
                if held < trade.quantity {
                    return Err(StoreError::Insufficient {
                        resource: trade.resource,
                        needed: trade.quantity,
                        available: held,
                    });
                }
                (TransactionKind::TradeSell, amount_cents)
            }
        };

        cas_balance(
            &mut tx,
            trade.producer_id,
            trade.expected_version,
            balance_delta,
        )
        .await?;
        match trade.side {
            TradeSide::Buy => {
                credit_holding(&mut tx, trade.producer_id, trade.resource, quantity_cents).await?
            }
            TradeSide::Sell => {
                sqlx::query(
                    "UPDATE producer_resources SET amount_cents = amount_cents - ?
                     WHERE producer_id = ? AND resource = ?",
                )
                .bind(quantity_cents)
                .bind(trade.producer_id.0)
                .bind(trade.resource.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        let transaction_id = append_transaction(
            &mut tx,
            trade.producer_id,
            kind,
            trade.resource,
            trade.quantity,
            cents_to_decimal(balance_delta),
            Some(trade.avg_price),
            &format!("trade:{}", trade.side),
            trade.now,
        )
        .await?;
        let detail = serde_json::json!({
            "transaction_id": transaction_id,
            "side": trade.side,
            "resource": trade.resource,
            "quantity": trade.quantity.to_string(),
            "amount": trade.amount.to_string(),
            "avg_price": trade.avg_price.to_string(),
        });
        append_audit(
            &mut tx,
            "trade",
            Some(trade.producer_id),
            &detail,
            trade.now,
        )
        .await?;

        let after = load_producer(&mut tx, trade.producer_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("producer {}", trade.producer_id)))?;
        tx.commit().await?;
        Ok(SettledTrade {
            transaction_id,
            balance: after.balance,
            holding: after.holding(trade.resource),
        })
    }

    /// Newest first.
    pub async fn list_transactions(
        &self,
        producer: ProducerId,
        limit: u32,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT id, producer_id, kind, resource, quantity_cents, amount_cents, price_e4,
                    reference, created_at
             FROM transactions WHERE producer_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(producer.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TransactionRecord::try_from).collect()
    }

    /// Newest first.
    pub async fn list_audit(
        &self,
        category: &str,
        limit: u32,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let rows: Vec<(i64, String, Option<i64>, String, i64)> = sqlx::query_as(
            "SELECT id, category, producer_id, detail, created_at
             FROM audit_log WHERE category = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(category)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(id, category, producer, detail, created_at)| {
                Ok(AuditEntry {
                    id,
                    category,
                    producer_id: producer.map(ProducerId),
                    detail: serde_json::from_str(&detail)?,
                    created_at: from_millis(created_at)?,
                })
            })
            .collect()
    }

    /// Ledger amounts recorded for one producer and date.
    pub async fn ledger_entries(
        &self,
        producer: ProducerId,
        date: NaiveDate,
    ) -> Result<Vec<(ResourceType, Decimal)>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT resource, amount_cents FROM production_ledger
             WHERE producer_id = ? AND ledger_date = ? ORDER BY resource",
        )
        .bind(producer.0)
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(r, c)| Ok((parse_code(&r)?, cents_to_decimal(c))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use colony_core::{Module, ModuleType, Producer, Tier};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    async fn setup() -> (Store, Producer, Module) {
        let store = Store::in_memory().await.unwrap();
        let p = store
            .create_producer("Vesta", None, Decimal::new(50, 0), now())
            .await
            .unwrap();
        let m = store
            .insert_module(p.id, ModuleType::MiningRig, Tier::Common, 2, 12, now())
            .await
            .unwrap();
        (store, p, m)
    }

    fn commit(p: &Producer, m: &Module) -> ProductionCommit {
        ProductionCommit {
            producer_id: p.id,
            expected_version: p.version,
            date: day(),
            credits: vec![
                (ResourceType::Minerals, Decimal::new(2000, 2)),
                (ResourceType::Credits, Decimal::new(550, 2)),
            ],
            modules: vec![ModuleStamp {
                id: m.id,
                version: m.version,
                resource: ResourceType::Minerals,
            }],
            now: now(),
        }
    }

    #[tokio::test]
    async fn double_commit_credits_once() {
        let (store, p, m) = setup().await;
        let first = store.commit_production(&commit(&p, &m)).await.unwrap();
        assert!(matches!(
            first,
            CommitOutcome::Credited { ref resources, balance }
                if resources.len() == 2 && balance == Decimal::new(5550, 2)
        ));
        let after = store.require_producer(p.id).await.unwrap();
        assert_eq!(after.version, 1);
        assert_eq!(after.holding(ResourceType::Minerals), Decimal::new(20, 0));

        // Same payload again: skipped before any version check.
        assert_eq!(
            store.commit_production(&commit(&p, &m)).await.unwrap(),
            CommitOutcome::Skipped
        );
        let again = store.require_producer(p.id).await.unwrap();
        assert_eq!(again.balance, after.balance);
        assert_eq!(store.list_transactions(p.id, 10).await.unwrap().len(), 2);

        let module = &store.list_modules(p.id).await.unwrap()[0];
        assert_eq!(module.age_cycles, 1);
        assert_eq!(module.last_collected_at, Some(now()));
        assert_eq!(store.ledger_entries(p.id, day()).await.unwrap().len(), 2);
        assert_eq!(store.list_audit("production", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_version_rolls_back() {
        let (store, p, m) = setup().await;
        let mut stale = commit(&p, &m);
        stale.expected_version = 7;
        assert!(matches!(
            store.commit_production(&stale).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.ledger_entries(p.id, day()).await.unwrap().is_empty());

        let mut stale_module = commit(&p, &m);
        stale_module.modules[0].version = 3;
        assert!(store.commit_production(&stale_module).await.is_err());
        let unchanged = store.require_producer(p.id).await.unwrap();
        assert_eq!(unchanged.balance, Decimal::new(50, 0));
        assert_eq!(unchanged.version, 0);
    }

    #[tokio::test]
    async fn only_modules_with_new_keys_age() {
        let (store, p, rig) = setup().await;
        let first = ProductionCommit {
            credits: vec![(ResourceType::Minerals, Decimal::new(20, 0))],
            ..commit(&p, &rig)
        };
        store.commit_production(&first).await.unwrap();

        // Same day, a second module joins with a resource not yet claimed.
        let p = store.require_producer(p.id).await.unwrap();
        let rig = store.list_modules(p.id).await.unwrap().remove(0);
        let solar = store
            .insert_module(p.id, ModuleType::SolarArray, Tier::Common, 1, 12, now())
            .await
            .unwrap();
        let second = ProductionCommit {
            producer_id: p.id,
            expected_version: p.version,
            date: day(),
            credits: vec![
                (ResourceType::Minerals, Decimal::new(20, 0)),
                (ResourceType::Energy, Decimal::new(12, 0)),
            ],
            modules: vec![
                ModuleStamp {
                    id: rig.id,
                    version: rig.version,
                    resource: ResourceType::Minerals,
                },
                ModuleStamp {
                    id: solar.id,
                    version: solar.version,
                    resource: ResourceType::Energy,
                },
            ],
            now: now(),
        };
        let outcome = store.commit_production(&second).await.unwrap();
        assert!(matches!(
            outcome,
            CommitOutcome::Credited { ref resources, .. }
                if resources == &vec![(ResourceType::Energy, Decimal::new(12, 0))]
        ));

        let modules = store.list_modules(p.id).await.unwrap();
        let age_of = |id: ModuleId| modules.iter().find(|m| m.id == id).unwrap().age_cycles;
        assert_eq!(age_of(rig.id), 1);
        assert_eq!(age_of(solar.id), 1);
        let after = store.require_producer(p.id).await.unwrap();
        assert_eq!(after.holding(ResourceType::Minerals), Decimal::new(20, 0));
    }

    fn buy(p: &Producer, qty: i64, amount: i64) -> TradeSettlement {
        TradeSettlement {
            producer_id: p.id,
            expected_version: p.version,
            resource: ResourceType::Energy,
            side: TradeSide::Buy,
            quantity: Decimal::new(qty, 0),
            amount: Decimal::new(amount, 0),
            avg_price: Decimal::new(amount, 0) / Decimal::new(qty, 0),
            now: now(),
        }
    }

    #[tokio::test]
    async fn trade_settles_and_checks_funds() {
        let (store, p, _) = setup().await;
        let settled = store.settle_trade(&buy(&p, 4, 20)).await.unwrap();
        assert_eq!(settled.balance, Decimal::new(30, 0));
        assert_eq!(settled.holding, Decimal::new(4, 0));

        // Snapshot is now stale.
        assert!(matches!(
            store.settle_trade(&buy(&p, 1, 1)).await,
            Err(StoreError::Conflict(_))
        ));

        let fresh = store.require_producer(p.id).await.unwrap();
        assert!(matches!(
            store.settle_trade(&buy(&fresh, 10, 31)).await,
            Err(StoreError::Insufficient {
                resource: ResourceType::Credits,
                ..
            })
        ));

        let mut sell = buy(&fresh, 5, 25);
        sell.side = TradeSide::Sell;
        assert!(matches!(
            store.settle_trade(&sell).await,
            Err(StoreError::Insufficient {
                resource: ResourceType::Energy,
                ..
            })
        ));
        sell.quantity = Decimal::new(4, 0);
        sell.amount = Decimal::new(18, 0);
        let sold = store.settle_trade(&sell).await.unwrap();
        assert_eq!(sold.balance, Decimal::new(48, 0));
        assert_eq!(sold.holding, Decimal::ZERO);

        let txs = store.list_transactions(p.id, 10).await.unwrap();
        assert_eq!(txs[0].kind, TransactionKind::TradeSell);
        assert_eq!(txs[0].amount, Decimal::new(18, 0));
        assert_eq!(txs[1].amount, Decimal::new(-20, 0));
    }
}
