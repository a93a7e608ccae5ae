//! Daily production: the cursor-paginated batch and the single-producer
//! collect path, which share one unit of work.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use colony_core::{ActiveEvent, EconomyConfig, ModifierMap, ProducerId, ResourceType};
use colony_econ::{calculate_production, ProductionResult};
use colony_events::aggregate_modifiers;
use persistence::{CommitOutcome, ModuleStamp, ProductionCommit, Store, StoreError};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::clock::AbortSignal;
use crate::summary::{SummarySender, SummaryUpdate};
use crate::{Engine, EngineError};

/// Result of one producer's unit of work.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum UnitOutcome {
    Credited {
        resources: Vec<(ResourceType, Decimal)>,
        balance: Decimal,
    },
    /// Every ledger key for the date already existed, or no module is active.
    Skipped,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchSummary {
    pub date: Option<NaiveDate>,
    pub processed: u32,
    pub credited: u32,
    pub skipped: u32,
    pub failed: u32,
    pub timed_out: u32,
    pub credited_by_resource: BTreeMap<ResourceType, Decimal>,
    pub total_credited: Decimal,
    pub pages: u32,
    /// Last producer id handed out; pass it back to resume.
    pub last_cursor: Option<ProducerId>,
    pub duration_ms: u64,
    pub aborted: bool,
    /// Producers that failed or timed out, with the reason.
    pub failures: Vec<(ProducerId, String)>,
}

impl BatchSummary {
    /// Share of processed units that failed or timed out.
    pub fn failure_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        f64::from(self.failed + self.timed_out) / f64::from(self.processed)
    }

    fn record(&mut self, producer: ProducerId, outcome: Result<UnitOutcome, EngineError>) {
        self.processed += 1;
        match outcome {
            Ok(UnitOutcome::Credited { resources, .. }) => {
                self.credited += 1;
                for (resource, amount) in resources {
                    *self
                        .credited_by_resource
                        .entry(resource)
                        .or_insert(Decimal::ZERO) += amount;
                    self.total_credited += amount;
                }
            }
            Ok(UnitOutcome::Skipped) => self.skipped += 1,
            Err(EngineError::UnitTimeout(after)) => {
                self.timed_out += 1;
                self.failures
                    .push((producer, format!("timed out after {}ms", after.as_millis())));
            }
            Err(e) => {
                self.failed += 1;
                self.failures.push((producer, e.to_string()));
            }
        }
    }
}

/// What one unit needs, cloned into each worker task.
#[derive(Clone)]
struct UnitContext {
    store: Store,
    config: Arc<EconomyConfig>,
    events: Arc<Vec<ActiveEvent>>,
    summaries: SummarySender,
    date: NaiveDate,
    now: DateTime<Utc>,
}

impl UnitContext {
    async fn run(&self, producer: ProducerId) -> Result<UnitOutcome, EngineError> {
        let retries = self.config.batch.max_conflict_retries;
        let mut attempt = 0;
        loop {
            match self.attempt(producer).await {
                Err(StoreError::Conflict(what)) if attempt < retries => {
                    attempt += 1;
                    debug!(
                        category = "production",
                        %producer,
                        attempt,
                        %what,
                        "version conflict, retrying"
                    );
                }
                other => return other.map_err(EngineError::from),
            }
        }
    }

    async fn attempt(&self, producer_id: ProducerId) -> Result<UnitOutcome, StoreError> {
        let producer = self.store.require_producer(producer_id).await?;
        let modules = self.store.list_modules(producer_id).await?;
        let crew = self.store.list_crew(producer_id).await?;
        let modifiers = aggregate_modifiers(self.events.iter(), producer_id, self.now);
        let result = calculate_production(&self.config.production, &modules, &crew, &modifiers);
        if result.modules.is_empty() {
            return Ok(UnitOutcome::Skipped);
        }

        let versions: BTreeMap<_, _> = modules.iter().map(|m| (m.id, m.version)).collect();
        let commit = ProductionCommit {
            producer_id,
            expected_version: producer.version,
            date: self.date,
            credits: result.by_resource.iter().map(|(r, a)| (*r, *a)).collect(),
            modules: result
                .modules
                .iter()
                .filter_map(|o| {
                    versions.get(&o.module_id).map(|v| ModuleStamp {
                        id: o.module_id,
                        version: *v,
                        resource: o.resource,
                    })
                })
                .collect(),
            now: self.now,
        };
        match self.store.commit_production(&commit).await? {
            CommitOutcome::Credited { resources, balance } => {
                let produced = resources.iter().map(|(_, a)| *a).sum();
                self.summaries.send(SummaryUpdate {
                    producer_id,
                    produced,
                    active_modules: u32::try_from(result.modules.len()).unwrap_or(u32::MAX),
                    cycle_date: self.date,
                    at: self.now,
                });
                Ok(UnitOutcome::Credited { resources, balance })
            }
            CommitOutcome::Skipped => Ok(UnitOutcome::Skipped),
        }
    }
}

impl Engine {
    async fn unit_context(&self, date: Option<NaiveDate>) -> Result<UnitContext, EngineError> {
        let now = self.now();
        let events = self.store.live_events(now).await?;
        Ok(UnitContext {
            store: self.store.clone(),
            config: Arc::clone(&self.config),
            events: Arc::new(events),
            summaries: self.summaries.sender(),
            date: date.unwrap_or_else(|| now.date_naive()),
            now,
        })
    }

    /// Credit one day of production to every eligible producer.
    pub async fn run_production_cycle(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<BatchSummary, EngineError> {
        self.run_production_cycle_from(date, None, &AbortSignal::new())
            .await
    }

    /// Resume a cycle after `cursor`, stopping between pages once `abort`
    /// is raised. Pages already committed stay committed.
    pub async fn run_production_cycle_from(
        &self,
        date: Option<NaiveDate>,
        cursor: Option<ProducerId>,
        abort: &AbortSignal,
    ) -> Result<BatchSummary, EngineError> {
        let started = Instant::now();
        let ctx = self.unit_context(date).await?;
        let batch = &self.config.batch;
        let active_since = ctx.now - Duration::days(i64::from(batch.active_window_days));
        let timeout = batch.unit_timeout();

        let mut summary = BatchSummary {
            date: Some(ctx.date),
            last_cursor: cursor,
            ..BatchSummary::default()
        };
        info!(category = "batch", date = %ctx.date, cursor = ?cursor, "production cycle started");

        loop {
            if abort.is_aborted() {
                summary.aborted = true;
                warn!(
                    category = "batch",
                    cursor = ?summary.last_cursor,
                    "production cycle aborted"
                );
                break;
            }
            let page = self
                .store
                .fetch_eligible_producers(summary.last_cursor, batch.page_size, active_since)
                .await?;
            if page.is_empty() {
                break;
            }
            summary.pages += 1;

            let mut workers = JoinSet::new();
            for &producer in &page {
                let ctx = ctx.clone();
                workers.spawn(async move {
                    let outcome = match tokio::time::timeout(timeout, ctx.run(producer)).await {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::UnitTimeout(timeout)),
                    };
                    (producer, outcome)
                });
            }
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok((producer, outcome)) => {
                        if let Err(e) = &outcome {
                            warn!(category = "production", %producer, error = %e, "unit failed");
                        }
                        summary.record(producer, outcome);
                    }
                    Err(e) => {
                        summary.processed += 1;
                        summary.failed += 1;
                        error!(category = "batch", error = %e, "production worker panicked");
                    }
                }
            }

            summary.last_cursor = page.last().copied();
            if page.len() < batch.page_size as usize {
                break;
            }
        }

        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            category = "batch",
            date = %ctx.date,
            processed = summary.processed,
            credited = summary.credited,
            skipped = summary.skipped,
            failed = summary.failed,
            timed_out = summary.timed_out,
            total = %summary.total_credited,
            pages = summary.pages,
            duration_ms = summary.duration_ms,
            aborted = summary.aborted,
            "production cycle finished"
        );
        let rate = summary.failure_rate();
        if rate > batch.failure_alert_rate {
            error!(
                category = "batch",
                date = %ctx.date,
                failure_rate = rate,
                threshold = batch.failure_alert_rate,
                "production failure rate above alert threshold"
            );
        }
        Ok(summary)
    }

    /// Collect today's production for one producer. Safe to race with the
    /// batch or another collect: the ledger credits each key once.
    pub async fn collect_earnings(&self, producer: ProducerId) -> Result<UnitOutcome, EngineError> {
        let ctx = self.unit_context(None).await?;
        let outcome = ctx.run(producer).await?;
        self.mark_active("production", producer, ctx.now).await;
        info!(
            category = "production",
            %producer,
            date = %ctx.date,
            outcome = ?outcome,
            "earnings collected"
        );
        Ok(outcome)
    }

    /// Preview of what `producer` would earn now.
    pub async fn calculate_production(
        &self,
        producer: ProducerId,
    ) -> Result<ProductionResult, EngineError> {
        self.store.require_producer(producer).await?;
        let modules = self.store.list_modules(producer).await?;
        let crew = self.store.list_crew(producer).await?;
        let modifiers = self.get_active_modifiers(producer).await?;
        Ok(calculate_production(
            &self.config.production,
            &modules,
            &crew,
            &modifiers,
        ))
    }

    /// Product of every live event modifier that reaches `producer`.
    pub async fn get_active_modifiers(
        &self,
        producer: ProducerId,
    ) -> Result<ModifierMap, EngineError> {
        let now = self.now();
        let events = self.store.live_events(now).await?;
        Ok(aggregate_modifiers(events.iter(), producer, now))
    }
}
