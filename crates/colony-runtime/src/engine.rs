use chrono::{DateTime, Utc};
use colony_core::{
    CrewId, CrewMember, EconomyConfig, Module, ModuleId, ModuleType, Producer, ProducerId,
    ResourceType, Tier,
};
use colony_events::EventCatalogue;
use moka::future::Cache;
use persistence::{NewCrew, Store};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::summary::SummarySync;
use crate::EngineError;

const DEMAND_CACHE_CAPACITY: u64 = 64;

/// The economy engine: batch jobs, market, events and player actions over
/// one store.
pub struct Engine {
    pub(crate) store: Store,
    pub(crate) config: Arc<EconomyConfig>,
    pub(crate) catalogue: Arc<EventCatalogue>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rng: Mutex<ChaCha8Rng>,
    /// Tier-weighted demand per resource.
    pub(crate) demand: Cache<ResourceType, f64>,
    pub(crate) summaries: SummarySync,
}

impl Engine {
    /// Build an engine on the system clock with an entropy-seeded RNG.
    /// Spawns the summary task, so it must run inside a Tokio runtime.
    pub fn new(store: Store, config: EconomyConfig, catalogue: EventCatalogue) -> Self {
        let demand = Cache::builder()
            .max_capacity(DEMAND_CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(config.market.demand_cache_ttl_secs.max(1)))
            .build();
        let summaries = SummarySync::spawn(store.clone());
        Self {
            store,
            config: Arc::new(config),
            catalogue: Arc::new(catalogue),
            clock: Arc::new(SystemClock),
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
            demand,
            summaries,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deterministic RNG for reproducible market ticks and rolls.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(ChaCha8Rng::seed_from_u64(seed));
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    pub fn catalogue(&self) -> &EventCatalogue {
        &self.catalogue
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Stamp `last_active_at` after an action has committed. A failure is
    /// logged and swallowed so the caller never retries finished work.
    pub(crate) async fn mark_active(
        &self,
        category: &'static str,
        producer: ProducerId,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self.store.touch_producer(producer, now).await {
            warn!(category, %producer, error = %e, "last-active update failed");
        }
    }

    /// Wait for queued summary updates to be written.
    pub async fn flush_summaries(&self) {
        self.summaries.flush().await;
    }

    /// Stop the summary task after draining its queue.
    pub async fn shutdown(self) {
        self.summaries.shutdown().await;
    }

    pub async fn register_producer(
        &self,
        name: &str,
        alliance_id: Option<i64>,
        starting_balance: Decimal,
    ) -> Result<Producer, EngineError> {
        let producer = self
            .store
            .create_producer(name, alliance_id, starting_balance, self.now())
            .await?;
        info!(category = "production", producer = %producer.id, name, "producer registered");
        Ok(producer)
    }

    pub async fn build_module(
        &self,
        producer: ProducerId,
        module_type: ModuleType,
        tier: Tier,
        level: u8,
    ) -> Result<Module, EngineError> {
        let now = self.now();
        self.store.require_producer(producer).await?;
        let module = self
            .store
            .insert_module(
                producer,
                module_type,
                tier,
                level,
                self.config.production.max_modules_per_producer,
                now,
            )
            .await?;
        self.mark_active("production", producer, now).await;
        info!(
            category = "production",
            %producer,
            module = %module.id,
            module_type = %module_type,
            tier = %tier,
            "module built"
        );
        Ok(module)
    }

    pub async fn recruit_crew(
        &self,
        producer: ProducerId,
        crew: &NewCrew,
    ) -> Result<CrewMember, EngineError> {
        let now = self.now();
        self.store.require_producer(producer).await?;
        let cap = self.config.production.max_crew_per_producer;
        let member = self.store.insert_crew(producer, crew, cap, now).await?;
        self.mark_active("production", producer, now).await;
        Ok(member)
    }

    /// Seat a crew member on a module. Fails with a conflict if the module
    /// already has crew.
    pub async fn assign_crew(
        &self,
        producer: ProducerId,
        crew: CrewId,
        module: ModuleId,
    ) -> Result<(), EngineError> {
        self.store.assign_crew(producer, crew, module).await?;
        self.mark_active("production", producer, self.now()).await;
        Ok(())
    }

    pub async fn unassign_crew(
        &self,
        producer: ProducerId,
        crew: CrewId,
    ) -> Result<(), EngineError> {
        self.store.unassign_crew(producer, crew).await?;
        Ok(())
    }

    /// Soft-delete a module, releasing any crew seated on it.
    pub async fn decommission_module(
        &self,
        producer: ProducerId,
        module: ModuleId,
    ) -> Result<(), EngineError> {
        self.store
            .decommission_module(producer, module, self.now())
            .await?;
        info!(category = "production", %producer, %module, "module decommissioned");
        Ok(())
    }
}
