#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use colony_core::{
    EconomyConfig, EventCategory, EventScope, EventStatus, ModifierMap, ModuleId, ProducerId,
};
use colony_events::{EventCatalogue, NewEvent};
use colony_runtime::{Engine, ManualClock};
use persistence::Store;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Catalogue with deterministic definitions: a scheduled event on
/// Wednesdays at 10:00, a warned one at 22:00, a random event that always
/// hits on collect, and an alliance milestone at two members.
pub const TEST_CATALOGUE: &str = r#"
events:
  - event_type: HARVEST_FESTIVAL
    name: Harvest Festival
    category: SCHEDULED
    schedule: { every: weekly, weekday: Wed, hour: 10 }
    duration_hours: 24
    cooldown_hours: 24
    modifiers: { GLOBAL_PRODUCTION: 1.5 }
    reward_pool: "1000"
    reward_tiers:
      - { max_rank: 1, multiplier: "2", label: CHAMPION }

  - event_type: NIGHT_MARKET
    name: Night Market
    category: SCHEDULED
    schedule: { every: weekly, weekday: Wed, hour: 22 }
    warning_minutes: 30
    duration_hours: 4
    modifiers: { TRADE_HUB_OUTPUT: 1.2 }

  - event_type: SURE_THING
    name: Sure Thing
    category: RANDOM
    probability: 1.0
    trigger_actions: [collect]
    audience: actor
    duration_hours: 2
    cooldown_hours: 6
    modifiers: { MINING_RIG_OUTPUT: 2.0 }

  - event_type: ALLIANCE_RALLY
    name: Alliance Rally
    category: TRIGGERED
    milestone: { kind: alliance_members, threshold: 2 }
    duration_hours: 12
    cooldown_hours: 48
    modifiers: { GLOBAL_PRODUCTION: 1.1 }
"#;

/// 2024-06-05 is a Wednesday.
pub fn wednesday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 5, hour, minute, 0).unwrap()
}

pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn store(&self) -> &Store {
        self.engine.store()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn producer(&self, name: &str, alliance: Option<i64>, balance: i64) -> ProducerId {
        self.engine
            .register_producer(name, alliance, Decimal::new(balance, 0))
            .await
            .unwrap()
            .id
    }

    pub async fn set_efficiency(&self, module: ModuleId, efficiency: i64) {
        sqlx::query("UPDATE modules SET efficiency = ? WHERE id = ?")
            .bind(efficiency)
            .bind(module.0)
            .execute(self.store().pool())
            .await
            .unwrap();
    }

    /// Run raw SQL against the engine's database.
    pub async fn exec(&self, sql: &str) {
        sqlx::query(sql).execute(self.store().pool()).await.unwrap();
    }

    /// Insert an ACTIVE event starting now.
    pub async fn start_event(&self, modifiers: ModifierMap, scope: EventScope) {
        let now = self.engine.now();
        let event = NewEvent {
            event_type: "TEST_EVENT".into(),
            trigger_key: "TEST_EVENT".into(),
            category: EventCategory::Random,
            status: EventStatus::Active,
            starts_at: now,
            ends_at: now + Duration::hours(6),
            modifiers,
            scope,
            reward_pool: Decimal::ZERO,
            reward_tiers: Vec::new(),
        };
        self.store().insert_event(&event, now).await.unwrap();
    }
}

pub async fn harness_with(
    config: EconomyConfig,
    catalogue: EventCatalogue,
    start: DateTime<Utc>,
) -> Harness {
    let store = Store::in_memory().await.unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let engine = Engine::new(store, config, catalogue)
        .with_clock(clock.clone())
        .with_seed(11);
    engine.seed_market().await.unwrap();
    Harness { engine, clock }
}

/// Default config, no event definitions, Wednesday noon.
pub async fn harness() -> Harness {
    harness_with(
        EconomyConfig::default(),
        EventCatalogue::new(Vec::new()).unwrap(),
        wednesday(12, 0),
    )
    .await
}

pub async fn event_harness(start: DateTime<Utc>) -> Harness {
    harness_with(
        EconomyConfig::default(),
        EventCatalogue::from_yaml_str(TEST_CATALOGUE).unwrap(),
        start,
    )
    .await
}

pub fn targets(ids: &[ProducerId]) -> EventScope {
    EventScope::Targeted(ids.iter().copied().collect::<BTreeSet<_>>())
}
