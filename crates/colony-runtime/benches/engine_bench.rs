use chrono::{TimeZone, Utc};
use colony_core::{EconomyConfig, ModuleType, Tier};
use colony_events::EventCatalogue;
use colony_runtime::{Clock, Engine, ManualClock};
use criterion::{criterion_group, criterion_main, Criterion};
use persistence::Store;
use rust_decimal::Decimal;
use std::sync::Arc;

fn bench_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap(),
    ));
    let engine = rt.block_on(async {
        let store = Store::in_memory().await.unwrap();
        let engine = Engine::new(
            store,
            EconomyConfig::default(),
            EventCatalogue::builtin().unwrap(),
        )
        .with_clock(clock.clone())
        .with_seed(42);
        engine.seed_market().await.unwrap();
        for i in 0..50 {
            let p = engine
                .register_producer(&format!("colony-{i}"), None, Decimal::new(1_000, 0))
                .await
                .unwrap();
            for t in [ModuleType::MiningRig, ModuleType::SolarArray, ModuleType::HydroponicsBay] {
                engine
                    .build_module(p.id, t, Tier::Uncommon, 3)
                    .await
                    .unwrap();
            }
        }
        engine
    });

    let mut date = clock.now().date_naive();
    c.bench_function("production_cycle_50", |b| {
        b.iter(|| {
            // A new date each iteration so every unit commits.
            date = date.succ_opt().unwrap();
            rt.block_on(engine.run_production_cycle(Some(date)))
                .unwrap()
        })
    });
    c.bench_function("market_tick", |b| {
        b.iter(|| rt.block_on(engine.run_market_tick()).unwrap())
    });
}

criterion_group!(benches, bench_cycle);
criterion_main!(benches);
