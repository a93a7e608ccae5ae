use chrono::{TimeZone, Utc};
use colony_core::{
    CrewId, CrewMember, CrewRole, DepthConfig, MarketConfig, ModifierMap, Module, ModuleId,
    ModuleType, ProducerId, ProductionConfig, ResourcePrice, ResourceType, Tier, TradeSide,
    GLOBAL_PRODUCTION,
};
use colony_econ::{calculate_production, generate_depth, simulate_tick, walk_book, MarketInputs};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;

fn colony(n_modules: usize) -> (Vec<Module>, Vec<CrewMember>) {
    let mut modules = Vec::with_capacity(n_modules);
    let mut crew = Vec::new();
    for i in 0..n_modules {
        let module_type = ModuleType::ALL[i % ModuleType::ALL.len()];
        modules.push(Module {
            id: ModuleId(i as i64),
            producer_id: ProducerId(1),
            module_type,
            tier: Tier::ALL[i % Tier::ALL.len()],
            level: (i % 10) as u8 + 1,
            efficiency: 90,
            active: true,
            age_cycles: (i * 7) as u32,
            last_collected_at: None,
            version: 0,
        });
        if i % 2 == 0 {
            crew.push(CrewMember {
                id: CrewId(i as i64),
                producer_id: ProducerId(1),
                name: format!("crew-{i}"),
                role: CrewRole::Engineer,
                specialty: Some(module_type),
                output_bonus_pct: 15,
                efficiency_bonus_pct: 5,
                assigned_module: Some(ModuleId(i as i64)),
            });
        }
    }
    (modules, crew)
}

fn bench_production(c: &mut Criterion) {
    let cfg = ProductionConfig::default();
    let (modules, crew) = colony(12);
    let mods: ModifierMap = [(GLOBAL_PRODUCTION, 1.25)].into_iter().collect();
    c.bench_function("production 12 modules", |b| {
        b.iter(|| black_box(calculate_production(&cfg, &modules, &crew, &mods)))
    });
}

fn bench_market(c: &mut Criterion) {
    let cfg = MarketConfig::default();
    let params = &cfg.resources[&ResourceType::Energy];
    let state = ResourcePrice {
        resource: ResourceType::Energy,
        current_price: params.base_price,
        base_price: params.base_price,
        min_price: params.min_price,
        max_price: params.max_price,
        change_24h: 0.0,
        supply: 0.0,
        demand: 0.0,
        volatility: params.volatility,
        seasonal_phase: 0.0,
        updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    };
    let mods = ModifierMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    c.bench_function("price tick", |b| {
        b.iter(|| {
            let inputs = MarketInputs {
                demand: 120.0,
                supply: 80.0,
            };
            black_box(simulate_tick(&cfg, &state, inputs, &mods, &mut rng).unwrap())
        })
    });

    let depth = DepthConfig::default();
    c.bench_function("depth + 500 unit buy", |b| {
        b.iter(|| {
            let book = generate_depth(&depth, &state, 7);
            let quantity = Decimal::new(500, 0);
            black_box(walk_book(&book, TradeSide::Buy, quantity, state.current_price).unwrap())
        })
    });
}

criterion_group!(benches, bench_production, bench_market);
criterion_main!(benches);
