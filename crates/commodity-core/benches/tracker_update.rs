use commodity_core::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

const TUNING_JSON: &str = include_str!("../../../data/commodity_tuning.json");

fn populated(owners: usize) -> CommodityEngine {
    let mut engine = match CommodityEngine::from_tuning_json(TUNING_JSON) {
        Ok(engine) => engine,
        Err(error) => panic!("bundled tuning: {error}"),
    };
    for i in 0..owners {
        let owner = engine.spawn_owner(i % 2 == 0);
        for config_id in 1..=3 {
            engine.add_commodity(owner, config_id);
        }
    }
    engine.drain_progress();
    engine
}

fn bench_advance_day(c: &mut Criterion) {
    c.bench_function("advance_one_day_100_owners", |b| {
        b.iter_batched(
            || populated(100),
            |mut engine| {
                let delivered = engine.advance(24 * 60);
                black_box((delivered, engine.drain_progress().len()))
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_value_reads(c: &mut Criterion) {
    let mut engine = populated(100);
    let owners: Vec<_> = engine.world.iter().map(|e| e.entity()).collect();
    c.bench_function("hunger_set_value_100_owners", |b| {
        b.iter(|| {
            for &owner in &owners {
                if let Some(hunger) = engine.commodity_for(owner, 1) {
                    engine.add_value(owner, hunger, black_box(-5.0));
                    black_box(engine.value(owner, hunger));
                }
            }
            engine.advance(1);
            engine.drain_progress();
        })
    });
}

criterion_group!(benches, bench_advance_day, bench_value_reads);
criterion_main!(benches);
