//! Concentration field throughput benchmarks
//!
//! Measures query latency against populated fields and release throughput
//! through the full modulator path.
//! Target: sub-millisecond queries, >1000 releases/sec
//!
//! Run: cargo bench -- field

use chemical_field::{
    ChemicalModulator, ComponentId, ConcentrationField, LigandType, ModulatorConfig, Position,
    PositionTable,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

fn populated_field(ligand: LigandType, sites: usize) -> ConcentrationField {
    let field = ConcentrationField::new(ligand, &ModulatorConfig::default());
    let spacing = field.cell_size() * 1.1;
    let side = (sites as f64).cbrt().ceil() as usize;
    for i in 0..sites {
        let x = (i % side) as f32 * spacing;
        let y = ((i / side) % side) as f32 * spacing;
        let z = (i / (side * side)) as f32 * spacing;
        field
            .deposit(Position::new(x, y, z), 1.0)
            .expect("below site ceiling");
    }
    field
}

/// Query latency as the field fills up.
fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("field_query");
    for sites in [100usize, 1_000, 10_000] {
        for ligand in [LigandType::Glutamate, LigandType::Dopamine] {
            let field = populated_field(ligand, sites);
            let sample = Position::new(5.0, 5.0, 5.0);
            group.bench_with_input(
                BenchmarkId::new(ligand.name(), sites),
                &sample,
                |b, sample| b.iter(|| black_box(field.query(black_box(*sample)))),
            );
        }
    }
    group.finish();
}

/// Deposit cost into an existing site.
fn bench_deposit(c: &mut Criterion) {
    let field = populated_field(LigandType::Serotonin, 1_000);
    c.bench_function("field_deposit", |b| {
        b.iter(|| field.deposit(black_box(Position::new(1.0, 1.0, 1.0)), black_box(0.01)))
    });
}

/// Full release path: validation, limiter, deposit, dispatch.
fn bench_release(c: &mut Criterion) {
    let table = Arc::new(PositionTable::new());
    for i in 0..1_000u64 {
        table.place(ComponentId(i), Position::new(i as f32, 0.0, 0.0));
    }
    let modulator =
        ChemicalModulator::new(ModulatorConfig::default(), table).expect("valid config");

    let mut next = 0u64;
    c.bench_function("modulator_release", |b| {
        b.iter(|| {
            next = (next + 1) % 1_000;
            if next == 0 {
                modulator.reset_rate_limits();
            }
            let _ = black_box(modulator.release(LigandType::Glutamate, ComponentId(next), 1.0));
        })
    });
}

/// Decay pass over a populated field.
fn bench_decay(c: &mut Criterion) {
    let field = populated_field(LigandType::Serotonin, 10_000);
    c.bench_function("field_decay_10k", |b| {
        b.iter(|| black_box(field.decay(std::time::Duration::from_micros(1))))
    });
}

criterion_group!(benches, bench_query, bench_deposit, bench_release, bench_decay);
criterion_main!(benches);
