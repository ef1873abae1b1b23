//! Materialization benchmarks
//!
//! - Charger selection with the wait-time estimate, varying drone counts
//! - Full simulation steps (materialization, physics, retraining)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use drone_ensembles::core::config::ScenarioConfig;
use drone_ensembles::core::context::SimulationContext;
use drone_ensembles::ensemble::{ConstantEstimator, Estimate, MaterializationDriver};
use drone_ensembles::scenario::ensembles::charger_assignments;
use drone_ensembles::scenario::{DroneWorld, Simulation};

fn config(drones: usize) -> ScenarioConfig {
    let mut config = ScenarioConfig::default();
    config.drones.count = drones;
    config.drones.low_battery = 1.0;
    config.chargers.count = (drones / 10).max(1);
    config.chargers.queue_per_slot = 4;
    config.birds.count = drones / 2;
    config
}

fn bench_charger_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("charger_selection");

    for drones in [16usize, 64, 256] {
        group.throughput(Throughput::Elements(drones as u64));
        group.bench_with_input(BenchmarkId::new("drones", drones), &drones, |b, &drones| {
            let config = config(drones);
            let estimate = Estimate::new("charging_wait", ConstantEstimator(0.0));
            let template = DroneWorld::generate(&config);
            let mut chargers = charger_assignments(&template, &config, &estimate).unwrap();
            let mut driver = MaterializationDriver::new().without_collection();

            b.iter(|| {
                // Fresh world each iteration so every drone is idle again
                let mut world = DroneWorld::generate(&config);
                let materialized = driver
                    .run_step(&mut world, &mut [&mut chargers], &SimulationContext::new())
                    .unwrap();
                black_box(materialized.len())
            });
        });
    }

    group.finish();
}

fn bench_simulation_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation_step");

    for drones in [16usize, 64] {
        group.bench_with_input(BenchmarkId::new("drones", drones), &drones, |b, &drones| {
            let mut sim = Simulation::new(config(drones)).unwrap();
            b.iter(|| black_box(sim.step().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_charger_selection, bench_simulation_step);
criterion_main!(benches);
