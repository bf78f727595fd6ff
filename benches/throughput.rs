//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use glitcher_core::{
    encode_config_packet, run_sweep, Combo, ComboSource, DeviceSession, GridSweep, HitPredicate,
    MemorySink, ParamRange, SessionConfig, SimulatedDevice,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn codec_benchmark(c: &mut Criterion) {
    let combos: Vec<Combo> = (1..=1024).map(|d| Combo::new(d % 16_384, d * 97, d % 128 + 1)).collect();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(combos.len() as u64));

    group.bench_function("config_packet", |b| {
        b.iter(|| {
            for combo in &combos {
                black_box(encode_config_packet(black_box(combo), true).unwrap());
            }
        })
    });

    group.finish();
}

fn source_benchmark(c: &mut Criterion) {
    let grid = GridSweep::new(
        ParamRange::single(0),
        ParamRange::new(1, 10_000),
        ParamRange::new(1, 10),
    )
    .unwrap();

    let mut group = c.benchmark_group("combo_source");
    group.throughput(Throughput::Elements(grid.len() as u64));

    group.bench_function("grid_produce", |b| b.iter(|| black_box(grid.produce())));

    group.finish();
}

fn sweep_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let grid = GridSweep::new(
        ParamRange::single(0),
        ParamRange::new(1, 100),
        ParamRange::new(1, 4),
    )
    .unwrap();
    let config = SessionConfig::new().repeats_per_combo(1).progress_interval(0);
    let (grid, config) = (&grid, &config);

    let mut group = c.benchmark_group("sweep");
    group.throughput(Throughput::Elements(grid.len() as u64));

    // Unpaced device, so this measures controller and codec overhead only
    group.bench_function("simulated", |b| {
        b.to_async(&runtime).iter(move || async move {
            let device = SimulatedDevice::new()
                .with_throughput(0)
                .with_hit(HitPredicate::window(ParamRange::new(50, 52), ParamRange::single(2)));
            let mut session = DeviceSession::new(device, config.clone());
            let mut sink = MemorySink::new();
            let cancel = Arc::new(AtomicBool::new(false));
            black_box(run_sweep(&mut session, &mut sink, grid, cancel).await.unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, codec_benchmark, source_benchmark, sweep_benchmark);
criterion_main!(benches);
