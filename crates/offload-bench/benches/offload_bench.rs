//! Benchmarks for the rotation and reduction kernels.
//!
//! Run with: `cargo bench`

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use offload_compute::pi::reference_partial_sums;
use offload_compute::pipeline::{estimate_pi, rotate_image};
use offload_compute::rotate::rotate_reference;
use offload_compute::{DeviceInfo, ImageGrid, PiConfig, Pivot, RotationConfig, TermSeries, WorkGrid};

fn ramp(n: usize) -> ImageGrid {
    let data = (0..n * n).map(|v| (v % 256) as f32).collect();
    // n*n samples always match an n x n grid
    ImageGrid::from_f32(data, n, n).unwrap()
}

/// Rotation: rayon dispatch vs the single-threaded reference.
fn bench_rotate(c: &mut Criterion) {
    let mut group = c.benchmark_group("rotate");
    let cpu = DeviceInfo::host_cpu();
    let config = RotationConfig::default().pivot(Pivot::Center);

    for size in [256usize, 512, 1024] {
        let src = ramp(size);
        group.throughput(Throughput::Elements((size * size) as u64));

        group.bench_with_input(BenchmarkId::new("reference", size), &src, |b, s| {
            b.iter(|| rotate_reference(black_box(s), config.params, config.pivot, config.sentinel))
        });

        group.bench_with_input(BenchmarkId::new("cpu_session", size), &src, |b, s| {
            b.iter(|| rotate_image(&cpu, black_box(s), &config).unwrap())
        });
    }

    group.finish();
}

/// Pi partial sums over growing grids.
fn bench_pi(c: &mut Criterion) {
    let mut group = c.benchmark_group("pi");
    let cpu = DeviceInfo::host_cpu();
    let fpi = 16;

    for (units, local) in [(4u32, 16usize), (16, 64), (64, 256)] {
        let grid = WorkGrid::from_capabilities(units, local).unwrap();
        let label = format!("{units}x{local}");
        group.throughput(Throughput::Elements(grid.total_terms(fpi).unwrap() as u64));

        group.bench_function(BenchmarkId::new("reference", &label), |b| {
            b.iter(|| reference_partial_sums(TermSeries::Leibniz, black_box(&grid), fpi).unwrap())
        });

        let config = PiConfig::default()
            .compute_units(units)
            .local_size(local)
            .floats_per_item(fpi);
        group.bench_function(BenchmarkId::new("cpu_session", &label), |b| {
            b.iter(|| estimate_pi(&cpu, black_box(&config)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rotate, bench_pi);

criterion_main!(benches);
