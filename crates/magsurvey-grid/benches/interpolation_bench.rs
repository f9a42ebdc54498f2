//! Criterion benchmarks for magsurvey-grid: triangulation, interpolation and masking.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use magsurvey_grid::{
    Budget, InterpolationKind, InterpolatorConfig, ScatteredPoint, TiledMasker, Triangulation,
    mask_convex_hull,
};

fn scattered(n: usize, seed: u64) -> Vec<ScatteredPoint> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let x = 500_000.0 + rng.gen_range(0.0..5_000.0);
            let y = 6_200_000.0 + rng.gen_range(0.0..5_000.0);
            let value = ((x - 500_000.0) * 0.002).sin() * 30.0 + ((y - 6_200_000.0) * 0.001).cos() * 15.0;
            ScatteredPoint::new(x, y, value)
        })
        .collect()
}

fn bench_triangulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("triangulation");
    for &n in &[1_000usize, 10_000, 50_000] {
        let coords: Vec<[f64; 2]> = scattered(n, 7).iter().map(|p| [p.easting, p.northing]).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &coords, |b, coords| {
            b.iter(|| Triangulation::new(coords).unwrap());
        });
    }
    group.finish();
}

fn bench_interpolation(c: &mut Criterion) {
    let points = scattered(20_000, 11);
    let budget = Budget::unlimited();
    let mut group = c.benchmark_group("interpolate_20k_spacing_20");
    group.sample_size(10);

    for kind in [InterpolationKind::Linear, InterpolationKind::Cubic] {
        let config = InterpolatorConfig::new(kind, 20.0).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(kind), &config, |b, config| {
            b.iter(|| {
                let interpolator = config.fit(&points, &budget).unwrap();
                interpolator
                    .grid(interpolator.region(), 20.0, &budget)
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_masking(c: &mut Criterion) {
    let points = scattered(20_000, 13);
    let budget = Budget::unlimited();
    let interpolator = InterpolatorConfig::new(InterpolationKind::Linear, 10.0)
        .unwrap()
        .fit(&points, &budget)
        .unwrap();
    let grid = interpolator
        .grid(interpolator.region(), 10.0, &budget)
        .unwrap();

    c.bench_function("convex_hull_mask", |b| {
        b.iter(|| mask_convex_hull(&grid, &points));
    });

    let mut group = c.benchmark_group("tiled_distance_mask");
    for &workers in &[1usize, 6] {
        let masker = TiledMasker::new(50_000, workers);
        group.bench_with_input(BenchmarkId::from_parameter(workers), &masker, |b, masker| {
            b.iter(|| masker.mask(&grid, &points, 40.0, &budget).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_triangulation, bench_interpolation, bench_masking);
criterion_main!(benches);
