//! Criterion benchmarks for magsurvey-series: rolling means, alignment and residual extraction.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use magsurvey_series::{
    AlignConfig, DiurnalConfig, ObservatoryRecord, ObservatorySeries, ResidualConfig,
    SmoothingWindow, SurveyRecord, SurveySeries, align, rolling_mean,
};

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 6, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

fn make_survey(n: usize) -> SurveySeries {
    (0..n)
        .map(|i| {
            SurveyRecord::new(
                start() + TimeDelta::seconds(i as i64),
                50_000.0 + (i as f64 * 0.05).sin() * 25.0,
            )
            .with_projected(i as f64, (i as f64 * 0.01).cos() * 100.0)
        })
        .collect()
}

fn make_observatory(n: usize, step_secs: i64) -> ObservatorySeries {
    (0..n)
        .map(|i| {
            ObservatoryRecord::new(
                start() + TimeDelta::seconds(i as i64 * step_secs),
                48_000.0 + (i as f64 * 0.001).sin() * 10.0,
            )
        })
        .collect()
}

fn bench_rolling_mean(c: &mut Criterion) {
    let values: Vec<f64> = (0..100_000).map(|i| (i as f64 * 0.1).sin()).collect();
    let mut group = c.benchmark_group("rolling_mean_100k");

    for &size in &[100usize, 500, 5_000] {
        let window = SmoothingWindow::centered(size).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &window, |b, &w| {
            b.iter(|| rolling_mean(&values, w, 1));
        });
    }

    group.finish();
}

fn bench_align(c: &mut Criterion) {
    let survey = make_survey(50_000);
    let same_rate = make_observatory(50_000, 1);
    let coarse = make_observatory(2_500, 20);
    let config = AlignConfig::default();

    let mut group = c.benchmark_group("align_50k");
    group.bench_function("same_period", |b| {
        b.iter(|| align(&survey, &same_rate, &config).unwrap());
    });
    group.bench_function("resample_20s", |b| {
        b.iter(|| align(&survey, &coarse, &config).unwrap());
    });
    group.finish();
}

fn bench_pipeline_stages(c: &mut Criterion) {
    let survey = make_survey(50_000);
    let observatory = make_observatory(50_000, 1);

    c.bench_function("diurnal_correct_50k", |b| {
        let config = DiurnalConfig::new();
        b.iter(|| config.correct(&survey, &observatory).unwrap());
    });
    c.bench_function("residual_extract_50k", |b| {
        let config = ResidualConfig::default();
        b.iter(|| config.extract(&survey).unwrap());
    });
}

criterion_group!(benches, bench_rolling_mean, bench_align, bench_pipeline_stages);
criterion_main!(benches);
