//! Linker and detector benchmarks using Criterion.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;

use celltrack_rs::{AdaptiveSearch, Detector, DetectorConfig, Linker, LinkerConfig, Observation};

/// A grid of `n` cells drifting one pixel per frame along x.
fn create_test_frames(n: usize, frames: usize) -> Vec<Vec<Observation>> {
    (0..frames)
        .map(|frame| {
            (0..n)
                .map(|i| {
                    let x = (i % 10) as f64 * 40.0 + frame as f64;
                    let y = (i / 10) as f64 * 40.0;
                    Observation::at(frame, x, y, 500.0).expect("valid observation")
                })
                .collect()
        })
        .collect()
}

/// Synthetic frame with Gaussian cells on a regular grid.
fn create_test_image(shape: (usize, usize), spacing: f64) -> Array2<f64> {
    Array2::from_shape_fn(shape, |(row, col)| {
        let dx = (col as f64 % spacing) - spacing / 2.0;
        let dy = (row as f64 % spacing) - spacing / 2.0;
        10.0 + 200.0 * (-(dx * dx + dy * dy) / 8.0).exp()
    })
}

fn bench_link(c: &mut Criterion, name: &str, n: usize, config: LinkerConfig) {
    let frames = create_test_frames(n, 50);
    c.bench_function(name, |b| {
        b.iter(|| {
            let mut linker = Linker::new(config.clone()).expect("valid linker");
            linker.link_frames(black_box(frames.clone())).expect("ordered frames");
            linker.finish()
        })
    });
}

fn benchmark_link_10_cells(c: &mut Criterion) {
    bench_link(c, "link_10_cells_50_frames", 10, LinkerConfig::new(5.0, 3));
}

fn benchmark_link_100_cells(c: &mut Criterion) {
    bench_link(c, "link_100_cells_50_frames", 100, LinkerConfig::new(5.0, 3));
}

fn benchmark_link_100_cells_adaptive(c: &mut Criterion) {
    // Search range wide enough that neighbouring cells compete
    let config = LinkerConfig::new(45.0, 3).with_adaptive(AdaptiveSearch::default());
    bench_link(c, "link_100_cells_50_frames_adaptive", 100, config);
}

fn benchmark_locate_256(c: &mut Criterion) {
    let detector = Detector::new(DetectorConfig::new(11, 100.0)).expect("valid detector");
    let image = create_test_image((256, 256), 32.0);

    c.bench_function("locate_256x256", |b| {
        b.iter(|| detector.locate(0, black_box(&image.view())))
    });
}

criterion_group!(
    benches,
    benchmark_link_10_cells,
    benchmark_link_100_cells,
    benchmark_link_100_cells_adaptive,
    benchmark_locate_256,
);
criterion_main!(benches);
