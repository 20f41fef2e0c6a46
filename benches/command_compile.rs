//! Benchmarks for G-code compilation and image preparation
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use drawbot_rs::config::{DrawingAreaConfig, GCodeConfig};
use drawbot_rs::device::{AllGeometry, CompileOptions, GCodeCompiler};
use drawbot_rs::tasks::ColourSplitter;
use drawbot_rs::{Geometry, PenSet, PlottedDrawing, Raster};

/// Zig-zag strokes scattered over the page so ordering has work to do
fn scattered_drawing(strokes: usize, points: usize, pens: usize) -> PlottedDrawing {
    let mut drawing = PlottedDrawing::new(1000, 1000);
    for i in 0..strokes {
        // Cheap deterministic scatter
        let x0 = ((i * 7919) % 1000) as f32;
        let y0 = ((i * 104_729) % 1000) as f32;
        let line = (0..points)
            .map(|p| [x0 + p as f32 * 2.0, y0 + (p % 2) as f32 * 3.0])
            .collect();
        drawing.push(Geometry::new(i % pens, line));
    }
    drawing
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let compiler = GCodeCompiler::new(GCodeConfig::default(), DrawingAreaConfig::default());
    let pens = PenSet::cmyk();

    for strokes in [1_000, 5_000].iter() {
        let drawing = scattered_drawing(*strokes, 8, 4);
        group.throughput(Throughput::Elements(drawing.vertex_count()));

        group.bench_with_input(BenchmarkId::new("optimised", strokes), &drawing, |b, drawing| {
            b.iter(|| {
                black_box(compiler.compile(
                    black_box(drawing),
                    &pens,
                    &AllGeometry,
                    CompileOptions::default(),
                ))
            });
        });

        let bypass = CompileOptions {
            bypass_optimisation: true,
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::new("bypass", strokes), &drawing, |b, drawing| {
            b.iter(|| black_box(compiler.compile(black_box(drawing), &pens, &AllGeometry, bypass)));
        });
    }

    group.finish();
}

fn bench_compile_per_pen(c: &mut Criterion) {
    let compiler = GCodeCompiler::new(GCodeConfig::default(), DrawingAreaConfig::default());
    let pens = PenSet::cmyk();
    let drawing = scattered_drawing(10_000, 8, 4);

    c.bench_function("compile_per_pen_10k", |b| {
        b.iter(|| {
            black_box(compiler.compile_per_pen(
                black_box(&drawing),
                &pens,
                &AllGeometry,
                CompileOptions::default(),
            ))
        });
    });
}

fn bench_cmyk_separation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cmyk_separation");

    for size in [256u32, 1024].iter() {
        let mut image = Raster::solid(*size, *size, [255, 255, 255, 255]);
        for y in 0..*size {
            for x in 0..*size {
                image.set_pixel(x, y, [(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255]);
            }
        }
        group.throughput(Throughput::Elements(u64::from(size * size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &image, |b, image| {
            b.iter(|| black_box(ColourSplitter::Cmyk.separate(black_box(image))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile, bench_compile_per_pen, bench_cmyk_separation);

criterion_main!(benches);
