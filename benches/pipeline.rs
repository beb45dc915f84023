use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gifsmith::{
    compositor::{scale_frame, Compositor, Layers, TextRenderer},
    filters::{FilterPipeline, FilterSettings, Rotation},
    quantize::{DitherMode, PaletteQuantizer},
    Frame,
};
use image::{Rgb, RgbImage};

const SIZES: [(u32, u32); 2] = [(320, 240), (640, 480)];

fn gradient(width: u32, height: u32) -> Frame {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    Frame::new(image, 0)
}

fn filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("filters");
    let settings = FilterSettings {
        brightness: 1.2,
        contrast: 0.9,
        saturation: 1.4,
        sepia: true,
        rotation: Rotation::Cw90,
        ..Default::default()
    };

    for (w, h) in SIZES {
        let frame = gradient(w, h);
        group.throughput(Throughput::Elements((w * h) as u64));

        group.bench_function(BenchmarkId::new("all-stages", format!("{}x{}", w, h)), |b| {
            let pipeline = FilterPipeline::new();
            b.iter(|| pipeline.apply(black_box(frame.clone()), &settings))
        });
        group.bench_function(BenchmarkId::new("identity", format!("{}x{}", w, h)), |b| {
            let pipeline = FilterPipeline::new();
            let identity = FilterSettings::default();
            b.iter(|| pipeline.apply(black_box(frame.clone()), &identity))
        });
    }

    group.finish();
}

fn resize(c: &mut Criterion) {
    let mut group = c.benchmark_group("resize");

    for (w, h) in SIZES {
        let frame = gradient(w, h);
        group.throughput(Throughput::Elements((w * h) as u64));

        group.bench_function(BenchmarkId::new("half", format!("{}x{}", w, h)), |b| {
            b.iter(|| scale_frame(black_box(frame.clone()), 0.5))
        });
        group.bench_function(BenchmarkId::new("compositor", format!("{}x{}", w, h)), |b| {
            let mut compositor = Compositor::for_export(&Layers::default(), 0.5, &TextRenderer::builtin());
            b.iter(|| compositor.apply(black_box(frame.clone())))
        });
    }

    group.finish();
}

fn quantize(c: &mut Criterion) {
    let mut group = c.benchmark_group("quantize");
    let frame = gradient(320, 240);
    group.throughput(Throughput::Elements(320 * 240));

    for colors in [64u16, 128] {
        for dither in [DitherMode::None, DitherMode::FloydSteinberg] {
            let quantizer = PaletteQuantizer::new(colors, dither);
            group.bench_function(BenchmarkId::new(dither.to_string(), colors), |b| {
                b.iter(|| quantizer.quantize(black_box(frame.clone())))
            });
        }
    }

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = filters, resize, quantize
);

criterion_main!(benches);
