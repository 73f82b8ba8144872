//! Benchmarks for motion-codec
//!
//! Measures packing, binning and per-codec compression on a synthetic mosaic.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use motion_codec::{bin_in_place, compress, pack, unpack, CompressionType, FrameLayout, PixelFormat};

fn mosaic(format: PixelFormat, width: u32, height: u32) -> (FrameLayout, Vec<u8>) {
    let layout = FrameLayout::tight(format, width, height);
    let samples: Vec<u16> = (0..layout.pixel_count())
        .map(|i| {
            let x = (i % width as usize) as u16;
            let y = (i / width as usize) as u16;
            (64 + (x / 16) + (y / 16) + (i as u16 & 7)) & format.max_value()
        })
        .collect();
    let data = pack(&layout, &samples).unwrap();
    (layout, data)
}

fn bench_unpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("unpack");

    for format in [PixelFormat::Raw10, PixelFormat::Raw12, PixelFormat::Raw16] {
        let (layout, data) = mosaic(format, 4000, 3000);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{format:?}")), &data, |b, data| {
            b.iter(|| black_box(unpack(&layout, data).unwrap()));
        });
    }

    group.finish();
}

fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress");
    let (layout, data) = mosaic(PixelFormat::Raw10, 4000, 3000);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for ty in [
        CompressionType::Zstd,
        CompressionType::BitPack,
        CompressionType::DeltaBitPack,
        CompressionType::BitPlane,
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{ty:?}")), &data, |b, data| {
            b.iter(|| black_box(compress(ty, data, &layout).unwrap()));
        });
    }

    group.finish();
}

fn bench_bin(c: &mut Criterion) {
    let (layout, data) = mosaic(PixelFormat::Raw10, 4000, 3000);

    c.bench_function("bin_raw10", |b| {
        b.iter_batched(
            || data.clone(),
            |mut data| black_box(bin_in_place(&mut data, &layout, 1023.0).unwrap()),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_unpack, bench_compress, bench_bin);
criterion_main!(benches);
