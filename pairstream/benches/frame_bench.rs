// PairStream framing benchmarks using criterion.
//
// Measures:
//   - Frame encode throughput across payload sizes
//   - Frame decode throughput across payload sizes
//   - Header parse cost

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use pairstream::frame::{decode_frame, encode_frame, encode_header, parse_header};

const SIZES: &[usize] = &[32, 256, 4096, 65536];

// ---------------------------------------------------------------------------
// Frame encode throughput
// ---------------------------------------------------------------------------

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");
    for &size in SIZES {
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{size}B")),
            &payload,
            |b, p| {
                b.iter(|| {
                    black_box(encode_frame(p).unwrap());
                });
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Frame decode throughput
// ---------------------------------------------------------------------------

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");
    for &size in SIZES {
        let wire = encode_frame(&vec![0xCDu8; size]).unwrap();
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{size}B")),
            &wire,
            |b, w| {
                b.iter(|| {
                    black_box(decode_frame(w).unwrap());
                });
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Header parse
// ---------------------------------------------------------------------------

fn bench_header_parse(c: &mut Criterion) {
    let header = encode_header(12_345_678).unwrap();
    c.bench_function("header_parse", |b| {
        b.iter(|| {
            black_box(parse_header(black_box(&header)).unwrap());
        });
    });
}

// ---------------------------------------------------------------------------
// Criterion harness
// ---------------------------------------------------------------------------

criterion_group! {
    name = frame_benches;
    config = Criterion::default()
        .sample_size(100)
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_frame_encode,
        bench_frame_decode,
        bench_header_parse
}

criterion_main!(frame_benches);
