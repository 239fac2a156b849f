use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use deltafs::codec::range::read_range_from;
use deltafs::codec::{self, SourceHandle};
use deltafs::config::MIN_WINDOW;
use deltafs::hash::table::SourceTable;
use deltafs::vcdiff::{decode_in_memory, encode_in_memory};
use std::fs;
use std::io::Cursor;
use std::path::Path;

fn lcg_bytes(size: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    std::iter::repeat_with(|| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (state >> 33) as u8
    })
    .take(size)
    .collect()
}

/// Copy of `base` with every `stride`-th byte changed.
fn bump_every(base: &[u8], stride: usize) -> Vec<u8> {
    base.iter()
        .enumerate()
        .map(|(i, &b)| if i % stride.max(1) == 0 { b ^ 0x5A } else { b })
        .collect()
}

fn write_ratio_snapshot() {
    let source = lcg_bytes(2 * 1024 * 1024, 123);
    let mut csv = String::from("stride,delta_bytes,target_bytes,ratio\n");
    for stride in [64usize, 512, 4096, 32768] {
        let target = bump_every(&source, stride);
        let delta = encode_in_memory(&source, &target, MIN_WINDOW);
        let ratio = delta.len() as f64 / target.len() as f64;
        csv.push_str(&format!(
            "{stride},{},{},{}\n",
            delta.len(),
            target.len(),
            ratio
        ));
    }
    let out_dir = Path::new("target/criterion/custom_reports");
    let _ = fs::create_dir_all(out_dir);
    let _ = fs::write(out_dir.join("ratio_snapshot.csv"), csv);
}

fn bench_encoding_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_throughput");
    for size in [64 * 1024usize, 1024 * 1024, 8 * 1024 * 1024] {
        let source = lcg_bytes(size, 1);
        let target = bump_every(&source, 1024);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let delta = encode_in_memory(black_box(&source), black_box(&target), 64 * 1024);
                black_box(delta);
            });
        });
    }
    group.finish();
}

fn bench_decoding_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_throughput");
    for size in [64 * 1024usize, 1024 * 1024, 8 * 1024 * 1024] {
        let source = lcg_bytes(size, 2);
        let target = bump_every(&source, 2048);
        let delta = encode_in_memory(&source, &target, 64 * 1024);
        group.throughput(Throughput::Bytes(target.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let out = decode_in_memory(black_box(&delta), black_box(&source)).unwrap();
                black_box(out);
            });
        });
    }
    group.finish();
}

fn bench_window_size(c: &mut Criterion) {
    write_ratio_snapshot();
    let dir = tempfile::tempdir().unwrap();
    let parent = dir.path().join("parent");
    let source = lcg_bytes(4 * 1024 * 1024, 3);
    let target = bump_every(&source, 4096);
    fs::write(&parent, &source).unwrap();

    let mut group = c.benchmark_group("file_encode_vs_window");
    group.throughput(Throughput::Bytes(target.len() as u64));
    for window in [16 * 1024usize, 128 * 1024, 1024 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(window), &window, |b, window| {
            b.iter(|| {
                let mut src = SourceHandle::open(&parent, *window).unwrap();
                let mut delta = Vec::new();
                codec::encode(&mut delta, &mut Cursor::new(&target), &mut src).unwrap();
                black_box(delta);
            });
        });
    }
    group.finish();
}

fn bench_range_reads(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let parent = dir.path().join("parent");
    let source = lcg_bytes(8 * 1024 * 1024, 4);
    let target = bump_every(&source, 8192);
    fs::write(&parent, &source).unwrap();
    let mut src = SourceHandle::open(&parent, 64 * 1024).unwrap();
    let mut delta = Vec::new();
    codec::encode(&mut delta, &mut Cursor::new(&target), &mut src).unwrap();

    let mut group = c.benchmark_group("range_read_4k");
    for offset in [0u64, 4 * 1024 * 1024, 8 * 1024 * 1024 - 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(offset), &offset, |b, offset| {
            b.iter(|| {
                let out =
                    read_range_from(&mut Cursor::new(&delta), &mut src, 4096, *offset).unwrap();
                black_box(out);
            });
        });
    }
    group.finish();
}

fn bench_hash_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("source_table_fill");
    for slots in [1usize << 14, 1 << 16, 1 << 18] {
        group.bench_with_input(BenchmarkId::from_parameter(slots), &slots, |b, slots| {
            b.iter(|| {
                let mut table = SourceTable::new(*slots);
                for i in 0..(*slots / 2) {
                    table.insert((i as u32).wrapping_mul(2654435761), i as u64);
                }
                black_box(table.lookup(0x1234_5678));
            });
        });
    }
    group.finish();
}

fn bench_xdelta_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("deltafs_vs_xdelta_encode");
    let source = lcg_bytes(1024 * 1024, 8);
    let target = bump_every(&source, 1024);

    group.bench_function("deltafs_encode", |b| {
        b.iter(|| {
            let d = encode_in_memory(black_box(&source), black_box(&target), 64 * 1024);
            black_box(d);
        });
    });

    group.bench_function("xdelta3_encode", |b| {
        b.iter(|| {
            let d = xdelta3::encode(black_box(&target), black_box(&source)).unwrap();
            black_box(d);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_encoding_speed,
    bench_decoding_speed,
    bench_window_size,
    bench_range_reads,
    bench_hash_table,
    bench_xdelta_compare
);
criterion_main!(benches);
