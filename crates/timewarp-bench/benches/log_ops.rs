//! Criterion micro-benchmarks for segment writing, reading and seeking.

use std::hint::black_box;
use std::io::Cursor;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use timewarp_log::{Compression, LogReader, LogWriter, Record, WriterConfig};
use timewarp_test_utils::{records, segment};

const RECORDS: usize = 10_000;

fn write_segment(records: &[Record], compression: Compression) -> Vec<u8> {
    let config = WriterConfig::default().with_compression(compression);
    let mut writer = LogWriter::new(Vec::with_capacity(1 << 20), segment(), config).unwrap();
    for record in records {
        writer.write_record(record).unwrap();
    }
    writer.finish().unwrap().0
}

/// Benchmark: write 10K records under each codec.
fn bench_write(c: &mut Criterion) {
    let input = records(RECORDS);
    let mut group = c.benchmark_group("log_write");
    group.throughput(Throughput::Elements(RECORDS as u64));
    for compression in [Compression::None, Compression::Snappy, Compression::Zstd] {
        group.bench_function(compression.to_string(), |b| {
            b.iter(|| black_box(write_segment(&input, compression)));
        });
    }
    group.finish();
}

/// Benchmark: stream the same records back.
fn bench_read(c: &mut Criterion) {
    let input = records(RECORDS);
    let mut group = c.benchmark_group("log_read");
    group.throughput(Throughput::Elements(RECORDS as u64));
    for compression in [Compression::None, Compression::Snappy, Compression::Zstd] {
        let bytes = write_segment(&input, compression);
        group.bench_function(compression.to_string(), |b| {
            b.iter(|| {
                let mut reader = LogReader::new(bytes.as_slice());
                let mut n = 0;
                while let Some(record) = reader.next_record().unwrap() {
                    black_box(&record);
                    n += 1;
                }
                assert_eq!(n, RECORDS);
            });
        });
    }
    group.finish();
}

/// Benchmark: indexed seek to the middle of the segment.
fn bench_seek(c: &mut Criterion) {
    let input = records(RECORDS);
    let config = WriterConfig::default().with_compression(Compression::Snappy);
    let mut writer = LogWriter::new(Vec::new(), segment(), config).unwrap();
    for record in &input {
        writer.write_record(record).unwrap();
    }
    let (bytes, index) = writer.finish().unwrap();
    let target = input[RECORDS / 2].timestamp;

    c.bench_function("log_seek_indexed", |b| {
        b.iter(|| {
            let mut reader = LogReader::with_index(Cursor::new(bytes.as_slice()), index.clone());
            reader.seek(target).unwrap();
            black_box(reader.next_record().unwrap());
        });
    });
}

criterion_group!(benches, bench_write, bench_read, bench_seek);
criterion_main!(benches);
