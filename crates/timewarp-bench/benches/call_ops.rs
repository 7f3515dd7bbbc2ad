//! Criterion micro-benchmarks for recording and replaying a guest.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use timewarp_bench::{record_workload, workload, workload_system, CALLS_PER_ITERATION};
use timewarp_core::{Errno, Event, Fd};
use timewarp_log::{LogReader, WriterConfig};
use timewarp_wasicall::call::{decode_outcome, encode_call, split_call};
use timewarp_wasicall::Replay;

const ITERATIONS: usize = 1_000;

/// Benchmark: run the workload against the mock system directly.
fn bench_live(c: &mut Criterion) {
    let mut group = c.benchmark_group("workload");
    group.throughput(Throughput::Elements((ITERATIONS * CALLS_PER_ITERATION) as u64));
    group.bench_function("live", |b| {
        b.iter(|| {
            let mut system = workload_system(ITERATIONS, 42);
            workload(&mut system, ITERATIONS).unwrap();
            black_box(system);
        });
    });
    group.bench_function("record", |b| {
        b.iter(|| black_box(record_workload(ITERATIONS, WriterConfig::default()).unwrap()));
    });

    let (bytes, index) = record_workload(ITERATIONS, WriterConfig::default()).unwrap();
    group.bench_function("replay", |b| {
        b.iter(|| {
            let mut replay = Replay::new(LogReader::with_index(bytes.as_slice(), index.clone()));
            workload(&mut replay, ITERATIONS).unwrap();
            black_box(replay.replayed());
        });
    });
    group.finish();
}

/// Benchmark: encode and decode a poll call with 16 events.
fn bench_call_codec(c: &mut Criterion) {
    let events: Vec<Event> = (0..16)
        .map(|i| Event {
            user_data: i,
            errno: Errno::SUCCESS,
            event_type: 1,
            nbytes: 4096,
            flags: 0,
        })
        .collect();
    let params = (Fd(7), 16u32);

    c.bench_function("call_encode_events", |b| {
        let mut buf = Vec::with_capacity(1024);
        b.iter(|| {
            buf.clear();
            encode_call(&mut buf, &params, Ok(&events));
            black_box(&buf);
        });
    });

    let mut encoded = Vec::new();
    encode_call(&mut encoded, &params, Ok(&events));
    c.bench_function("call_decode_events", |b| {
        b.iter(|| {
            let (_, outcome) = split_call(&encoded).unwrap();
            black_box(decode_outcome::<Vec<Event>>(outcome).unwrap().unwrap());
        });
    });
}

criterion_group!(benches, bench_live, bench_call_codec);
criterion_main!(benches);
