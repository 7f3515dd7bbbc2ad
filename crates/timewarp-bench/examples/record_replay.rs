//! Record a guest workload, print what was captured, then replay it.
//!
//! Run with `RUST_LOG=debug` to see batch flushes and replay progress.

use std::io::Read;
use std::time::Instant;

use timewarp_bench::{record_workload, workload, CALLS_PER_ITERATION};
use timewarp_log::{Compression, LogReader, WriterConfig};
use timewarp_wasicall::{Replay, StdioReader};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Timewarp Record/Replay Example ===\n");
    let iterations = 10_000;

    for compression in [Compression::None, Compression::Snappy, Compression::Zstd] {
        let config = WriterConfig::default().with_compression(compression);
        let start = Instant::now();
        let (bytes, index) = record_workload(iterations, config).unwrap();
        println!(
            "  {:>6}: {:>6} calls, {:>8} bytes, {:>3} batches, recorded in {:>6}μs",
            compression.to_string(),
            iterations * CALLS_PER_ITERATION,
            bytes.len(),
            index.len(),
            start.elapsed().as_micros(),
        );
    }

    let (bytes, index) = record_workload(iterations, WriterConfig::default()).unwrap();

    let mut out = String::new();
    StdioReader::new(LogReader::new(bytes.as_slice()))
        .with_line_limit(3)
        .read_to_string(&mut out)
        .unwrap();
    println!("\nFirst lines of guest output:");
    for line in out.lines() {
        println!("  {line}");
    }

    let start = Instant::now();
    let mut replay = Replay::new(LogReader::with_index(bytes.as_slice(), index));
    workload(&mut replay, iterations).unwrap();
    println!(
        "\nReplayed {} calls in {}μs",
        replay.replayed(),
        start.elapsed().as_micros()
    );
}
