//! Benchmark workloads for the Timewarp call recorder.
//!
//! - [`workload`]: a guest loop mixing clock, I/O, polling and entropy calls
//! - [`workload_system`]: the deterministic system the workload runs against
//! - [`record_workload`]: a finished in-memory recording of the workload

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::io::{IoSlice, IoSliceMut};

use timewarp_core::{Fd, Subscription, SubscriptionKind, SyscallResult, System};
use timewarp_log::{LogError, LogWriter, RecordIndex, WriterConfig};
use timewarp_test_utils::{segment, MockSystem};
use timewarp_wasicall::Recorder;

/// Calls [`workload`] makes per iteration.
pub const CALLS_PER_ITERATION: usize = 5;

/// The system a workload is recorded against. Stdin holds one short line
/// per iteration.
pub fn workload_system(iterations: usize, seed: u64) -> MockSystem {
    let stdin: Vec<u8> = (0..iterations)
        .flat_map(|i| format!("request {i}\n").into_bytes())
        .collect();
    MockSystem::new(seed)
        .with_args(["bench"])
        .with_stdin(stdin)
}

/// Run `iterations` rounds of a request loop against `sys`.
///
/// Each round reads the clock, polls with a timeout, reads stdin, writes
/// a reply to stdout and draws eight random bytes.
pub fn workload(sys: &mut dyn System, iterations: usize) -> SyscallResult<()> {
    let timeout = [Subscription {
        user_data: 0,
        kind: SubscriptionKind::Clock {
            id: 1,
            timeout: 1_000,
            precision: 0,
            flags: 0,
        },
    }];
    let mut line = [0u8; 16];
    let mut nonce = [0u8; 8];
    for _ in 0..iterations {
        let now = sys.clock_time_get(1, 1)?;
        sys.poll_oneoff(&timeout)?;
        let n = sys.fd_read(Fd::STDIN, &mut [IoSliceMut::new(&mut line)])?;
        let stamp = format!("{now} ");
        sys.fd_write(
            Fd::STDOUT,
            &[IoSlice::new(stamp.as_bytes()), IoSlice::new(&line[..n])],
        )?;
        sys.random_get(&mut nonce)?;
    }
    Ok(())
}

/// Record `iterations` rounds of [`workload`] into memory.
pub fn record_workload(
    iterations: usize,
    config: WriterConfig,
) -> Result<(Vec<u8>, RecordIndex), LogError> {
    let writer = LogWriter::new(Vec::new(), segment(), config)?;
    let mut recorder = Recorder::new(workload_system(iterations, 42), writer);
    // Neither the mock nor an in-memory sink fails.
    let _ = workload(&mut recorder, iterations);
    let (_, writer) = recorder.into_parts();
    writer.finish()
}
