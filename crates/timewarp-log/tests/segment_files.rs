//! File-backed segment and index round trips.

use std::fs::File;
use std::io::BufWriter;

use timewarp_core::{ProcessId, SegmentId, Syscall};
use timewarp_log::{
    open_reader, open_writer, read_index, write_index, Compression, LogError, Record,
    WriterConfig,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn records(n: i64) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let syscall = if i % 3 == 0 {
                Syscall::ClockTimeGet
            } else {
                Syscall::FdWrite
            };
            Record::new(i * 1_000, syscall.id(), format!("call {i}").into_bytes())
        })
        .collect()
}

#[test]
fn segment_and_index_survive_a_file_roundtrip() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("segment.0");
    let index_path = dir.path().join("segment.0.index");
    let segment = SegmentId::new(ProcessId::new_v4(), 0);

    let config = WriterConfig::default().with_batch_size(16);
    let mut writer = open_writer(&log_path, segment, config).unwrap();
    for r in records(100) {
        writer.write_record(&r).unwrap();
    }
    assert_eq!(writer.records_written(), 100);
    let (_, index) = writer.finish().unwrap();
    assert_eq!(index.len(), 7);

    let mut out = BufWriter::new(File::create(&index_path).unwrap());
    write_index(&mut out, &index).unwrap();
    drop(out);

    let loaded = read_index(&mut File::open(&index_path).unwrap(), segment).unwrap();
    assert_eq!(loaded, index);

    let reader = open_reader(&log_path, None).unwrap();
    let back: Vec<Record> = reader.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(back, records(100));

    let mut reader = open_reader(&log_path, Some(loaded)).unwrap();
    reader.seek(55_500).unwrap();
    let next = reader.next_record().unwrap().unwrap();
    assert_eq!(next.timestamp, 56_000);
    assert_eq!(next.function_call, b"call 56");
}

#[test]
fn index_for_another_segment_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let index_path = dir.path().join("index");
    let process = ProcessId::new_v4();

    let mut writer = open_writer(
        dir.path().join("log"),
        SegmentId::new(process, 3),
        WriterConfig::default(),
    )
    .unwrap();
    writer.write_record(&Record::new(0, 0, Vec::new())).unwrap();
    let (_, index) = writer.finish().unwrap();
    write_index(&mut File::create(&index_path).unwrap(), &index).unwrap();

    let err = read_index(
        &mut File::open(&index_path).unwrap(),
        SegmentId::new(process, 4),
    )
    .unwrap_err();
    assert!(matches!(err, LogError::IndexMismatch { .. }), "{err}");
}

#[test]
fn existing_segment_is_never_reopened_for_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("segment");
    let segment = SegmentId::new(ProcessId::new_v4(), 0);
    open_writer(&path, segment, WriterConfig::default()).unwrap();
    assert!(matches!(
        open_writer(&path, segment, WriterConfig::default()),
        Err(LogError::Io(_))
    ));
}

#[test]
fn unflushed_batch_is_the_durability_boundary() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("segment");
    let segment = SegmentId::new(ProcessId::new_v4(), 0);
    let config = WriterConfig::default()
        .with_batch_size(4)
        .with_compression(Compression::Snappy);

    let mut writer = open_writer(&path, segment, config).unwrap();
    for r in records(10) {
        writer.write_record(&r).unwrap();
    }
    // Two full batches reached the file; the last two records did not.
    drop(writer);

    let reader = open_reader(&path, None).unwrap();
    let back: Vec<Record> = reader.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(back, records(8));
}
