//! Integration tests implementing the scenarios above.

mod common;

use common::TraceBuilder;
use gotrace::error::StructuralError;
use gotrace::event::{EventKind, ResourceKind, ResourceState};
use gotrace::{ReadError, Reader, ReaderConfig};

#[test]
fn s1_header_only_stream_is_eof() {
    let stream = TraceBuilder::new().finish();
    let mut reader = Reader::open(stream.as_slice(), ReaderConfig::default()).unwrap();
    assert!(reader.next().unwrap().is_none());
}

#[test]
fn s2_single_freq_batch_yields_sync_at_its_timestamp() {
    let mut builder = TraceBuilder::new();
    builder.freq_batch_with(1, 1, 100, 1_000_000_000);
    let stream = builder.finish();
    let mut reader = Reader::open(stream.as_slice(), ReaderConfig::default()).unwrap();

    let sync = reader.next().unwrap().expect("sync event");
    assert_eq!(*sync.kind(), EventKind::Sync);
    assert_eq!(sync.time(), 100);

    assert!(reader.next().unwrap().is_none());
}

#[test]
fn s3_proc_and_goroutine_status_then_stop() {
    let mut builder = TraceBuilder::new();
    builder.freq_batch(1, 1_000_000_000);
    builder.thread_batch(0, 1, 100, |b| {
        b.proc_status(0, 0, 2); // Proc 0 -> Running
        b.go_status(0, 1, 0, 2); // Goroutine 1 on thread 0 -> Running
        b.go_stop(1, 0, 0); // reason 0 = preempted
    });
    let stream = builder.finish();
    let mut reader = Reader::open(stream.as_slice(), ReaderConfig::default()).unwrap();

    let sync = reader.next().unwrap().expect("sync");
    assert_eq!(*sync.kind(), EventKind::Sync);

    let proc_transition = reader.next().unwrap().expect("proc status");
    let t = proc_transition.state_transition().expect("state transition");
    assert_eq!(t.resource, ResourceKind::Proc);
    assert_eq!(t.id, 0);
    assert_eq!(t.from, ResourceState::Undetermined);
    assert_eq!(t.to, ResourceState::Running);

    let goroutine_transition = reader.next().unwrap().expect("goroutine status");
    let t = goroutine_transition.state_transition().expect("state transition");
    assert_eq!(t.resource, ResourceKind::Goroutine);
    assert_eq!(t.id, 1);
    assert_eq!(t.from, ResourceState::Undetermined);
    assert_eq!(t.to, ResourceState::Running);

    let stop_transition = reader.next().unwrap().expect("goroutine stop");
    let t = stop_transition.state_transition().expect("state transition");
    assert_eq!(t.resource, ResourceKind::Goroutine);
    assert_eq!(t.id, 1);
    assert_eq!(t.from, ResourceState::Running);
    assert_eq!(t.to, ResourceState::Runnable);
    assert_eq!(t.reason, Some("preempted"));

    assert!(proc_transition.time() < goroutine_transition.time());
    assert!(goroutine_transition.time() < stop_transition.time());
}

#[test]
fn s4_unblock_before_block_is_reordered_by_deferral() {
    let mut builder = TraceBuilder::new();
    builder.freq_batch(1, 1_000_000_000);
    // Thread A (id 10): unblocks goroutine 1 at raw ts 50, before the
    // blocking side has even been observed.
    builder.thread_batch(10, 1, 50, |b| {
        b.go_unblock(0, 1, 0);
    });
    // Thread B (id 20): establishes goroutine 1 as Running at raw ts 90,
    // then blocks it at raw ts 100 — both later than A's unblock.
    builder.thread_batch(20, 1, 90, |b| {
        b.go_status(0, 1, 20, 2); // Running
        b.go_block(10, 0, 0); // reason 0 = select
    });
    let stream = builder.finish();
    let mut reader = Reader::open(stream.as_slice(), ReaderConfig::default()).unwrap();

    assert_eq!(*reader.next().unwrap().unwrap().kind(), EventKind::Sync);

    let status = reader.next().unwrap().unwrap();
    let t = status.state_transition().unwrap();
    assert_eq!((t.from, t.to), (ResourceState::Undetermined, ResourceState::Running));

    let block = reader.next().unwrap().unwrap();
    let t = block.state_transition().unwrap();
    assert_eq!((t.from, t.to), (ResourceState::Running, ResourceState::Waiting));
    assert_eq!(t.reason, Some("select"));

    let unblock = reader.next().unwrap().unwrap();
    let t = unblock.state_transition().unwrap();
    assert_eq!((t.from, t.to), (ResourceState::Waiting, ResourceState::Runnable));

    // Block was emitted before Unblock despite Unblock's raw timestamp
    // (50) being earlier than Block's (100).
    assert!(block.time() < unblock.time());

    assert!(reader.next().unwrap().is_none());
}

#[test]
fn s5_duplicate_frequency_is_fatal_and_latches() {
    let mut builder = TraceBuilder::new();
    builder.freq_batch(1, 1_000_000_000);
    builder.freq_batch(1, 2_000_000_000);
    let stream = builder.finish();
    let mut reader = Reader::open(stream.as_slice(), ReaderConfig::default()).unwrap();

    let err = reader.next().unwrap_err();
    assert!(matches!(err, ReadError::Structural(StructuralError::DuplicateFrequency(1))));

    let second = reader.next().unwrap_err();
    assert_eq!(err.to_string(), second.to_string());
}

#[test]
fn s6_missing_stack_id_resolves_empty_but_is_tolerated() {
    let mut builder = TraceBuilder::new();
    builder.freq_batch(1, 1_000_000_000);
    builder.stacks_batch(1); // stack table present but empty
    builder.thread_batch(0, 1, 100, |b| {
        b.go_status(0, 5, 0, 2); // goroutine 5 on thread 0 -> Running
        b.go_create(0, 6, 999); // new goroutine 6, stack id 999 never defined
    });
    let stream = builder.finish();
    let mut reader = Reader::open(stream.as_slice(), ReaderConfig::default()).unwrap();

    assert_eq!(*reader.next().unwrap().unwrap().kind(), EventKind::Sync);
    assert!(reader.next().unwrap().is_some()); // goroutine 5's status transition

    let create = reader.next().unwrap().expect("go create");
    assert_eq!(create.stack(), Some(999));
    assert!(reader.resolve_stack(999).is_empty());
}
