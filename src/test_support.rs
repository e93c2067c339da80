//! Test-only helpers: a byte-buffer trace builder and a `tracing`
//! collecting layer, used across this crate's unit and integration
//! tests. Ported from `kona_derive::test_utils`, with `std::sync::Mutex`
//! standing in for `spin::Mutex` since this crate is not `no_std`.

use crate::batch::NO_THREAD;
use crate::opcodes::{Op, TraceVersion};
use crate::wire::write_uvarint;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Hand-assembles a wire-format trace byte stream: header, batches, and
/// aux records, mirroring the literal scenarios spec.md §8 spells out.
#[derive(Debug, Default)]
pub struct TraceBuilder {
    buf: Vec<u8>,
}

impl TraceBuilder {
    /// Starts an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finishes the trace, prefixed with the version header magic.
    pub fn finish(self) -> Vec<u8> {
        let mut out = TraceVersion::Go122.magic().to_vec();
        out.extend(self.buf);
        out
    }

    /// Finishes the trace without a header, for tests that exercise
    /// generation assembly directly on a batch stream.
    pub fn finish_without_header(self) -> Vec<u8> {
        self.buf
    }

    fn push_batch(&mut self, thread_id: u64, generation: u64, first_timestamp: u64, payload: Vec<u8>) {
        self.buf.push(Op::EvBatch.as_byte());
        write_uvarint(&mut self.buf, thread_id);
        write_uvarint(&mut self.buf, generation);
        write_uvarint(&mut self.buf, first_timestamp);
        write_uvarint(&mut self.buf, payload.len() as u64);
        self.buf.extend_from_slice(&payload);
    }

    /// Appends a generation's `EvFrequency` record.
    pub fn freq_batch(&mut self, generation: u64, per_second: u64) -> &mut Self {
        self.freq_batch_with(generation, NO_THREAD, 0, per_second)
    }

    /// Appends a generation's `EvFrequency` record on an explicit
    /// `thread_id`/`first_timestamp` batch header (aux batches are
    /// classified by payload, not by thread id, so any header is legal).
    pub fn freq_batch_with(
        &mut self,
        generation: u64,
        thread_id: u64,
        first_timestamp: u64,
        per_second: u64,
    ) -> &mut Self {
        let mut payload = vec![Op::EvFrequency.as_byte()];
        write_uvarint(&mut payload, per_second);
        self.push_batch(thread_id, generation, first_timestamp, payload);
        self
    }

    /// Appends a generation's `EvStrings` aux batch with the given
    /// `(id, value)` entries.
    pub fn strings_batch(&mut self, generation: u64, entries: Vec<(u64, String)>) -> &mut Self {
        let mut payload = vec![Op::EvStrings.as_byte()];
        for (id, value) in entries {
            payload.push(Op::EvString.as_byte());
            write_uvarint(&mut payload, id);
            write_uvarint(&mut payload, value.len() as u64);
            payload.extend_from_slice(value.as_bytes());
        }
        self.push_batch(NO_THREAD, generation, 0, payload);
        self
    }

    /// Appends a generation's `EvStacks` aux batch. Each entry is
    /// `(stack_id, frames)`, where a frame is
    /// `(pc, func_string_id, file_string_id, line)`.
    pub fn stacks_batch(
        &mut self,
        generation: u64,
        entries: Vec<(u64, Vec<(u64, u64, u64, u64)>)>,
    ) -> &mut Self {
        let mut payload = vec![Op::EvStacks.as_byte()];
        for (stack_id, frames) in entries {
            payload.push(Op::EvStack.as_byte());
            write_uvarint(&mut payload, stack_id);
            write_uvarint(&mut payload, frames.len() as u64);
            for (pc, func, file, line) in frames {
                write_uvarint(&mut payload, pc);
                write_uvarint(&mut payload, func);
                write_uvarint(&mut payload, file);
                write_uvarint(&mut payload, line);
            }
        }
        self.push_batch(NO_THREAD, generation, 0, payload);
        self
    }

    /// Appends a generation's `EvCPUSamples` aux batch. Each entry is
    /// `(timestamp, thread, proc, goroutine, stack_id)`.
    pub fn cpu_samples_batch(
        &mut self,
        generation: u64,
        entries: Vec<(u64, u64, u64, u64, u64)>,
    ) -> &mut Self {
        let mut payload = vec![Op::EvCPUSamples.as_byte()];
        for (ts, thread, proc, goroutine, stack_id) in entries {
            payload.push(Op::EvCPUSample.as_byte());
            write_uvarint(&mut payload, ts);
            write_uvarint(&mut payload, thread);
            write_uvarint(&mut payload, proc);
            write_uvarint(&mut payload, goroutine);
            write_uvarint(&mut payload, stack_id);
        }
        self.push_batch(NO_THREAD, generation, 0, payload);
        self
    }

    /// Appends a per-thread batch. `build` fills it with events via
    /// [`ThreadBatchBuilder`]'s helper methods.
    pub fn thread_batch(
        &mut self,
        thread_id: u64,
        generation: u64,
        first_timestamp: u64,
        build: impl FnOnce(&mut ThreadBatchBuilder),
    ) -> &mut Self {
        let mut inner = ThreadBatchBuilder { payload: Vec::new() };
        build(&mut inner);
        self.push_batch(thread_id, generation, first_timestamp, inner.payload);
        self
    }
}

/// Appends individual events into one per-thread batch's payload. Every
/// helper takes `ts_delta` explicitly (spec.md §6.1: the first arg of
/// every event is the timestamp delta from the batch's running clock).
#[derive(Debug)]
pub struct ThreadBatchBuilder {
    payload: Vec<u8>,
}

impl ThreadBatchBuilder {
    fn event(&mut self, op: Op, ts_delta: u64, rest_args: &[u64]) -> &mut Self {
        self.payload.push(op.as_byte());
        write_uvarint(&mut self.payload, ts_delta);
        for &arg in rest_args {
            write_uvarint(&mut self.payload, arg);
        }
        self
    }

    /// `EvGoStatus(goroutine, thread, state)` at `ts_delta` past the
    /// batch's running clock.
    pub fn go_status(&mut self, goroutine: u64, thread: u64, state: u64) -> &mut Self {
        self.event(Op::EvGoStatus, 0, &[goroutine, thread, state])
    }

    /// `EvGoStatus` at an explicit delta, for batches with more than one
    /// event.
    pub fn go_status_at(&mut self, ts_delta: u64, goroutine: u64, thread: u64, state: u64) -> &mut Self {
        self.event(Op::EvGoStatus, ts_delta, &[goroutine, thread, state])
    }

    /// `EvProcStatus(proc, state)` at `ts_delta`.
    pub fn proc_status(&mut self, ts_delta: u64, proc: u64, state: u64) -> &mut Self {
        self.event(Op::EvProcStatus, ts_delta, &[proc, state])
    }

    /// `EvGoStop(reason)` at `ts_delta`, with no stack (tests only cover
    /// the `has_stack` shape via raw `RawEvent` construction; callers
    /// that need a real stack id should build the event by hand).
    pub fn go_stop(&mut self, ts_delta: u64, reason: u64) -> &mut Self {
        self.payload.push(Op::EvGoStop.as_byte());
        write_uvarint(&mut self.payload, ts_delta);
        write_uvarint(&mut self.payload, reason);
        write_uvarint(&mut self.payload, 0); // stack id
        self
    }

    /// `EvGoBlock(reason)` at `ts_delta`, with stack id `0`.
    pub fn go_block(&mut self, ts_delta: u64, reason: u64) -> &mut Self {
        self.payload.push(Op::EvGoBlock.as_byte());
        write_uvarint(&mut self.payload, ts_delta);
        write_uvarint(&mut self.payload, reason);
        write_uvarint(&mut self.payload, 0); // stack id
        self
    }

    /// `EvGoUnblock(goroutine)` at `ts_delta`, with stack id `0`.
    pub fn go_unblock(&mut self, ts_delta: u64, goroutine: u64) -> &mut Self {
        self.payload.push(Op::EvGoUnblock.as_byte());
        write_uvarint(&mut self.payload, ts_delta);
        write_uvarint(&mut self.payload, goroutine);
        write_uvarint(&mut self.payload, 0); // stack id
        self
    }
}

/// One captured diagnostic: its level, target, and rendered message.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// The event's level.
    pub level: Level,
    /// The `target:` the event was emitted under.
    pub target: String,
    /// The rendered `message` field.
    pub message: String,
}

/// Shared storage a [`CollectingLayer`] writes into.
#[derive(Debug, Clone, Default)]
pub struct TraceStorage {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl TraceStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots every event captured so far.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().expect("trace storage mutex poisoned").clone()
    }

    /// True if any captured event's target and message both contain the
    /// given substrings.
    pub fn any_contains(&self, target: &str, message_fragment: &str) -> bool {
        self.events()
            .iter()
            .any(|e| e.target.contains(target) && e.message.contains(message_fragment))
    }
}

/// A `tracing_subscriber::Layer` that records every event into a
/// [`TraceStorage`], so tests can assert on emitted diagnostics without
/// parsing stdout.
#[derive(Debug, Clone)]
pub struct CollectingLayer {
    storage: TraceStorage,
}

impl CollectingLayer {
    /// Creates a layer writing into `storage`.
    pub fn new(storage: TraceStorage) -> Self {
        Self { storage }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CollectingLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let captured = CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        };
        self.storage.events.lock().expect("trace storage mutex poisoned").push(captured);
    }
}
