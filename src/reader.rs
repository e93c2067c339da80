//! The top-level [`Reader`] (C1-C5 wired together): opens a header,
//! assembles generations, merges per-thread cursors in timestamp order,
//! and runs every candidate through the validator before yielding it.

use crate::batch::Batch;
use crate::cursor::{CursorMerger, ThreadCursor};
use crate::error::{ReadError, ReadResult, SemanticError};
use crate::event::Event;
use crate::generation::{assemble_generation, AssembleOutcome, GenerationTables};
use crate::opcodes::TraceVersion;
use crate::validator::{CpuSampleFilter, Outcome, StatusAfterSync, Validator};
use crate::wire::read_header;
use std::io::Read;
use tracing::{debug, trace};

/// Knobs governing how a [`Reader`] decodes and validates a trace.
///
/// See `SPEC_FULL.md` §C for the rationale behind each field.
#[derive(Debug, Clone, Copy)]
pub struct ReaderConfig {
    /// The trace wire format version to expect. Currently only
    /// [`TraceVersion::Go122`] exists.
    pub version: TraceVersion,
    /// The maximum number of frames a single stack may carry before a
    /// generation is rejected as malformed.
    pub max_stack_depth: usize,
    /// How to treat a `GoStatus(...Running)` record seen after the first
    /// Sync (spec.md §9, first open question).
    pub status_after_sync: StatusAfterSync,
    /// Whether to drop CPU samples whose sched-ctx disagrees with
    /// validator state (spec.md §9, second open question).
    pub filter_cpu_samples: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            version: TraceVersion::Go122,
            max_stack_depth: crate::generation::MAX_STACK_DEPTH,
            status_after_sync: StatusAfterSync::Warn,
            filter_cpu_samples: false,
        }
    }
}

/// Streams [`Event`]s out of a Go execution trace.
///
/// Holds one assembled generation at a time; `next` drives C3 (load the
/// next generation when the current one drains), C4 (pick the
/// earliest-timestamped candidate across live cursors), and C5 (validate
/// it, deferring to the next cursor if the state machine isn't ready for
/// it yet).
///
/// Once `next` returns a fatal [`ReadError`], every subsequent call
/// returns the same error again (spec.md §7).
#[derive(Debug)]
pub struct Reader<R> {
    input: R,
    config: ReaderConfig,
    validator: Validator,
    spill: Option<Batch>,
    current: Option<Loaded>,
    /// A Sync event is owed before the next real event is emitted,
    /// because a generation was just loaded.
    pending_sync: bool,
    terminal_error: Option<String>,
    exhausted: bool,
}

#[derive(Debug)]
struct Loaded {
    tables: GenerationTables,
    merger: CursorMerger,
    cpu_index: usize,
}

impl<R: Read> Reader<R> {
    /// Opens a trace, reading and validating its header magic.
    pub fn open(mut input: R, config: ReaderConfig) -> ReadResult<Self> {
        let version = read_header(&mut input)?;
        if version != config.version {
            return Err(ReadError::Format(crate::error::FormatError::BadMagic(version.magic())));
        }
        Ok(Self {
            input,
            config,
            validator: Validator::new(config.status_after_sync, cpu_sample_filter(config)),
            spill: None,
            current: None,
            pending_sync: false,
            terminal_error: None,
            exhausted: false,
        })
    }

    /// Resolves a stack id against the currently loaded generation's
    /// stack table. Returns an empty slice if no generation is loaded or
    /// the id has no entry (spec.md §8 S6: a missing stack id is
    /// tolerated, not an error).
    pub fn resolve_stack(&self, stack_id: u64) -> &[crate::generation::StackFrame] {
        self.current.as_ref().map(|loaded| loaded.tables.stack(stack_id)).unwrap_or(&[])
    }

    /// Returns the next event, or `Ok(None)` once the stream is
    /// exhausted. Returns the latched error forever after the first
    /// fatal failure.
    pub fn next(&mut self) -> ReadResult<Option<Event>> {
        if let Some(msg) = &self.terminal_error {
            return Err(ReadError::Latched(msg.clone()));
        }
        if self.exhausted {
            return Ok(None);
        }
        match self.next_inner() {
            Ok(outcome) => {
                if outcome.is_none() {
                    self.exhausted = true;
                }
                Ok(outcome)
            }
            Err(e) => {
                self.terminal_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn next_inner(&mut self) -> ReadResult<Option<Event>> {
        loop {
            if self.current.is_none() {
                match assemble_generation(&mut self.input, self.spill.take(), self.config.max_stack_depth)? {
                    AssembleOutcome::Eof => return Ok(None),
                    AssembleOutcome::Generation { tables, spill } => {
                        self.spill = spill;
                        trace!(
                            target: "gotrace::reader",
                            generation = tables.generation,
                            "loaded generation"
                        );
                        let cursors = build_cursors(&tables, self.config.version)?;
                        self.current = Some(Loaded {
                            merger: CursorMerger::new(cursors),
                            cpu_index: 0,
                            tables,
                        });
                        self.pending_sync = true;
                    }
                }
            }

            if self.pending_sync {
                self.pending_sync = false;
                let floor = self.current.as_ref().expect("just loaded").tables.generation_floor_ns;
                return Ok(Some(self.validator.synthesize_sync(floor)));
            }

            let loaded = self.current.as_mut().expect("checked above");

            let cpu_candidate = loaded.tables.cpu_samples.get(loaded.cpu_index).copied();
            let heap_top = loaded.merger.peek_min();

            let emit_cpu_first = match (cpu_candidate, heap_top) {
                (Some(cpu), Some((_, heap_ts))) => cpu.timestamp < heap_ts,
                (Some(_), None) => true,
                (None, _) => false,
            };

            if emit_cpu_first {
                let cpu = cpu_candidate.expect("checked above");
                loaded.cpu_index += 1;
                if let Some(event) = self.validator.cpu_sample_event(
                    cpu.timestamp,
                    cpu.thread,
                    cpu.proc,
                    cpu.goroutine,
                    cpu.stack_id,
                    &loaded.tables,
                ) {
                    return Ok(Some(event));
                }
                debug!(target: "gotrace::reader", thread = cpu.thread, "cpu sample filtered out");
                continue;
            }

            if loaded.merger.is_empty() {
                // Generation fully drained: advance to the next one.
                self.current = None;
                continue;
            }

            match self.try_advance_merger()? {
                Some(event) => return Ok(Some(event)),
                None => continue,
            }
        }
    }

    /// Tries cursors in increasing timestamp order until one is accepted
    /// by the validator. Returns `Ok(None)` only to ask the caller to
    /// loop again (never actually happens: either an event is returned or
    /// a fatal error is raised), and propagates
    /// [`SemanticError::BrokenTrace`] if every live cursor defers.
    fn try_advance_merger(&mut self) -> ReadResult<Option<Event>> {
        let loaded = self.current.as_mut().expect("caller checked merger is non-empty");
        let mut deferred = Vec::new();
        let result = loop {
            let Some(thread_id) = loaded.merger.pop_min_thread() else {
                break None;
            };
            let pending = loaded
                .merger
                .peek(thread_id)
                .cloned()
                .expect("a thread just popped from the heap must have a pending event");
            match self.validator.advance(&pending.raw, pending.timestamp_ns, &loaded.tables, thread_id) {
                Outcome::Accepted(event) => {
                    loaded.merger.accept(thread_id)?;
                    break Some(Ok(event));
                }
                Outcome::Deferred => {
                    debug!(target: "gotrace::merger", thread_id, "candidate deferred");
                    deferred.push(thread_id);
                }
                Outcome::Rejected(err) => break Some(Err(ReadError::Semantic(err))),
            }
        };

        for thread_id in deferred {
            loaded.merger.requeue(thread_id);
        }

        match result {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Err(SemanticError::BrokenTrace.into()),
        }
    }
}

fn cpu_sample_filter(config: ReaderConfig) -> CpuSampleFilter {
    if config.filter_cpu_samples {
        CpuSampleFilter::FilterDisagreeing
    } else {
        CpuSampleFilter::KeepAll
    }
}

fn build_cursors(tables: &GenerationTables, version: TraceVersion) -> ReadResult<Vec<ThreadCursor>> {
    let ns_per_unit = tables.freq_ns_per_unit.expect("finalize() guarantees this is set");
    let mut cursors = Vec::with_capacity(tables.batches.len());
    for (&thread_id, batches) in &tables.batches {
        cursors.push(ThreadCursor::new(thread_id, batches.clone(), ns_per_unit, version)?);
    }
    Ok(cursors)
}
