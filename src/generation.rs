//! Generation assembler (C3): consumes batches until a generation
//! boundary, classifies aux batches into per-generation tables, and
//! retains the first batch of the next generation as spill.

use crate::batch::{try_read_batch, Batch, NO_THREAD};
use crate::error::{ReadError, StructuralError};
use crate::opcodes::Op;
use crate::wire::read_uvarint;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::{trace, warn};

/// One stack frame, as recorded in the generation's stack table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    /// Program counter.
    pub pc: u64,
    /// String-table id of the function name.
    pub func_string_id: u64,
    /// String-table id of the source file.
    pub file_string_id: u64,
    /// Source line number.
    pub line: u64,
}

/// A CPU profiling sample, with its sched-ctx as of the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSample {
    /// Timestamp in raw wire units while a generation is being
    /// assembled; rescaled to nanoseconds in place by `finalize`, so
    /// every `CpuSample` reachable from a completed `GenerationTables`
    /// carries a nanosecond timestamp.
    pub timestamp: u64,
    /// The thread the sample was taken on.
    pub thread: u64,
    /// The proc the sample was taken on.
    pub proc: u64,
    /// The goroutine running at sample time.
    pub goroutine: u64,
    /// The stack id sampled.
    pub stack_id: u64,
}

/// The maximum number of frames a single stack may carry (spec.md §4.3).
pub const MAX_STACK_DEPTH: usize = 128;

/// The fully-assembled, immutable state for one generation.
#[derive(Debug, Default)]
pub struct GenerationTables {
    /// The generation number these tables belong to.
    pub generation: u64,
    /// Dense string table, unique ids within the generation.
    pub strings: HashMap<u64, String>,
    /// Dense stack table, unique ids within the generation.
    pub stacks: HashMap<u64, Vec<StackFrame>>,
    /// All CPU samples, sorted by (ns-converted) timestamp after
    /// assembly finishes.
    pub cpu_samples: Vec<CpuSample>,
    /// Nanoseconds per wire timestamp unit. Always `Some` once assembly
    /// finishes successfully; `None` is a transient assembly state.
    pub freq_ns_per_unit: Option<f64>,
    /// Per-thread batch sequences, each sorted by first-timestamp.
    pub batches: HashMap<u64, Vec<Batch>>,
    /// The largest `first_timestamp` seen on any batch header in this
    /// generation (thread or aux), in wire units until `finalize`.
    max_batch_ts_raw: u64,
    /// `max_batch_ts_raw` scaled to nanoseconds once frequency is known.
    /// Used as the floor for the generation's boundary Sync timestamp
    /// when no event was ever committed (spec.md §8 S2).
    pub generation_floor_ns: u64,
}

impl GenerationTables {
    /// Looks up a stack by id. Per spec.md §8 S6, a missing stack id is
    /// tolerated: callers get an empty slice rather than an error.
    pub fn stack(&self, stack_id: u64) -> &[StackFrame] {
        self.stacks.get(&stack_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Looks up a string by id, if present.
    pub fn string(&self, string_id: u64) -> Option<&str> {
        self.strings.get(&string_id).map(String::as_str)
    }

    fn insert_string(&mut self, id: u64, value: String) -> Result<(), StructuralError> {
        if self.strings.insert(id, value).is_some() {
            return Err(StructuralError::DuplicateStringId(id, self.generation));
        }
        Ok(())
    }

    fn insert_stack(
        &mut self,
        id: u64,
        frames: Vec<StackFrame>,
        max_stack_depth: usize,
    ) -> Result<(), StructuralError> {
        if frames.len() > max_stack_depth {
            return Err(StructuralError::StackTooDeep(id, frames.len(), max_stack_depth));
        }
        if self.stacks.insert(id, frames).is_some() {
            return Err(StructuralError::DuplicateStackId(id, self.generation));
        }
        Ok(())
    }

    fn set_freq(&mut self, per_second: u64) -> Result<(), StructuralError> {
        if self.freq_ns_per_unit.is_some() {
            return Err(StructuralError::DuplicateFrequency(self.generation));
        }
        self.freq_ns_per_unit = Some(1_000_000_000.0 / per_second as f64);
        Ok(())
    }

    fn append_batch(&mut self, batch: Batch) -> Result<(), StructuralError> {
        let thread_id = batch.thread_id;
        let entries = self.batches.entry(thread_id).or_default();
        if let Some(last) = entries.last() {
            if last.first_timestamp > batch.first_timestamp {
                return Err(StructuralError::PerMStreamOutOfOrder(thread_id));
            }
        }
        entries.push(batch);
        Ok(())
    }

    fn finalize(mut self) -> Result<Self, ReadError> {
        if self.freq_ns_per_unit.is_none() {
            return Err(StructuralError::MissingFrequency(self.generation).into());
        }
        let ns_per_unit = self.freq_ns_per_unit.expect("checked above");
        self.generation_floor_ns = (self.max_batch_ts_raw as f64 * ns_per_unit).round() as u64;
        for sample in &mut self.cpu_samples {
            sample.timestamp = (sample.timestamp as f64 * ns_per_unit).round() as u64;
        }
        self.cpu_samples.sort_by_key(|s| s.timestamp);
        Ok(self)
    }
}

/// Result of one assembly pass: either a completed generation plus the
/// spill batch for the next one, or EOF if no more batches remain.
#[derive(Debug)]
pub enum AssembleOutcome {
    /// A generation was fully assembled.
    Generation {
        /// The assembled tables.
        tables: GenerationTables,
        /// The first batch of the next generation, read ahead, if any
        /// more input remained.
        spill: Option<Batch>,
    },
    /// No more batches remain and there was no spill to seed assembly.
    Eof,
}

/// Assembles one generation, seeded optionally by a spilled batch from a
/// prior assembly pass (spec.md §4.3). `max_stack_depth` bounds any stack
/// decoded from this generation's `EvStacks` aux batch (spec.md §C).
pub fn assemble_generation<R: Read>(
    r: &mut R,
    spill: Option<Batch>,
    max_stack_depth: usize,
) -> Result<AssembleOutcome, ReadError> {
    let seed = match spill {
        Some(b) => b,
        None => match try_read_batch(r)? {
            Some(b) => b,
            None => return Ok(AssembleOutcome::Eof),
        },
    };

    let generation = seed.generation;
    let mut tables = GenerationTables { generation, ..Default::default() };
    tables.max_batch_ts_raw = seed.first_timestamp;
    classify(&mut tables, seed, max_stack_depth)?;

    loop {
        let batch = match try_read_batch(r)? {
            Some(b) => b,
            None => {
                let tables = tables.finalize()?;
                return Ok(AssembleOutcome::Generation { tables, spill: None });
            }
        };

        if batch.generation == generation {
            tables.max_batch_ts_raw = tables.max_batch_ts_raw.max(batch.first_timestamp);
            classify(&mut tables, batch, max_stack_depth)?;
        } else if batch.generation == generation + 1 {
            trace!(target: "gotrace::assembler", generation, next = batch.generation, "spilling batch to next generation");
            let tables = tables.finalize()?;
            return Ok(AssembleOutcome::Generation { tables, spill: Some(batch) });
        } else {
            return Err(StructuralError::GenerationsOutOfOrder {
                expected: generation,
                got: batch.generation,
            }
            .into());
        }
    }
}

fn classify(tables: &mut GenerationTables, batch: Batch, max_stack_depth: usize) -> Result<(), ReadError> {
    let Some(&first_byte) = batch.payload.first() else {
        // An empty payload carries no events; treat as a no-op per-thread
        // batch rather than indexing past the end below.
        return append_thread_batch(tables, batch);
    };

    if first_byte == Op::EvStrings.as_byte() {
        decode_strings(tables, &batch.payload)?;
    } else if first_byte == Op::EvStacks.as_byte() {
        decode_stacks(tables, &batch.payload, max_stack_depth)?;
    } else if first_byte == Op::EvCPUSamples.as_byte() {
        decode_cpu_samples(tables, &batch.payload)?;
    } else if first_byte == Op::EvFrequency.as_byte() {
        let mut cursor = Cursor::new(&batch.payload[1..]);
        let per_second = read_uvarint(&mut cursor)?;
        tables.set_freq(per_second)?;
    } else {
        return append_thread_batch(tables, batch);
    }
    Ok(())
}

fn append_thread_batch(tables: &mut GenerationTables, batch: Batch) -> Result<(), ReadError> {
    if batch.thread_id == NO_THREAD {
        warn!(target: "gotrace::assembler", "per-thread batch carries NoThread sentinel");
    }
    tables.append_batch(batch)?;
    Ok(())
}

fn decode_strings(tables: &mut GenerationTables, payload: &[u8]) -> Result<(), ReadError> {
    let mut cursor = Cursor::new(&payload[1..]);
    while (cursor.position() as usize) < payload.len() - 1 {
        let mut op_byte = [0u8; 1];
        if cursor.read_exact(&mut op_byte).is_err() {
            break;
        }
        let string_id = read_uvarint(&mut cursor)?;
        let len = read_uvarint(&mut cursor)?;
        let mut bytes = vec![0u8; len as usize];
        cursor.read_exact(&mut bytes).map_err(|_| crate::error::FormatError::MalformedVarint)?;
        let value = String::from_utf8_lossy(&bytes).into_owned();
        tables.insert_string(string_id, value)?;
    }
    Ok(())
}

fn decode_stacks(tables: &mut GenerationTables, payload: &[u8], max_stack_depth: usize) -> Result<(), ReadError> {
    let mut cursor = Cursor::new(&payload[1..]);
    while (cursor.position() as usize) < payload.len() - 1 {
        let mut op_byte = [0u8; 1];
        if cursor.read_exact(&mut op_byte).is_err() {
            break;
        }
        let stack_id = read_uvarint(&mut cursor)?;
        let n_frames = read_uvarint(&mut cursor)?;
        let mut frames = Vec::with_capacity(n_frames as usize);
        for _ in 0..n_frames {
            let pc = read_uvarint(&mut cursor)?;
            let func_string_id = read_uvarint(&mut cursor)?;
            let file_string_id = read_uvarint(&mut cursor)?;
            let line = read_uvarint(&mut cursor)?;
            frames.push(StackFrame { pc, func_string_id, file_string_id, line });
        }
        tables.insert_stack(stack_id, frames, max_stack_depth)?;
    }
    Ok(())
}

fn decode_cpu_samples(tables: &mut GenerationTables, payload: &[u8]) -> Result<(), ReadError> {
    let mut cursor = Cursor::new(&payload[1..]);
    while (cursor.position() as usize) < payload.len() - 1 {
        let mut op_byte = [0u8; 1];
        if cursor.read_exact(&mut op_byte).is_err() {
            break;
        }
        let timestamp = read_uvarint(&mut cursor)?;
        let thread = read_uvarint(&mut cursor)?;
        let proc = read_uvarint(&mut cursor)?;
        let goroutine = read_uvarint(&mut cursor)?;
        let stack_id = read_uvarint(&mut cursor)?;
        tables.cpu_samples.push(CpuSample { timestamp, thread, proc, goroutine, stack_id });
    }
    Ok(())
}
