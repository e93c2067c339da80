//! Batch reader (C2): length-prefixed per-thread batch headers.

use crate::error::FormatError;
use crate::opcodes::Op;
use crate::wire::{read_exact_bytes, read_uvarint};
use std::io::Read;

/// A thread id, or the sentinel meaning "no thread" (used by generation-
/// scoped aux batches: strings, stacks, cpu-samples, freq).
pub const NO_THREAD: u64 = u64::MAX;

/// An opaque, still-undecoded batch: the payload is interpreted either as
/// a sequence of per-thread events or as one of the aux record kinds,
/// depending on its first payload byte (spec.md §3 "Batch").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// The thread this batch belongs to, or [`NO_THREAD`] for aux
    /// batches.
    pub thread_id: u64,
    /// The generation this batch belongs to.
    pub generation: u64,
    /// The first event's timestamp, in wire units (not yet scaled by
    /// frequency).
    pub first_timestamp: u64,
    /// The raw payload bytes.
    pub payload: Vec<u8>,
}

/// Reads the next batch from `r`.
///
/// Fails with [`FormatError::UnexpectedOpcode`] if the first byte is not
/// `EvBatch`, or [`FormatError::TruncatedBatch`] if the declared length
/// cannot be satisfied.
pub fn read_batch<R: Read>(r: &mut R) -> Result<Batch, FormatError> {
    try_read_batch(r)?.ok_or(FormatError::MalformedVarint)
}

/// Reads the next batch from `r`, distinguishing a clean end-of-stream
/// (no bytes at all before the opcode byte) from a genuinely malformed
/// or truncated batch.
///
/// Returns `Ok(None)` only when `r` is exhausted before any byte of a
/// new batch is consumed.
pub fn try_read_batch<R: Read>(r: &mut R) -> Result<Option<Batch>, FormatError> {
    let mut op_byte = [0u8; 1];
    let n = r.read(&mut op_byte).map_err(|_| FormatError::MalformedVarint)?;
    if n == 0 {
        return Ok(None);
    }
    if op_byte[0] != Op::EvBatch.as_byte() {
        return Err(FormatError::UnexpectedOpcode(op_byte[0]));
    }

    let thread_id = read_uvarint(r)?;
    let generation = read_uvarint(r)?;
    let first_timestamp = read_uvarint(r)?;
    let length = read_uvarint(r)?;

    let payload = read_exact_bytes(r, length).map_err(|short| FormatError::TruncatedBatch {
        declared: length,
        available: short.read,
    })?;

    Ok(Some(Batch { thread_id, generation, first_timestamp, payload }))
}
