//! Error taxonomy for the trace reader.
//!
//! Mirrors spec.md §7: IO errors propagate verbatim, format errors are
//! unrecoverable mid-stream, structural errors surface at generation
//! assembly boundaries, and semantic errors surface during validation.

use thiserror::Error;

/// Top level error returned by [`crate::Reader::next`].
///
/// Once a fatal variant is returned, the reader latches: every subsequent
/// call to `next` returns the same error again (spec.md §7 propagation
/// policy).
#[derive(Error, Debug)]
pub enum ReadError {
    /// An IO error from the underlying byte source.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The wire format itself could not be parsed.
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    /// A generation could not be assembled from otherwise well-formed
    /// batches.
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),
    /// The ordering/state-machine validator rejected the trace.
    #[error("semantic error: {0}")]
    Semantic(#[from] SemanticError),
    /// Replayed on every call after a [`Reader`](crate::Reader) has
    /// already returned a fatal error once (spec.md §7 propagation
    /// policy: the reader latches).
    #[error("{0}")]
    Latched(String),
}

/// Failures decoding the raw byte stream (spec.md §4.1, §4.2, §6.1).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The 16-byte magic prefix did not match any known trace version.
    #[error("bad header magic: {0:?}")]
    BadMagic([u8; 16]),
    /// A uvarint ran past 10 bytes without terminating, or the input
    /// truncated mid-varint.
    #[error("malformed varint")]
    MalformedVarint,
    /// A batch header's first byte was not `EvBatch`.
    #[error("unexpected opcode {0:#x}, expected EvBatch")]
    UnexpectedOpcode(u8),
    /// A batch declared a payload length longer than the remaining input.
    #[error("truncated batch: declared length {declared}, available {available}")]
    TruncatedBatch {
        /// The length the batch header declared.
        declared: u64,
        /// The number of bytes actually available.
        available: u64,
    },
    /// An opcode byte had no entry in the version's spec table.
    #[error("unknown opcode {0:#x} for trace version {1:?}")]
    UnknownOpcode(u8, crate::opcodes::TraceVersion),
}

/// Failures assembling a generation from its batches (spec.md §4.3).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// A generation had no `EvFreq` record.
    #[error("generation {0} is missing a frequency record")]
    MissingFrequency(u64),
    /// A generation had two `EvFreq` records.
    #[error("generation {0} has a duplicate frequency record")]
    DuplicateFrequency(u64),
    /// Two strings in the same generation shared an id.
    #[error("duplicate string id {0} in generation {1}")]
    DuplicateStringId(u64, u64),
    /// Two stacks in the same generation shared an id.
    #[error("duplicate stack id {0} in generation {1}")]
    DuplicateStackId(u64, u64),
    /// A stack record declared more than the configured maximum frames.
    #[error("stack {0} has {1} frames, exceeding the maximum of {2}")]
    StackTooDeep(u64, usize, usize),
    /// A thread's batch list was not sorted by first-timestamp.
    #[error("per-thread stream for thread {0} is out of order")]
    PerMStreamOutOfOrder(u64),
    /// A batch's generation was neither the target nor target+1.
    #[error("generations out of order: expected {expected} or {}, got {got}", expected + 1)]
    GenerationsOutOfOrder {
        /// The generation being assembled.
        expected: u64,
        /// The generation the offending batch declared.
        got: u64,
    },
}

/// Failures from the ordering/state-machine validator (spec.md §4.5.5).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SemanticError {
    /// A candidate event violated the state machine for its resource.
    #[error("bad transition: {0}")]
    BadTransition(String),
    /// A resource was referenced that was never introduced, after the
    /// first Sync (before the first Sync this is a tolerated anomaly,
    /// not an error).
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    /// A named range was begun while already active.
    #[error("range already active: {0}")]
    DuplicateActiveRange(String),
    /// A named range was ended while not active.
    #[error("range not active: {0}")]
    InactiveRangeEnded(String),
    /// Every non-empty cursor deferred; the stream cannot make progress.
    #[error("broken trace: all cursors deferred")]
    BrokenTrace,
}

/// Convenience alias used throughout the crate.
pub type ReadResult<T> = Result<T, ReadError>;
