//! Wire primitives (C1): a varint reader and single raw-event decoder.

use crate::error::FormatError;
use crate::opcodes::{EventSpec, Op, TraceVersion};
use std::io::Read;

/// Maximum number of bytes a uvarint may occupy before it is considered
/// malformed (10 bytes covers a full 64-bit value in LEB128).
const MAX_VARINT_BYTES: usize = 10;

/// Reads a single LEB128-encoded unsigned varint from `r`.
///
/// Fails with [`FormatError::MalformedVarint`] if the input truncates
/// mid-varint or the varint runs past [`MAX_VARINT_BYTES`] without its
/// continuation bit clearing.
pub fn read_uvarint<R: Read>(r: &mut R) -> Result<u64, FormatError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    let mut byte_buf = [0u8; 1];
    for _ in 0..MAX_VARINT_BYTES {
        if r.read_exact(&mut byte_buf).is_err() {
            return Err(FormatError::MalformedVarint);
        }
        let byte = byte_buf[0];
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(FormatError::MalformedVarint)
}

/// How many bytes a [`read_exact_bytes`] call managed to read before its
/// source ran dry.
#[derive(Debug, Clone, Copy)]
pub struct ShortRead {
    /// The number of bytes actually read before `r` was exhausted.
    pub read: u64,
}

/// Reads exactly `len` raw bytes. Reads in a loop rather than via
/// `Read::read_exact` so that a short read reports how many bytes it
/// actually got, not just that it failed.
pub fn read_exact_bytes<R: Read>(r: &mut R, len: u64) -> Result<Vec<u8>, ShortRead> {
    let mut buf = vec![0u8; len as usize];
    let mut filled = 0usize;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => return Err(ShortRead { read: filled as u64 }),
            Ok(n) => filled += n,
            Err(_) => return Err(ShortRead { read: filled as u64 }),
        }
    }
    Ok(buf)
}

/// A single decoded raw event: its opcode plus uvarint args, in wire
/// order, optionally followed by a stack id and/or a data tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// The opcode this event was decoded for.
    pub op: Op,
    /// The decoded uvarint arguments, in wire order. The first argument
    /// is always the timestamp delta (spec.md §6.1).
    pub args: Vec<u64>,
    /// The stack id, if `op`'s spec carries one.
    pub stack_id: Option<u64>,
    /// The trailing length-prefixed byte tail, if `op`'s spec carries
    /// one (used by `EvString` and `EvUserLog`).
    pub data: Option<Vec<u8>>,
}

/// Reads one raw event for `op`, whose shape is `spec`.
///
/// The opcode byte itself is assumed already consumed by the caller (the
/// batch/generation layers peek it to classify aux batches before
/// deciding whether to hand it to this decoder).
pub fn read_raw_event<R: Read>(
    r: &mut R,
    op: Op,
    spec: EventSpec,
) -> Result<RawEvent, FormatError> {
    let mut args = Vec::with_capacity(spec.arg_count as usize);
    for _ in 0..spec.arg_count {
        args.push(read_uvarint(r)?);
    }
    let stack_id = if spec.has_stack { Some(read_uvarint(r)?) } else { None };
    let data = if spec.has_data {
        let len = read_uvarint(r)?;
        Some(read_exact_bytes(r, len).map_err(|_| FormatError::MalformedVarint)?)
    } else {
        None
    };
    Ok(RawEvent { op, args, stack_id, data })
}

/// Reads the 16-byte header magic and resolves it to a [`TraceVersion`].
pub fn read_header<R: Read>(r: &mut R) -> Result<TraceVersion, FormatError> {
    let mut magic = [0u8; 16];
    r.read_exact(&mut magic).map_err(|_| FormatError::BadMagic([0u8; 16]))?;
    TraceVersion::from_magic(&magic).ok_or(FormatError::BadMagic(magic))
}


/// Writes a uvarint, used by the round-trip property test and by
/// `test_support::TraceBuilder` to hand-assemble wire traces.
pub fn write_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}
