//! The static "spec table" mapping wire opcodes to their shape.
//!
//! Opcodes map to decoding behavior through a constant array indexed by
//! opcode, not through runtime polymorphism (spec.md §9 "Dynamic dispatch
//! via spec tables").

/// The trace wire format version. Only one exists today; the field exists
/// so a second version can be added without reshaping the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceVersion {
    /// The "go 1.22 trace" wire format.
    Go122,
}

impl TraceVersion {
    /// The 16-byte header magic for this version.
    pub const fn magic(self) -> [u8; 16] {
        match self {
            Self::Go122 => *b"go 1.22 trace\0\0\0",
        }
    }

    /// Recognize a version from its header magic, if any.
    pub fn from_magic(magic: &[u8; 16]) -> Option<Self> {
        if *magic == Self::Go122.magic() {
            Some(Self::Go122)
        } else {
            None
        }
    }
}

/// A single event's shape: how many uvarint args it carries (including
/// the leading timestamp delta), whether it carries a trailing stack id,
/// and whether it carries a trailing length-prefixed byte tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSpec {
    /// Number of uvarint arguments, including the timestamp delta.
    pub arg_count: u8,
    /// Whether a trailing uvarint stack id follows the arguments.
    pub has_stack: bool,
    /// Whether a trailing uvarint length + raw bytes follows.
    pub has_data: bool,
}

const fn spec(arg_count: u8, has_stack: bool, has_data: bool) -> EventSpec {
    EventSpec { arg_count, has_stack, has_data }
}

/// Wire opcodes for the "go 1.22 trace" version.
///
/// Opcode 0 is the header sentinel; it is never read as an event opcode
/// once the magic has been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(non_camel_case_types, missing_docs)]
pub enum Op {
    EvNone = 0,
    EvBatch = 1,
    EvStrings = 2,
    EvString = 3,
    EvStacks = 4,
    EvStack = 5,
    EvCPUSamples = 6,
    EvCPUSample = 7,
    EvFrequency = 8,
    EvProcsChange = 9,
    EvProcStart = 10,
    EvProcStop = 11,
    EvProcSteal = 12,
    EvProcStatus = 13,
    EvGoCreate = 14,
    EvGoStart = 15,
    EvGoStop = 16,
    EvGoBlock = 17,
    EvGoUnblock = 18,
    EvGoSyscallBegin = 19,
    EvGoSyscallEnd = 20,
    EvGoSyscallEndBlocked = 21,
    EvGoDestroy = 22,
    EvGoStatus = 23,
    EvSTWBegin = 24,
    EvSTWEnd = 25,
    EvGCBegin = 26,
    EvGCEnd = 27,
    EvGCSweepBegin = 28,
    EvGCSweepEnd = 29,
    EvGCMarkAssistBegin = 30,
    EvGCMarkAssistEnd = 31,
    EvHeapAlloc = 32,
    EvHeapGoal = 33,
    EvUserTaskBegin = 34,
    EvUserTaskEnd = 35,
    EvUserRegionBegin = 36,
    EvUserRegionEnd = 37,
    EvUserLog = 38,
    EvLabel = 39,
}

impl Op {
    /// Recover an [`Op`] from its wire byte, if known for `version`.
    pub fn from_byte(byte: u8, version: TraceVersion) -> Option<Self> {
        // Only one version exists today; this match is where a second
        // version's table would fork.
        let TraceVersion::Go122 = version;
        let op = match byte {
            0 => Self::EvNone,
            1 => Self::EvBatch,
            2 => Self::EvStrings,
            3 => Self::EvString,
            4 => Self::EvStacks,
            5 => Self::EvStack,
            6 => Self::EvCPUSamples,
            7 => Self::EvCPUSample,
            8 => Self::EvFrequency,
            9 => Self::EvProcsChange,
            10 => Self::EvProcStart,
            11 => Self::EvProcStop,
            12 => Self::EvProcSteal,
            13 => Self::EvProcStatus,
            14 => Self::EvGoCreate,
            15 => Self::EvGoStart,
            16 => Self::EvGoStop,
            17 => Self::EvGoBlock,
            18 => Self::EvGoUnblock,
            19 => Self::EvGoSyscallBegin,
            20 => Self::EvGoSyscallEnd,
            21 => Self::EvGoSyscallEndBlocked,
            22 => Self::EvGoDestroy,
            23 => Self::EvGoStatus,
            24 => Self::EvSTWBegin,
            25 => Self::EvSTWEnd,
            26 => Self::EvGCBegin,
            27 => Self::EvGCEnd,
            28 => Self::EvGCSweepBegin,
            29 => Self::EvGCSweepEnd,
            30 => Self::EvGCMarkAssistBegin,
            31 => Self::EvGCMarkAssistEnd,
            32 => Self::EvHeapAlloc,
            33 => Self::EvHeapGoal,
            34 => Self::EvUserTaskBegin,
            35 => Self::EvUserTaskEnd,
            36 => Self::EvUserRegionBegin,
            37 => Self::EvUserRegionEnd,
            38 => Self::EvUserLog,
            39 => Self::EvLabel,
            _ => return None,
        };
        Some(op)
    }

    /// The wire byte for this opcode.
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Look up this opcode's [`EventSpec`] in the version's spec table.
    pub const fn spec(self) -> EventSpec {
        match self {
            // Never decoded as a regular event.
            Self::EvNone | Self::EvBatch => spec(0, false, false),
            Self::EvStrings | Self::EvStacks | Self::EvCPUSamples => spec(0, false, false),
            Self::EvString => spec(0, false, true),
            Self::EvStack => spec(0, false, false),
            Self::EvCPUSample => spec(0, false, false),
            Self::EvFrequency => spec(0, false, false),
            Self::EvProcsChange => spec(2, false, false),
            Self::EvProcStart => spec(2, false, false),
            Self::EvProcStop => spec(1, false, false),
            Self::EvProcSteal => spec(2, false, false),
            Self::EvProcStatus => spec(3, false, false),
            Self::EvGoCreate => spec(2, true, false),
            Self::EvGoStart => spec(2, false, false),
            Self::EvGoStop => spec(2, true, false),
            Self::EvGoBlock => spec(2, true, false),
            Self::EvGoUnblock => spec(2, true, false),
            Self::EvGoSyscallBegin => spec(1, false, false),
            Self::EvGoSyscallEnd => spec(1, false, false),
            Self::EvGoSyscallEndBlocked => spec(1, false, false),
            Self::EvGoDestroy => spec(1, false, false),
            Self::EvGoStatus => spec(4, false, false),
            Self::EvSTWBegin => spec(2, false, false),
            Self::EvSTWEnd => spec(1, false, false),
            Self::EvGCBegin => spec(2, false, false),
            Self::EvGCEnd => spec(1, false, false),
            Self::EvGCSweepBegin => spec(1, true, false),
            Self::EvGCSweepEnd => spec(1, false, false),
            Self::EvGCMarkAssistBegin => spec(1, true, false),
            Self::EvGCMarkAssistEnd => spec(1, false, false),
            Self::EvHeapAlloc => spec(2, false, false),
            Self::EvHeapGoal => spec(2, false, false),
            Self::EvUserTaskBegin => spec(4, true, false),
            Self::EvUserTaskEnd => spec(2, false, false),
            Self::EvUserRegionBegin => spec(3, true, false),
            Self::EvUserRegionEnd => spec(3, true, false),
            Self::EvUserLog => spec(3, true, true),
            Self::EvLabel => spec(3, false, false),
        }
    }
}

/// Canonical string rendering for `GoStopReason` codes (spec.md §6.1).
pub fn go_stop_reason(code: u64) -> &'static str {
    match code {
        0 => "preempted",
        1 => "forced",
        _ => "unknown",
    }
}

/// Canonical string rendering for `GoBlockReason` codes (spec.md §6.1).
pub fn go_block_reason(code: u64) -> &'static str {
    match code {
        0 => "select",
        1 => "channel",
        2 => "sync",
        3 => "syscall",
        4 => "sleep",
        5 => "gc",
        _ => "unknown",
    }
}

/// Canonical string rendering for `STWReason` codes (spec.md §6.1).
pub fn stw_reason(code: u64) -> &'static str {
    match code {
        0 => "gc",
        1 => "other",
        _ => "unknown",
    }
}
