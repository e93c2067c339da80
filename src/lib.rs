#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! A streaming reader and validator for Go 1.22-style binary execution
//! traces: generation decoding (C1-C3), k-way time-ordered merging (C4),
//! and ordering/state-machine validation (C5).

pub mod batch;
pub mod cursor;
pub mod error;
pub mod event;
pub mod generation;
pub mod opcodes;
pub mod reader;
pub mod validator;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ReadError, ReadResult};
pub use event::{Event, EventKind};
pub use reader::{Reader, ReaderConfig};

/// Common imports for consumers of this crate.
pub mod prelude {
    pub use crate::error::{ReadError, ReadResult};
    pub use crate::event::{Event, EventKind};
    pub use crate::reader::{Reader, ReaderConfig};
}
