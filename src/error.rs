//! Error types for the Falx library.
//!
//! All errors are represented by the [`FalxError`] enum. Constructor helpers
//! are provided for the common cases so call sites stay short.
//!
//! # Examples
//!
//! ```
//! use falx::error::{FalxError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(FalxError::backend("connection lost"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for Falx operations.
#[derive(Error, Debug)]
pub enum FalxError {
    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record number was already assigned before `put_instance`.
    ///
    /// Deferred update is append-only; reusing a record number is a
    /// programmer error and aborts the call.
    #[error("record number {record_number} already assigned in '{file}'")]
    RecordReuse {
        /// File the record belongs to.
        file: String,
        /// The record number carried by the instance.
        record_number: u64,
    },

    /// Backing-store failures, propagated unchanged.
    #[error("backend error: {0}")]
    Backend(String),

    /// Structural inconsistency in stored data.
    ///
    /// Raised when the store contradicts the run-state bookkeeping, e.g. a
    /// subsidiary record list row is missing or a permanent index row would
    /// be duplicated.
    #[error("corrupt index structure: {0}")]
    Corrupt(String),

    /// Bit vector index outside `[-length, length)`.
    #[error("bit index {index} out of range for length {length}")]
    BitIndex {
        /// The offending index.
        index: isize,
        /// Vector length in bits.
        length: usize,
    },

    /// Binary bit vector operation on vectors of different lengths.
    #[error("bit vector length mismatch: {left} != {right}")]
    BitLength {
        /// Left operand length in bits.
        left: usize,
        /// Right operand length in bits.
        right: usize,
    },

    /// No bit holding the requested value in the searched range.
    #[error("no {value} bit in range {start}..={stop}")]
    BitNotFound {
        /// The value searched for.
        value: bool,
        /// First position searched.
        start: usize,
        /// Last position searched.
        stop: usize,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with FalxError.
pub type Result<T> = std::result::Result<T, FalxError>;

impl FalxError {
    /// Create a new backend error.
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        FalxError::Backend(msg.into())
    }

    /// Create a new corrupt-structure error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        FalxError::Corrupt(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        FalxError::Config(msg.into())
    }

    /// Create a new record-reuse error.
    pub fn record_reuse<S: Into<String>>(file: S, record_number: u64) -> Self {
        FalxError::RecordReuse {
            file: file.into(),
            record_number,
        }
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        FalxError::Other(msg.into())
    }
}
