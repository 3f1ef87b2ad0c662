//! # Falx
//!
//! A deferred-update secondary-index engine for record-number databases.
//!
//! ## Features
//!
//! - Append-only bulk loading with per-segment index flushes
//! - Tri-state key record-sets (single offset, offset list, bitmap)
//! - Splice-in-place extension of partially filled segments
//! - K-way merge of per-run deferred tables into the permanent index
//! - Per-segment existence bitmaps
//! - Pluggable storage backends

pub mod backend;
pub mod bitvec;
pub mod config;
pub mod error;
pub mod index;
pub mod record;
pub mod recordset;

pub mod prelude {
    //! Convenience re-exports for typical use.
    pub use crate::backend::{Backend, MemoryBackend};
    pub use crate::config::DatabaseConfig;
    pub use crate::error::{FalxError, Result};
    pub use crate::index::DeferredIndexWriter;
    pub use crate::record::{FileSpec, Instance};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
