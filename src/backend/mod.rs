//! Backing-store abstraction.
//!
//! The engine talks to whatever relational engine backs storage through the
//! [`Backend`] trait; the SQL dialect, table naming and on-disk format stay
//! on the other side of it. [`MemoryBackend`] is the reference
//! implementation used by the test suite.

pub mod memory;
pub mod traits;

pub use memory::MemoryBackend;
pub use traits::{Backend, DeferredCursor, IndexRow, IndexTable, Reference, RowId};
