//! The deferred-update engine.
//!
//! [`DeferredIndexWriter`] orchestrates a bulk-load run: records append
//! through the backend while their index values accumulate in a
//! [`ValueAccumulator`] and their presence bits in an [`ExistenceMap`],
//! with per-segment flushes, splices and a final k-way merge.

pub mod accumulator;
pub mod existence;
pub mod writer;

pub use accumulator::ValueAccumulator;
pub use existence::ExistenceMap;
pub use writer::{DeferredIndexWriter, PutCallback};
