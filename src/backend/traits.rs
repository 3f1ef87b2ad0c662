//! Backend trait and row model.
//!
//! Operations mirror what the deferred-update engine needs from a
//! relational store used as a byte-oriented key/value engine: an append
//! primitive for records, upserts for existence maps, a rowid-addressed
//! subsidiary table for encoded record lists, and (key, segment)-addressed
//! index tables, permanent and deferred.

use crate::error::Result;

/// Row identifier in the subsidiary record list table.
pub type RowId = u64;

/// The reference column of an index row.
///
/// A row counting exactly one record stores the record's offset directly;
/// anything larger points at a subsidiary record list row holding the
/// encoded list or bitmap bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reference {
    /// The single record-number offset itself.
    Literal(u64),
    /// Row id of the subsidiary record list entry.
    Subsidiary(RowId),
}

/// One row of an index table: `(key, segment, count, reference)`.
///
/// The derived ordering is lexicographic over all four fields. The k-way
/// merge heap is keyed by whole rows, so equal (key, segment) pairs (which
/// a correct run never produces) would still merge deterministically; this
/// is a stable tie-break, not a business rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexRow {
    /// Index key value.
    pub key: String,
    /// Segment the row's records fall in.
    pub segment: u64,
    /// Number of records the row covers.
    pub count: u64,
    /// Literal offset or subsidiary row id.
    pub reference: Reference,
}

/// Addresses an index table: the durable per-(file, field) table or one of
/// a run's deferred tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTable<'a> {
    /// The permanent secondary index of `field` in `file`.
    Permanent {
        /// File name.
        file: &'a str,
        /// Secondary index field name.
        field: &'a str,
    },
    /// A temporary per-run table by name.
    Deferred(&'a str),
}

/// Streaming cursor over a deferred table in `(key, segment, count,
/// reference)` order.
pub trait DeferredCursor {
    /// Fetch up to `n` further rows; an empty result means exhaustion.
    fn next_chunk(&mut self, n: usize) -> Result<Vec<IndexRow>>;
}

/// A store the deferred-update engine can run against.
///
/// All methods take `&self`; implementations provide their own interior
/// mutability, the way a connection handle would.
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Append a record payload, returning the assigned record number.
    ///
    /// With `key` given the payload is written at that record number
    /// instead (fixture seeding and non-deferred overwrite; `put_instance`
    /// never passes it).
    fn put(&self, file: &str, key: Option<u64>, payload: &[u8]) -> Result<u64>;

    /// Highest record number present in `file`, if any.
    fn high_record(&self, file: &str) -> Result<Option<u64>>;

    /// Open the transaction bracketing a deferred-update run.
    fn start_transaction(&self) -> Result<()>;

    /// Commit the run's transaction.
    fn commit(&self) -> Result<()>;

    /// Read the serialized existence bitmap stored under `key`
    /// (1-based segment number).
    fn get_existence_map(&self, file: &str, key: u64) -> Result<Option<Vec<u8>>>;

    /// Insert-or-replace the serialized existence bitmap under `key`.
    fn put_existence_map(&self, file: &str, key: u64, value: &[u8]) -> Result<()>;

    /// Append encoded record-set bytes to the subsidiary record list table,
    /// returning the new row id.
    fn insert_record_list(&self, file: &str, bytes: &[u8]) -> Result<RowId>;

    /// Overwrite an existing subsidiary record list row in place.
    fn set_record_list(&self, file: &str, row_id: RowId, bytes: &[u8]) -> Result<()>;

    /// Read a subsidiary record list row; a missing row is a structural
    /// inconsistency.
    fn get_record_list(&self, file: &str, row_id: RowId) -> Result<Vec<u8>>;

    /// Look up the row for `(key, segment)` in `table`.
    fn find_index_row(
        &self,
        table: IndexTable<'_>,
        key: &str,
        segment: u64,
    ) -> Result<Option<IndexRow>>;

    /// Insert a fresh row; a duplicate `(key, segment)` is a structural
    /// inconsistency.
    fn insert_index_row(&self, table: IndexTable<'_>, row: IndexRow) -> Result<()>;

    /// Update the count column of an existing row.
    fn update_index_count(
        &self,
        table: IndexTable<'_>,
        key: &str,
        segment: u64,
        count: u64,
    ) -> Result<()>;

    /// Update the count and reference columns of an existing row (count
    /// grew past one, so the reference becomes a subsidiary row id).
    fn update_index_reference(
        &self,
        table: IndexTable<'_>,
        key: &str,
        segment: u64,
        count: u64,
        reference: Reference,
    ) -> Result<()>;

    /// Create an empty deferred table.
    fn create_deferred_table(&self, name: &str) -> Result<()>;

    /// Drop a deferred table and its rows.
    fn drop_deferred_table(&self, name: &str) -> Result<()>;

    /// Open a sorted cursor over a deferred table.
    fn deferred_cursor(&self, name: &str) -> Result<Box<dyn DeferredCursor>>;
}
