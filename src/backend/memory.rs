//! In-memory backend implementation for testing and small databases.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::backend::traits::{
    Backend, DeferredCursor, IndexRow, IndexTable, Reference, RowId,
};
use crate::error::{FalxError, Result};

type RowMap = BTreeMap<(String, u64), (u64, Reference)>;

#[derive(Debug, Default)]
struct Inner {
    /// Record payloads per file, keyed by record number.
    records: BTreeMap<String, BTreeMap<u64, Vec<u8>>>,
    /// Existence bitmaps per file, keyed by 1-based segment number.
    existence: BTreeMap<String, BTreeMap<u64, Vec<u8>>>,
    /// Subsidiary record list rows per file.
    record_lists: BTreeMap<String, BTreeMap<RowId, Vec<u8>>>,
    /// Next subsidiary row id per file. Row ids are 1-based, matching a
    /// rowid column.
    next_row_id: BTreeMap<String, RowId>,
    /// Permanent index tables keyed by (file, field).
    permanent: BTreeMap<(String, String), RowMap>,
    /// Deferred tables by name.
    deferred: BTreeMap<String, RowMap>,
    in_transaction: bool,
    commits: u64,
}

impl Inner {
    fn table_rows(&mut self, table: IndexTable<'_>) -> Result<&mut RowMap> {
        match table {
            IndexTable::Permanent { file, field } => Ok(self
                .permanent
                .entry((file.to_string(), field.to_string()))
                .or_default()),
            IndexTable::Deferred(name) => self
                .deferred
                .get_mut(name)
                .ok_or_else(|| FalxError::backend(format!("no deferred table '{name}'"))),
        }
    }
}

/// An in-memory [`Backend`].
///
/// Useful for tests and for building throwaway databases. All state lives
/// behind one lock; the engine is single-threaded so there is no
/// contention, the lock just supplies interior mutability behind `&self`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    /// Number of records stored in `file`.
    pub fn record_count(&self, file: &str) -> usize {
        self.inner
            .read()
            .records
            .get(file)
            .map_or(0, |records| records.len())
    }

    /// All permanent index rows for (file, field) in sorted order.
    pub fn index_rows(&self, file: &str, field: &str) -> Vec<IndexRow> {
        self.inner
            .read()
            .permanent
            .get(&(file.to_string(), field.to_string()))
            .map_or_else(Vec::new, rows_of)
    }

    /// All rows of a deferred table in sorted order.
    pub fn deferred_rows(&self, name: &str) -> Vec<IndexRow> {
        self.inner
            .read()
            .deferred
            .get(name)
            .map_or_else(Vec::new, rows_of)
    }

    /// Names of the deferred tables currently open.
    pub fn deferred_table_names(&self) -> Vec<String> {
        self.inner.read().deferred.keys().cloned().collect()
    }

    /// Number of subsidiary record list rows for `file`.
    pub fn record_list_count(&self, file: &str) -> usize {
        self.inner
            .read()
            .record_lists
            .get(file)
            .map_or(0, |lists| lists.len())
    }

    /// Number of commits so far.
    pub fn commit_count(&self) -> u64 {
        self.inner.read().commits
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.inner.read().in_transaction
    }
}

fn rows_of(rows: &RowMap) -> Vec<IndexRow> {
    rows.iter()
        .map(|((key, segment), (count, reference))| IndexRow {
            key: key.clone(),
            segment: *segment,
            count: *count,
            reference: *reference,
        })
        .collect()
}

impl Backend for MemoryBackend {
    fn put(&self, file: &str, key: Option<u64>, payload: &[u8]) -> Result<u64> {
        let mut inner = self.inner.write();
        let records = inner.records.entry(file.to_string()).or_default();
        let record_number = match key {
            Some(record_number) => record_number,
            None => records.last_key_value().map_or(0, |(&high, _)| high + 1),
        };
        records.insert(record_number, payload.to_vec());
        Ok(record_number)
    }

    fn high_record(&self, file: &str) -> Result<Option<u64>> {
        Ok(self
            .inner
            .read()
            .records
            .get(file)
            .and_then(|records| records.last_key_value().map(|(&high, _)| high)))
    }

    fn start_transaction(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.in_transaction {
            return Err(FalxError::backend("transaction already open"));
        }
        inner.in_transaction = true;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.in_transaction {
            return Err(FalxError::backend("no open transaction"));
        }
        inner.in_transaction = false;
        inner.commits += 1;
        Ok(())
    }

    fn get_existence_map(&self, file: &str, key: u64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .inner
            .read()
            .existence
            .get(file)
            .and_then(|maps| maps.get(&key).cloned()))
    }

    fn put_existence_map(&self, file: &str, key: u64, value: &[u8]) -> Result<()> {
        self.inner
            .write()
            .existence
            .entry(file.to_string())
            .or_default()
            .insert(key, value.to_vec());
        Ok(())
    }

    fn insert_record_list(&self, file: &str, bytes: &[u8]) -> Result<RowId> {
        let mut inner = self.inner.write();
        let next = inner.next_row_id.entry(file.to_string()).or_insert(1);
        let row_id = *next;
        *next += 1;
        inner
            .record_lists
            .entry(file.to_string())
            .or_default()
            .insert(row_id, bytes.to_vec());
        Ok(row_id)
    }

    fn set_record_list(&self, file: &str, row_id: RowId, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        let row = inner
            .record_lists
            .get_mut(file)
            .and_then(|lists| lists.get_mut(&row_id))
            .ok_or_else(|| {
                FalxError::corrupt(format!("segment record {row_id} missing in '{file}'"))
            })?;
        *row = bytes.to_vec();
        Ok(())
    }

    fn get_record_list(&self, file: &str, row_id: RowId) -> Result<Vec<u8>> {
        self.inner
            .read()
            .record_lists
            .get(file)
            .and_then(|lists| lists.get(&row_id).cloned())
            .ok_or_else(|| {
                FalxError::corrupt(format!("segment record {row_id} missing in '{file}'"))
            })
    }

    fn find_index_row(
        &self,
        table: IndexTable<'_>,
        key: &str,
        segment: u64,
    ) -> Result<Option<IndexRow>> {
        let mut inner = self.inner.write();
        let rows = inner.table_rows(table)?;
        Ok(rows
            .get(&(key.to_string(), segment))
            .map(|(count, reference)| IndexRow {
                key: key.to_string(),
                segment,
                count: *count,
                reference: *reference,
            }))
    }

    fn insert_index_row(&self, table: IndexTable<'_>, row: IndexRow) -> Result<()> {
        let mut inner = self.inner.write();
        let rows = inner.table_rows(table)?;
        let slot = (row.key.clone(), row.segment);
        if rows.contains_key(&slot) {
            return Err(FalxError::corrupt(format!(
                "duplicate index row for key '{}' segment {} in {:?}",
                row.key, row.segment, table
            )));
        }
        rows.insert(slot, (row.count, row.reference));
        Ok(())
    }

    fn update_index_count(
        &self,
        table: IndexTable<'_>,
        key: &str,
        segment: u64,
        count: u64,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let rows = inner.table_rows(table)?;
        let row = rows.get_mut(&(key.to_string(), segment)).ok_or_else(|| {
            FalxError::corrupt(format!(
                "no index row for key '{key}' segment {segment} in {table:?}"
            ))
        })?;
        row.0 = count;
        Ok(())
    }

    fn update_index_reference(
        &self,
        table: IndexTable<'_>,
        key: &str,
        segment: u64,
        count: u64,
        reference: Reference,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let rows = inner.table_rows(table)?;
        let row = rows.get_mut(&(key.to_string(), segment)).ok_or_else(|| {
            FalxError::corrupt(format!(
                "no index row for key '{key}' segment {segment} in {table:?}"
            ))
        })?;
        *row = (count, reference);
        Ok(())
    }

    fn create_deferred_table(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.deferred.contains_key(name) {
            return Err(FalxError::backend(format!(
                "deferred table '{name}' already exists"
            )));
        }
        inner.deferred.insert(name.to_string(), RowMap::new());
        Ok(())
    }

    fn drop_deferred_table(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .deferred
            .remove(name)
            .ok_or_else(|| FalxError::backend(format!("no deferred table '{name}'")))?;
        Ok(())
    }

    fn deferred_cursor(&self, name: &str) -> Result<Box<dyn DeferredCursor>> {
        let inner = self.inner.read();
        let rows = inner
            .deferred
            .get(name)
            .ok_or_else(|| FalxError::backend(format!("no deferred table '{name}'")))?;
        Ok(Box::new(MemoryCursor {
            rows: rows_of(rows),
            position: 0,
        }))
    }
}

/// Snapshot cursor over one deferred table.
#[derive(Debug)]
struct MemoryCursor {
    rows: Vec<IndexRow>,
    position: usize,
}

impl DeferredCursor for MemoryCursor {
    fn next_chunk(&mut self, n: usize) -> Result<Vec<IndexRow>> {
        let end = (self.position + n).min(self.rows.len());
        let chunk = self.rows[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }
}
