//! Deferred-update orchestration: append, accumulate, flush, splice, merge.
//!
//! A run brackets a bulk load. `set_defer_update` captures where each file's
//! record numbers stand, `put_instance` appends records while accumulating
//! index values in memory, and every time a record lands on a deferred
//! update point the accumulated values for its segment are flushed. The
//! first flushed chunk of a run extends existing index rows in place; later
//! segments go to per-run deferred tables that a k-way merge folds into the
//! permanent index at the end of the run.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};

use ahash::AHashMap;
use log::{debug, trace};

use crate::backend::{Backend, DeferredCursor, IndexRow, IndexTable, Reference};
use crate::config::DatabaseConfig;
use crate::error::{FalxError, Result};
use crate::index::accumulator::ValueAccumulator;
use crate::index::existence::ExistenceMap;
use crate::record::{FileSpec, Instance};
use crate::recordset::{RecordSet, RecordSetPayload};

/// Callback for index values of fields that are not registered secondaries.
pub type PutCallback = Box<dyn FnMut(&Instance, &[String])>;

/// Per-file position of a run relative to the file's pre-existing records.
///
/// `first_chunk` is true while the next flush would be the first chunk of a
/// segment whose earlier part is already indexed, which is what decides
/// between opening a fresh deferred table and splicing in place.
#[derive(Debug, Clone, Default)]
struct RunState {
    /// Segment holding the file's high record when the run started.
    initial_high_segment: Option<u64>,
    /// Most recent segment completed through its last update point.
    high_segment: Option<u64>,
    first_chunk: bool,
}

/// The deferred-update engine over one backend.
pub struct DeferredIndexWriter<B: Backend> {
    backend: B,
    spec: FileSpec,
    config: DatabaseConfig,
    accumulator: ValueAccumulator,
    existence: AHashMap<String, ExistenceMap>,
    run: AHashMap<String, RunState>,
    /// Names of the run's deferred tables per (file, field), oldest first.
    deferred: BTreeMap<(String, String), Vec<String>>,
    callbacks: AHashMap<(String, String), PutCallback>,
    deferring: bool,
}

impl<B: Backend> DeferredIndexWriter<B> {
    /// Create a writer over `backend` for the files in `spec`.
    pub fn new(backend: B, spec: FileSpec, config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        Ok(DeferredIndexWriter {
            backend,
            spec,
            config,
            accumulator: ValueAccumulator::new(),
            existence: AHashMap::new(),
            run: AHashMap::new(),
            deferred: BTreeMap::new(),
            callbacks: AHashMap::new(),
            deferring: false,
        })
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The writer's configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Register a callback receiving the index values of `field`, which
    /// must not be a registered secondary of `file`.
    pub fn set_put_callback<F>(&mut self, file: &str, field: &str, callback: F)
    where
        F: FnMut(&Instance, &[String]) + 'static,
    {
        self.callbacks
            .insert((file.to_string(), field.to_string()), Box::new(callback));
    }

    /// Start a deferred-update run.
    ///
    /// Opens the run's transaction and records, per file, which segment
    /// holds the current high record and whether that segment is still
    /// short of its first update point.
    pub fn set_defer_update(&mut self) -> Result<()> {
        if self.deferring {
            return Err(FalxError::other("deferred-update run already in progress"));
        }
        self.backend.start_transaction()?;
        self.run.clear();
        for file in self.spec.files() {
            let state = match self.backend.high_record(file)? {
                Some(high) => {
                    let segment = self.config.segment_of(high);
                    RunState {
                        initial_high_segment: Some(segment),
                        high_segment: Some(segment),
                        first_chunk: self.config.offset_of(high)
                            < self.config.first_update_point(),
                    }
                }
                None => RunState::default(),
            };
            self.run.insert(file.to_string(), state);
        }
        self.deferring = true;
        debug!("deferred-update run started over {} files", self.run.len());
        Ok(())
    }

    /// Append one record and accumulate its index values.
    ///
    /// The instance must not carry a record number already; deferred update
    /// is append-only. On return the instance holds the number the backend
    /// assigned. When the record lands on a deferred update point the
    /// segment's accumulated values and existence bits are flushed before
    /// returning.
    pub fn put_instance(&mut self, file: &str, instance: &mut Instance) -> Result<()> {
        if !self.deferring {
            return Err(FalxError::other("no deferred-update run in progress"));
        }
        if !self.spec.contains_file(file) {
            return Err(FalxError::other(format!("file '{file}' is not declared")));
        }
        if let Some(record_number) = instance.record_number() {
            return Err(FalxError::record_reuse(file, record_number));
        }

        let record_number = self.backend.put(file, None, instance.payload())?;
        instance.assign_record_number(record_number);
        let segment = self.config.segment_of(record_number);
        let offset = self.config.offset_of(record_number);

        self.existence
            .entry(file.to_string())
            .or_insert_with(|| ExistenceMap::new(file))
            .mark(&self.backend, segment, offset, &self.config)?;

        for (field, values) in instance.index_values() {
            if self.spec.is_secondary(file, field) {
                for value in values {
                    self.accumulator
                        .add(file, field, value, offset, &self.config)?;
                }
            } else if let Some(callback) =
                self.callbacks.get_mut(&(file.to_string(), field.clone()))
            {
                callback(instance, values);
            }
        }

        if self.config.deferred_update_points.contains(&offset) {
            self.flush_segment(file, segment)?;
            let last_point = self.config.last_update_point();
            let state = self.run.entry(file.to_string()).or_default();
            if offset == last_point {
                state.high_segment = Some(segment);
                state.first_chunk = true;
            } else {
                state.first_chunk = false;
            }
        }
        Ok(())
    }

    /// Flush the trailing partial segment of every file, then merge all
    /// deferred tables into the permanent indexes.
    ///
    /// A file whose high record sits exactly on an update point was already
    /// flushed by `put_instance`; only the merge remains for it.
    pub fn do_final_segment_deferred_updates(&mut self) -> Result<()> {
        if !self.deferring {
            return Err(FalxError::other("no deferred-update run in progress"));
        }
        let files: Vec<String> = self.spec.files().map(str::to_string).collect();
        for file in &files {
            if let Some(high) = self.backend.high_record(file)? {
                let offset = self.config.offset_of(high);
                if !self.config.deferred_update_points.contains(&offset) {
                    let segment = self.config.segment_of(high);
                    self.flush_segment(file, segment)?;
                }
            }
            if let Some(map) = self.existence.get_mut(file) {
                map.flush_all(&self.backend)?;
            }
            let fields: Vec<String> = self.spec.secondary_fields(file).map(str::to_string).collect();
            for field in &fields {
                self.merge(file, field)?;
            }
        }
        Ok(())
    }

    /// Commit the run's transaction and clear run state.
    pub fn unset_defer_update(&mut self) -> Result<()> {
        if !self.deferring {
            return Err(FalxError::other("no deferred-update run in progress"));
        }
        self.backend.commit()?;
        self.run.clear();
        self.existence.clear();
        self.deferring = false;
        debug!("deferred-update run committed");
        Ok(())
    }

    /// Write every secondary field's accumulated values for `segment`, then
    /// upsert the segment's existence bitmap.
    fn flush_segment(&mut self, file: &str, segment: u64) -> Result<()> {
        let fields: Vec<String> = self.spec.secondary_fields(file).map(str::to_string).collect();
        for field in &fields {
            self.sort_and_write(file, field, segment)?;
        }
        if let Some(map) = self.existence.get_mut(file) {
            map.flush(&self.backend, segment)?;
        }
        Ok(())
    }

    /// Write one field's accumulated values for `segment` to the current
    /// target table.
    ///
    /// A fresh deferred table opens when this is the first chunk of a
    /// segment the run has not touched before and the segment is not the
    /// one the file's pre-existing records already reached. Rows for keys
    /// already present in the target are spliced (union in place); the rest
    /// are inserted in key order.
    fn sort_and_write(&mut self, file: &str, field: &str, segment: u64) -> Result<()> {
        let drained = self.accumulator.take_field(file, field);
        if drained.is_empty() {
            return Ok(());
        }
        let state = self
            .run
            .get(file)
            .cloned()
            .unwrap_or_default();

        let tables = self
            .deferred
            .entry((file.to_string(), field.to_string()))
            .or_default();
        if state.first_chunk && state.initial_high_segment != Some(segment) {
            let name = format!("t_{file}_{field}_{}", tables.len() + 1);
            self.backend.create_deferred_table(&name)?;
            tables.push(name);
        }
        let splice = state.high_segment == Some(segment) || !state.first_chunk;
        let target_name = tables.last().cloned();
        let target = match target_name.as_deref() {
            Some(name) => IndexTable::Deferred(name),
            None => IndexTable::Permanent { file, field },
        };

        for (key, set) in &drained {
            if splice {
                if let Some(existing) = self.backend.find_index_row(target, key, segment)? {
                    trace!("splicing key '{key}' segment {segment} in '{file}'.'{field}'");
                    let current = self.decode_row(file, &existing)?;
                    let merged = current.union(set, &self.config)?;
                    self.write_back(file, target, key, segment, &existing, &merged)?;
                    continue;
                }
            }
            self.insert_row(file, target, key, segment, set)?;
        }
        debug!(
            "flushed {} keys for '{file}'.'{field}' segment {segment}",
            drained.len()
        );
        Ok(())
    }

    /// Reconstruct the record set an index row describes.
    fn decode_row(&self, file: &str, row: &IndexRow) -> Result<RecordSet> {
        match row.reference {
            Reference::Literal(offset) => {
                if row.count != 1 {
                    return Err(FalxError::corrupt(format!(
                        "literal index row with count {} for key '{}'",
                        row.count, row.key
                    )));
                }
                Ok(RecordSet::One(offset))
            }
            Reference::Subsidiary(row_id) => {
                let bytes = self.backend.get_record_list(file, row_id)?;
                RecordSet::decode(row.count, &RecordSetPayload::Bytes(bytes), &self.config)
            }
        }
    }

    /// Insert a fresh index row, placing count>1 payloads in the
    /// subsidiary record list table first.
    fn insert_row(
        &self,
        file: &str,
        table: IndexTable<'_>,
        key: &str,
        segment: u64,
        set: &RecordSet,
    ) -> Result<()> {
        let (count, payload) = set.encode();
        let reference = match payload {
            RecordSetPayload::Literal(offset) => Reference::Literal(offset),
            RecordSetPayload::Bytes(bytes) => {
                Reference::Subsidiary(self.backend.insert_record_list(file, &bytes)?)
            }
        };
        self.backend.insert_index_row(
            table,
            IndexRow {
                key: key.to_string(),
                segment,
                count,
                reference,
            },
        )
    }

    /// Replace an existing row's contents with the spliced set, reusing the
    /// row's subsidiary entry when it has one.
    fn write_back(
        &self,
        file: &str,
        table: IndexTable<'_>,
        key: &str,
        segment: u64,
        existing: &IndexRow,
        merged: &RecordSet,
    ) -> Result<()> {
        let (count, payload) = merged.encode();
        match (payload, existing.reference) {
            (RecordSetPayload::Literal(offset), _) => self.backend.update_index_reference(
                table,
                key,
                segment,
                count,
                Reference::Literal(offset),
            ),
            (RecordSetPayload::Bytes(bytes), Reference::Subsidiary(row_id)) => {
                self.backend.set_record_list(file, row_id, &bytes)?;
                self.backend.update_index_count(table, key, segment, count)
            }
            (RecordSetPayload::Bytes(bytes), Reference::Literal(_)) => {
                let row_id = self.backend.insert_record_list(file, &bytes)?;
                self.backend.update_index_reference(
                    table,
                    key,
                    segment,
                    count,
                    Reference::Subsidiary(row_id),
                )
            }
        }
    }

    /// Fold the run's deferred tables for (file, field) into the permanent
    /// index and drop them. No-op when the run opened none.
    fn merge(&mut self, file: &str, field: &str) -> Result<()> {
        let tables = match self
            .deferred
            .remove(&(file.to_string(), field.to_string()))
        {
            Some(tables) if !tables.is_empty() => tables,
            _ => return Ok(()),
        };
        // Each cursor gets an equal share of the row budget.
        let chunk = std::cmp::max(
            1,
            self.config.segment_sort_scale as usize / tables.len(),
        );

        let mut cursors: Vec<Box<dyn DeferredCursor>> = Vec::with_capacity(tables.len());
        let mut buffers: Vec<VecDeque<IndexRow>> = Vec::with_capacity(tables.len());
        let mut heap = BinaryHeap::new();
        for (source, name) in tables.iter().enumerate() {
            let mut cursor = self.backend.deferred_cursor(name)?;
            let mut buffer: VecDeque<IndexRow> = cursor.next_chunk(chunk)?.into();
            if let Some(row) = buffer.pop_front() {
                heap.push(Reverse((row, source)));
            }
            cursors.push(cursor);
            buffers.push(buffer);
        }

        let target = IndexTable::Permanent { file, field };
        let mut merged = 0u64;
        while let Some(Reverse((row, source))) = heap.pop() {
            self.backend.insert_index_row(target, row)?;
            merged += 1;
            if buffers[source].is_empty() {
                buffers[source] = cursors[source].next_chunk(chunk)?.into();
            }
            if let Some(next) = buffers[source].pop_front() {
                heap.push(Reverse((next, source)));
            }
        }

        for name in &tables {
            self.backend.drop_deferred_table(name)?;
        }
        debug!(
            "merged {merged} rows from {} deferred tables into '{file}'.'{field}'",
            tables.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::backend::MemoryBackend;

    fn writer(points: impl IntoIterator<Item = u64>) -> DeferredIndexWriter<MemoryBackend> {
        let mut config = DatabaseConfig::with_segment_size(8).deferred_update_points(points);
        config.upper_conversion_limit = 3;
        let spec = FileSpec::new().file("games", ["Event"]);
        DeferredIndexWriter::new(MemoryBackend::new(), spec, config).unwrap()
    }

    fn instance(key: &str) -> Instance {
        Instance::new(b"payload".to_vec()).index_value("Event", [key])
    }

    #[test]
    fn put_requires_open_run() {
        let mut writer = writer([7]);
        let mut record = instance("x");
        assert!(matches!(
            writer.put_instance("games", &mut record),
            Err(FalxError::Other(_))
        ));
    }

    #[test]
    fn put_rejects_assigned_record_number() {
        let mut writer = writer([7]);
        writer.set_defer_update().unwrap();
        let mut record = instance("x");
        writer.put_instance("games", &mut record).unwrap();
        assert_eq!(record.record_number(), Some(0));
        assert!(matches!(
            writer.put_instance("games", &mut record),
            Err(FalxError::RecordReuse {
                record_number: 0,
                ..
            })
        ));
    }

    #[test]
    fn put_rejects_undeclared_file() {
        let mut writer = writer([7]);
        writer.set_defer_update().unwrap();
        let mut record = instance("x");
        assert!(writer.put_instance("players", &mut record).is_err());
    }

    #[test]
    fn points_without_segment_end_rejected_at_construction() {
        // With points {3} alone, offsets 4..=7 of every segment would be
        // carried over and flushed under the next segment's index.
        let config = DatabaseConfig::with_segment_size(8).deferred_update_points([3]);
        let spec = FileSpec::new().file("games", ["Event"]);
        assert!(matches!(
            DeferredIndexWriter::new(MemoryBackend::new(), spec, config),
            Err(FalxError::Config(_))
        ));
    }

    #[test]
    fn nested_runs_rejected() {
        let mut writer = writer([7]);
        writer.set_defer_update().unwrap();
        assert!(writer.set_defer_update().is_err());
        assert!(writer.unset_defer_update().is_ok());
        assert!(writer.unset_defer_update().is_err());
    }

    #[test]
    fn first_segment_of_empty_file_goes_to_permanent() {
        let mut writer = writer([7]);
        writer.set_defer_update().unwrap();
        for _ in 0..8 {
            writer.put_instance("games", &mut instance("x")).unwrap();
        }
        // Flushed at offset 7, straight into the permanent table.
        let rows = writer.backend().index_rows("games", "Event");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].segment, 0);
        assert_eq!(rows[0].count, 8);
        assert!(writer.backend().deferred_table_names().is_empty());
    }

    #[test]
    fn second_segment_opens_deferred_table() {
        let mut writer = writer([7]);
        writer.set_defer_update().unwrap();
        for _ in 0..16 {
            writer.put_instance("games", &mut instance("x")).unwrap();
        }
        assert_eq!(
            writer.backend().deferred_table_names(),
            vec!["t_games_Event_1".to_string()]
        );
        let deferred = writer.backend().deferred_rows("t_games_Event_1");
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].segment, 1);
        assert_eq!(deferred[0].count, 8);
    }

    #[test]
    fn intermediate_point_splices_second_chunk() {
        // Points {3, 7}: offsets 0..=3 flush first, 4..=7 splice into the
        // same rows.
        let mut writer = writer([3, 7]);
        writer.set_defer_update().unwrap();
        for _ in 0..8 {
            writer.put_instance("games", &mut instance("x")).unwrap();
        }
        let rows = writer.backend().index_rows("games", "Event");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 8);
        // Count 8 exceeds the conversion limit, so the subsidiary row holds
        // the full segment bitmap.
        let Reference::Subsidiary(row_id) = rows[0].reference else {
            panic!("count 8 row must reference the subsidiary table");
        };
        assert_eq!(
            writer.backend().get_record_list("games", row_id).unwrap(),
            vec![0xff]
        );
    }

    #[test]
    fn callback_receives_unrouted_fields() {
        let mut writer = writer([7]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        writer.set_put_callback("games", "Note", move |instance, values| {
            sink.borrow_mut()
                .push((instance.record_number(), values.to_vec()));
        });
        writer.set_defer_update().unwrap();
        let mut record = Instance::new(b"payload".to_vec())
            .index_value("Event", ["x"])
            .index_value("Note", ["brilliancy"])
            .index_value("Silent", ["dropped"]);
        writer.put_instance("games", &mut record).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![(Some(0), vec!["brilliancy".to_string()])]
        );
    }

    #[test]
    fn run_over_partial_high_segment_splices_permanent() {
        let mut writer = writer([7]);
        // Seed records 0..=5 and an existing row for "x" at offset 5.
        for record in 0..=5 {
            writer
                .backend()
                .put("games", Some(record), b"seed")
                .unwrap();
        }
        writer
            .backend()
            .insert_index_row(
                IndexTable::Permanent {
                    file: "games",
                    field: "Event",
                },
                IndexRow {
                    key: "x".to_string(),
                    segment: 0,
                    count: 1,
                    reference: Reference::Literal(5),
                },
            )
            .unwrap();

        writer.set_defer_update().unwrap();
        for _ in 0..2 {
            writer.put_instance("games", &mut instance("x")).unwrap();
        }
        writer.do_final_segment_deferred_updates().unwrap();
        writer.unset_defer_update().unwrap();

        let rows = writer.backend().index_rows("games", "Event");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 3);
        let Reference::Subsidiary(row_id) = rows[0].reference else {
            panic!("count 3 row must reference the subsidiary table");
        };
        // Offsets 5, 6, 7 as big-endian pairs.
        assert_eq!(
            writer.backend().get_record_list("games", row_id).unwrap(),
            vec![0x00, 0x05, 0x00, 0x06, 0x00, 0x07]
        );
    }
}
