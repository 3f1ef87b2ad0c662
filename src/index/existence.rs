//! Per-file existence bitmaps.
//!
//! Each segment of a file has one bitmap recording which record numbers are
//! present. Bitmaps are stored under key `segment + 1` so key 0 stays free
//! for control data.

use std::collections::BTreeMap;

use crate::backend::Backend;
use crate::bitvec::BitVector;
use crate::config::DatabaseConfig;
use crate::error::Result;

/// Write-through cache of one file's existence bitmaps.
///
/// Bitmaps load lazily on the first mark in a segment, so a run that
/// extends a partially filled segment keeps the bits set by earlier runs.
#[derive(Debug)]
pub struct ExistenceMap {
    file: String,
    segments: BTreeMap<u64, BitVector>,
}

impl ExistenceMap {
    /// Create an empty cache for `file`.
    pub fn new<S: Into<String>>(file: S) -> Self {
        ExistenceMap {
            file: file.into(),
            segments: BTreeMap::new(),
        }
    }

    /// Set the bit for `offset` within `segment`, loading the stored bitmap
    /// first if this is the segment's first mark of the run.
    pub fn mark(
        &mut self,
        backend: &dyn Backend,
        segment: u64,
        offset: u64,
        config: &DatabaseConfig,
    ) -> Result<()> {
        if !self.segments.contains_key(&segment) {
            let bitmap = match backend.get_existence_map(&self.file, segment + 1)? {
                Some(bytes) => BitVector::from_bytes(&bytes),
                None => BitVector::new(config.segment_size as usize),
            };
            self.segments.insert(segment, bitmap);
        }
        let bitmap = self
            .segments
            .get_mut(&segment)
            .expect("segment bitmap inserted above");
        bitmap.set(offset as isize, true)
    }

    /// Upsert one segment's bitmap. A segment never marked is a no-op.
    pub fn flush(&mut self, backend: &dyn Backend, segment: u64) -> Result<()> {
        if let Some(bitmap) = self.segments.get(&segment) {
            backend.put_existence_map(&self.file, segment + 1, &bitmap.to_bytes())?;
        }
        Ok(())
    }

    /// Upsert every cached segment and clear the cache.
    pub fn flush_all(&mut self, backend: &dyn Backend) -> Result<()> {
        for (segment, bitmap) in &self.segments {
            backend.put_existence_map(&self.file, segment + 1, &bitmap.to_bytes())?;
        }
        self.segments.clear();
        Ok(())
    }
}
