//! Database handle configuration and segment arithmetic.
//!
//! Every tuning constant the deferred-update engine reads lives here, fixed
//! at handle construction. Two handles with different segment sizes can
//! coexist because nothing is process-global.

use std::collections::BTreeSet;

use crate::error::{FalxError, Result};

/// Configuration for one database handle.
///
/// `segment_size` is a power of two and never changes once a file is open;
/// record numbers map to `(segment, offset)` purely by division against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Records per segment. Power of two, at most 65536 so offsets fit the
    /// two-byte list encoding.
    pub segment_size: u64,

    /// A record-number list longer than this is promoted to a bitmap.
    /// Promotion is strict: a list of exactly this length stays a list.
    pub upper_conversion_limit: u64,

    /// Below this count a shrinking bitmap reverts to a list. Only the
    /// deletion path consults it; deferred update is append-only.
    pub lower_conversion_limit: u64,

    /// Offsets within a segment at which the in-progress segment is flushed.
    /// Normally just `segment_size - 1` (once per full segment). Must
    /// include `segment_size - 1`: the accumulator is keyed by offset, so a
    /// segment left unflushed at its end would leak its tail into the next
    /// segment's rows.
    pub deferred_update_points: BTreeSet<u64>,

    /// Total row budget shared by the merge cursors; each deferred table's
    /// cursor buffers `segment_sort_scale / table_count` rows (minimum 1).
    pub segment_sort_scale: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let segment_size = 32768;
        DatabaseConfig {
            segment_size,
            // One below the count at which a two-byte-per-entry list and
            // the segment bitmap occupy the same number of bytes; equality
            // would make stored payloads ambiguous.
            upper_conversion_limit: segment_size / 16 - 1,
            lower_conversion_limit: segment_size / 32,
            deferred_update_points: BTreeSet::from([segment_size - 1]),
            segment_sort_scale: 65536,
        }
    }
}

impl DatabaseConfig {
    /// Create a configuration for the given segment size with derived
    /// defaults for everything else.
    pub fn with_segment_size(segment_size: u64) -> Self {
        DatabaseConfig {
            segment_size,
            upper_conversion_limit: (segment_size / 16).saturating_sub(1).max(1),
            lower_conversion_limit: (segment_size / 32).max(1),
            deferred_update_points: BTreeSet::from([segment_size - 1]),
            segment_sort_scale: 65536,
        }
    }

    /// Replace the list-to-bitmap promotion threshold.
    pub fn upper_conversion_limit(mut self, limit: u64) -> Self {
        self.upper_conversion_limit = limit;
        self
    }

    /// Replace the flush points. Tighter points bound peak memory at the
    /// cost of extra splice work on the second and later chunks of each
    /// segment. The set must keep `segment_size - 1` as its highest member
    /// to pass `validate`.
    pub fn deferred_update_points<I: IntoIterator<Item = u64>>(mut self, points: I) -> Self {
        self.deferred_update_points = points.into_iter().collect();
        self
    }

    /// Replace the merge chunk budget.
    pub fn segment_sort_scale(mut self, scale: u64) -> Self {
        self.segment_sort_scale = scale;
        self
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.segment_size.is_power_of_two() {
            return Err(FalxError::config(format!(
                "segment_size {} is not a power of two",
                self.segment_size
            )));
        }
        if !(8..=65536).contains(&self.segment_size) {
            return Err(FalxError::config(format!(
                "segment_size {} outside 8..=65536",
                self.segment_size
            )));
        }
        if self.upper_conversion_limit == 0 || self.upper_conversion_limit >= self.segment_size {
            return Err(FalxError::config(format!(
                "upper_conversion_limit {} outside 1..{}",
                self.upper_conversion_limit, self.segment_size
            )));
        }
        if self.lower_conversion_limit > self.upper_conversion_limit {
            return Err(FalxError::config(
                "lower_conversion_limit above upper_conversion_limit",
            ));
        }
        // A full-length list must not serialize to the same byte length as
        // the segment bitmap, or stored payloads cannot be told apart.
        if self.upper_conversion_limit * 2 == self.segment_size / 8 {
            return Err(FalxError::config(format!(
                "upper_conversion_limit {} makes list and bitmap payloads the same length",
                self.upper_conversion_limit
            )));
        }
        if self.deferred_update_points.is_empty() {
            return Err(FalxError::config("deferred_update_points is empty"));
        }
        // The highest point must be the segment's last offset, or offsets
        // past it would accumulate into the next segment's flush.
        if let Some(&point) = self.deferred_update_points.last() {
            if point != self.segment_size - 1 {
                return Err(FalxError::config(format!(
                    "highest deferred update point {} must be {} (segment end)",
                    point,
                    self.segment_size - 1
                )));
            }
        }
        if self.segment_sort_scale == 0 {
            return Err(FalxError::config("segment_sort_scale is zero"));
        }
        Ok(())
    }

    /// Segment containing `record_number`.
    pub fn segment_of(&self, record_number: u64) -> u64 {
        record_number / self.segment_size
    }

    /// Offset of `record_number` within its segment.
    pub fn offset_of(&self, record_number: u64) -> u64 {
        record_number % self.segment_size
    }

    /// Bytes in one segment's bitmap.
    pub fn segment_size_bytes(&self) -> usize {
        (self.segment_size as usize) / 8
    }

    /// Lowest flush point; a pre-existing high record below it means the
    /// run starts by extending that segment.
    pub fn first_update_point(&self) -> u64 {
        *self
            .deferred_update_points
            .first()
            .expect("validated configuration has at least one update point")
    }

    /// Highest flush point; reaching it completes the segment.
    pub fn last_update_point(&self) -> u64 {
        *self
            .deferred_update_points
            .last()
            .expect("validated configuration has at least one update point")
    }
}
