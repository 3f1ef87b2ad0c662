//! In-memory accumulation of index values between flush points.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::recordset::RecordSet;

/// Accumulates `(file, field, key) -> RecordSet` associations for the
/// segment currently being filled.
///
/// Lookup is hash-based because the hot path is one insert per index value
/// per record; sorted order is only needed at flush, where `take_field`
/// hands the keys back in a `BTreeMap`.
#[derive(Debug, Default)]
pub struct ValueAccumulator {
    values: AHashMap<String, AHashMap<String, AHashMap<String, RecordSet>>>,
}

impl ValueAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        ValueAccumulator::default()
    }

    /// Record that `offset` within the current segment carries `key` in the
    /// secondary index of `field`.
    pub fn add(
        &mut self,
        file: &str,
        field: &str,
        key: &str,
        offset: u64,
        config: &DatabaseConfig,
    ) -> Result<()> {
        let keys = self
            .values
            .entry(file.to_string())
            .or_default()
            .entry(field.to_string())
            .or_default();
        match keys.get_mut(key) {
            Some(set) => set.add(offset, config)?,
            None => {
                keys.insert(key.to_string(), RecordSet::new(offset));
            }
        }
        Ok(())
    }

    /// Drain everything accumulated for one field, sorted by key.
    pub fn take_field(&mut self, file: &str, field: &str) -> BTreeMap<String, RecordSet> {
        self.values
            .get_mut(file)
            .and_then(|fields| fields.remove(field))
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default()
    }

    /// Whether anything is pending for `file`.
    pub fn is_empty(&self, file: &str) -> bool {
        self.values
            .get(file)
            .is_none_or(|fields| fields.values().all(|keys| keys.is_empty()))
    }
}
