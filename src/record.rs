//! Record instances and the per-file field specification.
//!
//! The engine stores records as opaque payload bytes plus, per indexed
//! field, the list of index key values the record projects. Which fields of
//! a file are secondary indexes is declared up front in a [`FileSpec`];
//! fields an instance produces values for that are not registered
//! secondaries are handed to put-callbacks instead (see the writer).

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::Result;

/// Specification of the files in a database and their secondary indexes.
#[derive(Debug, Clone, Default)]
pub struct FileSpec {
    files: BTreeMap<String, BTreeSet<String>>,
}

impl FileSpec {
    /// Create an empty specification.
    pub fn new() -> Self {
        FileSpec::default()
    }

    /// Add a file with its secondary index fields.
    pub fn file<S, I, F>(mut self, name: S, secondary: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.files.insert(
            name.into(),
            secondary.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// All file names, in sorted order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Whether `file` is declared.
    pub fn contains_file(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }

    /// The secondary index fields of `file`, in sorted order.
    pub fn secondary_fields(&self, file: &str) -> impl Iterator<Item = &str> {
        self.files
            .get(file)
            .into_iter()
            .flat_map(|fields| fields.iter().map(String::as_str))
    }

    /// Whether `field` is a secondary index of `file`.
    pub fn is_secondary(&self, file: &str, field: &str) -> bool {
        self.files
            .get(file)
            .is_some_and(|fields| fields.contains(field))
    }
}

/// One record on its way into a file.
///
/// `record_number` is `None` until `put_instance` assigns it; carrying an
/// assigned number into `put_instance` is the record-reuse error.
#[derive(Debug, Clone, Default)]
pub struct Instance {
    /// Assigned record number, if any.
    record_number: Option<u64>,
    /// Serialized record value, opaque to the index layer.
    payload: Vec<u8>,
    /// Index key values per field name.
    index_values: BTreeMap<String, Vec<String>>,
}

impl Instance {
    /// Create an instance from pre-serialized payload bytes.
    pub fn new(payload: Vec<u8>) -> Self {
        Instance {
            record_number: None,
            payload,
            index_values: BTreeMap::new(),
        }
    }

    /// Create an instance whose payload is the JSON serialization of
    /// `value`.
    pub fn with_value<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Instance::new(serde_json::to_vec(value)?))
    }

    /// Add index key values for a field. Repeated calls extend the field's
    /// value list.
    pub fn index_value<S, I, V>(mut self, field: S, values: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.index_values
            .entry(field.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// The assigned record number, if any.
    pub fn record_number(&self) -> Option<u64> {
        self.record_number
    }

    /// Store the record number the append primitive assigned.
    pub(crate) fn assign_record_number(&mut self, record_number: u64) {
        self.record_number = Some(record_number);
    }

    /// The serialized record value.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The per-field index key values, in field name order.
    pub fn index_values(&self) -> &BTreeMap<String, Vec<String>> {
        &self.index_values
    }
}
