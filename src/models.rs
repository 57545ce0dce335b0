//! Core data models used throughout corpus-prep.
//!
//! A [`Record`] is the unit handed to the index back end. Records are
//! immutable once emitted: every pipeline stage that changes text or
//! metadata builds a new value through [`Record::with_text`] or
//! [`Record::with_metadata`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Ordered string metadata. Insertion order follows the source document.
pub type Metadata = IndexMap<String, String>;

/// Metadata key holding the originating file path.
pub const FILE_PATH_KEY: &str = "file_path";
/// Metadata key holding the JSONPath-like address of a JSON-derived record.
pub const JSON_PATH_KEY: &str = "json_path";
/// Prefix shared by every canonical metadata key.
pub const CANON_PREFIX: &str = "canon_";
/// Metadata key holding the joined canonical summary.
pub const CANON_LINE_KEY: &str = "canon_line";

/// Returns true for keys owned by the pipeline rather than the source data.
pub fn is_reserved_key(key: &str) -> bool {
    key == FILE_PATH_KEY || key == JSON_PATH_KEY || key.starts_with(CANON_PREFIX)
}

/// A normalized text unit with attached metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: Option<String>,
    text: String,
    metadata: Metadata,
}

impl Record {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: None,
            text: text.into(),
            metadata,
        }
    }

    /// Attach a stable identifier. Used while building, before emission.
    pub fn identified(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn file_path(&self) -> Option<&str> {
        self.metadata.get(FILE_PATH_KEY).map(String::as_str)
    }

    pub fn json_path(&self) -> Option<&str> {
        self.metadata.get(JSON_PATH_KEY).map(String::as_str)
    }

    /// A copy of this record carrying `text` instead.
    pub fn with_text(&self, text: impl Into<String>) -> Record {
        Record {
            id: self.id.clone(),
            text: text.into(),
            metadata: self.metadata.clone(),
        }
    }

    /// A copy of this record carrying `text` and `metadata` instead.
    pub fn with_metadata(&self, text: impl Into<String>, metadata: Metadata) -> Record {
        Record {
            id: self.id.clone(),
            text: text.into(),
            metadata,
        }
    }

    /// Non-reserved metadata as a JSON object, in insertion order.
    ///
    /// `file_path`, `json_path` and every `canon_*` key are excluded so that
    /// canonical mapping never feeds on its own output.
    pub fn source_fields(&self) -> serde_json::Map<String, Value> {
        self.metadata
            .iter()
            .filter(|(k, _)| !is_reserved_key(k))
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }
}

/// Stable identifier for the unit at `address` inside `source_path`.
///
/// The same `(path, address)` pair always yields the same id, which is
/// what lets the index back end upsert instead of duplicating.
pub fn record_id(source_path: &Path, address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.to_string_lossy().as_bytes());
    hasher.update([0x1f]);
    hasher.update(address.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Raw text unit produced by a [`DocumentReader`](crate::reader::DocumentReader)
/// before normalization.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub text: String,
    pub metadata: Metadata,
}
