//! Tagged-union value type for record metadata.
//!
//! Producers attach arbitrary JSON scalars, arrays, and objects to a record's
//! `metadata` map. [`MetadataValue`] preserves those shapes through storage
//! and back out of the query surfaces without collapsing everything into
//! strings. The untagged serde representation keeps the wire format plain
//! JSON: `null`, `true`, `42`, `4.2`, `"text"`, `[...]`, `{...}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A metadata map attached to a log record: string keys, arbitrary values.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One metadata value: any JSON scalar, array, or object.
///
/// Integer-valued JSON numbers deserialize as [`MetadataValue::Int`];
/// everything else numeric becomes [`MetadataValue::Float`]. The variant
/// order matters for untagged deserialization and must not be reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number that fits an `i64`.
    Int(i64),
    /// Any other JSON number.
    Float(f64),
    /// JSON string.
    String(String),
    /// JSON array of nested values.
    Array(Vec<MetadataValue>),
    /// JSON object with string keys.
    Object(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Returns the contained string slice if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// True when this value is a string.
    #[must_use]
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
