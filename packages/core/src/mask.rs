//! Response-time masking of sensitive fields.
//!
//! Masking is applied when records leave the service through a query surface,
//! never at ingest: the stored record is untouched and a deep copy is masked.
//! The rules:
//!
//! - strings of 4 or fewer characters are replaced entirely with `[MASKED]`;
//! - longer strings keep their first two and last two characters around the
//!   marker, e.g. `"Sensitive message content"` becomes `"Se[MASKED]nt"`;
//! - non-string metadata values named in the mask set collapse to the string
//!   `"[MASKED]"`;
//! - a string that already contains the marker is returned unchanged, which
//!   makes masking idempotent.

use std::collections::HashSet;

use crate::record::LogRecord;
use crate::value::MetadataValue;

/// The redaction marker inserted into masked values.
pub const MASK_MARKER: &str = "[MASKED]";

/// Masks a single string value according to the length rules.
#[must_use]
pub fn mask_text(value: &str) -> String {
    if value.contains(MASK_MARKER) {
        return value.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return MASK_MARKER.to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{MASK_MARKER}{tail}")
}

/// Returns a deep copy of `record` with the named fields masked.
///
/// Field names select top-level string fields (`message`, `stack_trace`,
/// `service_name`, `agent_id`) and metadata keys. Unknown names are ignored.
#[must_use]
pub fn mask_record(record: &LogRecord, fields: &HashSet<String>) -> LogRecord {
    let mut masked = record.clone();

    if fields.contains("message") {
        masked.message = mask_text(&masked.message);
    }
    if fields.contains("service_name") {
        masked.service_name = mask_text(&masked.service_name);
    }
    if fields.contains("agent_id") {
        masked.agent_id = mask_text(&masked.agent_id);
    }
    if fields.contains("stack_trace") {
        if let Some(stack) = masked.stack_trace.take() {
            masked.stack_trace = Some(mask_text(&stack));
        }
    }

    for (key, value) in &mut masked.metadata {
        if !fields.contains(key.as_str()) {
            continue;
        }
        *value = match value {
            MetadataValue::String(s) => MetadataValue::String(mask_text(s)),
            _ => MetadataValue::String(MASK_MARKER.to_string()),
        };
    }

    masked
}

/// Masks every record in a result set.
#[must_use]
pub fn mask_records(records: &[LogRecord], fields: &HashSet<String>) -> Vec<LogRecord> {
    records.iter().map(|r| mask_record(r, fields)).collect()
}
