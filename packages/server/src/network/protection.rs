//! Data-protection hook applied between validation and buffering.
//!
//! The hook transforms a record's metadata before it is buffered -- the one
//! place in the pipeline where stored data can be scrubbed rather than
//! merely masked at response time. The default implementation is a no-op;
//! deployments that must never persist certain metadata keys configure the
//! scrubbing implementation with those key names.

use std::collections::HashSet;

use loghive_core::{mask_text, LogRecord, MetadataValue, MASK_MARKER};
use thiserror::Error;

/// Data-protection failure; surfaces as a 500 `DATA_PROTECTION_ERROR`.
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("data protection transform failed: {0}")]
    Transform(String),
}

/// Transforms records before they enter the buffer.
pub trait DataProtection: Send + Sync {
    /// Transforms the record in place.
    ///
    /// # Errors
    ///
    /// Returns an error when the transform cannot be applied; the record is
    /// then rejected rather than stored unprotected.
    fn transform(&self, record: &mut LogRecord) -> Result<(), ProtectionError>;
}

/// Pass-through hook used when no protection is configured.
#[derive(Debug, Default)]
pub struct NoopProtection;

impl DataProtection for NoopProtection {
    fn transform(&self, _record: &mut LogRecord) -> Result<(), ProtectionError> {
        Ok(())
    }
}

/// Scrubs configured metadata keys at ingest time.
///
/// String values keep their first and last two characters (the same rule the
/// response-time masker applies); non-string values collapse to the marker.
/// Unlike response-time masking this change is persistent by design.
#[derive(Debug, Default)]
pub struct MetadataScrubber {
    keys: HashSet<String>,
}

impl MetadataScrubber {
    #[must_use]
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

impl DataProtection for MetadataScrubber {
    fn transform(&self, record: &mut LogRecord) -> Result<(), ProtectionError> {
        if self.keys.is_empty() {
            return Ok(());
        }
        for (key, value) in &mut record.metadata {
            if !self.keys.contains(key.as_str()) {
                continue;
            }
            *value = match value {
                MetadataValue::String(s) => MetadataValue::String(mask_text(s)),
                _ => MetadataValue::String(MASK_MARKER.to_string()),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use loghive_core::{LogLevel, Metadata, Platform};

    use super::*;

    fn record_with_metadata() -> LogRecord {
        let mut metadata = Metadata::new();
        metadata.insert("password".to_string(), "hunter2-secret".into());
        metadata.insert("attempts".to_string(), MetadataValue::Int(3));
        metadata.insert("plain".to_string(), "visible".into());
        LogRecord {
            id: "r-1".to_string(),
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: "m".to_string(),
            service_name: "svc".to_string(),
            agent_id: "a1".to_string(),
            platform: Platform::Go,
            metadata,
            device_info: None,
            stack_trace: None,
            source_location: None,
        }
    }

    #[test]
    fn noop_leaves_record_unchanged() {
        let mut record = record_with_metadata();
        let before = record.clone();
        NoopProtection.transform(&mut record).unwrap();
        assert_eq!(record, before);
    }

    #[test]
    fn scrubber_masks_named_keys_only() {
        let mut record = record_with_metadata();
        MetadataScrubber::new(["password".to_string(), "attempts".to_string()])
            .transform(&mut record)
            .unwrap();

        assert_eq!(
            record.metadata["password"],
            MetadataValue::String("hu[MASKED]et".to_string())
        );
        assert_eq!(
            record.metadata["attempts"],
            MetadataValue::String(MASK_MARKER.to_string())
        );
        assert_eq!(record.metadata["plain"], MetadataValue::String("visible".to_string()));
    }

    #[test]
    fn scrubber_with_no_keys_is_noop() {
        let mut record = record_with_metadata();
        let before = record.clone();
        MetadataScrubber::default().transform(&mut record).unwrap();
        assert_eq!(record, before);
    }
}
