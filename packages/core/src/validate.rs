//! Record validation: syntactic field checks plus semantic sanity windows.
//!
//! Validation runs after server-side id/timestamp fill-in and before a record
//! enters the buffer. Errors are structured (`{field, value, message}`) so
//! the HTTP layer can return them verbatim and batch callers can report which
//! entry failed. Validation is deterministic: the same record against the
//! same clock instant always produces the same error list.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::clock::ClockSource;
use crate::record::LogRecord;

/// `service_name` and `agent_id` must be plain identifiers.
static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("identifier regex is valid"));

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Dotted path of the offending field, e.g. `service_name`.
    pub field: String,
    /// The offending value, truncated for transport.
    pub value: String,
    /// Human-readable description of the constraint that failed.
    pub message: String,
}

impl FieldError {
    fn new(field: &str, value: impl Into<String>, message: impl Into<String>) -> Self {
        let mut value = value.into();
        // Keep error payloads bounded even when the offending value is huge.
        if value.chars().count() > 128 {
            value = value.chars().take(128).collect();
            value.push_str("...");
        }
        Self {
            field: field.to_string(),
            value,
            message: message.into(),
        }
    }
}

/// A batch entry that failed validation, with its original position.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRecord {
    /// Zero-based index of the entry in the submitted batch.
    pub index: usize,
    pub record: LogRecord,
    pub errors: Vec<FieldError>,
}

/// Result of validating a batch: the accepted/rejected split.
#[derive(Debug, Clone, Serialize)]
pub struct BatchValidation {
    pub valid: Vec<LogRecord>,
    pub invalid: Vec<RejectedRecord>,
}

impl BatchValidation {
    /// Number of accepted entries.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.valid.len()
    }

    /// Number of rejected entries.
    #[must_use]
    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }
}

/// Tunable validation bounds.
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    /// Maximum `message` length in characters after trimming.
    pub max_message_chars: usize,
    /// Maximum number of metadata keys per record.
    pub max_metadata_keys: usize,
    /// Maximum `stack_trace` length in characters.
    pub max_stack_trace_chars: usize,
    /// How far in the future a timestamp may lie.
    pub max_future_skew: Duration,
    /// How far in the past a timestamp may lie.
    pub max_age: Duration,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_message_chars: 10_000,
            max_metadata_keys: 50,
            max_stack_trace_chars: 50_000,
            max_future_skew: Duration::minutes(5),
            max_age: Duration::days(365),
        }
    }
}

/// Validates records against the syntactic and semantic rules.
pub struct Validator {
    limits: ValidationLimits,
    clock: Arc<dyn ClockSource>,
}

impl Validator {
    #[must_use]
    pub fn new(limits: ValidationLimits, clock: Arc<dyn ClockSource>) -> Self {
        Self { limits, clock }
    }

    /// Checks a single record, returning every constraint it violates.
    ///
    /// An empty vector means the record is acceptable.
    #[must_use]
    pub fn validate(&self, record: &LogRecord) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if record.id.is_empty() {
            errors.push(FieldError::new("id", "", "id must be present"));
        } else if Uuid::parse_str(&record.id).is_err() {
            errors.push(FieldError::new("id", &record.id, "id must be a UUID"));
        }

        let trimmed = record.message.trim();
        if trimmed.is_empty() {
            errors.push(FieldError::new(
                "message",
                &record.message,
                "message must not be empty",
            ));
        } else if trimmed.chars().count() > self.limits.max_message_chars {
            errors.push(FieldError::new(
                "message",
                &record.message,
                format!("message exceeds {} characters", self.limits.max_message_chars),
            ));
        }

        if !IDENTIFIER_RE.is_match(&record.service_name) {
            errors.push(FieldError::new(
                "service_name",
                &record.service_name,
                "service_name must match ^[A-Za-z0-9_-]+$",
            ));
        }
        if !IDENTIFIER_RE.is_match(&record.agent_id) {
            errors.push(FieldError::new(
                "agent_id",
                &record.agent_id,
                "agent_id must match ^[A-Za-z0-9_-]+$",
            ));
        }

        if record.metadata.len() > self.limits.max_metadata_keys {
            errors.push(FieldError::new(
                "metadata",
                format!("{} keys", record.metadata.len()),
                format!("metadata is limited to {} keys", self.limits.max_metadata_keys),
            ));
        }

        if let Some(stack) = &record.stack_trace {
            if stack.chars().count() > self.limits.max_stack_trace_chars {
                errors.push(FieldError::new(
                    "stack_trace",
                    stack,
                    format!(
                        "stack_trace exceeds {} characters",
                        self.limits.max_stack_trace_chars
                    ),
                ));
            }
        }

        let now = self.clock.now();
        if record.timestamp > now + self.limits.max_future_skew {
            errors.push(FieldError::new(
                "timestamp",
                record.timestamp.to_rfc3339(),
                "timestamp is too far in the future",
            ));
        } else if record.timestamp < now - self.limits.max_age {
            errors.push(FieldError::new(
                "timestamp",
                record.timestamp.to_rfc3339(),
                "timestamp is too far in the past",
            ));
        }

        errors
    }

    /// Splits a batch into accepted and rejected entries.
    ///
    /// Entry order is preserved within each half; rejected entries carry
    /// their original batch index.
    #[must_use]
    pub fn validate_batch(&self, records: Vec<LogRecord>) -> BatchValidation {
        let mut valid = Vec::with_capacity(records.len());
        let mut invalid = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            let errors = self.validate(&record);
            if errors.is_empty() {
                valid.push(record);
            } else {
                invalid.push(RejectedRecord {
                    index,
                    record,
                    errors,
                });
            }
        }

        BatchValidation { valid, invalid }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::record::{LogLevel, Platform};
    use crate::value::Metadata;

    fn fixed_clock() -> Arc<ManualClock> {
        // 2024-05-01T00:00:00Z
        Arc::new(ManualClock::new(1_714_521_600_000))
    }

    fn validator() -> Validator {
        Validator::new(ValidationLimits::default(), fixed_clock())
    }

    fn valid_record() -> LogRecord {
        let clock = fixed_clock();
        LogRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: clock.now(),
            level: LogLevel::Info,
            message: "all good".to_string(),
            service_name: "svc".to_string(),
            agent_id: "a1".to_string(),
            platform: Platform::Go,
            metadata: Metadata::new(),
            device_info: None,
            stack_trace: None,
            source_location: None,
        }
    }

    #[test]
    fn accepts_valid_record() {
        assert!(validator().validate(&valid_record()).is_empty());
    }

    #[test]
    fn rejects_missing_id() {
        let mut record = valid_record();
        record.id = String::new();
        let errors = validator().validate(&record);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "id");
    }

    #[test]
    fn rejects_non_uuid_id() {
        let mut record = valid_record();
        record.id = "not-a-uuid".to_string();
        let errors = validator().validate(&record);
        assert_eq!(errors[0].field, "id");
        assert!(errors[0].message.contains("UUID"));
    }

    #[test]
    fn rejects_whitespace_only_message() {
        let mut record = valid_record();
        record.message = "   \t".to_string();
        let errors = validator().validate(&record);
        assert_eq!(errors[0].field, "message");
    }

    #[test]
    fn rejects_oversized_message() {
        let mut record = valid_record();
        record.message = "x".repeat(10_001);
        let errors = validator().validate(&record);
        assert_eq!(errors[0].field, "message");
    }

    #[test]
    fn rejects_bad_service_name() {
        let mut record = valid_record();
        record.service_name = "bad name!".to_string();
        let errors = validator().validate(&record);
        assert_eq!(errors[0].field, "service_name");
    }

    #[test]
    fn rejects_bad_agent_id() {
        let mut record = valid_record();
        record.agent_id = "agent/1".to_string();
        let errors = validator().validate(&record);
        assert_eq!(errors[0].field, "agent_id");
    }

    #[test]
    fn rejects_too_many_metadata_keys() {
        let mut record = valid_record();
        for i in 0..51 {
            record.metadata.insert(format!("k{i}"), crate::value::MetadataValue::Int(i));
        }
        let errors = validator().validate(&record);
        assert_eq!(errors[0].field, "metadata");
    }

    #[test]
    fn accepts_exactly_fifty_metadata_keys() {
        let mut record = valid_record();
        for i in 0..50 {
            record.metadata.insert(format!("k{i}"), crate::value::MetadataValue::Int(i));
        }
        assert!(validator().validate(&record).is_empty());
    }

    #[test]
    fn rejects_oversized_stack_trace() {
        let mut record = valid_record();
        record.stack_trace = Some("y".repeat(50_001));
        let errors = validator().validate(&record);
        assert_eq!(errors[0].field, "stack_trace");
    }

    #[test]
    fn rejects_future_timestamp() {
        let mut record = valid_record();
        record.timestamp += Duration::minutes(6);
        let errors = validator().validate(&record);
        assert_eq!(errors[0].field, "timestamp");
        assert!(errors[0].message.contains("future"));
    }

    #[test]
    fn accepts_slight_future_skew() {
        let mut record = valid_record();
        record.timestamp += Duration::minutes(4);
        assert!(validator().validate(&record).is_empty());
    }

    #[test]
    fn rejects_ancient_timestamp() {
        let mut record = valid_record();
        record.timestamp -= Duration::days(366);
        let errors = validator().validate(&record);
        assert_eq!(errors[0].field, "timestamp");
        assert!(errors[0].message.contains("past"));
    }

    #[test]
    fn collects_multiple_errors() {
        let mut record = valid_record();
        record.id = String::new();
        record.message = String::new();
        record.service_name = "no spaces allowed".to_string();
        let errors = validator().validate(&record);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn error_value_is_truncated() {
        let mut record = valid_record();
        record.message = "m".repeat(20_000);
        let errors = validator().validate(&record);
        assert!(errors[0].value.len() < 200);
        assert!(errors[0].value.ends_with("..."));
    }

    #[test]
    fn batch_split_preserves_order_and_indices() {
        let good_a = valid_record();
        let mut bad = valid_record();
        bad.service_name = "bad name!".to_string();
        let good_b = valid_record();

        let split = validator().validate_batch(vec![good_a.clone(), bad, good_b.clone()]);
        assert_eq!(split.valid_count(), 2);
        assert_eq!(split.invalid_count(), 1);
        assert_eq!(split.valid[0].id, good_a.id);
        assert_eq!(split.valid[1].id, good_b.id);
        assert_eq!(split.invalid[0].index, 1);
        assert_eq!(split.invalid[0].errors[0].field, "service_name");
    }

    #[test]
    fn validation_is_deterministic() {
        let mut record = valid_record();
        record.id = "nope".to_string();
        record.agent_id = "bad agent".to_string();
        let v = validator();
        let first = v.validate(&record);
        let second = v.validate(&record);
        assert_eq!(first, second);
    }

    #[test]
    fn timestamp_window_tracks_injected_clock() {
        let clock = Arc::new(ManualClock::new(1_714_521_600_000));
        let v = Validator::new(ValidationLimits::default(), clock.clone());

        let record = valid_record();
        assert!(v.validate(&record).is_empty());

        // A year later the same record falls outside the age window.
        clock.advance(std::time::Duration::from_secs(366 * 24 * 3600));
        let errors = v.validate(&record);
        assert_eq!(errors[0].field, "timestamp");
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Same input, same clock: identical accept/reject and error list.
            #[test]
            fn deterministic_for_arbitrary_identifiers(name in ".{0,40}") {
                let v = validator();
                let mut record = valid_record();
                record.service_name = name;
                let first = v.validate(&record);
                let second = v.validate(&record);
                prop_assert_eq!(first, second);
            }

            /// Identifier acceptance exactly matches the documented pattern.
            #[test]
            fn identifier_pattern_is_the_contract(name in "[A-Za-z0-9_-]{1,32}") {
                let v = validator();
                let mut record = valid_record();
                record.service_name = name;
                prop_assert!(v.validate(&record).is_empty());
            }
        }
    }
}
