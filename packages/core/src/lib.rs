//! Loghive Core -- the log record model and the pure logic around it.
//!
//! This crate provides the foundation layer shared by the Loghive server and
//! by wire-compatible producers:
//!
//! - **Record** ([`record`]): `LogRecord`, `LogLevel`, `Platform`, sub-records
//! - **Values** ([`value`]): `MetadataValue` tagged union for metadata maps
//! - **Validation** ([`validate`]): field-level syntactic + semantic checks
//! - **Masking** ([`mask`]): response-time redaction of sensitive fields
//! - **Query** ([`query`]): filter, pagination, and service rollup types
//! - **Clock** ([`clock`]): injectable time source for deterministic tests

pub mod clock;
pub mod mask;
pub mod query;
pub mod record;
pub mod validate;
pub mod value;

// Clock
pub use clock::{ClockSource, ManualClock, SystemClock};

// Masking
pub use mask::{mask_record, mask_records, mask_text, MASK_MARKER};

// Query
pub use query::{sort_newest_first, LogQuery, QueryPage, ServiceDescriptor};

// Record
pub use record::{DeviceInfo, LogLevel, LogRecord, Platform, SourceLocation};

// Validation
pub use validate::{BatchValidation, FieldError, RejectedRecord, ValidationLimits, Validator};

// Values
pub use value::{Metadata, MetadataValue};
