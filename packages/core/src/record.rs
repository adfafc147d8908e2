//! The log record model: the single entity producers submit and consumers
//! query.
//!
//! Wire format is JSON with RFC 3339 UTC timestamps. `id` and `timestamp`
//! may be omitted by producers; [`LogRecord::fill_defaults`] assigns a v4
//! UUID and the omitted timestamp defaults to the parse instant.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Metadata;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// All levels, ordered from least to most severe.
    pub const ALL: [Self; 5] = [Self::Debug, Self::Info, Self::Warn, Self::Error, Self::Fatal];

    /// The canonical uppercase wire spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "FATAL" => Ok(Self::Fatal),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Producer platform that emitted the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Go,
    Swift,
    Express,
    React,
    ReactNative,
    Kotlin,
}

impl Platform {
    /// The canonical lowercase wire spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Go => "go",
            Self::Swift => "swift",
            Self::Express => "express",
            Self::React => "react",
            Self::ReactNative => "react-native",
            Self::Kotlin => "kotlin",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "go" => Ok(Self::Go),
            "swift" => Ok(Self::Swift),
            "express" => Ok(Self::Express),
            "react" => Ok(Self::React),
            "react-native" => Ok(Self::ReactNative),
            "kotlin" => Ok(Self::Kotlin),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Optional device details reported by mobile and browser producers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

/// Optional code location that produced the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// A single log observation submitted by a producer.
///
/// Stored records always carry a non-empty UUID `id` and a UTC `timestamp`;
/// both are filled in server-side when the producer omits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Universally unique, opaque record id. Empty on the wire means
    /// "generate one for me".
    #[serde(default)]
    pub id: String,
    /// When the producer observed the event. Defaults to the parse instant
    /// when omitted.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub service_name: String,
    pub agent_id: String,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
}

impl LogRecord {
    /// Assigns a fresh v4 UUID when the producer omitted the id.
    ///
    /// Returns the record's id after fill-in. Idempotent: an id already
    /// present is never replaced, so client-side retries keep their identity.
    pub fn fill_defaults(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        &self.id
    }
}
