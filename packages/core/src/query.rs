//! Query and pagination contract shared by the SQL path, the index path,
//! and the MCP tools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{LogLevel, LogRecord, Platform};

/// Filter and pagination parameters for a log query.
///
/// All filter fields are conjunctive. `message_contains` selects the
/// full-text path when a search index is attached; the remaining fields are
/// applied either in SQL or as in-memory refinement of index candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_contains: Option<String>,
    /// Inclusive lower bound on `timestamp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl LogQuery {
    /// Page size applied when the caller does not name one.
    pub const DEFAULT_LIMIT: usize = 100;
    /// Largest page size a caller may request.
    pub const MAX_LIMIT: usize = 1000;

    /// The page size to apply: requested, clamped to `[1, MAX_LIMIT]`.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    /// The page offset to apply.
    #[must_use]
    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// True when a full-text term is present and non-empty.
    #[must_use]
    pub fn wants_full_text(&self) -> bool {
        self.message_contains
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }

    /// Applies every filter except `message_contains` to one record.
    ///
    /// Used for in-memory refinement of full-text candidates and by the
    /// in-memory store. The text term is excluded because the index already
    /// applied it with analyzer semantics a substring check would not match.
    #[must_use]
    pub fn matches_structured(&self, record: &LogRecord) -> bool {
        if let Some(service) = &self.service_name {
            if &record.service_name != service {
                return false;
            }
        }
        if let Some(agent) = &self.agent_id {
            if &record.agent_id != agent {
                return false;
            }
        }
        if let Some(level) = self.level {
            if record.level != level {
                return false;
            }
        }
        if let Some(platform) = self.platform {
            if record.platform != platform {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if record.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if record.timestamp > end {
                return false;
            }
        }
        true
    }
}

/// One page of query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPage {
    pub records: Vec<LogRecord>,
    /// Total matches before pagination.
    pub total_count: u64,
    /// True when records beyond this page matched.
    pub has_more: bool,
}

impl QueryPage {
    /// An empty result page.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            total_count: 0,
            has_more: false,
        }
    }
}

/// Derived rollup for one `(service_name, agent_id, platform)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub service_name: String,
    pub agent_id: String,
    pub platform: Platform,
    pub last_seen: DateTime<Utc>,
    pub log_count: u64,
}

/// Sorts records the way every query surface presents them:
/// timestamp descending, ties broken by id descending.
pub fn sort_newest_first(records: &mut [LogRecord]) {
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.id.cmp(&a.id))
    });
}
