//! The four MCP tools and their dispatcher.
//!
//! Masking happens here, at response time, on deep copies of the stored
//! records. Tool input errors map to `-32602`; unknown methods and tools to
//! `-32601`; storage failures to `-32603`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use loghive_core::{mask_records, ClockSource, LogQuery};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::protocol::{
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
    PROTOCOL_VERSION,
};
use crate::breaker::CircuitBreaker;
use crate::metrics::IngestMetrics;
use crate::storage::LogStore;

/// Server name reported by `initialize`.
const SERVER_NAME: &str = "loghive";

/// Dispatches MCP requests to the tool implementations.
pub struct ToolRouter {
    store: Arc<dyn LogStore>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<IngestMetrics>,
    clock: Arc<dyn ClockSource>,
    version: &'static str,
}

/// Arguments accepted by `query_logs`.
#[derive(Debug, Default, Deserialize)]
struct QueryLogsArgs {
    #[serde(default)]
    service_name: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    level: Option<loghive_core::LogLevel>,
    #[serde(default)]
    platform: Option<loghive_core::Platform>,
    #[serde(default)]
    message_contains: Option<String>,
    #[serde(default)]
    start_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    mask_fields: Vec<String>,
}

/// Arguments accepted by `get_log_details`.
#[derive(Debug, Deserialize)]
struct GetLogDetailsArgs {
    ids: Vec<String>,
    #[serde(default)]
    mask_fields: Vec<String>,
}

/// A tool-level failure mapped to a JSON-RPC error code.
struct ToolError {
    code: i64,
    message: String,
}

impl ToolError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: message.into(),
        }
    }
}

impl ToolRouter {
    #[must_use]
    pub fn new(
        store: Arc<dyn LogStore>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<IngestMetrics>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            store,
            breaker,
            metrics,
            clock,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Handles one request, returning `None` for notifications.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "ignoring notification");
            return None;
        }
        self.metrics.incr_mcp_requests();
        let id = request.id.clone().unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize()),
            "tools/list" => JsonRpcResponse::success(id, Self::tool_catalog()),
            "tools/call" => match self.tools_call(request.params).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => JsonRpcResponse::failure(id, e.code, e.message),
            },
            other => JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        };
        Some(response)
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": SERVER_NAME, "version": self.version },
        })
    }

    /// The tool catalog returned by `tools/list`.
    fn tool_catalog() -> Value {
        let filter_properties = json!({
            "service_name": { "type": "string" },
            "agent_id": { "type": "string" },
            "level": { "type": "string", "enum": ["DEBUG", "INFO", "WARN", "ERROR", "FATAL"] },
            "platform": {
                "type": "string",
                "enum": ["go", "swift", "express", "react", "react-native", "kotlin"],
            },
            "message_contains": { "type": "string" },
            "start_time": { "type": "string", "format": "date-time" },
            "end_time": { "type": "string", "format": "date-time" },
            "limit": { "type": "integer", "minimum": 1, "maximum": 1000 },
            "offset": { "type": "integer", "minimum": 0 },
            "mask_fields": { "type": "array", "items": { "type": "string" } },
        });

        json!({
            "tools": [
                {
                    "name": "query_logs",
                    "description": "Query log records with filters, pagination, and optional field masking",
                    "inputSchema": {
                        "type": "object",
                        "properties": filter_properties,
                    },
                },
                {
                    "name": "get_log_details",
                    "description": "Fetch full log records by id (1 to 100 ids)",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "ids": {
                                "type": "array",
                                "items": { "type": "string" },
                                "minItems": 1,
                                "maxItems": 100,
                            },
                            "mask_fields": { "type": "array", "items": { "type": "string" } },
                        },
                        "required": ["ids"],
                    },
                },
                {
                    "name": "get_service_status",
                    "description": "Overall service health, component states, and metrics",
                    "inputSchema": { "type": "object", "properties": {} },
                },
                {
                    "name": "list_services",
                    "description": "Known services with per-platform rollups",
                    "inputSchema": { "type": "object", "properties": {} },
                },
            ],
        })
    }

    async fn tools_call(&self, params: Value) -> Result<Value, ToolError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid("missing tool name"))?
            .to_string();
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        debug!(tool = %name, "tool call");
        match name.as_str() {
            "query_logs" => self.query_logs(arguments).await,
            "get_log_details" => self.get_log_details(arguments).await,
            "get_service_status" => self.get_service_status().await,
            "list_services" => self.list_services().await,
            other => Err(ToolError {
                code: METHOD_NOT_FOUND,
                message: format!("tool not found: {other}"),
            }),
        }
    }

    async fn query_logs(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: QueryLogsArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::invalid(format!("invalid query_logs arguments: {e}")))?;
        if args.limit.is_some_and(|l| l == 0 || l > LogQuery::MAX_LIMIT) {
            return Err(ToolError::invalid(format!(
                "limit must be between 1 and {}",
                LogQuery::MAX_LIMIT
            )));
        }

        let query = LogQuery {
            service_name: args.service_name,
            agent_id: args.agent_id,
            level: args.level,
            platform: args.platform,
            message_contains: args.message_contains,
            start_time: args.start_time,
            end_time: args.end_time,
            limit: args.limit,
            offset: args.offset,
        };
        let page = self
            .store
            .query(&query)
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        let mask: HashSet<String> = args.mask_fields.into_iter().collect();
        let records = if mask.is_empty() {
            page.records
        } else {
            mask_records(&page.records, &mask)
        };

        Ok(json!({
            "logs": records,
            "pagination": {
                "limit": query.effective_limit(),
                "offset": query.effective_offset(),
                "total_count": page.total_count,
                "has_more": page.has_more,
            },
        }))
    }

    async fn get_log_details(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: GetLogDetailsArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::invalid(format!("invalid get_log_details arguments: {e}")))?;
        if args.ids.is_empty() || args.ids.len() > 100 {
            return Err(ToolError::invalid("ids must contain 1 to 100 entries"));
        }

        let records = self
            .store
            .get_by_ids(&args.ids)
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        let mask: HashSet<String> = args.mask_fields.into_iter().collect();
        let records = if mask.is_empty() {
            records
        } else {
            mask_records(&records, &mask)
        };
        Ok(json!(records))
    }

    async fn get_service_status(&self) -> Result<Value, ToolError> {
        let storage = self
            .breaker
            .call(|| async {
                let report = self.store.health().await;
                if report.healthy {
                    Ok(report)
                } else {
                    Err("storage probe failed".to_string())
                }
            })
            .await;

        let (overall, storage_component) = match storage {
            Ok(report) => ("healthy", json!({ "status": "ok", "details": report.details })),
            Err(e) => ("unhealthy", json!({ "status": "error", "error": e.to_string() })),
        };

        Ok(json!({
            "overall_status": overall,
            "timestamp": self.clock.now().to_rfc3339(),
            "components": {
                "storage": storage_component,
                "mcp_server": { "status": "ok", "version": self.version },
            },
            "metrics": self.metrics.snapshot(),
        }))
    }

    async fn list_services(&self) -> Result<Value, ToolError> {
        let services = self
            .store
            .services()
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        let mut service_counts: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut log_counts: BTreeMap<&'static str, u64> = BTreeMap::new();
        for descriptor in &services {
            *service_counts.entry(descriptor.platform.as_str()).or_insert(0) += 1;
            *log_counts.entry(descriptor.platform.as_str()).or_insert(0) +=
                descriptor.log_count;
        }

        Ok(json!({
            "services": services,
            "summary": {
                "total_services": services.len(),
                "platforms": {
                    "service_counts": service_counts,
                    "log_counts": log_counts,
                },
            },
        }))
    }
}
