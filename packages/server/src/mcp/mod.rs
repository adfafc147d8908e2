//! MCP-compatible JSON-RPC 2.0 tool surface over TCP.

pub mod protocol;
pub mod server;
pub mod tools;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
pub use server::{McpConfig, McpModule};
pub use tools::ToolRouter;
