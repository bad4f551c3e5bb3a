//! Tool handlers, registry, and MCP transports for the Rampart gateway.
//!
//! The pipeline from catalog to served tool:
//!
//! 1. [`prober::Prober`] checks each tool's declared prerequisites.
//! 2. [`registry::ToolRegistry`] selects a runner per tool and compiles its
//!    constraints and templates into a [`handler::ToolHandler`].
//! 3. [`mcp::McpServer`] exposes the registry over stdio JSON-RPC;
//!    [`http`] exposes the same dispatcher over a single POST endpoint.

pub mod handler;
pub mod http;
pub mod mcp;
pub mod prober;
pub mod registry;

pub use handler::{ToolHandler, DEFAULT_DIRECT_TIMEOUT};
pub use mcp::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpServer};
pub use prober::Prober;
pub use registry::{ToolInfo, ToolRegistry};
