//! MCP (Model Context Protocol) stdio server.
//!
//! Exposes registered tools to AI clients via JSON-RPC 2.0 over
//! stdin/stdout. Each line on stdin is a JSON-RPC request; each response is
//! written as a single line on stdout. Standard error is reserved for
//! logging.
//!
//! Routed methods:
//! - `initialize` -- server info and capabilities
//! - `notifications/*` -- acknowledged silently (no response)
//! - `tools/list` -- enumerates registered tools with their input schemas
//! - `tools/call` -- one end-to-end tool invocation
//! - `prompts/list` / `prompts/get` -- catalog prompts
//!
//! Every `tools/call` runs inside a spawned task; a panicking handler is
//! converted into an internal JSON-RPC error without taking the server down.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use rampart_types::RampartError;

use crate::registry::ToolRegistry;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be `"2.0"`.
    pub jsonrpc: String,
    /// The method name.
    pub method: String,
    /// Optional parameters.
    #[serde(default)]
    pub params: Option<Value>,
    /// Request ID. Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Mirrors the request ID.
    pub id: Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard JSON-RPC or application-specific).
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Standard JSON-RPC error codes.
pub(crate) const PARSE_ERROR: i64 = -32700;
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;
pub(crate) const INVALID_PARAMS: i64 = -32602;
pub(crate) const INTERNAL_ERROR: i64 = -32603;

// Application-specific error codes.
pub(crate) const TOOL_NOT_FOUND: i64 = -32000;

/// Fallback protocol version echoed when the client omits one.
pub(crate) const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

fn success(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        result: Some(result),
        error: None,
        id,
    }
}

fn failure(id: Value, code: i64, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        result: None,
        error: Some(JsonRpcError {
            code,
            message,
            data: None,
        }),
        id,
    }
}

pub(crate) fn parse_error_response() -> JsonRpcResponse {
    failure(Value::Null, PARSE_ERROR, "Parse error".to_string())
}

// ---------------------------------------------------------------------------
// McpServer
// ---------------------------------------------------------------------------

/// MCP server over a tool registry. One instance serves either the stdio
/// loop or the HTTP transport; the dispatch logic is shared.
#[derive(Clone)]
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    server_name: String,
    version: String,
}

impl McpServer {
    pub fn new(registry: Arc<ToolRegistry>, server_name: &str, version: &str) -> Self {
        Self {
            registry,
            server_name: server_name.to_string(),
            version: version.to_string(),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run the stdio loop. Exits cleanly when stdin reaches EOF.
    pub async fn run(
        &self,
        stdin: impl AsyncBufRead + Unpin,
        mut stdout: impl AsyncWrite + Unpin,
    ) -> Result<()> {
        let mut lines = stdin.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(line) {
                Ok(request) => request,
                Err(_) => {
                    write_response(&mut stdout, &parse_error_response()).await?;
                    continue;
                }
            };

            if let Some(response) = self.dispatch(request).await {
                write_response(&mut stdout, &response).await?;
            }
        }

        Ok(())
    }

    /// Route one request. Returns `None` for notifications.
    pub async fn dispatch(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        // Notifications have no id and get no response.
        let id = match request.id {
            Some(id) => id,
            None => return None,
        };

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "prompts/list" => self.handle_prompts_list(id),
            "prompts/get" => self.handle_prompts_get(id, request.params),
            "ping" => success(id, serde_json::json!({})),
            other => failure(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
        };
        Some(response)
    }

    fn handle_initialize(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let protocol_version = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        let mut result = serde_json::json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": {},
                "prompts": {}
            },
            "serverInfo": {
                "name": self.server_name,
                "version": self.version
            }
        });
        if !self.registry.description().is_empty() {
            result["instructions"] = Value::String(self.registry.description().to_string());
        }
        success(id, result)
    }

    fn handle_tools_list(&self, id: Value) -> JsonRpcResponse {
        let tools: Vec<Value> = self
            .registry
            .list()
            .into_iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect();
        success(id, serde_json::json!({ "tools": tools }))
    }

    /// Handle `tools/call`. The handler runs in its own task so a panic
    /// inside a tool surfaces as an internal error instead of killing the
    /// server.
    async fn handle_tools_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params = match params {
            Some(params) => params,
            None => {
                return failure(id, INVALID_PARAMS, "Missing params for tools/call".to_string())
            }
        };

        let tool_name = match params.get("name").and_then(|v| v.as_str()) {
            Some(name) => name.to_string(),
            None => {
                return failure(
                    id,
                    INVALID_PARAMS,
                    "Missing 'name' in tools/call params".to_string(),
                )
            }
        };

        let arguments = params
            .get("arguments")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let handler = match self.registry.get(&tool_name) {
            Some(handler) => handler,
            None => {
                return failure(id, TOOL_NOT_FOUND, format!("tool not found: {tool_name}"))
            }
        };

        let task = tokio::spawn(async move { handler.invoke_json(&arguments).await });

        match task.await {
            Ok(Ok(output)) => success(
                id,
                serde_json::json!({
                    "content": [{ "type": "text", "text": output }]
                }),
            ),
            Ok(Err(err)) => tool_failure(id, &tool_name, err),
            Err(join_err) if join_err.is_cancelled() => {
                tool_failure(id, &tool_name, RampartError::Cancelled)
            }
            Err(join_err) => {
                tracing::error!(tool = %tool_name, error = %join_err, "tool task panicked");
                failure(
                    id,
                    INTERNAL_ERROR,
                    "tool execution failed: internal server error".to_string(),
                )
            }
        }
    }

    fn handle_prompts_list(&self, id: Value) -> JsonRpcResponse {
        let prompts: Vec<Value> = self
            .registry
            .prompts()
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "description": p.description,
                })
            })
            .collect();
        success(id, serde_json::json!({ "prompts": prompts }))
    }

    fn handle_prompts_get(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let name = params
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(|v| v.as_str());
        let Some(name) = name else {
            return failure(id, INVALID_PARAMS, "Missing 'name' in prompts/get params".to_string());
        };

        match self.registry.prompt(name) {
            Some(prompt) => success(
                id,
                serde_json::json!({
                    "description": prompt.description,
                    "messages": [{
                        "role": "user",
                        "content": { "type": "text", "text": prompt.prompt }
                    }]
                }),
            ),
            None => failure(id, INVALID_PARAMS, format!("unknown prompt: {name}")),
        }
    }
}

/// Convert a tool-level failure into the protocol shape.
///
/// User-actionable failures (policy violations, bad parameters, command
/// failures, timeouts) come back as an error text content element so the
/// model can read and repair them. Internal faults become JSON-RPC errors
/// with a generic message; details go to the log only.
fn tool_failure(id: Value, tool_name: &str, err: RampartError) -> JsonRpcResponse {
    match &err {
        RampartError::Internal(detail) => {
            tracing::error!(tool = %tool_name, error = %detail, "internal tool failure");
            failure(
                id,
                INTERNAL_ERROR,
                "tool execution failed: internal server error".to_string(),
            )
        }
        RampartError::RunnerExecution { message, output } => {
            let text = if output.is_empty() {
                message.clone()
            } else {
                format!("{message}:\n{output}")
            };
            error_content(id, text)
        }
        _ => error_content(id, err.to_string()),
    }
}

/// A `tools/call` result carrying a single error text element.
fn error_content(id: Value, text: String) -> JsonRpcResponse {
    success(
        id,
        serde_json::json!({
            "content": [{ "type": "text", "text": text }],
            "isError": true
        }),
    )
}

/// Write a JSON-RPC response as a single line.
async fn write_response(
    writer: &mut (impl AsyncWrite + Unpin),
    response: &JsonRpcResponse,
) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::Prober;
    use rampart_types::Catalog;

    fn server_from(yaml: &str) -> McpServer {
        let catalog = Catalog::from_yaml(yaml).unwrap();
        let registry = ToolRegistry::from_catalog(&catalog, None, &Prober::new()).unwrap();
        McpServer::new(Arc::new(registry), "rampart", "0.1.0")
    }

    /// Run the server over in-memory pipes and collect the response lines.
    async fn run_server(server: McpServer, input_lines: &[&str]) -> Vec<String> {
        let mut input = String::new();
        for line in input_lines {
            input.push_str(line);
            input.push('\n');
        }

        let stdin = tokio::io::BufReader::new(std::io::Cursor::new(input.into_bytes()));
        let mut stdout_buf: Vec<u8> = Vec::new();

        server.run(stdin, &mut stdout_buf).await.unwrap();

        String::from_utf8(stdout_buf)
            .unwrap()
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect()
    }

    fn parse_response(line: &str) -> JsonRpcResponse {
        serde_json::from_str(line).expect("failed to parse response JSON")
    }

    const ECHO_CATALOG: &str = r#"
mcp:
  description: "test tools"
  tools:
    - name: hello_world
      description: "Say hello"
      params:
        name: { type: string, required: true }
      constraints:
        - "name.size() <= 100 && !name.contains('/')"
      run:
        command: "echo 'Hello, {{ .name }}!'"
"#;

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let server = server_from(ECHO_CATALOG);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": { "protocolVersion": "2024-11-05" },
            "id": 1
        });

        let lines = run_server(server, &[&request.to_string()]).await;
        assert_eq!(lines.len(), 1);

        let resp = parse_response(&lines[0]);
        assert!(resp.error.is_none());
        let result = resp.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "rampart");
        assert_eq!(result["serverInfo"]["version"], "0.1.0");
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["instructions"], "test tools");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_includes_schema() {
        let server = server_from(ECHO_CATALOG);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/list",
            "id": 2
        });

        let lines = run_server(server, &[&request.to_string()]).await;
        let resp = parse_response(&lines[0]);
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "hello_world");
        assert_eq!(tools[0]["inputSchema"]["type"], "object");
        assert_eq!(tools[0]["inputSchema"]["properties"]["name"]["type"], "string");
        assert_eq!(tools[0]["inputSchema"]["required"][0], "name");
    }

    #[tokio::test]
    async fn tools_call_executes_end_to_end() {
        let server = server_from(ECHO_CATALOG);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {
                "name": "hello_world",
                "arguments": { "name": "World" }
            },
            "id": 3
        });

        let lines = run_server(server, &[&request.to_string()]).await;
        let resp = parse_response(&lines[0]);
        assert!(resp.error.is_none(), "got error: {:?}", resp.error);
        let result = resp.result.unwrap();
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "Hello, World!");
        assert!(result.get("isError").is_none());
    }

    #[tokio::test]
    async fn policy_violation_reported_as_error_content() {
        let server = server_from(ECHO_CATALOG);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {
                "name": "hello_world",
                "arguments": { "name": "a/b" }
            },
            "id": 4
        });

        let lines = run_server(server, &[&request.to_string()]).await;
        let resp = parse_response(&lines[0]);
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("blocked by constraints"), "got: {text}");
        assert!(text.contains("constraint 1"), "got: {text}");
    }

    #[tokio::test]
    async fn unknown_tool_is_rpc_error() {
        let server = server_from(ECHO_CATALOG);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": { "name": "ghost", "arguments": {} },
            "id": 5
        });

        let lines = run_server(server, &[&request.to_string()]).await;
        let resp = parse_response(&lines[0]);
        assert!(resp.result.is_none());
        let err = resp.error.unwrap();
        assert_eq!(err.code, TOOL_NOT_FOUND);
        assert!(err.message.contains("ghost"));
    }

    #[tokio::test]
    async fn unknown_method_is_rpc_error() {
        let server = server_from(ECHO_CATALOG);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "resources/list",
            "id": 6
        });

        let lines = run_server(server, &[&request.to_string()]).await;
        let resp = parse_response(&lines[0]);
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let server = server_from(ECHO_CATALOG);
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });

        let lines = run_server(server, &[&notification.to_string()]).await;
        assert!(lines.is_empty(), "got: {lines:?}");
    }

    #[tokio::test]
    async fn invalid_json_yields_parse_error() {
        let server = server_from(ECHO_CATALOG);
        let lines = run_server(server, &["this is not json"]).await;
        let resp = parse_response(&lines[0]);
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
        assert_eq!(resp.id, Value::Null);
    }

    #[tokio::test]
    async fn server_exits_on_eof() {
        let server = server_from(ECHO_CATALOG);
        let stdin = tokio::io::BufReader::new(std::io::Cursor::new(Vec::<u8>::new()));
        let mut stdout_buf: Vec<u8> = Vec::new();
        assert!(server.run(stdin, &mut stdout_buf).await.is_ok());
        assert!(stdout_buf.is_empty());
    }

    #[tokio::test]
    async fn command_failure_carries_captured_output() {
        let server = server_from(
            r#"
mcp:
  tools:
    - name: failing
      run:
        command: "echo some-diagnostic; exit 7"
"#,
        );
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": { "name": "failing", "arguments": {} },
            "id": 7
        });

        let lines = run_server(server, &[&request.to_string()]).await;
        let resp = parse_response(&lines[0]);
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("some-diagnostic"), "got: {text}");
    }

    #[tokio::test]
    async fn prompts_roundtrip() {
        let server = server_from(
            r#"
mcp:
  prompts:
    - name: triage
      description: "Triage helper"
      prompt: "You are a triage assistant."
"#,
        );

        let list = serde_json::json!({"jsonrpc":"2.0","method":"prompts/list","id":8});
        let get = serde_json::json!({
            "jsonrpc":"2.0","method":"prompts/get","params":{"name":"triage"},"id":9
        });

        let lines = run_server(server, &[&list.to_string(), &get.to_string()]).await;
        assert_eq!(lines.len(), 2);

        let list_resp = parse_response(&lines[0]);
        let prompts = list_resp.result.unwrap()["prompts"].as_array().unwrap().clone();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0]["name"], "triage");

        let get_resp = parse_response(&lines[1]);
        let messages = get_resp.result.unwrap()["messages"].clone();
        assert_eq!(messages[0]["content"]["text"], "You are a triage assistant.");
    }

    #[tokio::test]
    async fn requests_answered_in_order_with_matching_ids() {
        let server = server_from(ECHO_CATALOG);
        let first = serde_json::json!({"jsonrpc":"2.0","method":"tools/list","id":10});
        let second = serde_json::json!({"jsonrpc":"2.0","method":"tools/list","id":11});

        let lines = run_server(server, &[&first.to_string(), &second.to_string()]).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(parse_response(&lines[0]).id, serde_json::json!(10));
        assert_eq!(parse_response(&lines[1]).id, serde_json::json!(11));
    }
}
