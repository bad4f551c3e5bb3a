//! HTTP transport: JSON-RPC request/response over a single POST endpoint.
//!
//! The endpoint lives at `/sse` for compatibility with existing client
//! configurations; semantics are plain request/response (one JSON-RPC
//! request in the body, one JSON-RPC response back), not server-sent
//! events. `initialize` is intercepted to return a server-info object that
//! advertises the registered tool names and a per-connection session id.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tracing::info;

use crate::mcp::{parse_error_response, JsonRpcRequest, McpServer, DEFAULT_PROTOCOL_VERSION};

/// Build the router for the HTTP transport.
pub fn router(server: McpServer) -> Router {
    Router::new()
        .route("/sse", post(rpc_handler))
        .with_state(Arc::new(server))
}

/// Serve the HTTP transport on the given port until the process exits.
pub async fn serve(server: McpServer, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(server);

    info!(%addr, "MCP HTTP server listening on http://localhost:{port}/sse");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("HTTP server error")?;
    Ok(())
}

async fn rpc_handler(State(server): State<Arc<McpServer>>, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(parse_error_response())).into_response()
        }
    };

    // Intercept initialize: the HTTP flavor advertises the allowed tool
    // names and a session id in addition to the standard fields.
    if raw.get("method").and_then(|m| m.as_str()) == Some("initialize") {
        let id = raw.get("id").cloned().unwrap_or(Value::Null);
        let protocol_version = raw
            .pointer("/params/protocolVersion")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "serverInfo": {
                    "name": server.server_name(),
                    "version": server.version(),
                },
                "capabilities": {
                    "tools": {
                        "allowedTools": server.registry().tool_names(),
                    }
                },
                "sessionId": uuid::Uuid::new_v4().to_string(),
                "protocolVersion": protocol_version,
            }
        });
        return (StatusCode::OK, Json(response)).into_response();
    }

    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(parse_error_response())).into_response()
        }
    };

    match server.dispatch(request).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        // Notifications are accepted with no body.
        None => StatusCode::ACCEPTED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::Prober;
    use crate::registry::ToolRegistry;
    use rampart_types::Catalog;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const CATALOG: &str = r#"
mcp:
  tools:
    - name: hello_world
      params:
        name: { type: string, required: true }
      run:
        command: "echo 'Hello, {{ .name }}!'"
    - name: second_tool
      run:
        command: "true"
"#;

    fn test_server() -> McpServer {
        let catalog = Catalog::from_yaml(CATALOG).unwrap();
        let registry = ToolRegistry::from_catalog(&catalog, None, &Prober::new()).unwrap();
        McpServer::new(Arc::new(registry), "rampart", "0.1.0")
    }

    /// Issue one POST /sse against an ephemeral server and return the
    /// response body as JSON.
    async fn post_rpc(payload: Value) -> (u16, Value) {
        let app = router(test_server());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let body = payload.to_string();
        let request = format!(
            "POST /sse HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8_lossy(&raw);

        let status: u16 = text
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("status line");
        let json_body = text
            .split("\r\n\r\n")
            .nth(1)
            .filter(|b| !b.is_empty())
            .map(|b| serde_json::from_str(b).expect("json body"))
            .unwrap_or(Value::Null);
        (status, json_body)
    }

    #[tokio::test]
    async fn initialize_is_intercepted_with_allowed_tools() {
        let (status, body) = post_rpc(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": { "protocolVersion": "2024-11-05" },
            "id": 1
        }))
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["id"], 1);
        let result = &body["result"];
        assert_eq!(result["serverInfo"]["name"], "rampart");
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert!(!result["sessionId"].as_str().unwrap().is_empty());

        let allowed = result["capabilities"]["tools"]["allowedTools"]
            .as_array()
            .unwrap();
        let names: Vec<&str> = allowed.iter().filter_map(|v| v.as_str()).collect();
        assert_eq!(names, vec!["hello_world", "second_tool"]);
    }

    #[tokio::test]
    async fn initialize_falls_back_to_default_protocol_version() {
        let (_, body) = post_rpc(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "id": 2
        }))
        .await;
        assert_eq!(body["result"]["protocolVersion"], DEFAULT_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn tools_call_over_http() {
        let (status, body) = post_rpc(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": { "name": "hello_world", "arguments": { "name": "HTTP" } },
            "id": 3
        }))
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["result"]["content"][0]["text"], "Hello, HTTP!");
    }

    #[tokio::test]
    async fn invalid_json_body_is_parse_error() {
        let app = router(test_server());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let body = "{not json";
        let request = format!(
            "POST /sse HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8_lossy(&raw);
        assert!(text.starts_with("HTTP/1.1 400"), "got: {text}");
    }

    #[tokio::test]
    async fn notification_returns_accepted() {
        let (status, _body) = post_rpc(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .await;
        assert_eq!(status, 202);
    }
}
