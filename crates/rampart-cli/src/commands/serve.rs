//! The `rampart serve` command: run the MCP server over stdio or HTTP.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use rampart_server::{http, McpServer, Prober, ToolRegistry};
use rampart_types::Catalog;

use super::{SERVER_NAME, VERSION};

pub async fn run(config: &Path, shell: Option<&str>, http_port: Option<u16>) -> Result<()> {
    let catalog = Catalog::from_file(config)
        .with_context(|| format!("failed to load catalog {}", config.display()))?;

    if catalog.mcp.tools.is_empty() {
        bail!("no tools defined in the catalog");
    }
    info!(tools = catalog.mcp.tools.len(), "loaded catalog");

    let prober = Prober::new();
    let registry = ToolRegistry::from_catalog(&catalog, shell, &prober)
        .context("failed to build tool registry")?;

    let skipped = catalog.mcp.tools.len() - registry.len();
    if skipped > 0 {
        info!(skipped, "tool(s) skipped due to unmet prerequisites");
    }
    if registry.is_empty() {
        bail!("no tools registered: every tool was skipped due to unmet prerequisites");
    }
    info!(registered = registry.len(), "tool registry ready");

    let server = McpServer::new(Arc::new(registry), SERVER_NAME, VERSION);

    match http_port {
        Some(port) => {
            info!(port, "starting MCP HTTP server");
            http::serve(server, port).await
        }
        None => {
            info!("starting MCP server on stdio");
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let stdout = tokio::io::stdout();
            server.run(stdin, stdout).await
        }
    }
}
