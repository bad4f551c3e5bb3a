//! The `rampart validate` command: check a catalog without serving it.
//!
//! Loads the catalog, applies prerequisite filtering, and compiles every
//! surviving tool exactly as registration would. Exit code is non-zero on
//! any configuration or compilation error.

use std::path::Path;

use anyhow::{bail, Context, Result};

use rampart_server::{Prober, ToolRegistry};
use rampart_types::Catalog;

pub fn run(config: &Path) -> Result<()> {
    let catalog = Catalog::from_file(config)
        .with_context(|| format!("failed to load catalog {}", config.display()))?;

    if catalog.mcp.tools.is_empty() {
        bail!("no tools defined in the catalog");
    }
    println!("found {} tool(s) in {}", catalog.mcp.tools.len(), config.display());

    let prober = Prober::new();
    let registry =
        ToolRegistry::from_catalog(&catalog, None, &prober).context("validation failed")?;

    for tool in &catalog.mcp.tools {
        match registry.get(&tool.name) {
            Some(handler) => {
                if handler.constraint_count() > 0 {
                    println!(
                        "validated tool '{}' (with {} constraint(s))",
                        tool.name,
                        handler.constraint_count()
                    );
                } else {
                    println!("validated tool '{}'", tool.name);
                }
            }
            None => {
                println!(
                    "tool '{}' would be skipped: prerequisites not met on this host",
                    tool.name
                );
            }
        }
    }

    println!("catalog is valid");
    Ok(())
}
