//! Tool registry: turns a validated catalog into live handlers.
//!
//! For each tool the registry consults the prerequisite prober and the
//! candidate runners; tools whose prerequisites are unmet are logged and
//! skipped. Tools that survive get their constraints compiled and templates
//! parsed — any failure there aborts startup naming the offending tool.

use std::collections::BTreeMap;
use std::sync::Arc;

use rampart_runner::{create_backend, RunnerBackend};
use rampart_types::{Catalog, PromptConfig, RampartError, RunnerKind, ToolConfig};
use serde::{Deserialize, Serialize};

use crate::handler::ToolHandler;
use crate::prober::Prober;

/// Summary information about a registered tool, as advertised over
/// `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Immutable collection of tool handlers built from one catalog.
#[derive(Debug)]
pub struct ToolRegistry {
    description: String,
    handlers: BTreeMap<String, Arc<ToolHandler>>,
    prompts: Vec<PromptConfig>,
}

impl ToolRegistry {
    /// Build the registry: probe prerequisites, select runners, compile each
    /// surviving tool.
    ///
    /// `shell_override` takes precedence over the catalog's `run.shell`.
    pub fn from_catalog(
        catalog: &Catalog,
        shell_override: Option<&str>,
        prober: &Prober,
    ) -> Result<Self, RampartError> {
        let shell = match shell_override {
            Some(s) if !s.is_empty() => s,
            _ => catalog.shell(),
        };

        let mut handlers = BTreeMap::new();
        for tool in &catalog.mcp.tools {
            let runner = match select_runner(tool, prober)? {
                Some(runner) => runner,
                None => {
                    tracing::info!(tool = %tool.name, "skipping tool: prerequisites not met");
                    continue;
                }
            };

            let handler = ToolHandler::new(tool, shell, runner)
                .map_err(|e| with_tool_context(&tool.name, e))?;

            if tool.constraints.is_empty() {
                tracing::info!(tool = %tool.name, "registered tool");
            } else {
                tracing::info!(
                    tool = %tool.name,
                    constraints = tool.constraints.len(),
                    "registered tool with constraints"
                );
            }
            handlers.insert(tool.name.clone(), Arc::new(handler));
        }

        Ok(Self {
            description: catalog.mcp.description.clone(),
            handlers,
            prompts: catalog.mcp.prompts.clone(),
        })
    }

    /// Server instructions from the catalog, if any.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Look up a handler by tool name.
    pub fn get(&self, name: &str) -> Option<Arc<ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// All registered tools, sorted by name for deterministic listings.
    pub fn list(&self) -> Vec<ToolInfo> {
        self.handlers
            .values()
            .map(|h| ToolInfo {
                name: h.name().to_string(),
                description: h.description().to_string(),
                input_schema: h.input_schema(),
            })
            .collect()
    }

    /// Names of every registered tool, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Prompts exposed over `prompts/list`.
    pub fn prompts(&self) -> &[PromptConfig] {
        &self.prompts
    }

    /// Look up a prompt by name.
    pub fn prompt(&self, name: &str) -> Option<&PromptConfig> {
        self.prompts.iter().find(|p| p.name == name)
    }
}

/// Pick the first runner candidate whose declared requirements and implicit
/// probe both pass. An empty candidate list means direct execution.
///
/// Requirement failures skip the candidate; malformed options are
/// configuration errors that abort startup.
fn select_runner(
    tool: &ToolConfig,
    prober: &Prober,
) -> Result<Option<Box<dyn RunnerBackend>>, RampartError> {
    if tool.run.runners.is_empty() {
        let backend = create_backend(RunnerKind::Exec, &BTreeMap::new())?;
        return Ok(match backend.probe() {
            Ok(()) => Some(backend),
            Err(e) => {
                tracing::debug!(tool = %tool.name, error = %e, "default exec runner unavailable");
                None
            }
        });
    }

    for candidate in &tool.run.runners {
        if let Err(e) = prober.check(&candidate.requirements) {
            tracing::debug!(
                tool = %tool.name,
                runner = %candidate.name,
                error = %e,
                "runner candidate requirements not met"
            );
            continue;
        }

        let backend = create_backend(candidate.name, &candidate.options)
            .map_err(|e| with_tool_context(&tool.name, e))?;

        match backend.probe() {
            Ok(()) => return Ok(Some(backend)),
            Err(e) => {
                tracing::debug!(
                    tool = %tool.name,
                    runner = %candidate.name,
                    error = %e,
                    "runner candidate probe failed"
                );
            }
        }
    }

    Ok(None)
}

/// Attach the tool name to startup-fatal errors so the operator knows which
/// catalog entry to fix.
fn with_tool_context(name: &str, err: RampartError) -> RampartError {
    match err {
        RampartError::Compile(msg) => RampartError::Compile(format!("tool '{name}': {msg}")),
        RampartError::Config(msg) => RampartError::Config(format!("tool '{name}': {msg}")),
        other => other,
    }
}
