//! Catalog data model: the YAML document describing the tools Rampart serves.
//!
//! The catalog is loaded once at startup, validated, and never mutated.
//! Everything under the top-level `mcp:` key mirrors the on-disk YAML
//! structure; richer derived objects (compiled constraints, parsed templates,
//! runner backends) are built from these records at registration time.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ParamKind, ParamValue, RampartError};

/// Fallback shell when neither the CLI nor the catalog names one.
#[cfg(unix)]
pub const DEFAULT_SHELL: &str = "sh";
#[cfg(not(unix))]
pub const DEFAULT_SHELL: &str = "cmd";

/// Top-level catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub mcp: McpSection,
}

/// The `mcp:` section: server description, run defaults, tools, and prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSection {
    /// Instructions shown to AI clients on `initialize`.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub run: RunDefaults,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    #[serde(default)]
    pub prompts: Vec<PromptConfig>,
}

/// Catalog-wide execution defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunDefaults {
    /// Default shell for all tools. Empty means platform fallback.
    #[serde(default)]
    pub shell: String,
}

/// A single tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Parameter name -> spec. Constraint evaluation order follows the
    /// `constraints` list, not this map.
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
    /// Boolean constraint expressions; all must hold for a call to proceed.
    #[serde(default)]
    pub constraints: Vec<String>,
    pub run: ToolRun,
    #[serde(default)]
    pub output: OutputSpec,
    /// Per-call wall-clock budget, e.g. `"10s"` or `"1m30s"`.
    #[serde(default)]
    pub timeout: Option<String>,
}

impl ToolConfig {
    /// Parse the declared timeout, if any.
    pub fn timeout_duration(&self) -> Result<Option<Duration>, RampartError> {
        match &self.timeout {
            None => Ok(None),
            Some(raw) => humantime::parse_duration(raw).map(Some).map_err(|e| {
                RampartError::Config(format!("tool '{}' has invalid timeout '{raw}': {e}", self.name))
            }),
        }
    }

    /// Parameter schema used by the constraint compiler: name -> kind.
    pub fn param_schema(&self) -> BTreeMap<String, ParamKind> {
        self.params.iter().map(|(name, spec)| (name.clone(), spec.kind)).collect()
    }
}

/// Execution section of a tool: command template, env whitelist, runners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRun {
    /// Shell command template. Validated parameters substitute into it.
    pub command: String,
    /// Environment whitelist entries: `NAME` inherits the host value if set,
    /// `NAME=<template>` defines the value by template expansion. Nothing
    /// else crosses the host/child boundary.
    #[serde(default)]
    pub env: Vec<String>,
    /// Runner candidates in preference order. The first candidate whose
    /// requirements are met is used; an empty list means direct execution.
    #[serde(default)]
    pub runners: Vec<RunnerCandidate>,
}

/// Spec of one tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default)]
    pub kind: ParamKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// Default value applied when the caller omits the parameter. A
    /// parameter with a default is optional regardless of `required`.
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
}

impl ParamSpec {
    /// The default value coerced to the declared kind, if one is configured.
    pub fn default_value(&self, name: &str) -> Result<Option<ParamValue>, RampartError> {
        match &self.default {
            None => Ok(None),
            Some(raw) => ParamValue::from_yaml(name, self.kind, raw).map(Some),
        }
    }

    /// Whether the caller must supply this parameter: declared required and
    /// no default to fall back on.
    pub fn is_effectively_required(&self) -> bool {
        self.required && self.default.is_none()
    }
}

/// Isolation strategy selected by a runner candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerKind {
    /// Direct shell execution, no OS-level confinement.
    Exec,
    /// Linux jail via firejail: no network by default, path allowlist.
    Firejail,
    /// macOS Seatbelt via `sandbox-exec` with a generated SBPL profile.
    SandboxExec,
    /// Short-lived Docker container.
    Docker,
}

impl std::fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunnerKind::Exec => "exec",
            RunnerKind::Firejail => "firejail",
            RunnerKind::SandboxExec => "sandbox-exec",
            RunnerKind::Docker => "docker",
        };
        f.write_str(name)
    }
}

/// One runner candidate: strategy, declared requirements, and an options bag
/// validated into a typed record when the backend is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerCandidate {
    pub name: RunnerKind,
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

/// Declared host requirements for a tool or runner candidate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    /// Executables that must resolve on PATH.
    #[serde(default)]
    pub executables: Vec<String>,
    /// Acceptable operating systems (`linux`, `macos`/`darwin`, `windows`).
    /// Empty means any.
    #[serde(default)]
    pub os: Vec<String>,
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        self.executables.is_empty() && self.os.is_empty()
    }
}

/// Output post-processing for a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Template rendered with the call's parameters and prepended to the
    /// captured output, separated by a blank line.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Advisory format tag (e.g. `text`, `markdown`). Passed through to
    /// clients unmodified.
    #[serde(default)]
    pub format: Option<String>,
}

/// A reusable prompt exposed over `prompts/list` / `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
}

impl Catalog {
    /// Load and validate a catalog from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, RampartError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RampartError::Config(format!("failed to read catalog {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a catalog from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, RampartError> {
        let catalog: Catalog = serde_yaml::from_str(content)
            .map_err(|e| RampartError::Config(format!("failed to parse catalog: {e}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// The shell tools run under: catalog setting or platform fallback.
    pub fn shell(&self) -> &str {
        if self.mcp.run.shell.is_empty() {
            DEFAULT_SHELL
        } else {
            &self.mcp.run.shell
        }
    }

    /// Structural validation beyond what serde enforces: tool names must be
    /// unique and non-empty, commands non-empty, defaults must match their
    /// declared kind, timeouts must parse.
    fn validate(&self) -> Result<(), RampartError> {
        let mut seen = std::collections::BTreeSet::new();
        for tool in &self.mcp.tools {
            if tool.name.is_empty() {
                return Err(RampartError::Config("tool with empty name".into()));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(RampartError::Config(format!("duplicate tool name: '{}'", tool.name)));
            }
            if tool.run.command.trim().is_empty() {
                return Err(RampartError::Config(format!(
                    "tool '{}' has an empty command template",
                    tool.name
                )));
            }
            tool.timeout_duration()?;
            for (pname, spec) in &tool.params {
                spec.default_value(pname)?;
                if spec.required && spec.default.is_some() {
                    tracing::debug!(
                        tool = %tool.name,
                        param = %pname,
                        "parameter declares both required and default; treating as optional"
                    );
                }
            }
        }
        for prompt in &self.mcp.prompts {
            if prompt.name.is_empty() {
                return Err(RampartError::Config("prompt with empty name".into()));
            }
        }
        Ok(())
    }
}
