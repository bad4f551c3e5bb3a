//! The per-tool handler: one end-to-end invocation pipeline.
//!
//! A [`ToolHandler`] owns everything derived from a tool definition at
//! registration time: the compiled constraint policy, parsed command and
//! output-prefix templates, the environment whitelist, the frozen runner
//! backend, and the timeout. Handlers are immutable after construction and
//! shared behind `Arc`; concurrent calls never synchronize with each other.
//!
//! Call algorithm, strictly in order:
//!
//! 1. Coerce caller arguments to their declared kinds, dropping undeclared
//!    keys (they can never reach templates or runner options).
//! 2. Fill defaults for omitted parameters, then check required ones.
//! 3. Evaluate the compiled policy; any false constraint blocks execution.
//! 4. Render the command template.
//! 5. Compose the child environment from the whitelist.
//! 6. Derive the deadline (declared timeout; direct calls default to 60s).
//! 7. Invoke the runner.
//! 8. Render and prepend the output prefix, if configured.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use rampart_policy::CompiledPolicy;
use rampart_runner::{RunRequest, RunnerBackend};
use rampart_template::Template;
use rampart_types::{ParamSpec, ParamValue, RampartError, RunnerKind, ToolConfig};

/// Default deadline for direct (out-of-band) execution. MCP-driven calls
/// have no implicit ceiling; the transport's cancellation governs them.
pub const DEFAULT_DIRECT_TIMEOUT: Duration = Duration::from_secs(60);

/// One parsed environment whitelist entry.
#[derive(Debug)]
enum EnvEntry {
    /// `NAME`: propagate the host value if the variable is set.
    Inherit(String),
    /// `NAME=<template>`: define the value by template expansion.
    Define { name: String, template: Template },
}

/// Per-tool invocation pipeline. Immutable after construction.
pub struct ToolHandler {
    name: String,
    description: String,
    params: BTreeMap<String, ParamSpec>,
    command: Template,
    output_prefix: Option<Template>,
    env: Vec<EnvEntry>,
    policy: CompiledPolicy,
    runner: Box<dyn RunnerBackend>,
    timeout: Option<Duration>,
    shell: String,
    /// Wrap the rendered command with the host `timeout` utility as a
    /// belt-and-braces measure. Never the sole timeout mechanism.
    wrap_with_timeout_utility: bool,
}

impl std::fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandler")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("params", &self.params)
            .field("command", &self.command)
            .field("output_prefix", &self.output_prefix)
            .field("env", &self.env)
            .field("policy", &self.policy)
            .field("runner", &self.runner.kind())
            .field("timeout", &self.timeout)
            .field("shell", &self.shell)
            .field("wrap_with_timeout_utility", &self.wrap_with_timeout_utility)
            .finish()
    }
}

impl ToolHandler {
    /// Build a handler from a tool definition.
    ///
    /// Compiles constraints and parses every template; all failures here are
    /// registration-time errors that must abort startup.
    pub fn new(
        tool: &ToolConfig,
        shell: &str,
        runner: Box<dyn RunnerBackend>,
    ) -> Result<Self, RampartError> {
        let schema = tool.param_schema();
        let policy = rampart_policy::compile(&tool.constraints, &schema)?;
        let command = Template::parse(&tool.run.command)?;
        let output_prefix = tool
            .output
            .prefix
            .as_deref()
            .map(Template::parse)
            .transpose()?;
        let env = parse_env_entries(&tool.run.env)?;
        let timeout = tool.timeout_duration()?;

        // The wrapper runs on the host, so it only makes sense for backends
        // that execute there; container commands rely on the deadline alone.
        let wrap_with_timeout_utility = cfg!(unix)
            && runner.kind() != RunnerKind::Docker
            && which::which("timeout").is_ok();

        Ok(Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            params: tool.params.clone(),
            command,
            output_prefix,
            env,
            policy,
            runner,
            timeout,
            shell: shell.to_string(),
            wrap_with_timeout_utility,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn constraint_count(&self) -> usize {
        self.policy.len()
    }

    /// Derive the MCP input schema from the parameter specs.
    ///
    /// Kinds map one-to-one onto JSON Schema types; the `required` set holds
    /// parameters that are declared required and carry no default.
    pub fn input_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for (name, spec) in &self.params {
            let mut property = serde_json::Map::new();
            property.insert(
                "type".to_string(),
                serde_json::Value::String(spec.kind.json_schema_type().to_string()),
            );
            if !spec.description.is_empty() {
                property.insert(
                    "description".to_string(),
                    serde_json::Value::String(spec.description.clone()),
                );
            }
            if let Ok(Some(default)) = spec.default_value(name) {
                property.insert("default".to_string(), default.to_json());
            }
            properties.insert(name.clone(), serde_json::Value::Object(property));

            if spec.is_effectively_required() {
                required.push(serde_json::Value::String(name.clone()));
            }
        }

        let mut schema = serde_json::Map::new();
        schema.insert(
            "type".to_string(),
            serde_json::Value::String("object".to_string()),
        );
        schema.insert("properties".to_string(), serde_json::Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), serde_json::Value::Array(required));
        }
        serde_json::Value::Object(schema)
    }

    /// Invoke with JSON arguments from the MCP transport.
    pub async fn invoke_json(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, RampartError> {
        let values = self.coerce_arguments(arguments)?;
        self.invoke(values, self.timeout).await
    }

    /// Invoke with pre-parsed values from the direct-execute entrypoint.
    /// Applies the 60-second default when the tool declares no timeout.
    pub async fn invoke_direct(
        &self,
        values: HashMap<String, ParamValue>,
    ) -> Result<String, RampartError> {
        let timeout = self.timeout.or(Some(DEFAULT_DIRECT_TIMEOUT));
        self.invoke(values, timeout).await
    }

    /// Coerce caller-supplied JSON arguments against the declared parameter
    /// kinds. Undeclared argument names are dropped: they cannot influence
    /// templates, constraints, or runner options.
    fn coerce_arguments(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<HashMap<String, ParamValue>, RampartError> {
        let mut values = HashMap::new();
        for (name, raw) in arguments {
            match self.params.get(name) {
                Some(spec) => {
                    let value = ParamValue::from_json(name, spec.kind, raw)?;
                    values.insert(name.clone(), value);
                }
                None => {
                    tracing::debug!(tool = %self.name, argument = %name, "ignoring undeclared argument");
                }
            }
        }
        Ok(values)
    }

    async fn invoke(
        &self,
        mut values: HashMap<String, ParamValue>,
        timeout: Option<Duration>,
    ) -> Result<String, RampartError> {
        // Defaults apply only to parameters the caller omitted.
        for (name, spec) in &self.params {
            if !values.contains_key(name) {
                if let Some(default) = spec.default_value(name)? {
                    values.insert(name.clone(), default);
                }
            }
        }

        for (name, spec) in &self.params {
            if spec.is_effectively_required() && !values.contains_key(name) {
                return Err(RampartError::Parameter(format!(
                    "required parameter missing: {name}"
                )));
            }
        }

        let outcome = self.policy.evaluate_params(&values)?;
        if !outcome.satisfied {
            tracing::info!(tool = %self.name, failed = outcome.failed.len(), "constraints not satisfied, blocking execution");
            return Err(RampartError::PolicyViolation(outcome.failed));
        }

        let mut command = self.command.render(&values)?;
        if let Some(limit) = timeout {
            if self.wrap_with_timeout_utility {
                command = wrap_with_timeout_utility(&command, limit);
            }
        }

        let env = self.compose_env(&values)?;

        tracing::debug!(tool = %self.name, "executing command");
        let output = self
            .runner
            .run(RunRequest {
                shell: &self.shell,
                command: &command,
                env: &env,
                timeout,
                materialize: true,
            })
            .await?;

        match &self.output_prefix {
            Some(template) => {
                let prefix = template.render(&values)?;
                Ok(format!("{}\n\n{output}", prefix.trim()))
            }
            None => Ok(output),
        }
    }

    /// Compose the child environment from the whitelist. Bare names inherit
    /// the host value when set; `NAME=<template>` entries render with the
    /// call's parameters. Nothing else reaches the child.
    fn compose_env(
        &self,
        values: &HashMap<String, ParamValue>,
    ) -> Result<Vec<(String, String)>, RampartError> {
        let mut pairs = Vec::new();
        for entry in &self.env {
            match entry {
                EnvEntry::Inherit(name) => {
                    if let Ok(value) = std::env::var(name) {
                        pairs.push((name.clone(), value));
                    }
                }
                EnvEntry::Define { name, template } => {
                    pairs.push((name.clone(), template.render(values)?));
                }
            }
        }
        Ok(pairs)
    }
}

/// Parse whitelist entries: `NAME` inherits, `NAME=<template>` defines.
fn parse_env_entries(entries: &[String]) -> Result<Vec<EnvEntry>, RampartError> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((name, template)) => {
                validate_env_name(name)?;
                Ok(EnvEntry::Define {
                    name: name.to_string(),
                    template: Template::parse(template)?,
                })
            }
            None => {
                validate_env_name(entry)?;
                Ok(EnvEntry::Inherit(entry.clone()))
            }
        })
        .collect()
}

fn validate_env_name(name: &str) -> Result<(), RampartError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RampartError::Config(format!(
            "invalid environment variable name: {name:?}"
        )))
    }
}

/// Wrap a command with the POSIX `timeout` utility. This is an optimization
/// layered on top of deadline enforcement, never a replacement for it.
fn wrap_with_timeout_utility(command: &str, limit: Duration) -> String {
    let seconds = limit.as_secs().max(1);
    let escaped = command.replace('\'', "'\"'\"'");
    format!("timeout --kill-after=5s {seconds}s sh -c '{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_types::Catalog;
    use std::sync::Mutex;

    /// Records every run request and returns a canned response, so handler
    /// behavior can be asserted without spawning processes.
    #[derive(Debug)]
    struct RecordingRunner {
        calls: Mutex<Vec<RecordedCall>>,
        response: Result<String, String>,
    }

    #[derive(Debug, Clone)]
    struct RecordedCall {
        shell: String,
        command: String,
        env: Vec<(String, String)>,
        timeout: Option<Duration>,
        materialize: bool,
    }

    impl RecordingRunner {
        fn ok(response: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                response: Ok(response.to_string()),
            }
        }

        fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RunnerBackend for RecordingRunner {
        fn kind(&self) -> RunnerKind {
            RunnerKind::Exec
        }

        fn probe(&self) -> Result<(), RampartError> {
            Ok(())
        }

        async fn run(&self, req: RunRequest<'_>) -> Result<String, RampartError> {
            self.calls.lock().unwrap().push(RecordedCall {
                shell: req.shell.to_string(),
                command: req.command.to_string(),
                env: req.env.to_vec(),
                timeout: req.timeout,
                materialize: req.materialize,
            });
            self.response.clone().map_err(|m| RampartError::RunnerExecution {
                message: m,
                output: String::new(),
            })
        }
    }

    fn tool_from_yaml(yaml: &str) -> ToolConfig {
        let catalog = Catalog::from_yaml(yaml).unwrap();
        catalog.mcp.tools[0].clone()
    }

    fn args(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    const HELLO_TOOL: &str = r#"
mcp:
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

    /// Build a handler over a recording runner, returning both. The runner
    /// reference stays valid because the handler only boxes a clone-free
    /// pointer; we keep a second one through Arc.
    fn handler_with_recorder(yaml: &str, response: &str) -> (ToolHandler, std::sync::Arc<RecordingRunner>) {
        let tool = tool_from_yaml(yaml);
        let runner = std::sync::Arc::new(RecordingRunner::ok(response));
        let boxed: Box<dyn RunnerBackend> = Box::new(SharedRunner(runner.clone()));
        let handler = ToolHandler::new(&tool, "sh", boxed).unwrap();
        (handler, runner)
    }

    /// Adapter so a shared RecordingRunner can be boxed as the handler's
    /// backend while the test keeps its own handle.
    #[derive(Debug)]
    struct SharedRunner(std::sync::Arc<RecordingRunner>);

    #[async_trait::async_trait]
    impl RunnerBackend for SharedRunner {
        fn kind(&self) -> RunnerKind {
            self.0.kind()
        }
        fn probe(&self) -> Result<(), RampartError> {
            self.0.probe()
        }
        async fn run(&self, req: RunRequest<'_>) -> Result<String, RampartError> {
            self.0.run(req).await
        }
    }

    #[tokio::test]
    async fn renders_and_runs_command() {
        let (handler, runner) = handler_with_recorder(HELLO_TOOL, "Hello, World!");
        let out = handler
            .invoke_json(&args(&[("name", serde_json::json!("World"))]))
            .await
            .unwrap();
        assert_eq!(out, "Hello, World!");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].command.contains("echo 'Hello, World!'"), "got: {}", calls[0].command);
        assert!(calls[0].materialize);
        assert_eq!(calls[0].shell, "sh");
    }

    #[tokio::test]
    async fn policy_violation_blocks_runner() {
        let (handler, runner) = handler_with_recorder(HELLO_TOOL, "never");
        let long_name = "A".repeat(150);
        let err = handler
            .invoke_json(&args(&[("name", serde_json::json!(long_name))]))
            .await
            .unwrap_err();

        match err {
            RampartError::PolicyViolation(failed) => {
                assert_eq!(failed.len(), 1);
                assert!(failed[0].contains("name.size() <= 100"));
            }
            other => panic!("expected PolicyViolation, got {other:?}"),
        }
        assert!(runner.calls().is_empty(), "runner must not be invoked");
    }

    #[tokio::test]
    async fn missing_required_parameter_is_user_error() {
        let (handler, runner) = handler_with_recorder(HELLO_TOOL, "never");
        let err = handler.invoke_json(&args(&[])).await.unwrap_err();
        match err {
            RampartError::Parameter(msg) => assert!(msg.contains("name"), "got: {msg}"),
            other => panic!("expected Parameter, got {other:?}"),
        }
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn defaults_fill_omitted_parameters_only() {
        let yaml = r#"
mcp:
  tools:
    - name: greet
      params:
        name: { type: string, default: "there" }
      run:
        command: "echo 'Hi {{ .name }}'"
"#;
        let (handler, runner) = handler_with_recorder(yaml, "ok");

        handler.invoke_json(&args(&[])).await.unwrap();
        assert!(runner.calls()[0].command.contains("Hi there"));

        handler
            .invoke_json(&args(&[("name", serde_json::json!("Ada"))]))
            .await
            .unwrap();
        assert!(runner.calls()[1].command.contains("Hi Ada"));
    }

    #[tokio::test]
    async fn undeclared_arguments_cannot_reach_runner_or_templates() {
        let yaml = r#"
mcp:
  tools:
    - name: fixed
      params:
        msg: { type: string, required: true }
      run:
        command: "echo {{ .msg }}"
        runners:
          - name: exec
"#;
        let (handler, runner) = handler_with_recorder(yaml, "ok");
        // Runner-option-shaped keys in the argument map are dropped.
        handler
            .invoke_json(&args(&[
                ("msg", serde_json::json!("hi")),
                ("image", serde_json::json!("evil:latest")),
                ("shell", serde_json::json!("/bin/evil")),
                ("docker_run_opts", serde_json::json!("--privileged")),
            ]))
            .await
            .unwrap();

        let call = &runner.calls()[0];
        assert_eq!(call.shell, "sh");
        assert!(!call.command.contains("evil"), "got: {}", call.command);
    }

    #[tokio::test]
    async fn env_whitelist_inherit_and_define() {
        let yaml = r#"
mcp:
  tools:
    - name: enver
      params:
        message: { type: string, required: true }
      run:
        command: "echo \"Message: ${TEST_MESSAGE}\""
        env:
          - "RAMPART_HANDLER_HOST_VAR"
          - "RAMPART_HANDLER_UNSET_VAR"
          - "TEST_MESSAGE={{ .message }}"
"#;
        std::env::set_var("RAMPART_HANDLER_HOST_VAR", "from-host");
        std::env::remove_var("RAMPART_HANDLER_UNSET_VAR");

        let (handler, runner) = handler_with_recorder(yaml, "ok");
        handler
            .invoke_json(&args(&[("message", serde_json::json!("hi"))]))
            .await
            .unwrap();

        let env = runner.calls()[0].env.clone();
        assert!(env.contains(&("RAMPART_HANDLER_HOST_VAR".to_string(), "from-host".to_string())));
        assert!(env.contains(&("TEST_MESSAGE".to_string(), "hi".to_string())));
        // Unset host vars are simply absent; the whitelist is the ceiling,
        // not a guarantee.
        assert!(!env.iter().any(|(n, _)| n == "RAMPART_HANDLER_UNSET_VAR"));
        // And nothing beyond the whitelist is present.
        assert_eq!(env.len(), 2);

        std::env::remove_var("RAMPART_HANDLER_HOST_VAR");
    }

    #[tokio::test]
    async fn output_prefix_prepended_with_blank_line() {
        let yaml = r#"
mcp:
  tools:
    - name: prefixed
      params:
        name: { type: string, required: true }
      run:
        command: "echo hi"
      output:
        prefix: "Result for {{ .name }}:"
"#;
        let (handler, _runner) = handler_with_recorder(yaml, "raw output");
        let out = handler
            .invoke_json(&args(&[("name", serde_json::json!("x"))]))
            .await
            .unwrap();
        assert_eq!(out, "Result for x:\n\nraw output");
    }

    #[tokio::test]
    async fn declared_timeout_reaches_runner() {
        let yaml = r#"
mcp:
  tools:
    - name: timed
      run:
        command: "sleep 5"
      timeout: 2s
"#;
        let (handler, runner) = handler_with_recorder(yaml, "ok");
        handler.invoke_json(&args(&[])).await.unwrap();
        assert_eq!(runner.calls()[0].timeout, Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn direct_invocation_defaults_to_sixty_seconds() {
        let yaml = r#"
mcp:
  tools:
    - name: untimed
      run:
        command: "true"
"#;
        let (handler, runner) = handler_with_recorder(yaml, "ok");

        // MCP path: no implicit ceiling.
        handler.invoke_json(&args(&[])).await.unwrap();
        assert_eq!(runner.calls()[0].timeout, None);

        // Direct path: 60s default.
        handler.invoke_direct(HashMap::new()).await.unwrap();
        assert_eq!(runner.calls()[1].timeout, Some(DEFAULT_DIRECT_TIMEOUT));
    }

    #[tokio::test]
    async fn wrong_kind_argument_is_parameter_error() {
        let yaml = r#"
mcp:
  tools:
    - name: typed
      params:
        value: { type: number, required: true }
      run:
        command: "echo {{ .value }}"
"#;
        let (handler, _runner) = handler_with_recorder(yaml, "ok");
        let err = handler
            .invoke_json(&args(&[("value", serde_json::json!([1, 2]))]))
            .await
            .unwrap_err();
        assert!(matches!(err, RampartError::Parameter(_)), "got: {err:?}");
    }

    #[test]
    fn input_schema_shape() {
        let yaml = r#"
mcp:
  tools:
    - name: schema_tool
      params:
        name: { type: string, description: "who", required: true }
        count: { type: integer, default: 3 }
        ratio: { type: number }
        loud: { type: boolean }
      run:
        command: "true"
"#;
        let tool = tool_from_yaml(yaml);
        let handler =
            ToolHandler::new(&tool, "sh", Box::new(RecordingRunner::ok(""))).unwrap();
        let schema = handler.input_schema();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["name"]["type"], "string");
        assert_eq!(schema["properties"]["name"]["description"], "who");
        assert_eq!(schema["properties"]["count"]["type"], "integer");
        assert_eq!(schema["properties"]["count"]["default"], 3);
        assert_eq!(schema["properties"]["ratio"]["type"], "number");
        assert_eq!(schema["properties"]["loud"]["type"], "boolean");

        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "name");
    }

    #[test]
    fn bad_constraint_fails_construction() {
        let yaml = r#"
mcp:
  tools:
    - name: broken
      params:
        name: { type: string }
      constraints:
        - "name > 3"
      run:
        command: "true"
"#;
        let tool = tool_from_yaml(yaml);
        let err = ToolHandler::new(&tool, "sh", Box::new(RecordingRunner::ok(""))).unwrap_err();
        assert!(matches!(err, RampartError::Compile(_)), "got: {err:?}");
    }

    #[test]
    fn bad_template_fails_construction() {
        let yaml = r#"
mcp:
  tools:
    - name: broken
      run:
        command: "echo {{ .unclosed"
"#;
        let tool = tool_from_yaml(yaml);
        let err = ToolHandler::new(&tool, "sh", Box::new(RecordingRunner::ok(""))).unwrap_err();
        assert!(matches!(err, RampartError::Compile(_)), "got: {err:?}");
    }

    #[test]
    fn bad_env_entry_fails_construction() {
        let yaml = r#"
mcp:
  tools:
    - name: broken
      run:
        command: "true"
        env:
          - "1BAD=x"
"#;
        let tool = tool_from_yaml(yaml);
        let err = ToolHandler::new(&tool, "sh", Box::new(RecordingRunner::ok(""))).unwrap_err();
        assert!(matches!(err, RampartError::Config(_)), "got: {err:?}");
    }

    #[test]
    fn timeout_utility_wrapper_escapes_quotes() {
        let wrapped = wrap_with_timeout_utility("echo 'hi'", Duration::from_secs(10));
        assert!(wrapped.starts_with("timeout --kill-after=5s 10s sh -c '"));
        assert!(wrapped.contains(r#"echo '"'"'hi'"'"'"#), "got: {wrapped}");

        // Sub-second timeouts round up to the minimum one second.
        let wrapped = wrap_with_timeout_utility("true", Duration::from_millis(100));
        assert!(wrapped.contains(" 1s "), "got: {wrapped}");
    }
}
