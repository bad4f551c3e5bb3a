//! The `rampart exec` command: invoke one tool directly from the command
//! line, bypassing the MCP transport but using exactly the same handler
//! pipeline.
//!
//! Argument values parse by the tool's declared parameter kinds: booleans
//! accept `true|false|1|0|yes|no` case-insensitively, numerics are decimal,
//! strings are taken verbatim. The final output (or a policy-violation
//! report) goes to stdout; exit code 0 means success.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};

use rampart_server::{Prober, ToolRegistry};
use rampart_types::{Catalog, ParamValue, RampartError, ToolConfig};

pub async fn run(config: &Path, shell: Option<&str>, tool: &str, args: &[String]) -> Result<()> {
    let catalog = Catalog::from_file(config)
        .with_context(|| format!("failed to load catalog {}", config.display()))?;

    let tool_config = catalog
        .mcp
        .tools
        .iter()
        .find(|t| t.name == tool)
        .with_context(|| format!("tool '{tool}' not found in the catalog"))?;

    let prober = Prober::new();
    let registry = ToolRegistry::from_catalog(&catalog, shell, &prober)
        .context("failed to build tool registry")?;

    let handler = registry
        .get(tool)
        .with_context(|| format!("tool '{tool}' is not available: prerequisites not met on this host"))?;

    let values = parse_key_value_args(tool_config, args)?;

    match handler.invoke_direct(values).await {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(RampartError::PolicyViolation(failed)) => {
            println!("{}", RampartError::PolicyViolation(failed));
            bail!("tool '{tool}' was blocked by its constraints");
        }
        Err(err) => Err(err).with_context(|| format!("tool '{tool}' failed")),
    }
}

/// Parse `key=value` pairs against the tool's declared parameter kinds.
fn parse_key_value_args(
    tool: &ToolConfig,
    args: &[String],
) -> Result<HashMap<String, ParamValue>> {
    let mut values = HashMap::new();
    for arg in args {
        let (key, raw) = arg
            .split_once('=')
            .with_context(|| format!("argument {arg:?} is not of the form key=value"))?;
        let spec = tool
            .params
            .get(key)
            .with_context(|| format!("tool '{}' has no parameter named '{key}'", tool.name))?;
        let value = ParamValue::from_cli(key, spec.kind, raw)?;
        values.insert(key.to_string(), value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_types::ParamKind;

    fn tool_from_yaml(yaml: &str) -> ToolConfig {
        Catalog::from_yaml(yaml).unwrap().mcp.tools[0].clone()
    }

    const TYPED_TOOL: &str = r#"
mcp:
  tools:
    - name: typed
      params:
        name: { type: string }
        value: { type: number }
        count: { type: integer }
        loud: { type: boolean }
      run: { command: "true" }
"#;

    #[test]
    fn parses_values_by_declared_kind() {
        let tool = tool_from_yaml(TYPED_TOOL);
        let values = parse_key_value_args(
            &tool,
            &[
                "name=World".to_string(),
                "value=2.5".to_string(),
                "count=3".to_string(),
                "loud=yes".to_string(),
            ],
        )
        .unwrap();

        assert_eq!(values["name"], ParamValue::String("World".into()));
        assert_eq!(values["value"], ParamValue::Number(2.5));
        assert_eq!(values["count"], ParamValue::Integer(3));
        assert_eq!(values["loud"], ParamValue::Boolean(true));
    }

    #[test]
    fn value_may_contain_equals_sign() {
        let tool = tool_from_yaml(TYPED_TOOL);
        let values =
            parse_key_value_args(&tool, &["name=a=b".to_string()]).unwrap();
        assert_eq!(values["name"], ParamValue::String("a=b".into()));
    }

    #[test]
    fn rejects_malformed_pairs_and_unknown_keys() {
        let tool = tool_from_yaml(TYPED_TOOL);
        assert!(parse_key_value_args(&tool, &["no-equals".to_string()]).is_err());
        assert!(parse_key_value_args(&tool, &["ghost=1".to_string()]).is_err());
    }

    #[test]
    fn rejects_uncoercible_values() {
        let tool = tool_from_yaml(TYPED_TOOL);
        assert!(parse_key_value_args(&tool, &["value=abc".to_string()]).is_err());
        assert!(parse_key_value_args(&tool, &["loud=maybe".to_string()]).is_err());
        assert_eq!(
            tool.params.get("value").unwrap().kind,
            ParamKind::Number
        );
    }

    #[tokio::test]
    async fn end_to_end_direct_execution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.yaml");
        std::fs::write(
            &path,
            r#"
mcp:
  tools:
    - name: hello_world
      params:
        name: { type: string, required: true }
      constraints:
        - "name.size() <= 100 && !name.contains('/')"
      run:
        command: "echo 'Hello, {{ .name }}!'"
"#,
        )
        .unwrap();

        assert!(run(&path, None, "hello_world", &["name=World".to_string()])
            .await
            .is_ok());

        // Constraint violation exits non-zero.
        assert!(run(&path, None, "hello_world", &["name=a/b".to_string()])
            .await
            .is_err());

        // Unknown tool exits non-zero.
        assert!(run(&path, None, "ghost", &[]).await.is_err());
    }
}
