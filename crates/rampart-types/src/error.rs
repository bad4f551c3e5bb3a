//! Error types shared across all Rampart crates.

/// Errors that can occur across the Rampart runtime.
///
/// Variants map to the stages of a tool invocation: catalog loading,
/// constraint/template compilation, prerequisite probing, parameter
/// validation, policy evaluation, rendering, and command execution.
#[derive(Debug, thiserror::Error)]
pub enum RampartError {
    /// Malformed catalog, duplicate tool name, bad runner options, or an
    /// otherwise invalid configuration. Detected at load time and fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Constraint type-check failure or template parse failure. Detected at
    /// registration time and fatal for the affected tool.
    #[error("compilation error: {0}")]
    Compile(String),

    /// A declared host requirement (executable, OS) is not met. The tool is
    /// skipped, never registered.
    #[error("prerequisite not met: {0}")]
    Prerequisite(String),

    /// Caller-supplied argument missing or not coercible to its declared kind.
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// One or more constraints evaluated to false. Carries the source text of
    /// every failed constraint, in declaration order.
    #[error("{}", render_failed_constraints(.0))]
    PolicyViolation(Vec<String>),

    /// A template referenced a field that has no value at render time.
    #[error("template render error: {0}")]
    TemplateRender(String),

    /// Runner could not be set up: implicit requirement missing, container
    /// image unavailable, sandbox profile rejected.
    #[error("runner setup failed: {0}")]
    RunnerSetup(String),

    /// The child process exited non-zero. `output` holds the captured
    /// combined stdout/stderr.
    #[error("command failed: {message}")]
    RunnerExecution { message: String, output: String },

    /// The call exceeded its deadline and the child was terminated.
    #[error("command timed out after {0}")]
    Timeout(String),

    /// The call was cancelled before or during execution.
    #[error("command cancelled")]
    Cancelled,

    /// Unexpected fault captured by the fault isolator. Never fatal for the
    /// server.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RampartError {
    /// Whether this error should abort server startup when encountered while
    /// building the tool registry.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, RampartError::Config(_) | RampartError::Compile(_))
    }
}

/// Format the policy-violation report shown to callers: one line per failed
/// constraint, numbered from 1 in declaration order.
fn render_failed_constraints(failed: &[String]) -> String {
    let mut msg = String::from("command execution blocked by constraints:");
    for (i, source) in failed.iter().enumerate() {
        msg.push_str(&format!("\n- constraint {}: {}", i + 1, source));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            RampartError::Config("bad yaml".into()).to_string(),
            "configuration error: bad yaml"
        );
        assert_eq!(
            RampartError::Prerequisite("missing executable: jq".into()).to_string(),
            "prerequisite not met: missing executable: jq"
        );
        assert_eq!(
            RampartError::Timeout("10s".into()).to_string(),
            "command timed out after 10s"
        );
        assert_eq!(RampartError::Cancelled.to_string(), "command cancelled");
    }

    #[test]
    fn policy_violation_lists_constraints_in_order() {
        let err = RampartError::PolicyViolation(vec![
            "name.size() <= 100".into(),
            "!name.contains('/')".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("command execution blocked by constraints:"));
        assert!(msg.contains("- constraint 1: name.size() <= 100"));
        assert!(msg.contains("- constraint 2: !name.contains('/')"));
        let pos1 = msg.find("constraint 1").unwrap();
        let pos2 = msg.find("constraint 2").unwrap();
        assert!(pos1 < pos2);
    }

    #[test]
    fn runner_execution_keeps_output_out_of_message() {
        let err = RampartError::RunnerExecution {
            message: "command exited with status 2".into(),
            output: "secret diagnostic".into(),
        };
        assert_eq!(err.to_string(), "command failed: command exited with status 2");
    }

    #[test]
    fn startup_fatality() {
        assert!(RampartError::Config("x".into()).is_fatal_at_startup());
        assert!(RampartError::Compile("x".into()).is_fatal_at_startup());
        assert!(!RampartError::Prerequisite("x".into()).is_fatal_at_startup());
        assert!(!RampartError::PolicyViolation(vec![]).is_fatal_at_startup());
    }
}
