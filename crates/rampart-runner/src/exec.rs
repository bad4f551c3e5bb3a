//! Direct execution backend: spawns the shell with no OS-level confinement.

use rampart_types::{RampartError, RunnerKind};

use crate::backend::{RunRequest, RunnerBackend};
use crate::options::{get_string, OptionBag};
use crate::spawn::{shell_invocation, spawn_and_capture, ChildEnv};

/// Options recognized by the exec backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOptions {
    /// Shell override; falls back to the per-request shell when unset.
    pub shell: Option<String>,
}

impl ExecOptions {
    pub fn from_bag(bag: &OptionBag) -> Result<Self, RampartError> {
        Ok(Self {
            shell: get_string(bag, "shell")?,
        })
    }
}

/// The direct execution backend.
#[derive(Debug)]
pub struct ExecRunner {
    options: ExecOptions,
}

impl ExecRunner {
    pub fn new(options: ExecOptions) -> Self {
        Self { options }
    }
}

#[async_trait::async_trait]
impl RunnerBackend for ExecRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Exec
    }

    fn probe(&self) -> Result<(), RampartError> {
        // No implicit requirements beyond a resolvable shell, which is
        // checked at spawn time against the per-request shell.
        Ok(())
    }

    async fn run(&self, req: RunRequest<'_>) -> Result<String, RampartError> {
        let shell = self.options.shell.as_deref().unwrap_or(req.shell);
        let (argv, _guard) = shell_invocation(shell, req.command, req.materialize)?;
        spawn_and_capture(&argv, ChildEnv::Explicit(req.env), req.timeout).await
    }
}
