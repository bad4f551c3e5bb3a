//! The uniform runner contract exposed to tool handlers.

use std::time::Duration;

use rampart_types::{RampartError, RunnerKind};

/// One confined command execution request.
///
/// The environment is exactly the provided pairs: runners never let the
/// ambient process environment reach the child.
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    /// Shell used to interpret `command` (e.g. `bash`, `sh`).
    pub shell: &'a str,
    /// The rendered command text.
    pub command: &'a str,
    /// Explicit `NAME=VALUE` pairs exported to the child.
    pub env: &'a [(String, String)],
    /// Wall-clock budget. `None` means the caller's cancellation governs.
    pub timeout: Option<Duration>,
    /// Write the command to a scratch file and invoke `shell <file>` instead
    /// of passing it via `-c`.
    pub materialize: bool,
}

/// Trait for isolation runner backends.
///
/// Implementations are constructed once per tool from the tool definition's
/// option bag and are immutable afterwards; `run` may be called from any
/// number of concurrent tasks.
#[async_trait::async_trait]
pub trait RunnerBackend: Send + Sync + std::fmt::Debug {
    /// Which strategy this backend implements.
    fn kind(&self) -> RunnerKind;

    /// Check the backend's implicit host requirements (helper executables,
    /// OS). Called once before tool registration; a failed probe means the
    /// tool is skipped.
    fn probe(&self) -> Result<(), RampartError>;

    /// Execute a rendered command under this backend's confinement and
    /// return the merged, trimmed output. Non-zero exits and deadline
    /// overruns are errors.
    async fn run(&self, req: RunRequest<'_>) -> Result<String, RampartError>;
}
