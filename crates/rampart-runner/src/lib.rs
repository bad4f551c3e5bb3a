//! Isolation runner strategies for Rampart tools.
//!
//! Provides the [`RunnerBackend`] trait with four implementations:
//! - [`ExecRunner`]: direct shell execution, no OS-level confinement
//! - [`FirejailRunner`]: Linux jail (network deny, capability drop, path whitelist)
//! - [`SeatbeltRunner`]: macOS Seatbelt (`sandbox-exec`) with generated SBPL profiles
//! - [`DockerRunner`]: short-lived hardened containers
//!
//! Backends share uniform semantics: explicit-only environment, merged and
//! trimmed output capture, scratch-file command materialization, and
//! deadline enforcement by process-group termination (SIGTERM, then SIGKILL
//! after a grace window).

pub mod backend;
pub mod docker;
pub mod exec;
pub mod firejail;
mod options;
pub mod seatbelt;
mod spawn;

use rampart_types::{RampartError, RunnerKind};

pub use backend::{RunRequest, RunnerBackend};
pub use docker::{build_docker_args, DockerOptions, DockerRunner};
pub use exec::{ExecOptions, ExecRunner};
pub use firejail::{build_firejail_args, FirejailOptions, FirejailRunner};
pub use options::OptionBag;
pub use seatbelt::{generate_profile, SeatbeltOptions, SeatbeltRunner};

/// Construct a backend of the given kind from a tool definition's option bag.
///
/// The bag is validated into a typed options record here; nothing untyped
/// survives past construction, and the caller's argument map can never reach
/// these options.
pub fn create_backend(
    kind: RunnerKind,
    options: &OptionBag,
) -> Result<Box<dyn RunnerBackend>, RampartError> {
    match kind {
        RunnerKind::Exec => Ok(Box::new(ExecRunner::new(ExecOptions::from_bag(options)?))),
        RunnerKind::Firejail => Ok(Box::new(FirejailRunner::new(FirejailOptions::from_bag(
            options,
        )?))),
        RunnerKind::SandboxExec => Ok(Box::new(SeatbeltRunner::new(SeatbeltOptions::from_bag(
            options,
        )?))),
        RunnerKind::Docker => Ok(Box::new(DockerRunner::new(DockerOptions::from_bag(
            options,
        )?)?)),
    }
}

/// Reject path-shaped option values that could smuggle extra arguments or
/// break out of a generated configuration.
pub(crate) fn validate_path_argument(what: &str, path: &str) -> Result<(), RampartError> {
    if path.is_empty() {
        return Err(RampartError::Config(format!("{what} cannot be empty")));
    }
    if path.contains('\0') || path.contains('\n') || path.contains('\r') {
        return Err(RampartError::Config(format!(
            "{what} contains an invalid character: {path:?}"
        )));
    }
    if path.starts_with('-') {
        return Err(RampartError::Config(format!(
            "{what} cannot start with '-': {path:?}"
        )));
    }
    Ok(())
}
