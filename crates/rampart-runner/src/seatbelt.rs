//! macOS Seatbelt backend: generates an SBPL profile and runs the shell
//! under `sandbox-exec`.
//!
//! The generated profile starts from a default-deny stance, then selectively
//! allows system reads, process execution, and the scratch locations the
//! materialized command needs. Write access widens only through the
//! `allowed_paths` option; network access only with `allow_networking`.

use std::io::Write;

use rampart_types::{RampartError, RunnerKind};

use crate::backend::{RunRequest, RunnerBackend};
use crate::options::{get_bool, get_string, get_string_list, OptionBag};
use crate::spawn::{shell_invocation, spawn_and_capture, ChildEnv};

/// System paths sandboxed processes need read access to for basic operation:
/// dyld, system libraries, and configuration.
const SYSTEM_READ_PATHS: &[&str] = &[
    "/usr",
    "/bin",
    "/sbin",
    "/Library",
    "/System",
    "/private/etc",
    "/private/var/db",
    "/private/var/folders",
    "/dev",
];

/// Scratch locations that must stay writable so materialized commands and
/// ordinary temp files work inside the sandbox.
const SCRATCH_WRITE_PATHS: &[&str] = &["/tmp", "/private/tmp", "/private/var/folders", "/var/folders"];

/// Options recognized by the sandbox-exec backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeatbeltOptions {
    /// Full replacement SBPL profile text. When set, generation is skipped.
    pub profile: Option<String>,
    /// Permit outbound networking. Default false.
    pub allow_networking: bool,
    /// Paths granted read and write access.
    pub allowed_paths: Vec<String>,
}

impl SeatbeltOptions {
    pub fn from_bag(bag: &OptionBag) -> Result<Self, RampartError> {
        Ok(Self {
            profile: get_string(bag, "profile")?,
            allow_networking: get_bool(bag, "allow_networking")?.unwrap_or(false),
            allowed_paths: get_string_list(bag, "allowed_paths")?,
        })
    }
}

/// The sandbox-exec backend.
#[derive(Debug)]
pub struct SeatbeltRunner {
    options: SeatbeltOptions,
}

impl SeatbeltRunner {
    pub fn new(options: SeatbeltOptions) -> Self {
        Self { options }
    }
}

/// Generate the SBPL profile for the given options.
pub fn generate_profile(options: &SeatbeltOptions) -> Result<String, RampartError> {
    if let Some(custom) = &options.profile {
        return Ok(custom.clone());
    }

    let mut profile = String::new();
    profile.push_str("(version 1)\n");
    profile.push_str("(deny default)\n");

    profile.push_str("(allow file-read-metadata)\n");
    profile.push_str("(allow file-read-data)\n");
    for path in SYSTEM_READ_PATHS {
        profile.push_str(&format!("(allow file-read* (subpath \"{path}\"))\n"));
    }

    profile.push_str("(allow process-exec)\n");
    profile.push_str("(allow process-fork)\n");
    profile.push_str("(allow sysctl-read)\n");
    profile.push_str("(allow mach-lookup)\n");

    for path in SCRATCH_WRITE_PATHS {
        profile.push_str(&format!("(allow file-read* (subpath \"{path}\"))\n"));
        profile.push_str(&format!("(allow file-write* (subpath \"{path}\"))\n"));
    }

    for path in &options.allowed_paths {
        let escaped = escape_sbpl_path(path)?;
        profile.push_str(&format!("(allow file-read* (subpath \"{escaped}\"))\n"));
        profile.push_str(&format!("(allow file-write* (subpath \"{escaped}\"))\n"));
    }

    if options.allow_networking {
        profile.push_str("(allow network-outbound)\n");
        profile.push_str("(allow system-socket)\n");
    } else {
        profile.push_str("(deny network*)\n");
    }

    Ok(profile)
}

/// Escape a path for safe inclusion in an SBPL double-quoted literal.
///
/// SBPL is Scheme-like: `\` and `"` are special inside strings. Parentheses
/// and newlines are rejected outright since they could break out of the
/// `(subpath ...)` form or inject directives.
pub fn escape_sbpl_path(path: &str) -> Result<String, RampartError> {
    for ch in ['(', ')', '\n', '\r', '\0'] {
        if path.contains(ch) {
            return Err(RampartError::Config(format!(
                "allowed path contains invalid character {ch:?} for a sandbox profile: {path:?}"
            )));
        }
    }
    Ok(path.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait::async_trait]
impl RunnerBackend for SeatbeltRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::SandboxExec
    }

    fn probe(&self) -> Result<(), RampartError> {
        if std::env::consts::OS != "macos" {
            return Err(RampartError::Prerequisite(format!(
                "sandbox-exec runner requires macos, host is {}",
                std::env::consts::OS
            )));
        }
        which::which("sandbox-exec").map_err(|_| {
            RampartError::Prerequisite("missing executable: sandbox-exec".into())
        })?;
        Ok(())
    }

    async fn run(&self, req: RunRequest<'_>) -> Result<String, RampartError> {
        let profile = generate_profile(&self.options)?;

        // The profile lives in a scratch file for the duration of the run.
        let mut profile_file = tempfile::Builder::new()
            .prefix("rampart-sbpl-")
            .suffix(".sb")
            .tempfile()
            .map_err(|e| {
                RampartError::RunnerSetup(format!("failed to create profile file: {e}"))
            })?;
        profile_file
            .write_all(profile.as_bytes())
            .and_then(|_| profile_file.flush())
            .map_err(|e| RampartError::RunnerSetup(format!("failed to write profile: {e}")))?;

        let (shell_argv, _guard) = shell_invocation(req.shell, req.command, req.materialize)?;
        let mut argv = vec![
            "sandbox-exec".to_string(),
            "-f".to_string(),
            profile_file.path().display().to_string(),
        ];
        argv.extend(shell_argv);

        spawn_and_capture(&argv, ChildEnv::Explicit(req.env), req.timeout).await
    }
}
