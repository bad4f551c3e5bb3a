//! Linux jail backend: wraps the shell invocation in firejail.
//!
//! Defaults are restrictive: network denied and all capabilities dropped.
//! Filesystem visibility widens only through the `allowed_paths` whitelist.

use rampart_types::{RampartError, RunnerKind};

use crate::backend::{RunRequest, RunnerBackend};
use crate::options::{get_bool, get_string, get_string_list, OptionBag};
use crate::spawn::{shell_invocation, spawn_and_capture, ChildEnv};
use crate::validate_path_argument;

/// Options recognized by the firejail backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FirejailOptions {
    /// Custom firejail profile path (`--profile=`).
    pub profile: Option<String>,
    /// Permit outbound networking. Default false.
    pub allow_networking: bool,
    /// Paths whitelisted into the jail (`--whitelist=`).
    pub allowed_paths: Vec<String>,
}

impl FirejailOptions {
    pub fn from_bag(bag: &OptionBag) -> Result<Self, RampartError> {
        Ok(Self {
            profile: get_string(bag, "profile")?,
            allow_networking: get_bool(bag, "allow_networking")?.unwrap_or(false),
            allowed_paths: get_string_list(bag, "allowed_paths")?,
        })
    }
}

/// The firejail backend.
#[derive(Debug)]
pub struct FirejailRunner {
    options: FirejailOptions,
}

impl FirejailRunner {
    pub fn new(options: FirejailOptions) -> Self {
        Self { options }
    }
}

/// Build the firejail argument vector in front of the shell invocation.
///
/// Exposed for tests so the constructed command can be inspected without
/// firejail installed.
pub fn build_firejail_args(
    options: &FirejailOptions,
    shell_argv: &[String],
) -> Result<Vec<String>, RampartError> {
    let mut args = vec!["--quiet".to_string(), "--caps.drop=all".to_string()];

    if !options.allow_networking {
        args.push("--net=none".to_string());
    }

    if let Some(profile) = &options.profile {
        validate_path_argument("firejail profile", profile)?;
        args.push(format!("--profile={profile}"));
    }

    for path in &options.allowed_paths {
        validate_path_argument("firejail whitelist path", path)?;
        args.push(format!("--whitelist={path}"));
    }

    args.push("--".to_string());
    args.extend(shell_argv.iter().cloned());
    Ok(args)
}

#[async_trait::async_trait]
impl RunnerBackend for FirejailRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Firejail
    }

    fn probe(&self) -> Result<(), RampartError> {
        if std::env::consts::OS != "linux" {
            return Err(RampartError::Prerequisite(format!(
                "firejail runner requires linux, host is {}",
                std::env::consts::OS
            )));
        }
        which::which("firejail").map_err(|_| {
            RampartError::Prerequisite("missing executable: firejail".into())
        })?;
        Ok(())
    }

    async fn run(&self, req: RunRequest<'_>) -> Result<String, RampartError> {
        let (shell_argv, _guard) = shell_invocation(req.shell, req.command, req.materialize)?;
        let mut argv = vec!["firejail".to_string()];
        argv.extend(build_firejail_args(&self.options, &shell_argv)?);
        spawn_and_capture(&argv, ChildEnv::Explicit(req.env), req.timeout).await
    }
}
