//! Docker container backend: runs each command in a short-lived container.
//!
//! The container sees only the environment pairs passed with `-e`; the host
//! environment never crosses the boundary. Image names, mounts, and network
//! modes are validated before any `docker` invocation so option values from
//! the catalog cannot smuggle extra arguments.

use rampart_types::{RampartError, RunnerKind};

use crate::backend::{RunRequest, RunnerBackend};
use crate::options::{get_bool, get_i64, get_string, get_string_list, OptionBag};
use crate::spawn::{spawn_and_capture, ChildEnv};

/// Shell used inside the container. Minimal images (alpine, busybox) carry
/// it even when the catalog shell is bash.
const CONTAINER_SHELL: &str = "/bin/sh";

/// Options recognized by the docker backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DockerOptions {
    /// Container image. Required.
    pub image: String,
    pub user: Option<String>,
    pub workdir: Option<String>,
    /// `host:container[:mode]` mount specs.
    pub mounts: Vec<String>,
    /// Default true; false maps to `--network=none` unless `network` is set.
    pub allow_networking: bool,
    /// Explicit network mode; overrides `allow_networking`.
    pub network: Option<String>,
    pub memory: Option<String>,
    pub memory_swap: Option<String>,
    /// -1 means unset.
    pub memory_swappiness: i64,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub platform: Option<String>,
    /// Executed inside the container before the rendered command, typically
    /// to install a missing tool.
    pub prepare_command: Option<String>,
    /// Free-form extra `docker run` arguments, whitespace-separated.
    pub docker_run_opts: Option<String>,
}

impl DockerOptions {
    pub fn from_bag(bag: &OptionBag) -> Result<Self, RampartError> {
        let image = get_string(bag, "image")?.ok_or_else(|| {
            RampartError::Config("docker runner requires an 'image' option".into())
        })?;

        Ok(Self {
            image,
            user: get_string(bag, "user")?,
            workdir: get_string(bag, "workdir")?,
            mounts: get_string_list(bag, "mounts")?,
            allow_networking: get_bool(bag, "allow_networking")?.unwrap_or(true),
            network: get_string(bag, "network")?,
            memory: get_string(bag, "memory")?,
            memory_swap: get_string(bag, "memory_swap")?,
            memory_swappiness: get_i64(bag, "memory_swappiness")?.unwrap_or(-1),
            cap_add: get_string_list(bag, "cap_add")?,
            cap_drop: get_string_list(bag, "cap_drop")?,
            dns: get_string_list(bag, "dns")?,
            dns_search: get_string_list(bag, "dns_search")?,
            platform: get_string(bag, "platform")?,
            prepare_command: get_string(bag, "prepare_command")?,
            docker_run_opts: get_string(bag, "docker_run_opts")?,
        })
    }
}

/// The docker backend.
#[derive(Debug)]
pub struct DockerRunner {
    options: DockerOptions,
}

impl DockerRunner {
    pub fn new(options: DockerOptions) -> Result<Self, RampartError> {
        validate_image_name(&options.image)?;
        if let Some(network) = &options.network {
            validate_network_mode(network)?;
        }
        for mount in &options.mounts {
            validate_mount_spec(mount)?;
        }
        Ok(Self { options })
    }
}

/// Build the `docker run` argument vector for one command execution.
///
/// Exposed for tests so the constructed command can be inspected without a
/// Docker daemon.
pub fn build_docker_args(
    options: &DockerOptions,
    env: &[(String, String)],
    command: &str,
) -> Result<Vec<String>, RampartError> {
    validate_image_name(&options.image)?;

    let mut args = vec!["run".to_string(), "--rm".to_string()];

    match &options.network {
        Some(network) => {
            validate_network_mode(network)?;
            args.push(format!("--network={network}"));
        }
        None if !options.allow_networking => args.push("--network=none".to_string()),
        None => {}
    }

    if let Some(user) = &options.user {
        args.push("-u".to_string());
        args.push(user.clone());
    }
    if let Some(workdir) = &options.workdir {
        args.push("-w".to_string());
        args.push(workdir.clone());
    }

    for mount in &options.mounts {
        validate_mount_spec(mount)?;
        args.push("-v".to_string());
        args.push(mount.clone());
    }

    if let Some(memory) = &options.memory {
        args.push(format!("--memory={memory}"));
    }
    if let Some(memory_swap) = &options.memory_swap {
        args.push(format!("--memory-swap={memory_swap}"));
    }
    if options.memory_swappiness >= 0 {
        args.push(format!("--memory-swappiness={}", options.memory_swappiness));
    }

    for cap in &options.cap_add {
        args.push(format!("--cap-add={cap}"));
    }
    for cap in &options.cap_drop {
        args.push(format!("--cap-drop={cap}"));
    }
    for server in &options.dns {
        args.push(format!("--dns={server}"));
    }
    for domain in &options.dns_search {
        args.push(format!("--dns-search={domain}"));
    }
    if let Some(platform) = &options.platform {
        args.push(format!("--platform={platform}"));
    }

    if let Some(extra) = &options.docker_run_opts {
        args.extend(extra.split_whitespace().map(|s| s.to_string()));
    }

    // Environment crosses the boundary per variable, never wholesale.
    for (name, value) in env {
        args.push("-e".to_string());
        args.push(format!("{name}={value}"));
    }

    args.push(options.image.clone());

    let full_command = match &options.prepare_command {
        Some(prepare) => format!("{prepare} && {command}"),
        None => command.to_string(),
    };

    // Single absolute executables run directly; anything else goes through
    // the container shell.
    if is_single_executable(&full_command) {
        args.push(full_command);
    } else {
        args.push(CONTAINER_SHELL.to_string());
        args.push("-c".to_string());
        args.push(full_command);
    }

    Ok(args)
}

/// A command that is one absolute path with no arguments or shell syntax.
fn is_single_executable(command: &str) -> bool {
    command.starts_with('/') && !command.chars().any(|c| c.is_whitespace())
}

/// Validate a Docker image reference to prevent argument injection.
///
/// Allowed characters cover standard references such as `ubuntu:22.04`,
/// `registry.example.com/my-image:latest`, and `image@sha256:...`.
pub fn validate_image_name(image: &str) -> Result<(), RampartError> {
    if image.is_empty() {
        return Err(RampartError::Config("docker image name cannot be empty".into()));
    }
    if image.len() > 256 {
        return Err(RampartError::Config(
            "docker image name exceeds 256 characters".into(),
        ));
    }
    for ch in image.chars() {
        if !ch.is_alphanumeric()
            && ch != '-'
            && ch != '.'
            && ch != ':'
            && ch != '/'
            && ch != '_'
            && ch != '@'
        {
            return Err(RampartError::Config(format!(
                "docker image name contains invalid character {ch:?}"
            )));
        }
    }
    if image.starts_with('-') || image.starts_with('.') || image.starts_with(':') {
        return Err(RampartError::Config(format!(
            "docker image name cannot start with {:?}",
            &image[..1]
        )));
    }
    Ok(())
}

/// Validate a network mode: a plain name, nothing that could become a flag.
fn validate_network_mode(network: &str) -> Result<(), RampartError> {
    if network.is_empty() {
        return Err(RampartError::Config("docker network mode cannot be empty".into()));
    }
    for ch in network.chars() {
        if !ch.is_alphanumeric() && ch != '-' && ch != '_' {
            return Err(RampartError::Config(format!(
                "docker network mode contains invalid character {ch:?}"
            )));
        }
    }
    Ok(())
}

/// Validate a `host:container[:mode]` mount spec.
fn validate_mount_spec(mount: &str) -> Result<(), RampartError> {
    if mount.contains('\0') || mount.contains('\n') || mount.contains('\r') {
        return Err(RampartError::Config(format!(
            "docker mount spec contains invalid character: {mount:?}"
        )));
    }
    if !mount.contains(':') {
        return Err(RampartError::Config(format!(
            "docker mount spec must be host:container[:mode], found {mount:?}"
        )));
    }
    if mount.starts_with('-') {
        return Err(RampartError::Config(format!(
            "docker mount spec cannot start with '-': {mount:?}"
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl RunnerBackend for DockerRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Docker
    }

    fn probe(&self) -> Result<(), RampartError> {
        which::which("docker")
            .map_err(|_| RampartError::Prerequisite("missing executable: docker".into()))?;
        Ok(())
    }

    async fn run(&self, req: RunRequest<'_>) -> Result<String, RampartError> {
        self.ensure_image().await?;

        let mut argv = vec!["docker".to_string()];
        argv.extend(build_docker_args(&self.options, req.env, req.command)?);

        // The docker CLI itself needs its host environment (config, socket
        // discovery); the container gets only the -e pairs built above.
        spawn_and_capture(&argv, ChildEnv::InheritHost, req.timeout).await
    }
}

impl DockerRunner {
    /// Make sure the image exists locally, pulling it if needed.
    async fn ensure_image(&self) -> Result<(), RampartError> {
        let inspect = vec![
            "docker".to_string(),
            "image".to_string(),
            "inspect".to_string(),
            self.options.image.clone(),
        ];
        if spawn_and_capture(&inspect, ChildEnv::InheritHost, None).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image = %self.options.image, "pulling docker image");
        let pull = vec![
            "docker".to_string(),
            "pull".to_string(),
            self.options.image.clone(),
        ];
        spawn_and_capture(&pull, ChildEnv::InheritHost, None)
            .await
            .map_err(|_| {
                RampartError::RunnerSetup(format!(
                    "docker image '{}' is not available locally and could not be pulled",
                    self.options.image
                ))
            })?;
        Ok(())
    }
}
