//! Shared process machinery for all runner backends.
//!
//! Children are spawned in their own session so the whole process group can
//! be terminated on deadline overrun: SIGTERM first, SIGKILL after a short
//! grace window. Output capture merges stdout and stderr into one buffer and
//! trims surrounding whitespace. Command materialization writes the rendered
//! command to a scratch file that is removed on every exit path (the
//! [`tempfile::NamedTempFile`] guard deletes it on drop).

use std::process::Stdio;
use std::time::Duration;

use rampart_types::RampartError;
use tokio::io::AsyncReadExt;

/// Grace window between SIGTERM and SIGKILL when tearing a child down.
pub(crate) const KILL_GRACE: Duration = Duration::from_secs(5);

/// How the child's environment is composed.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ChildEnv<'a> {
    /// Clear everything and export exactly these pairs. Used for the child
    /// that runs the tool command.
    Explicit(&'a [(String, String)]),
    /// Inherit the host environment. Used only for helper clients (the
    /// `docker` CLI) whose own children are confined elsewhere.
    InheritHost,
}

/// Build the argv tail that hands `command` to `shell`.
///
/// With `materialize` the command is written to a scratch file invoked as
/// `shell <path>`; the returned guard keeps the file alive until the run
/// finishes. Otherwise the command goes through `shell -c`.
pub(crate) fn shell_invocation(
    shell: &str,
    command: &str,
    materialize: bool,
) -> Result<(Vec<String>, Option<tempfile::NamedTempFile>), RampartError> {
    if materialize {
        let mut file = tempfile::Builder::new()
            .prefix("rampart-cmd-")
            .suffix(".sh")
            .tempfile()
            .map_err(|e| RampartError::RunnerSetup(format!("failed to create scratch file: {e}")))?;
        use std::io::Write;
        file.write_all(command.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| RampartError::RunnerSetup(format!("failed to write scratch file: {e}")))?;
        let path = file.path().display().to_string();
        Ok((vec![shell.to_string(), path], Some(file)))
    } else {
        Ok((
            vec![shell.to_string(), "-c".to_string(), command.to_string()],
            None,
        ))
    }
}

/// Spawn `argv`, capture merged output, and enforce the timeout.
///
/// Returns the trimmed combined stdout/stderr on a zero exit. A non-zero
/// exit is a [`RampartError::RunnerExecution`] whose payload carries the
/// captured text; a deadline overrun terminates the process group and
/// returns [`RampartError::Timeout`].
pub(crate) async fn spawn_and_capture(
    argv: &[String],
    env: ChildEnv<'_>,
    timeout: Option<Duration>,
) -> Result<String, RampartError> {
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| RampartError::Internal("empty argv".into()))?;

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let ChildEnv::Explicit(pairs) = env {
        cmd.env_clear();
        for (name, value) in pairs {
            cmd.env(name, value);
        }
    }

    // Own session: the shell and everything it spawns share a process group
    // we can signal as a unit.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| RampartError::RunnerSetup(format!("failed to spawn '{program}': {e}")))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| RampartError::Internal("child stdout not captured".into()))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| RampartError::Internal("child stderr not captured".into()))?;

    let io_and_wait = async {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let (read_out, read_err) = tokio::join!(
            stdout_pipe.read_to_end(&mut out),
            stderr_pipe.read_to_end(&mut err)
        );
        read_out.map_err(|e| RampartError::Internal(format!("failed to read stdout: {e}")))?;
        read_err.map_err(|e| RampartError::Internal(format!("failed to read stderr: {e}")))?;
        let status = child
            .wait()
            .await
            .map_err(|e| RampartError::Internal(format!("failed to wait for child: {e}")))?;
        Ok::<_, RampartError>((status, out, err))
    };

    // The io_and_wait future borrows the child; resolve it fully (and drop
    // the borrow) before any teardown path touches the child again.
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, io_and_wait).await {
            Ok(finished) => WaitOutcome::Finished(finished),
            Err(_) => WaitOutcome::TimedOut(limit),
        },
        None => WaitOutcome::Finished(io_and_wait.await),
    };

    let (status, out, err) = match outcome {
        WaitOutcome::Finished(result) => result?,
        WaitOutcome::TimedOut(limit) => {
            terminate(&mut child).await;
            return Err(RampartError::Timeout(format!("{limit:?}")));
        }
    };

    let mut combined = String::from_utf8_lossy(&out).into_owned();
    combined.push_str(&String::from_utf8_lossy(&err));
    let text = combined.trim().to_string();

    if status.success() {
        Ok(text)
    } else {
        let message = match status.code() {
            Some(code) => format!("command exited with status {code}"),
            None => "command terminated by signal".to_string(),
        };
        Err(RampartError::RunnerExecution { message, output: text })
    }
}

/// How a supervised child run ended.
enum WaitOutcome {
    Finished(Result<(std::process::ExitStatus, Vec<u8>, Vec<u8>), RampartError>),
    TimedOut(Duration),
}

/// Terminate a child: SIGTERM to its process group, SIGKILL after the grace
/// window. Falls back to a direct kill where process groups are unavailable.
async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let pgid = Pid::from_raw(pid as i32);
            if killpg(pgid, Signal::SIGTERM).is_ok() {
                if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
                    return;
                }
                let _ = killpg(pgid, Signal::SIGKILL);
                let _ = child.wait().await;
                return;
            }
        }
    }

    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_and_trims_output() {
        let out = spawn_and_capture(
            &argv(&["sh", "-c", "echo '  hello world  '"]),
            ChildEnv::Explicit(&[]),
            None,
        )
        .await
        .unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn merges_stdout_and_stderr() {
        let out = spawn_and_capture(
            &argv(&["sh", "-c", "echo to-stdout; echo to-stderr 1>&2"]),
            ChildEnv::Explicit(&[]),
            None,
        )
        .await
        .unwrap();
        assert!(out.contains("to-stdout"), "got: {out}");
        assert!(out.contains("to-stderr"), "got: {out}");
    }

    #[tokio::test]
    async fn explicit_env_blocks_ambient_leakage() {
        std::env::set_var("RAMPART_SPAWN_CANARY", "leaked");
        let pairs = vec![("ALLOWED_VAR".to_string(), "visible".to_string())];
        let out = spawn_and_capture(
            &argv(&["sh", "-c", "env"]),
            ChildEnv::Explicit(&pairs),
            None,
        )
        .await
        .unwrap();
        assert!(out.contains("ALLOWED_VAR=visible"), "got: {out}");
        assert!(!out.contains("RAMPART_SPAWN_CANARY"), "got: {out}");
        std::env::remove_var("RAMPART_SPAWN_CANARY");
    }

    #[tokio::test]
    async fn nonzero_exit_carries_captured_output() {
        let err = spawn_and_capture(
            &argv(&["sh", "-c", "echo diagnostics; exit 3"]),
            ChildEnv::Explicit(&[]),
            None,
        )
        .await
        .unwrap_err();
        match err {
            RampartError::RunnerExecution { message, output } => {
                assert!(message.contains("status 3"), "got: {message}");
                assert_eq!(output, "diagnostics");
            }
            other => panic!("expected RunnerExecution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_terminates_in_bounded_time() {
        let start = Instant::now();
        let err = spawn_and_capture(
            &argv(&["sh", "-c", "sleep 30"]),
            ChildEnv::Explicit(&[]),
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RampartError::Timeout(_)), "got: {err:?}");
        // Well under timeout + grace: sleep dies to SIGTERM immediately.
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "took {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn missing_program_is_setup_error() {
        let err = spawn_and_capture(
            &argv(&["rampart-test-no-such-program"]),
            ChildEnv::Explicit(&[]),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RampartError::RunnerSetup(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn materialized_command_runs_from_scratch_file() {
        let (argv, guard) = shell_invocation("sh", "echo ran-from-file", true).unwrap();
        assert!(guard.is_some());
        let out = spawn_and_capture(&argv, ChildEnv::Explicit(&[]), None)
            .await
            .unwrap();
        assert_eq!(out, "ran-from-file");
    }

    #[tokio::test]
    async fn scratch_file_removed_after_drop() {
        let (argv, guard) = shell_invocation("sh", "true", true).unwrap();
        let path = std::path::PathBuf::from(&argv[1]);
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn dash_c_invocation_shape() {
        let (argv, guard) = shell_invocation("bash", "echo hi", false).unwrap();
        assert!(guard.is_none());
        assert_eq!(argv, vec!["bash", "-c", "echo hi"]);
    }
}
