use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use wait_timeout::ChildExt;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Returned (inside `anyhow::Error`) when a child outlives its timeout.
/// The child has already been killed and reaped.
#[derive(Debug, Clone, thiserror::Error)]
#[error("timed out after {timeout:?}: {cmd}")]
pub struct CommandTimedOut {
    pub cmd: String,
    pub timeout: Duration,
}

/// Returned (inside `anyhow::Error`) when the program could not be started.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to start process: {cmd}: {reason}")]
pub struct CommandLaunchFailed {
    pub cmd: String,
    pub reason: String,
}

pub fn run_command(cmd: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| {
        anyhow::Error::new(CommandLaunchFailed {
            cmd: cmd.to_string(),
            reason: e.to_string(),
        })
    })?;

    // Drain both pipes while waiting so a chatty child cannot block on a full pipe.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match child
        .wait_timeout(timeout)
        .with_context(|| format!("failed to wait for process: {cmd}"))?
    {
        Some(status) => status,
        None => {
            kill_and_reap(&mut child);
            // Grandchildren may still hold the pipes open; the reader threads
            // are left to finish on their own and their output is discarded.
            drop(stdout);
            drop(stderr);
            return Err(anyhow::Error::new(CommandTimedOut {
                cmd: cmd.to_string(),
                timeout,
            }));
        }
    };

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: join(stdout)?,
        stderr: join(stderr)?,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<std::io::Result<String>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).into_owned())
        })
    })
}

fn join(handle: Option<JoinHandle<std::io::Result<String>>>) -> Result<String> {
    let Some(handle) = handle else {
        return Ok(String::new());
    };
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
        .context("failed to read process output")
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

pub fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME is not set"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_output_and_exit_code() {
        let out = run_command("sh", &sh("echo hello; echo oops >&2; exit 3"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[test]
    fn timeout_kills_child_and_is_typed() {
        let start = std::time::Instant::now();
        let err = run_command("sh", &sh("sleep 5"), Duration::from_millis(200)).unwrap_err();
        assert!(err.downcast_ref::<CommandTimedOut>().is_some(), "err={err:#}");
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_a_launch_failure() {
        let err = run_command("ucof-no-such-program", &[], Duration::from_secs(1)).unwrap_err();
        assert!(err.downcast_ref::<CommandLaunchFailed>().is_some());
    }

    #[test]
    fn large_output_does_not_deadlock() {
        let out = run_command(
            "sh",
            &sh("i=0; while [ $i -lt 20000 ]; do echo 0123456789; i=$((i+1)); done"),
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.lines().count(), 20000);
    }
}
