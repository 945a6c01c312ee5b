// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared subprocess spawn/terminate helpers used by all three Bridge
//! variants: piped stdio via `tokio::process::Command`, graceful
//! SIGTERM-then-SIGKILL shutdown with a 3-second grace period.

use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// The 3-second grace period between `SIGTERM` and `SIGKILL`, matching the
/// Bridge `Close()` contract.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// A spawned child process split into its I/O handles. The `Child` itself is
/// retained so the owner can wait on exit and issue SIGKILL if needed.
pub struct ChildProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawn `command` with the given `args`/`env`/`cwd`, piping all three
/// standard streams. The child is killed if the returned `Child` is dropped
/// without an explicit wait (`kill_on_drop`), so a panicked task never leaks
/// a process.
pub fn spawn(
    command: &str,
    args: &[String],
    env: &[(String, String)],
    cwd: Option<&str>,
) -> std::io::Result<ChildProcess> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn()?;
    let missing = || std::io::Error::other("piped stdio handle missing after spawn");
    let stdin = child.stdin.take().ok_or_else(missing)?;
    let stdout = child.stdout.take().ok_or_else(missing)?;
    let stderr = child.stderr.take().ok_or_else(missing)?;
    Ok(ChildProcess { child, stdin, stdout, stderr })
}

/// `true` if a process with the given pid is alive (probed with signal 0).
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    signal::kill(Pid::from_raw(pid_i32), None).is_ok()
}

/// Send `SIGTERM`, then race the child's exit against [`TERMINATE_GRACE`];
/// on timeout, force-kill with `SIGKILL` (via `Child::start_kill`) and wait
/// for the reap to complete. Never returns before the child has exited.
pub async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Ok(pid_i32) = i32::try_from(pid) {
            let _ = signal::kill(Pid::from_raw(pid_i32), Signal::SIGTERM);
        }
    }

    let waited = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await;
    if waited.is_err() {
        tracing::warn!("child did not exit within grace period, sending SIGKILL");
        if let Err(err) = child.start_kill() {
            tracing::warn!(error = %err, "SIGKILL failed");
        }
        let _ = child.wait().await;
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
