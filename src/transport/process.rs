//! Child process lifecycle: spawn, exit detection, and forced termination.
//!
//! The spawned [`tokio::process::Child`] is owned exclusively by a waiter
//! task; every other component observes the exit status through a watch
//! channel and requests a kill through a message channel. Nothing else may
//! signal or wait on the child directly.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};

use crate::error::{LaunchError, Result, TransportError};
use crate::transport::config::TransportConfig;

/// How long a killed process is given to be reaped before the supervisor
/// detaches and reports failure instead of hanging forever.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Exit code reported when the process was terminated by a signal.
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// The three piped standard streams of a freshly launched child.
pub struct ChildStreams {
    /// The child's stdin, owned by the stdin writer once connected.
    pub stdin: ChildStdin,
    /// The child's stdout.
    pub stdout: ChildStdout,
    /// The child's stderr.
    pub stderr: ChildStderr,
}

/// Supervises one child process: exit detection and forced termination.
pub struct ProcessSupervisor {
    pid: Option<u32>,
    kill_tx: mpsc::Sender<()>,
    status_rx: watch::Receiver<Option<i32>>,
}

impl ProcessSupervisor {
    /// Spawn the configured executable with all three standard streams piped.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::WorkingDirectoryMissing`] when the configured
    /// working directory does not exist, [`LaunchError::ExecutableMissing`]
    /// when the OS cannot find the executable, and [`LaunchError::Spawn`]
    /// for any other spawn failure.
    pub fn launch(config: &TransportConfig) -> Result<(Self, ChildStreams)> {
        if let Some(dir) = config.working_dir() {
            if !dir.is_dir() {
                return Err(LaunchError::WorkingDirectoryMissing(dir.to_path_buf()).into());
            }
        }

        let mut cmd = Command::new(config.executable());
        cmd.args(config.args())
            .envs(config.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = config.working_dir() {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => {
                LaunchError::ExecutableMissing(config.executable().to_path_buf())
            }
            _ => LaunchError::Spawn(err),
        })?;

        let streams = ChildStreams {
            stdin: take_stream(child.stdin.take(), "stdin")?,
            stdout: take_stream(child.stdout.take(), "stdout")?,
            stderr: take_stream(child.stderr.take(), "stderr")?,
        };

        let pid = child.id();
        tracing::debug!(pid = ?pid, executable = %config.executable().display(), "process launched");

        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (status_tx, status_rx) = watch::channel(None);
        tokio::spawn(run_waiter(child, kill_rx, status_tx));

        Ok((
            Self {
                pid,
                kill_tx,
                status_rx,
            },
            streams,
        ))
    }

    /// The child's process id, if it was still running at launch.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The exit code, or `None` while the process is still running.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        *self.status_rx.borrow()
    }

    /// A watch on the exit status, for pumps that gate on process exit.
    pub(crate) fn status_watch(&self) -> watch::Receiver<Option<i32>> {
        self.status_rx.clone()
    }

    /// Wait for the process to exit and return its exit code.
    pub async fn wait(&self) -> i32 {
        wait_exit(&mut self.status_rx.clone()).await
    }

    /// Shut the process down: wait up to `grace` for natural exit, then
    /// force-kill and wait once more.
    ///
    /// The post-kill wait is bounded as well; if the process still has not
    /// been reaped the supervisor detaches and reports the failure rather
    /// than blocking the caller indefinitely.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the process survives the forced kill.
    pub async fn terminate(&self, grace: Duration) -> Result<i32> {
        if let Ok(code) = tokio::time::timeout(grace, self.wait()).await {
            return Ok(code);
        }

        tracing::debug!(pid = ?self.pid, "process did not exit within grace period, killing");
        let _ = self.kill_tx.send(()).await;

        match tokio::time::timeout(KILL_WAIT, self.wait()).await {
            Ok(code) => Ok(code),
            Err(_) => {
                tracing::error!(pid = ?self.pid, "process survived forced kill, detaching");
                Err(TransportError::Connection(
                    "process did not exit after forced kill".to_string(),
                ))
            }
        }
    }

    /// Send SIGINT to the child (string-mode interrupt).
    ///
    /// # Errors
    ///
    /// Returns a connection error if the process has already exited or the
    /// signal cannot be delivered. Unsupported off Unix.
    #[cfg(unix)]
    pub fn interrupt(&self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if self.exit_code().is_some() {
            return Err(TransportError::not_connected());
        }
        let pid = self.pid.ok_or_else(TransportError::not_connected)?;
        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        kill(nix_pid, Signal::SIGINT)
            .map_err(|err| TransportError::Connection(format!("failed to signal process: {err}")))
    }

    /// Send SIGINT to the child (string-mode interrupt).
    ///
    /// # Errors
    ///
    /// Always fails on non-Unix platforms.
    #[cfg(not(unix))]
    pub fn interrupt(&self) -> Result<()> {
        Err(TransportError::Connection(
            "process interrupt is not supported on this platform".to_string(),
        ))
    }
}

fn take_stream<T>(stream: Option<T>, name: &str) -> Result<T> {
    stream.ok_or_else(|| TransportError::Connection(format!("child {name} unavailable")))
}

/// Wait on a status watch until an exit code is published.
pub(crate) async fn wait_exit(status: &mut watch::Receiver<Option<i32>>) -> i32 {
    loop {
        if let Some(code) = *status.borrow_and_update() {
            return code;
        }
        if status.changed().await.is_err() {
            // Waiter task is gone; report as signal-style termination.
            return (*status.borrow()).unwrap_or(SIGNAL_EXIT_CODE);
        }
    }
}

/// Owns the child: waits for exit, honoring kill requests along the way.
async fn run_waiter(
    mut child: Child,
    mut kill_rx: mpsc::Receiver<()>,
    status_tx: watch::Sender<Option<i32>>,
) {
    let status = loop {
        tokio::select! {
            result = child.wait() => break result,
            Some(()) = kill_rx.recv() => {
                if let Err(err) = child.start_kill() {
                    tracing::warn!(error = %err, "failed to kill child process");
                }
            }
        }
    };

    let code = match status {
        Ok(status) => status.code().unwrap_or(SIGNAL_EXIT_CODE),
        Err(err) => {
            tracing::warn!(error = %err, "failed to wait on child process");
            SIGNAL_EXIT_CODE
        }
    };
    tracing::debug!(exit_code = code, "process exited");
    let _ = status_tx.send(Some(code));
}
