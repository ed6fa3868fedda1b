//! Stderr collector: bounded, time-boxed capture attached to process-exit
//! errors.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::message::MessageResult;
use crate::transport::process::wait_exit;
use crate::transport::stdout::deliver;

/// Maximum cumulative bytes of stderr kept before truncation.
pub const MAX_STDERR_SIZE: usize = 10 * 1024 * 1024;

/// Maximum duration stderr is collected before stopping early.
pub const STDERR_TIMEOUT: Duration = Duration::from_secs(30);

/// Start the stderr pump.
///
/// Collects stderr within the size and time bounds, then gates on the exit
/// code: a non-zero exit emits exactly one process-exit error carrying the
/// captured text (possibly empty); a zero exit emits nothing, since stderr
/// alone is not evidence of failure. Cancellation exits without emitting.
pub(crate) fn spawn_stderr_pump<R>(
    stderr: R,
    mut status: watch::Receiver<Option<i32>>,
    out: mpsc::Sender<MessageResult>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let captured = tokio::select! {
            lines = collect_stderr(stderr, MAX_STDERR_SIZE, STDERR_TIMEOUT) => lines,
            () = cancel.cancelled() => return,
        };

        let exit_code = tokio::select! {
            code = wait_exit(&mut status) => code,
            () = cancel.cancelled() => return,
        };

        if exit_code != 0 {
            let err = TransportError::ProcessExit {
                exit_code,
                stderr: captured.join("\n"),
            };
            let _ = deliver(&out, Err(err), &cancel).await;
        } else if !captured.is_empty() {
            tracing::debug!(lines = captured.len(), "stderr captured on clean exit");
        }
    })
}

/// Drain `stderr` into a line buffer bounded by `max_size` bytes and
/// `timeout` overall.
///
/// Once the size bound would be exceeded a truncation marker is appended
/// and the rest of the stream is drained without storing it, so the child
/// can keep writing. Once the timeout elapses a timeout marker is appended
/// and collection stops early.
pub(crate) async fn collect_stderr<R>(stderr: R, max_size: usize, timeout: Duration) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let deadline = Instant::now() + timeout;
    let mut lines = BufReader::new(stderr).lines();
    let mut captured: Vec<String> = Vec::new();
    let mut size = 0usize;
    let mut truncated = false;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            captured.push(timeout_marker(timeout));
            break;
        }

        match tokio::time::timeout(remaining, lines.next_line()).await {
            Err(_) => {
                captured.push(timeout_marker(timeout));
                break;
            }
            Ok(Ok(None)) => break,
            Ok(Ok(Some(line))) => {
                if truncated {
                    continue;
                }
                if size + line.len() > max_size {
                    captured.push(format!("[stderr truncated after {size} bytes]"));
                    truncated = true;
                    continue;
                }
                size += line.len();
                captured.push(line);
            }
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "stderr read failed");
                break;
            }
        }
    }

    captured
}

fn timeout_marker(timeout: Duration) -> String {
    format!("[stderr collection timed out after {timeout:?}]")
}
