//! Stdout reader: reassembles newline-delimited JSON records from partial
//! reads and routes them to the caller or the control registry.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::message::{InboundMessage, MessageResult};
use crate::transport::control::ControlRegistry;

/// Maximum bytes the accumulator may hold before an overflow is reported.
pub const MAX_JSON_BUFFER: usize = 1024 * 1024;

/// Outcome of feeding one fragment to the accumulator.
#[derive(Debug)]
pub(crate) enum Accumulated {
    /// The buffer parsed as a complete record; the buffer was reset.
    Complete(serde_json::Value),
    /// More input is needed before the buffer parses.
    Partial,
    /// The buffer exceeded its bound before parsing; it was reset.
    Overflow,
}

/// Growable buffer that reassembles JSON records split across reads.
///
/// The buffer is reset to empty on every successful parse and on every
/// overflow; it never grows past its bound.
pub(crate) struct JsonAccumulator {
    buf: String,
    limit: usize,
}

impl JsonAccumulator {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
        }
    }

    pub(crate) fn push(&mut self, fragment: &str) -> Accumulated {
        self.buf.push_str(fragment);
        if self.buf.len() > self.limit {
            self.buf.clear();
            return Accumulated::Overflow;
        }
        match serde_json::from_str(&self.buf) {
            Ok(value) => {
                self.buf.clear();
                Accumulated::Complete(value)
            }
            Err(_) => Accumulated::Partial,
        }
    }
}

/// Start the stdout pump.
///
/// Reads line by line until EOF; empty lines are ignored, and each physical
/// line is split on internal newlines so embedded records are handled
/// individually. Overflows are reported on the channel without ending the
/// stream; a read error is forwarded before the pump exits. Control
/// responses are resolved against `control` and never forwarded.
/// Cancellation ends the read loop even when the pipe never reaches EOF,
/// as happens when a kill-resistant child keeps its stdout open.
pub(crate) fn spawn_stdout_pump<R>(
    stdout: R,
    out: mpsc::Sender<MessageResult>,
    control: ControlRegistry,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut accumulator = JsonAccumulator::new(MAX_JSON_BUFFER);

        loop {
            let next = tokio::select! {
                next = lines.next_line() => next,
                () = cancel.cancelled() => break,
            };
            match next {
                Ok(Some(line)) => {
                    for fragment in line.split('\n') {
                        let fragment = fragment.trim();
                        if fragment.is_empty() {
                            continue;
                        }
                        match accumulator.push(fragment) {
                            Accumulated::Complete(value) => match InboundMessage::classify(value) {
                                InboundMessage::ControlResponse(response) => {
                                    if !control.resolve(response) {
                                        tracing::debug!("dropped unmatched control response");
                                    }
                                }
                                InboundMessage::Domain(value) => {
                                    if !deliver(&out, Ok(value), &cancel).await {
                                        return;
                                    }
                                }
                            },
                            Accumulated::Overflow => {
                                let err = TransportError::BufferOverflow {
                                    limit: MAX_JSON_BUFFER,
                                };
                                if !deliver(&out, Err(err), &cancel).await {
                                    return;
                                }
                            }
                            Accumulated::Partial => {}
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = deliver(&out, Err(TransportError::Io(err)), &cancel).await;
                    break;
                }
            }
        }
        tracing::debug!("stdout pump finished");
    })
}

/// Send one item to the caller, giving up on cancellation or a closed
/// channel. Returns false when the pump should stop.
pub(crate) async fn deliver(
    out: &mpsc::Sender<MessageResult>,
    item: MessageResult,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        result = out.send(item) => result.is_ok(),
        () = cancel.cancelled() => false,
    }
}
