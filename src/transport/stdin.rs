//! Stdin writer: serializes outbound records to the child in submission order.

use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};
use crate::message::{MessageResult, OutboundMessage, PromptSource};

/// Capacity of the internal write queue; a full queue applies backpressure
/// to `enqueue` callers.
pub(crate) const STDIN_QUEUE_CAPACITY: usize = 100;

enum StdinCommand {
    Write(Vec<u8>),
    Close,
}

/// Handle to the stdin writer task.
///
/// Clones share the same bounded queue; records are written to the stream in
/// the order they were accepted by the queue, never reordered. Dropping the
/// last clone closes the queue, which ends the writer task and closes the
/// child's stdin.
#[derive(Clone)]
pub(crate) struct StdinWriter {
    tx: mpsc::Sender<StdinCommand>,
}

impl StdinWriter {
    /// Start the writer task over the child's stdin.
    pub(crate) fn spawn(
        stdin: ChildStdin,
        errors: mpsc::Sender<MessageResult>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(STDIN_QUEUE_CAPACITY);
        let handle = tokio::spawn(run_writer(stdin, rx, errors));
        (Self { tx }, handle)
    }

    /// Serialize one record and queue it for writing, newline-terminated.
    ///
    /// Suspends while the queue is full; dropping the future cancels the
    /// enqueue without corrupting the queue.
    ///
    /// # Errors
    ///
    /// Fails with a connection error once the writer has shut down.
    pub(crate) async fn enqueue(&self, message: &OutboundMessage) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.tx
            .send(StdinCommand::Write(line))
            .await
            .map_err(|_| TransportError::Connection("stdin closed".to_string()))
    }

    /// Ask the writer to close the child's stdin after the queued records
    /// have been written. Best effort.
    pub(crate) async fn close(&self) {
        let _ = self.tx.send(StdinCommand::Close).await;
    }
}

async fn run_writer(
    mut stdin: ChildStdin,
    mut rx: mpsc::Receiver<StdinCommand>,
    errors: mpsc::Sender<MessageResult>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            StdinCommand::Write(line) => {
                if let Err(err) = write_line(&mut stdin, &line).await {
                    tracing::warn!(error = %err, "failed to write to stdin");
                    let _ = errors.send(Err(TransportError::Io(err))).await;
                    break;
                }
            }
            StdinCommand::Close => break,
        }
    }
    // Dropping stdin here closes the pipe and signals EOF to the child.
}

async fn write_line(stdin: &mut ChildStdin, line: &[u8]) -> std::io::Result<()> {
    stdin.write_all(line).await?;
    stdin.flush().await
}

/// Drain a caller-supplied prompt source into the writer until it ends.
///
/// User turns lacking a session id are stamped with `session_id`. Source or
/// write failures are reported on the message channel and end the pump; end
/// of stream optionally closes stdin.
pub(crate) fn spawn_prompt_pump(
    mut source: Box<dyn PromptSource>,
    writer: StdinWriter,
    session_id: String,
    close_stdin_after_prompt: bool,
    errors: mpsc::Sender<MessageResult>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return,
                next = source.next_message() => next,
            };

            match next {
                Ok(Some(mut message)) => {
                    message.stamp_session_id(&session_id);
                    if let Err(err) = writer.enqueue(&message).await {
                        let _ = errors.send(Err(err)).await;
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = errors.send(Err(err)).await;
                    return;
                }
            }
        }

        tracing::debug!("prompt source ended");
        if close_stdin_after_prompt {
            writer.close().await;
        }
    })
}
