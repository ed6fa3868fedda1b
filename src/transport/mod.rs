//! Subprocess transport: process lifecycle, stream pumps, and the
//! connection state machine.
//!
//! The facade owns one task per stream direction (stdin writer, stdout
//! reader, stderr collector) plus, in streaming mode, a pump draining the
//! caller's prompt source. All cross-task communication goes through
//! bounded channels; shutdown is coordinated with a cancellation token and
//! a grace-then-kill protocol.

mod config;
mod control;
mod process;
mod stderr;
mod stdin;
mod stdout;

pub use config::*;
pub use process::*;
pub use stderr::{MAX_STDERR_SIZE, STDERR_TIMEOUT};
pub use stdout::MAX_JSON_BUFFER;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};
use crate::message::{ControlResponse, MessageResult, OutboundMessage, PromptSource};
use crate::transport::control::ControlRegistry;
use crate::transport::stdin::{spawn_prompt_pump, StdinWriter};
use crate::transport::stdout::spawn_stdout_pump;
use crate::transport::stderr::spawn_stderr_pump;

/// Grace period a terminated process is given to exit voluntarily before
/// being force-killed.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Capacity of the outbound message channel.
pub const CHANNEL_CAPACITY: usize = 100;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No process is running.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// The process is running and the pumps are active.
    Connected,
    /// A disconnect is tearing the pumps down.
    Disconnecting,
}

/// Interface to a Claude Code CLI connection.
#[async_trait]
pub trait Transport: Send {
    /// Launch the process and start the stream pumps.
    async fn connect(&mut self) -> Result<()>;

    /// Tear down the pumps and terminate the process. Idempotent.
    async fn disconnect(&mut self) -> Result<()>;

    /// Send further records (streaming mode only), stamping `session_id`
    /// onto user turns lacking one.
    async fn send_request(
        &mut self,
        messages: Vec<OutboundMessage>,
        session_id: Option<&str>,
    ) -> Result<()>;

    /// Interrupt the running turn.
    async fn interrupt(&mut self) -> Result<()>;

    /// Take the outbound message channel. Yields `Some` exactly once; the
    /// ordering guarantee holds for a single logical reader.
    fn messages(&mut self) -> Option<mpsc::Receiver<MessageResult>>;

    /// Whether the transport is connected and the process is alive.
    fn is_connected(&self) -> bool;
}

/// Transport that drives the CLI as a child process over its standard
/// streams.
pub struct SubprocessTransport {
    config: TransportConfig,
    streaming: bool,
    prompt: Option<Box<dyn PromptSource>>,
    state: ConnectionState,
    supervisor: Option<ProcessSupervisor>,
    stdin: Option<StdinWriter>,
    control: ControlRegistry,
    messages_rx: Option<mpsc::Receiver<MessageResult>>,
    cancel: CancellationToken,
    pumps: Vec<JoinHandle<()>>,
}

impl SubprocessTransport {
    /// Create a one-shot ("string prompt") transport.
    ///
    /// The entire prompt is assumed to be folded into the launch arguments
    /// by the caller; stdin is closed immediately after launch and
    /// `send_request` always fails.
    #[must_use]
    pub fn oneshot(config: TransportConfig) -> Self {
        Self::new(config, false, None)
    }

    /// Create a bidirectional streaming transport fed by `prompt`.
    ///
    /// Use [`EmptyPrompt`](crate::message::EmptyPrompt) for interactive
    /// sessions where every record is sent through `send_request`.
    #[must_use]
    pub fn streaming(config: TransportConfig, prompt: Box<dyn PromptSource>) -> Self {
        Self::new(config, true, Some(prompt))
    }

    fn new(config: TransportConfig, streaming: bool, prompt: Option<Box<dyn PromptSource>>) -> Self {
        Self {
            config,
            streaming,
            prompt,
            state: ConnectionState::Disconnected,
            supervisor: None,
            stdin: None,
            control: ControlRegistry::new(),
            messages_rx: None,
            cancel: CancellationToken::new(),
            pumps: Vec::new(),
        }
    }

    /// The current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the transport runs in streaming mode.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Take the outbound messages as a `Stream`.
    ///
    /// Like [`Transport::messages`], yields `Some` exactly once.
    pub fn message_stream(&mut self) -> Option<impl futures_core::Stream<Item = MessageResult>> {
        self.messages_rx.take().map(ReceiverStream::new)
    }

    /// Issue a raw control request and wait for the matching response.
    ///
    /// Wrap the call in [`tokio::time::timeout`] to bound the wait; dropping
    /// the future cancels the request cleanly.
    ///
    /// # Errors
    ///
    /// Fails immediately, without registering a request, when the transport
    /// is not connected, not streaming, or stdin is unavailable.
    pub async fn control_request(&mut self, payload: Value) -> Result<ControlResponse> {
        if !self.streaming {
            return Err(TransportError::Connection(
                "control requests require streaming mode".to_string(),
            ));
        }
        if self.state != ConnectionState::Connected {
            return Err(TransportError::not_connected());
        }
        let writer = self
            .stdin
            .clone()
            .ok_or_else(|| TransportError::Connection("stdin unavailable".to_string()))?;

        self.control.request(payload, &writer).await
    }

    fn do_connect(&mut self) -> Result<()> {
        let (supervisor, streams) = ProcessSupervisor::launch(&self.config)?;
        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut pumps = Vec::new();

        if self.streaming {
            let (writer, writer_handle) = StdinWriter::spawn(streams.stdin, out_tx.clone());
            pumps.push(writer_handle);

            if let Some(source) = self.prompt.take() {
                pumps.push(spawn_prompt_pump(
                    source,
                    writer.clone(),
                    self.config.session_id().to_string(),
                    self.config.close_stdin_after_prompt(),
                    out_tx.clone(),
                    cancel.clone(),
                ));
            }
            self.stdin = Some(writer);
        } else {
            // One-shot mode: the prompt traveled in the launch arguments, so
            // stdin closes right away.
            drop(streams.stdin);
        }

        pumps.push(spawn_stdout_pump(
            streams.stdout,
            out_tx.clone(),
            self.control.clone(),
            cancel.clone(),
        ));
        pumps.push(spawn_stderr_pump(
            streams.stderr,
            supervisor.status_watch(),
            out_tx,
            cancel.clone(),
        ));

        self.supervisor = Some(supervisor);
        self.messages_rx = Some(out_rx);
        self.cancel = cancel;
        self.pumps = pumps;
        Ok(())
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                return Err(TransportError::Connection("already connected".to_string()));
            }
            ConnectionState::Disconnecting => {
                return Err(TransportError::Connection(
                    "disconnect in progress".to_string(),
                ));
            }
            ConnectionState::Disconnected => {}
        }

        self.state = ConnectionState::Connecting;
        match self.do_connect() {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                tracing::debug!(streaming = self.streaming, "transport connected");
                Ok(())
            }
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.state = ConnectionState::Disconnecting;

        // Flush queued records, then let the writer drop the pipe.
        if let Some(writer) = self.stdin.take() {
            writer.close().await;
        }
        self.cancel.cancel();

        let terminated = match &self.supervisor {
            Some(supervisor) => supervisor.terminate(GRACE_PERIOD).await.map(|_| ()),
            None => Ok(()),
        };

        for pump in self.pumps.drain(..) {
            if let Err(err) = pump.await {
                tracing::warn!(error = %err, "stream pump panicked during shutdown");
            }
        }

        self.control.clear();
        self.supervisor = None;
        self.cancel = CancellationToken::new();
        self.state = ConnectionState::Disconnected;
        tracing::debug!("transport disconnected");
        terminated
    }

    async fn send_request(
        &mut self,
        messages: Vec<OutboundMessage>,
        session_id: Option<&str>,
    ) -> Result<()> {
        if !self.streaming {
            return Err(TransportError::Connection(
                "send_request only works in streaming mode".to_string(),
            ));
        }
        if self.state != ConnectionState::Connected {
            return Err(TransportError::not_connected());
        }
        let writer = self
            .stdin
            .as_ref()
            .ok_or_else(TransportError::not_connected)?;

        let session_id = session_id.unwrap_or_else(|| self.config.session_id());
        for mut message in messages {
            message.stamp_session_id(session_id);
            // Records already written stay written on a mid-batch failure.
            writer.enqueue(&message).await?;
        }
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<()> {
        if self.streaming {
            self.control_request(serde_json::json!({"subtype": "interrupt"}))
                .await?;
            return Ok(());
        }

        // One-shot mode has no control channel; signal the process instead.
        if self.state != ConnectionState::Connected {
            return Err(TransportError::not_connected());
        }
        self.supervisor
            .as_ref()
            .ok_or_else(TransportError::not_connected)?
            .interrupt()
    }

    fn messages(&mut self) -> Option<mpsc::Receiver<MessageResult>> {
        self.messages_rx.take()
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
            && self
                .supervisor
                .as_ref()
                .is_some_and(|supervisor| supervisor.exit_code().is_none())
    }
}
