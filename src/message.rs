//! Wire-level record shapes for the newline-delimited JSON protocol.
//!
//! Both directions of the protocol are modeled as tagged unions over the
//! known outer shapes, so routing is exhaustive and checked while the
//! conversational payloads themselves stay opaque. Decoding domain records
//! into typed messages is the caller's responsibility.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

use crate::error::Result;

/// One item on the transport's outbound message channel: a parsed domain
/// record, or an error encountered by one of the stream pumps.
pub type MessageResult = Result<Value>;

/// A user conversation turn.
///
/// Serializes to
/// `{"type":"user","message":{...},"parent_tool_use_id":null,"session_id":...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTurn {
    /// Message payload, typically `{"role":"user","content":<string>}`.
    pub message: Value,
    /// Tool-use the turn responds to, if any.
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    /// Session the turn belongs to. Stamped by the transport when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl UserTurn {
    /// Create a plain-text user turn with no session id assigned yet.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            message: serde_json::json!({
                "role": "user",
                "content": content.into(),
            }),
            parent_tool_use_id: None,
            session_id: None,
        }
    }
}

/// Envelope for an in-band control request, correlated by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequestEnvelope {
    /// Identifier unique for the lifetime of the transport instance.
    pub request_id: String,
    /// Request payload, e.g. `{"subtype":"interrupt"}`.
    pub request: Value,
}

/// A record written to the child's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A user conversation turn.
    User(UserTurn),
    /// An in-band control request (e.g., interrupt).
    ControlRequest(ControlRequestEnvelope),
}

impl OutboundMessage {
    /// Stamp `session_id` onto a user turn that does not carry one yet.
    ///
    /// Control requests are left untouched.
    pub fn stamp_session_id(&mut self, session_id: &str) {
        if let Self::User(turn) = self {
            if turn.session_id.is_none() {
                turn.session_id = Some(session_id.to_string());
            }
        }
    }
}

/// Acknowledgment for a control request, matched by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Identifier of the request this response answers.
    pub request_id: String,
    /// Response kind; `"error"` indicates failure.
    pub subtype: String,
    /// Error message, present when `subtype` is `"error"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Any additional fields the child included.
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl ControlResponse {
    /// Returns true if this response reports an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.subtype == "error"
    }
}

/// The classified form of one line of child-process output.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A control response, consumed internally and never forwarded.
    ControlResponse(ControlResponse),
    /// Any other record, forwarded to the caller opaquely.
    Domain(Value),
}

impl InboundMessage {
    /// Classify a parsed record from the child's stdout.
    ///
    /// A record is a control response only when its `type` discriminator is
    /// `control_response` and its `response` payload carries the expected
    /// structure including a `request_id`; anything else is a domain record.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        if value.get("type").and_then(Value::as_str) == Some("control_response") {
            if let Some(response) = value.get("response") {
                if let Ok(parsed) = serde_json::from_value::<ControlResponse>(response.clone()) {
                    return Self::ControlResponse(parsed);
                }
            }
        }
        Self::Domain(value)
    }
}

/// A caller-supplied source of outbound records for streaming mode.
///
/// The prompt pump calls [`next_message`](Self::next_message) repeatedly
/// until it returns `Ok(None)` (end of stream) or an error. The pump's wait
/// is cancelable: dropping the in-flight future must leave the source in a
/// consistent state.
#[async_trait]
pub trait PromptSource: Send {
    /// Produce the next outbound record, or `None` at end of stream.
    async fn next_message(&mut self) -> Result<Option<OutboundMessage>>;
}

/// A prompt source that ends immediately, for interactive sessions where all
/// records are sent through `send_request`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyPrompt;

#[async_trait]
impl PromptSource for EmptyPrompt {
    async fn next_message(&mut self) -> Result<Option<OutboundMessage>> {
        Ok(None)
    }
}

/// A prompt source backed by a fixed batch of records, yielded in order.
#[derive(Debug, Clone, Default)]
pub struct QueuedPrompt {
    queue: VecDeque<OutboundMessage>,
}

impl QueuedPrompt {
    /// Create a source that yields the given records then ends.
    #[must_use]
    pub fn new(messages: impl IntoIterator<Item = OutboundMessage>) -> Self {
        Self {
            queue: messages.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PromptSource for QueuedPrompt {
    async fn next_message(&mut self) -> Result<Option<OutboundMessage>> {
        Ok(self.queue.pop_front())
    }
}
