//! Control-request correlation: pending response slots keyed by request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Result, TransportError};
use crate::message::{ControlRequestEnvelope, ControlResponse, OutboundMessage};
use crate::transport::stdin::StdinWriter;

/// Registry of in-flight control requests.
///
/// The stdout pump resolves slots directly as responses arrive; request ids
/// are a monotonic counter combined with a timestamp, unique for the
/// lifetime of the transport instance. Each entry is removed exactly once:
/// on resolution, on cancellation, or when the registry is cleared at
/// disconnect.
#[derive(Clone, Default)]
pub(crate) struct ControlRegistry {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ControlResponse>>>>,
    counter: Arc<AtomicU64>,
}

impl ControlRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn next_request_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("req_{seq}_{nanos}")
    }

    /// Register a pending slot for `request_id` and return its receiver.
    pub(crate) fn register(&self, request_id: &str) -> oneshot::Receiver<ControlResponse> {
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(request_id.to_string(), tx);
        rx
    }

    /// Resolve the pending slot matching the response's id.
    ///
    /// Returns false when no slot matches (a canceled or unknown request);
    /// the response is then dropped silently.
    pub(crate) fn resolve(&self, response: ControlResponse) -> bool {
        let slot = self.lock_pending().remove(&response.request_id);
        match slot {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Remove a pending slot without resolving it.
    pub(crate) fn remove(&self, request_id: &str) {
        self.lock_pending().remove(request_id);
    }

    /// Drop every pending slot, failing any waiting callers.
    pub(crate) fn clear(&self) {
        self.lock_pending().clear();
    }

    /// Issue a control request and wait for the matching response.
    ///
    /// The slot is registered before the request is written, so a response
    /// can never race the registration. Dropping the returned future (e.g.
    /// through `tokio::time::timeout`) cancels the wait and removes the
    /// slot, so a late response with the same id is dropped silently.
    ///
    /// # Errors
    ///
    /// Fails with a control-request error when the child answers with an
    /// `error` subtype, and with a connection error when the transport shuts
    /// down before a response arrives.
    pub(crate) async fn request(
        &self,
        payload: Value,
        writer: &StdinWriter,
    ) -> Result<ControlResponse> {
        let request_id = self.next_request_id();
        let receiver = self.register(&request_id);
        let _guard = PendingGuard {
            registry: self,
            request_id: request_id.clone(),
        };

        let envelope = OutboundMessage::ControlRequest(ControlRequestEnvelope {
            request_id,
            request: payload,
        });
        writer.enqueue(&envelope).await?;

        let response = receiver.await.map_err(|_| {
            TransportError::ControlRequest("transport closed before response".to_string())
        })?;

        if response.is_error() {
            let detail = response
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(TransportError::ControlRequest(detail));
        }
        Ok(response)
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<ControlResponse>>> {
        // Slot operations cannot panic while holding the lock, so a poisoned
        // mutex still holds a usable table.
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Removes the pending slot when a request is abandoned before resolution.
struct PendingGuard<'a> {
    registry: &'a ControlRegistry,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.request_id);
    }
}
