//! Transport module tests.

use std::sync::Once;

mod control_test;
mod streaming_test;

static TRACING: Once = Once::new();

/// Route transport spans to the test writer; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Verify the public transport types are exported from the library.
#[test]
fn transport_types_exported() {
    use claude_transport::error::{LaunchError, TransportError};
    use claude_transport::message::{EmptyPrompt, InboundMessage, OutboundMessage, UserTurn};
    use claude_transport::transport::{
        ConnectionState, SubprocessTransport, TransportConfig, CHANNEL_CAPACITY, GRACE_PERIOD,
        MAX_JSON_BUFFER, MAX_STDERR_SIZE, STDERR_TIMEOUT,
    };

    let config = TransportConfig::new("claude");
    let transport = SubprocessTransport::streaming(config, Box::new(EmptyPrompt));
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert!(transport.is_streaming());

    let _ = OutboundMessage::User(UserTurn::text("hello"));
    let _ = InboundMessage::Domain(serde_json::json!({"type": "result"}));
    let _: TransportError = LaunchError::Spawn(std::io::Error::other("x")).into();

    assert_eq!(MAX_JSON_BUFFER, 1024 * 1024);
    assert_eq!(MAX_STDERR_SIZE, 10 * 1024 * 1024);
    assert_eq!(STDERR_TIMEOUT.as_secs(), 30);
    assert_eq!(GRACE_PERIOD.as_secs(), 5);
    assert_eq!(CHANNEL_CAPACITY, 100);
}
