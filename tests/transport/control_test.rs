//! Tests for in-band control requests and interrupts.

use std::time::Duration;

use claude_transport::error::TransportError;
use claude_transport::message::{EmptyPrompt, OutboundMessage, UserTurn};
use claude_transport::transport::{SubprocessTransport, Transport, TransportConfig};

/// A scripted child that echoes user turns and acknowledges every control
/// request with the given subtype line.
#[cfg(unix)]
fn responder(subtype_fields: &str) -> TransportConfig {
    super::init_tracing();
    let script = format!(
        r#"while IFS= read -r line; do
  case "$line" in
    *control_request*)
      id=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
      printf '{{"type":"control_response","response":{{"request_id":"%s",{subtype_fields}}}}}\n' "$id"
      ;;
    *) printf '%s\n' "$line" ;;
  esac
done"#
    );
    TransportConfig::new("sh").with_args(["-c", &script])
}

#[cfg(unix)]
#[tokio::test]
async fn interrupt_round_trip_in_streaming_mode() {
    let config = responder(r#""subtype":"success""#);
    let mut transport = SubprocessTransport::streaming(config, Box::new(EmptyPrompt));
    transport.connect().await.unwrap();
    let mut messages = transport.messages().unwrap();

    transport
        .send_request(
            vec![OutboundMessage::User(UserTurn::text("do something"))],
            Some("s1"),
        )
        .await
        .unwrap();
    let echoed = messages.recv().await.unwrap().unwrap();
    assert_eq!(echoed["session_id"], "s1");

    // Control response is consumed internally; the call returns cleanly and
    // nothing extra appears on the message channel.
    transport.interrupt().await.unwrap();

    transport.disconnect().await.unwrap();
    assert!(messages.recv().await.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn error_response_fails_the_control_request() {
    let config = responder(r#""subtype":"error","error":"interrupt rejected""#);
    let mut transport = SubprocessTransport::streaming(config, Box::new(EmptyPrompt));
    transport.connect().await.unwrap();

    match transport.interrupt().await {
        Err(TransportError::ControlRequest(detail)) => {
            assert_eq!(detail, "interrupt rejected");
        }
        other => panic!("expected control request error, got {other:?}"),
    }

    transport.disconnect().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn control_request_times_out_when_child_never_responds() {
    // `cat` echoes the control request as a domain record and never answers
    // it, so the caller's timeout fires and cancels the wait.
    let mut transport =
        SubprocessTransport::streaming(TransportConfig::new("cat"), Box::new(EmptyPrompt));
    transport.connect().await.unwrap();
    let mut messages = transport.messages().unwrap();

    let result =
        tokio::time::timeout(Duration::from_millis(200), transport.interrupt()).await;
    assert!(result.is_err(), "interrupt should still be pending");

    // The echoed request is a plain domain record from the transport's view.
    let echoed = messages.recv().await.unwrap().unwrap();
    assert_eq!(echoed["type"], "control_request");

    transport.disconnect().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn oneshot_interrupt_signals_the_process() {
    let config = TransportConfig::new("sleep").with_args(["10"]);
    let mut transport = SubprocessTransport::oneshot(config);
    transport.connect().await.unwrap();
    let mut messages = transport.messages().unwrap();

    transport.interrupt().await.unwrap();

    // SIGINT terminates `sleep`; the signal exit surfaces as a process-exit
    // error once the streams drain.
    match messages.recv().await.unwrap() {
        Err(TransportError::ProcessExit { exit_code, .. }) => assert_eq!(exit_code, -1),
        other => panic!("expected process exit error, got {other:?}"),
    }

    transport.disconnect().await.unwrap();
}

#[tokio::test]
async fn control_request_requires_streaming_mode_connection() {
    let mut transport = SubprocessTransport::streaming(
        TransportConfig::new("cat"),
        Box::new(EmptyPrompt),
    );
    // Never connected: fails immediately without registering anything.
    let result = transport
        .control_request(serde_json::json!({"subtype": "interrupt"}))
        .await;
    assert!(matches!(result, Err(TransportError::Connection(_))));
}
