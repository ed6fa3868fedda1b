//! Tests for streaming mode: send ordering, session stamping, and the
//! prompt-source pump.

use claude_transport::error::TransportError;
use claude_transport::message::{EmptyPrompt, OutboundMessage, QueuedPrompt, UserTurn};
use claude_transport::transport::{SubprocessTransport, Transport, TransportConfig};

fn cat_config() -> TransportConfig {
    super::init_tracing();
    // `cat` echoes every record we write back at us, so the child's view of
    // stdin ordering is exactly what we receive on stdout.
    TransportConfig::new("cat")
}

fn user_turn(content: &str) -> OutboundMessage {
    OutboundMessage::User(UserTurn::text(content))
}

#[cfg(unix)]
#[tokio::test]
async fn send_request_preserves_submission_order() {
    let mut transport =
        SubprocessTransport::streaming(cat_config(), Box::new(EmptyPrompt));
    transport.connect().await.unwrap();
    let mut messages = transport.messages().unwrap();

    let turns: Vec<OutboundMessage> = (1..=5).map(|i| user_turn(&format!("turn {i}"))).collect();
    transport.send_request(turns, Some("s1")).await.unwrap();

    for i in 1..=5 {
        let record = messages.recv().await.unwrap().unwrap();
        assert_eq!(
            record["message"]["content"],
            format!("turn {i}"),
            "records must arrive in submission order"
        );
        assert_eq!(record["session_id"], "s1");
        assert_eq!(record["type"], "user");
    }

    transport.disconnect().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn send_request_stamps_configured_session_id() {
    let config = cat_config().with_session_id("sess-42");
    let mut transport = SubprocessTransport::streaming(config, Box::new(EmptyPrompt));
    transport.connect().await.unwrap();
    let mut messages = transport.messages().unwrap();

    transport
        .send_request(vec![user_turn("hello")], None)
        .await
        .unwrap();

    let record = messages.recv().await.unwrap().unwrap();
    assert_eq!(record["session_id"], "sess-42");

    transport.disconnect().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn explicit_session_id_is_preserved() {
    let mut transport =
        SubprocessTransport::streaming(cat_config(), Box::new(EmptyPrompt));
    transport.connect().await.unwrap();
    let mut messages = transport.messages().unwrap();

    let turn = OutboundMessage::User(UserTurn {
        session_id: Some("explicit".to_string()),
        ..UserTurn::text("hi")
    });
    transport.send_request(vec![turn], Some("other")).await.unwrap();

    let record = messages.recv().await.unwrap().unwrap();
    assert_eq!(record["session_id"], "explicit");

    transport.disconnect().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn prompt_source_drains_then_closes_stdin() {
    let prompt = QueuedPrompt::new(vec![user_turn("one"), user_turn("two")]);
    let config = cat_config().with_close_stdin_after_prompt(true);
    let mut transport = SubprocessTransport::streaming(config, Box::new(prompt));
    transport.connect().await.unwrap();
    let mut messages = transport.messages().unwrap();

    let first = messages.recv().await.unwrap().unwrap();
    let second = messages.recv().await.unwrap().unwrap();
    assert_eq!(first["message"]["content"], "one");
    assert_eq!(second["message"]["content"], "two");
    // Default session id was stamped by the pump.
    assert_eq!(first["session_id"], "default");

    // Stdin closed after the prompt, so `cat` exits cleanly and the channel
    // closes with no error, before any disconnect.
    assert!(messages.recv().await.is_none());

    transport.disconnect().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn send_request_fails_after_disconnect() {
    let mut transport =
        SubprocessTransport::streaming(cat_config(), Box::new(EmptyPrompt));
    transport.connect().await.unwrap();
    transport.disconnect().await.unwrap();

    let result = transport.send_request(vec![user_turn("late")], None).await;
    assert!(matches!(result, Err(TransportError::Connection(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn message_stream_adapter_yields_records() {
    use futures_util::StreamExt;

    let prompt = QueuedPrompt::new(vec![user_turn("ping")]);
    let config = cat_config().with_close_stdin_after_prompt(true);
    let mut transport = SubprocessTransport::streaming(config, Box::new(prompt));
    transport.connect().await.unwrap();

    let mut stream = transport.message_stream().expect("stream taken once");
    let record = stream.next().await.unwrap().unwrap();
    assert_eq!(record["message"]["content"], "ping");
    assert!(stream.next().await.is_none());

    transport.disconnect().await.unwrap();
}
