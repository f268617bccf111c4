//! New-session happy path: no prior session record, a prompt arrives, a
//! fresh ACP session is created, two reply chunks are streamed, and the
//! finalized message reaches the messaging platform before the slot is
//! released back to idle.

use agent_relay::messaging::recording::Recorded;
use agent_relay::router::InboundMessage;

use super::fake_agent;
use super::support::harness;

#[tokio::test]
async fn new_session_produces_a_session_record_and_a_final_reply() {
    let harness = harness(1, &["u1"], &fake_agent::happy_path_script()).await;

    assert!(
        harness.sessions.get_session("u1", "t1").await.expect("get_session").is_none(),
        "no session should exist before the first message"
    );

    harness
        .router
        .handle_inbound_message(InboundMessage {
            user_id: "u1".into(),
            topic_id: "t1".into(),
            text: "hello agent".into(),
            attachments: vec![],
        })
        .await
        .expect("handle_inbound_message");

    let record = harness
        .sessions
        .get_session("u1", "t1")
        .await
        .expect("get_session")
        .expect("a session record must exist after the turn");
    assert_eq!(record.model, "auto", "a brand new session has no model override");
    assert_eq!(record.acp_session_id, "sid-1");

    let calls = harness.messaging.calls();
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, Recorded::Message { text, .. } if text.contains("Hi there"))),
        "the two streamed chunks must be concatenated into one final message, got: {calls:?}"
    );

    assert_eq!(harness.pool.queue_len().await, 0, "the slot must be released, not left busy");
}
