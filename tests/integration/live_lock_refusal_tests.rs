//! Live-lock refusal: a session record exists, `session/load` reports the
//! lock is held by a PID that's genuinely alive, and the router must back
//! off rather than stomp on the other process's session.

use agent_relay::messaging::recording::Recorded;
use agent_relay::router::InboundMessage;

use super::fake_agent;
use super::support::harness;

#[tokio::test]
async fn live_lock_holder_is_left_alone_and_the_user_is_told_to_retry() {
    let harness = harness(1, &["u1"], &fake_agent::live_lock_script()).await;

    harness
        .sessions
        .upsert_session("u1", "t1", "sid-busy", "/workspace")
        .await
        .expect("seed an existing session record");

    harness
        .router
        .handle_inbound_message(InboundMessage {
            user_id: "u1".into(),
            topic_id: "t1".into(),
            text: "are you still there?".into(),
            attachments: vec![],
        })
        .await
        .expect("handle_inbound_message");

    let record = harness
        .sessions
        .get_session("u1", "t1")
        .await
        .expect("get_session")
        .expect("the record must still exist");
    assert_eq!(
        record.acp_session_id, "sid-busy",
        "a live lock holder's session id must never be replaced"
    );

    let calls = harness.messaging.calls();
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, Recorded::Message { text, .. } if text.contains("temporarily busy"))),
        "the user must be asked to retry, got: {calls:?}"
    );
    assert!(
        !calls.iter().any(|c| matches!(c, Recorded::Message { text, .. } if text.contains("stale"))),
        "a live lock is not a stale lock and must not be reported as one"
    );

    assert_eq!(harness.pool.queue_len().await, 0, "the slot must still be released back to idle");
}
