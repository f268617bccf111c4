//! Stale-lock recovery: a session record exists, but `session/load` reports
//! the lock is held by a PID that isn't running. The router must treat the
//! lock as stale, replace the session record, and resume rather than give up.

use agent_relay::messaging::recording::Recorded;
use agent_relay::router::InboundMessage;

use super::fake_agent;
use super::support::harness;

#[tokio::test]
async fn dead_lock_holder_triggers_a_fresh_session_and_resumes() {
    let harness = harness(1, &["u1"], &fake_agent::stale_lock_script()).await;

    harness
        .sessions
        .upsert_session("u1", "t1", "sid-old", "/workspace")
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
        .expect("the record survives recovery");
    assert_eq!(
        record.acp_session_id, "sid-recovered",
        "the stale session id must be replaced by the freshly created one"
    );

    let calls = harness.messaging.calls();
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, Recorded::Message { text, .. } if text.contains("stale"))),
        "the user should be told their old lock was stale, got: {calls:?}"
    );

    assert_eq!(harness.pool.queue_len().await, 0, "the slot must be released after recovery");
}
