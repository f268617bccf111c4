//! Atomic handoff: with exactly one process slot, two concurrent messages
//! from two different users must both be served — one immediately, the
//! other handed the same slot the instant it frees up — and each user ends
//! up with their own session record and their own reply.

use std::time::Duration;

use agent_relay::messaging::recording::Recorded;
use agent_relay::router::InboundMessage;

use super::fake_agent;
use super::support::harness;

#[tokio::test]
async fn one_slot_serves_both_concurrent_users_without_losing_either() {
    let harness = harness(1, &["a_user", "b_user"], &fake_agent::happy_path_script_with_delay(1)).await;

    let router_a = harness.router.clone();
    let a_task = tokio::spawn(async move {
        router_a
            .handle_inbound_message(InboundMessage {
                user_id: "a_user".into(),
                topic_id: "a_topic".into(),
                text: "from a".into(),
                attachments: vec![],
            })
            .await
            .expect("a's handle_inbound_message")
    });

    tokio::time::sleep(Duration::from_millis(200)).await;

    let router_b = harness.router.clone();
    let b_task = tokio::spawn(async move {
        router_b
            .handle_inbound_message(InboundMessage {
                user_id: "b_user".into(),
                topic_id: "b_topic".into(),
                text: "from b".into(),
                attachments: vec![],
            })
            .await
            .expect("b's handle_inbound_message")
    });

    a_task.await.expect("a task joined");
    b_task.await.expect("b task joined");
    // The handed-off turn goes through the same scripted delay the first one did.
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    assert_eq!(harness.pool.queue_len().await, 0, "nothing should be left queued once both turns finish");

    let a_record = harness
        .sessions
        .get_session("a_user", "a_topic")
        .await
        .expect("get_session")
        .expect("a must have its own session record");
    let b_record = harness
        .sessions
        .get_session("b_user", "b_topic")
        .await
        .expect("get_session")
        .expect("b must have its own session record");
    assert_ne!(a_record.acp_session_id, b_record.acp_session_id);

    let calls = harness.messaging.calls();
    let a_dest_replied = calls
        .iter()
        .any(|c| matches!(c, Recorded::Message { dest, text } if dest.user_id == "a_user" && text.contains("Hi there")));
    let b_dest_replied = calls
        .iter()
        .any(|c| matches!(c, Recorded::Message { dest, text } if dest.user_id == "b_user" && text.contains("Hi there")));
    assert!(a_dest_replied, "a must receive a reply, got: {calls:?}");
    assert!(b_dest_replied, "b must receive a reply, got: {calls:?}");
}
