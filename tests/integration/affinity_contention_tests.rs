//! Affinity under contention: conversation B is mid-turn on the pool's one
//! slot when conversation A's message arrives. A cannot be served
//! immediately and is enqueued; once B's turn completes, `release_and_dequeue`
//! hands the same slot to A without A ever needing a process of its own.

use std::time::Duration;

use agent_relay::router::InboundMessage;

use super::fake_agent;
use super::support::harness;

#[tokio::test]
async fn queued_conversation_is_handed_the_slot_once_the_busy_one_finishes() {
    // session/prompt sleeps before replying, giving the test a window in
    // which the one slot is observably busy.
    let harness = harness(1, &["a_user", "b_user"], &fake_agent::happy_path_script_with_delay(1)).await;

    let router = harness.router.clone();
    let b_task = tokio::spawn(async move {
        router
            .handle_inbound_message(InboundMessage {
                user_id: "b_user".into(),
                topic_id: "b_topic".into(),
                text: "b's message".into(),
                attachments: vec![],
            })
            .await
            .expect("b's handle_inbound_message")
    });

    // Give B time to acquire the slot and enter its (sleeping) prompt turn.
    tokio::time::sleep(Duration::from_millis(200)).await;

    harness
        .router
        .handle_inbound_message(InboundMessage {
            user_id: "a_user".into(),
            topic_id: "a_topic".into(),
            text: "a's message".into(),
            attachments: vec![],
        })
        .await
        .expect("a's handle_inbound_message");

    assert_eq!(
        harness.pool.queue_len().await,
        1,
        "A must be queued while B is still busy on the only slot"
    );

    b_task.await.expect("b task joined");
    // Let the handed-off turn for A run to completion (it goes through the
    // same one-second scripted delay B did).
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    assert_eq!(harness.pool.queue_len().await, 0, "A must have been dequeued and driven");

    let a_record = harness
        .sessions
        .get_session("a_user", "a_topic")
        .await
        .expect("get_session")
        .expect("A must have received its own session");
    let b_record = harness
        .sessions
        .get_session("b_user", "b_topic")
        .await
        .expect("get_session")
        .expect("B must have received its own session");
    assert_ne!(
        a_record.acp_session_id, b_record.acp_session_id,
        "A and B preserve distinct sessions despite sharing one slot"
    );
}
