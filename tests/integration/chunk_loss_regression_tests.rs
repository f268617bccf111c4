//! Chunk-loss regression: the reader enqueues three `agent_message_chunk`
//! notifications and then, in the very same read, the `session/prompt`
//! response itself — a `PromptTurn` that drains notifications biased ahead
//! of the response must not let any of the buffered chunks go missing.

use agent_relay::messaging::recording::Recorded;
use agent_relay::router::InboundMessage;

use super::fake_agent;
use super::support::harness;

#[tokio::test]
async fn all_three_buffered_chunks_reach_the_final_message() {
    let harness = harness(1, &["u1"], &fake_agent::three_chunk_script()).await;

    harness
        .router
        .handle_inbound_message(InboundMessage {
            user_id: "u1".into(),
            topic_id: "t1".into(),
            text: "go".into(),
            attachments: vec![],
        })
        .await
        .expect("handle_inbound_message");

    let calls = harness.messaging.calls();
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, Recorded::Message { text, .. } if text.contains("one two three"))),
        "none of the three chunks may be dropped, got: {calls:?}"
    );

    assert_eq!(harness.pool.queue_len().await, 0);
}
