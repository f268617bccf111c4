#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

mod integration {
    mod fake_agent;
    mod support;

    mod affinity_contention_tests;
    mod atomic_handoff_tests;
    mod chunk_loss_regression_tests;
    mod live_lock_refusal_tests;
    mod new_session_happy_path_tests;
    mod stale_lock_recovery_tests;
}
