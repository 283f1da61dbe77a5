//! Abort Tests
//!
//! Validates the cancellation guarantees through the engine on a single
//! node: subtree kills, idempotence, and late-result discard. The broadcast
//! fan-out degenerates to a no-op without peers, which is itself asserted.

#[cfg(test)]
mod tests {
    use crate::abort::protocol::AbortMsg;
    use crate::engine::registry::JobRegistry;
    use crate::engine::runtime::{Engine, EngineConfig};
    use crate::membership::service::MembershipService;
    use crate::membership::types::NodeId;
    use crate::records::types::{JobId, JobOutcome, JobSpec, RecordState};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    async fn solo_engine() -> Arc<Engine> {
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let membership = MembershipService::new(bind_addr, vec![]).await.unwrap();
        Engine::new(membership, JobRegistry::new(), EngineConfig::default())
    }

    fn spec() -> JobSpec {
        JobSpec {
            handler: "fib".to_string(),
            payload: json!({ "n": 10 }),
        }
    }

    // ============================================================
    // WIRE PROTOCOL
    // ============================================================

    #[test]
    fn test_abort_msg_roundtrip() {
        let msg = AbortMsg {
            job_id: JobId {
                node: NodeId("origin".to_string()),
                seq: 5,
            },
        };

        let json = serde_json::to_string(&msg).expect("serialize");
        let restored: AbortMsg = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored.job_id, msg.job_id);
    }

    // ============================================================
    // SUBTREE CANCELLATION
    // ============================================================

    #[tokio::test]
    async fn test_abort_kills_whole_subtree() {
        let engine = solo_engine().await;
        let root = engine.spawn_root(spec()).unwrap();
        let child = engine.spawn_child(&root, spec()).unwrap();

        engine.abort(&root).await;

        let (root_state, _) = engine.job_status(&root).unwrap();
        let (child_state, _) = engine.job_status(&child).unwrap();
        assert_eq!(root_state, RecordState::Aborted);
        assert_eq!(child_state, RecordState::Aborted);
        assert_eq!(engine.stats.aborted_jobs.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_double_abort_is_idempotent() {
        let engine = solo_engine().await;
        let root = engine.spawn_root(spec()).unwrap();

        engine.abort(&root).await;
        let after_first = engine.stats.aborted_jobs.load(Ordering::Relaxed);

        engine.abort(&root).await;
        let after_second = engine.stats.aborted_jobs.load(Ordering::Relaxed);

        assert_eq!(after_first, 1);
        assert_eq!(after_second, after_first, "second abort must change nothing");
        assert_eq!(engine.stats.aborts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_late_result_discarded_after_abort() {
        let engine = solo_engine().await;
        let root = engine.spawn_root(spec()).unwrap();

        engine.abort(&root).await;
        engine.deliver_result(
            &root,
            JobOutcome::Completed { value: json!(55) },
        );

        let (state, outcome) = engine.job_status(&root).unwrap();
        assert_eq!(state, RecordState::Aborted, "abort is irreversible");
        assert!(outcome.is_none(), "the late result never lands");
    }

    #[tokio::test]
    async fn test_broadcast_alone_sends_nothing() {
        let engine = solo_engine().await;
        let root = engine.spawn_root(spec()).unwrap();

        engine.abort(&root).await;

        assert_eq!(engine.stats.abort_messages.load(Ordering::Relaxed), 0);
    }
}
