//! Tuple Space Tests
//!
//! Validates the total-order machinery without a network: tuples are fed to
//! `apply` directly, in and out of order, and the observable application
//! order is checked.

#[cfg(test)]
mod tests {
    use crate::membership::service::MembershipService;
    use crate::stats::EngineStats;
    use crate::tuples::space::TupleSpace;
    use crate::tuples::types::Tuple;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Arc;

    async fn space() -> Arc<TupleSpace> {
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let membership = MembershipService::new(bind_addr, vec![]).await.unwrap();
        TupleSpace::new(membership, Arc::new(EngineStats::new()))
    }

    fn tuple(seq: u64, key: &str) -> Tuple {
        Tuple {
            seq,
            key: key.to_string(),
            value: json!(seq),
        }
    }

    // ============================================================
    // ORDERING
    // ============================================================

    #[tokio::test]
    async fn test_tuples_apply_in_sequence_order() {
        let space = space().await;
        let mut stream = space.subscribe();

        // Arrival order differs from sequence order.
        space.apply(tuple(2, "b"));
        space.apply(tuple(3, "a"));
        assert_eq!(space.applied_count(), 0, "gap at seq 1 must hold everything");

        space.apply(tuple(1, "a"));
        assert_eq!(space.applied_count(), 3);

        let seen: Vec<u64> = [
            stream.try_recv().unwrap().seq,
            stream.try_recv().unwrap().seq,
            stream.try_recv().unwrap().seq,
        ]
        .to_vec();
        assert_eq!(seen, vec![1, 2, 3], "application order is the total order");
    }

    #[tokio::test]
    async fn test_duplicate_tuples_dropped() {
        let space = space().await;

        space.apply(tuple(1, "a"));
        space.apply(tuple(1, "a"));

        assert_eq!(space.applied_count(), 1);
    }

    #[tokio::test]
    async fn test_read_returns_latest_per_key() {
        let space = space().await;

        space.apply(tuple(1, "watermark"));
        space.apply(tuple(2, "watermark"));

        let latest = space.read("watermark").expect("key applied");
        assert_eq!(latest.seq, 2);
        assert!(space.read("missing").is_none());
    }

    // ============================================================
    // BLOCKING READS
    // ============================================================

    #[tokio::test]
    async fn test_await_key_wakes_on_apply() {
        let space = space().await;

        let waiter = {
            let space = space.clone();
            tokio::spawn(async move { space.await_key("crash/node-9").await })
        };

        // Give the waiter a chance to park first.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        space.apply(tuple(1, "crash/node-9"));

        let got = waiter.await.unwrap();
        assert_eq!(got.key, "crash/node-9");
    }

    // ============================================================
    // SEQUENCER
    // ============================================================

    #[tokio::test]
    async fn test_single_node_broadcast_applies_locally() {
        let space = space().await;
        // Alone in the cluster this node holds the sequencer role itself.
        let seq = space.broadcast("placement/j1", json!("here")).await.unwrap();

        assert_eq!(seq, 1);
        assert_eq!(space.read("placement/j1").unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_sequencer_takeover_never_reuses_numbers() {
        let space = space().await;

        // Tuples sequenced elsewhere have been applied up to 5.
        for seq in 1..=5 {
            space.apply(tuple(seq, "k"));
        }

        // If the old sequencer dies and this node takes over, fresh numbers
        // continue past everything it has seen.
        assert!(space.assign_seq() > 5);
    }
}
