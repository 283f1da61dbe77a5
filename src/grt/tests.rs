//! Result Table Tests
//!
//! Validates placement determinism, local storage, and the crash-handling
//! policy decisions, all without a network: replication to zero peers is a
//! no-op, and crash entries are crafted directly.

#[cfg(test)]
mod tests {
    use crate::grt::table::GlobalResultTable;
    use crate::grt::types::GrtEntry;
    use crate::membership::service::MembershipService;
    use crate::membership::types::NodeId;
    use crate::records::types::{JobId, JobOutcome};
    use crate::stats::EngineStats;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    async fn table() -> (Arc<GlobalResultTable>, Arc<EngineStats>) {
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let membership = MembershipService::new(bind_addr, vec![]).await.unwrap();
        let stats = Arc::new(EngineStats::new());
        (GlobalResultTable::new(membership, stats.clone()), stats)
    }

    fn job(node: &str, seq: u64) -> JobId {
        JobId {
            node: NodeId(node.to_string()),
            seq,
        }
    }

    fn outcome(v: u64) -> JobOutcome {
        JobOutcome::Completed { value: json!(v) }
    }

    // ============================================================
    // PLACEMENT
    // ============================================================

    #[tokio::test]
    async fn test_placement_is_deterministic() {
        let (table, _) = table().await;
        let id = job("spawner", 17);

        let p1 = table.placement(&id);
        let p2 = table.placement(&id);

        assert_eq!(p1, p2, "same id and view must place identically");
        assert_eq!(p1.len(), 1, "single-node cluster has one holder");
    }

    #[tokio::test]
    async fn test_replica_targets_exclude_self() {
        let (table, _) = table().await;
        let id = job("spawner", 17);

        // Alone in the cluster there is nobody to replicate to.
        assert!(table.replica_targets(&id, 3).is_empty());
        assert!(table.replica_targets(&id, 1).is_empty());
    }

    // ============================================================
    // RECORD / LOOKUP
    // ============================================================

    #[tokio::test]
    async fn test_record_then_lookup_roundtrip() {
        let (table, stats) = table().await;
        let id = job("spawner", 1);

        table
            .record(&id, outcome(55), 1, Duration::from_millis(100))
            .await
            .unwrap();

        let entry = table.lookup(&id).await.expect("entry present");
        assert_eq!(entry.outcome, outcome(55));
        assert_eq!(entry.job_id, id);

        assert_eq!(stats.table_updates.load(Ordering::Relaxed), 1);
        assert_eq!(stats.table_successful_lookups.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_lookup_miss_returns_none() {
        let (table, stats) = table().await;

        let missing = table.lookup(&job("spawner", 404)).await;

        assert!(missing.is_none());
        assert_eq!(stats.table_lookups.load(Ordering::Relaxed), 1);
        assert_eq!(stats.table_successful_lookups.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_apply_replica_is_idempotent() {
        let (table, _) = table().await;
        let id = job("owner-node", 9);

        let entry = GrtEntry {
            job_id: id.clone(),
            outcome: outcome(8),
            epoch: 1,
            owner: NodeId("owner-node".to_string()),
            replicas: vec![],
        };
        let mut duplicate = entry.clone();
        duplicate.outcome = outcome(999);

        table.apply_replica(entry);
        table.apply_replica(duplicate);

        assert_eq!(table.entry_count(), 1);
        let kept = table.get_by_key(&id.key()).unwrap();
        assert_eq!(kept.outcome, outcome(8), "first copy wins");
    }

    // ============================================================
    // CRASH HANDLING
    // ============================================================

    #[tokio::test]
    async fn test_promotion_adopts_entries_of_dead_owner() {
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let membership = MembershipService::new(bind_addr, vec![]).await.unwrap();
        let local_id = membership.local_node.id.clone();
        let table = GlobalResultTable::new(membership, Arc::new(EngineStats::new()));
        let dead = NodeId("dead-owner".to_string());

        // This node holds a replica whose owner died.
        let id = job("dead-owner", 12);
        table.apply_replica(GrtEntry {
            job_id: id.clone(),
            outcome: outcome(13),
            epoch: 4,
            owner: dead.clone(),
            replicas: vec![local_id.clone()],
        });

        table
            .handle_crash(&dead, 1, Duration::from_millis(100))
            .await;

        let promoted = table.get_by_key(&id.key()).expect("entry survives");
        assert_eq!(promoted.owner, local_id, "replica becomes primary");
        assert_eq!(promoted.outcome, outcome(13));
        assert!(table.entries_owned_by(&dead).is_empty());
    }

    #[tokio::test]
    async fn test_crash_ignores_entries_we_do_not_hold_first() {
        let (table, _) = table().await;
        let dead = NodeId("dead-owner".to_string());
        let other = NodeId("other-replica".to_string());

        let id = job("dead-owner", 3);
        table.apply_replica(GrtEntry {
            job_id: id.clone(),
            outcome: outcome(1),
            epoch: 2,
            owner: dead.clone(),
            replicas: vec![other.clone()],
        });

        table
            .handle_crash(&dead, 1, Duration::from_millis(100))
            .await;

        // We are not in the replica list, so the entry stays as-is.
        let untouched = table.get_by_key(&id.key()).unwrap();
        assert_eq!(untouched.owner, dead);
    }
}
