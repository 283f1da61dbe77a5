//! Record Store Tests
//!
//! Validates the spawn-tree mechanics and the run-queue discipline.
//!
//! ## Test Scopes
//! - **Spawn/Queue**: Owner-end vs. steal-end ordering, ancestor chains.
//! - **Lifecycle**: Exactly-once execution, terminal states, idempotence.
//! - **Abort**: Subtree sweeps, thief forwarding, late-result discard.
//! - **Fault Tolerance Hooks**: Redo reset and orphan scans.

#[cfg(test)]
mod tests {
    use crate::membership::types::NodeId;
    use crate::records::store::{FinishDisposition, RecordStore, SyncStatus};
    use crate::records::types::{JobOutcome, JobSpec, RecordState};
    use serde_json::json;

    fn store() -> RecordStore {
        RecordStore::new(NodeId("local".to_string()))
    }

    fn spec(n: u64) -> JobSpec {
        JobSpec {
            handler: "fib".to_string(),
            payload: json!({ "n": n }),
        }
    }

    fn done(v: u64) -> JobOutcome {
        JobOutcome::Completed { value: json!(v) }
    }

    // ============================================================
    // SPAWN & QUEUE DISCIPLINE
    // ============================================================

    #[test]
    fn test_spawn_creates_pending_record() {
        let mut store = store();

        let root = store.spawn(spec(10), None).unwrap();

        let rec = store.get(&root).expect("record exists");
        assert_eq!(rec.state, RecordState::Pending);
        assert!(rec.parent.is_none());
        assert!(rec.ancestors.is_empty());
        assert_eq!(store.queue_len(), 1);
    }

    #[test]
    fn test_spawn_links_parent_and_ancestors() {
        let mut store = store();

        let root = store.spawn(spec(10), None).unwrap();
        let child = store.spawn(spec(9), Some(&root)).unwrap();
        let grandchild = store.spawn(spec(8), Some(&child)).unwrap();

        let root_rec = store.get(&root).unwrap();
        assert_eq!(root_rec.children, vec![child.clone()]);

        let gc_rec = store.get(&grandchild).unwrap();
        assert_eq!(gc_rec.parent.as_ref(), Some(&child));
        assert_eq!(gc_rec.ancestors, vec![root.clone(), child.clone()]);
        assert!(gc_rec.descends_from(&root));
        assert!(gc_rec.descends_from(&grandchild));
    }

    #[test]
    fn test_job_ids_are_monotonic_and_unique() {
        let mut store = store();

        let a = store.spawn(spec(1), None).unwrap();
        let b = store.spawn(spec(2), None).unwrap();

        assert_eq!(a.node, b.node);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_owner_pops_newest_thief_takes_oldest() {
        let mut store = store();

        let oldest = store.spawn(spec(1), None).unwrap();
        let _middle = store.spawn(spec(2), None).unwrap();
        let newest = store.spawn(spec(3), None).unwrap();

        // Owner end: depth-first, newest first.
        assert_eq!(store.pop_local(), Some(newest));

        // Steal end: oldest, largest-grained work.
        let thief = NodeId("thief".to_string());
        let (stolen_id, _, _) = store.steal_one(&thief, 1).expect("grant");
        assert_eq!(stolen_id, oldest);
    }

    #[test]
    fn test_spawn_under_aborted_parent_is_stillborn() {
        let mut store = store();

        let root = store.spawn(spec(10), None).unwrap();
        store.abort_subtree(&root);

        let child = store.spawn(spec(9), Some(&root)).unwrap();

        let rec = store.get(&child).unwrap();
        assert_eq!(rec.state, RecordState::Aborted);
        assert_eq!(store.pop_local(), None, "stillborn job must not be queued");
    }

    // ============================================================
    // STEALING
    // ============================================================

    #[test]
    fn test_steal_marks_stolen_and_keeps_outline() {
        let mut store = store();
        let job = store.spawn(spec(5), None).unwrap();
        let thief = NodeId("thief".to_string());

        let (stolen_id, stolen_spec, ancestors) = store.steal_one(&thief, 1).expect("grant");

        assert_eq!(stolen_id, job);
        assert_eq!(stolen_spec.handler, "fib");
        assert!(ancestors.is_empty());

        // The victim retains an outline entry for abort forwarding.
        let outline = store.get(&job).expect("outline entry kept");
        assert_eq!(outline.state, RecordState::Stolen);
        assert_eq!(outline.stolen_by.as_ref(), Some(&thief));

        // And the job is gone from the queue.
        assert_eq!(store.pop_local(), None);
    }

    #[test]
    fn test_steal_denied_below_watermark() {
        let mut store = store();
        let thief = NodeId("thief".to_string());

        assert!(store.steal_one(&thief, 1).is_none(), "empty queue denies");

        store.spawn(spec(1), None).unwrap();
        assert!(
            store.steal_one(&thief, 2).is_none(),
            "one job is below a watermark of two"
        );
        assert!(store.steal_one(&thief, 1).is_some());
    }

    #[test]
    fn test_steal_skips_stale_queue_entries() {
        let mut store = store();
        let thief = NodeId("thief".to_string());

        let first = store.spawn(spec(1), None).unwrap();
        let second = store.spawn(spec(2), None).unwrap();
        store.abort_subtree(&first);

        let (stolen_id, _, _) = store.steal_one(&thief, 1).expect("grant");
        assert_eq!(stolen_id, second, "aborted head must be skipped");
    }

    #[test]
    fn test_adopt_stolen_rejects_duplicates() {
        let mut store = store();
        let victim = NodeId("victim".to_string());
        let job_id = crate::records::types::JobId {
            node: victim.clone(),
            seq: 7,
        };

        store
            .adopt_stolen(job_id.clone(), spec(4), vec![], victim.clone())
            .unwrap();

        let err = store
            .adopt_stolen(job_id, spec(4), vec![], victim)
            .unwrap_err();
        assert!(err.to_string().contains("protocol violation"));
    }

    // ============================================================
    // LIFECYCLE & IDEMPOTENCE
    // ============================================================

    #[test]
    fn test_exactly_one_node_runs_a_record() {
        let mut store = store();
        let job = store.spawn(spec(3), None).unwrap();

        assert!(store.mark_running(&job).unwrap().is_some());

        let err = store.mark_running(&job).unwrap_err();
        assert!(err.to_string().contains("protocol violation"));
    }

    #[test]
    fn test_finished_is_terminal() {
        let mut store = store();
        let job = store.spawn(spec(3), None).unwrap();
        store.mark_running(&job).unwrap();

        let first = store.finish(&job, done(2));
        assert!(matches!(first, FinishDisposition::Recorded { .. }));

        let second = store.finish(&job, done(99));
        assert_eq!(second, FinishDisposition::AlreadyDone);
        assert_eq!(
            store.get(&job).unwrap().result,
            Some(done(2)),
            "a Finished job never changes its result"
        );
    }

    #[test]
    fn test_late_result_against_aborted_record_is_discarded() {
        let mut store = store();
        let job = store.spawn(spec(3), None).unwrap();
        store.abort_subtree(&job);

        let disposition = store.finish(&job, done(2));

        assert_eq!(disposition, FinishDisposition::Discarded);
        assert_eq!(store.get(&job).unwrap().state, RecordState::Aborted);
        assert!(store.get(&job).unwrap().result.is_none());
    }

    // ============================================================
    // ABORT SWEEPS
    // ============================================================

    #[test]
    fn test_abort_kills_subtree_not_siblings() {
        let mut store = store();

        let root = store.spawn(spec(10), None).unwrap();
        let left = store.spawn(spec(9), Some(&root)).unwrap();
        let right = store.spawn(spec(8), Some(&root)).unwrap();
        let left_child = store.spawn(spec(7), Some(&left)).unwrap();

        let sweep = store.abort_subtree(&left);

        assert_eq!(sweep.aborted, 2);
        assert_eq!(store.get(&left).unwrap().state, RecordState::Aborted);
        assert_eq!(store.get(&left_child).unwrap().state, RecordState::Aborted);
        assert_eq!(store.get(&right).unwrap().state, RecordState::Pending);
        assert_eq!(store.get(&root).unwrap().state, RecordState::Pending);
    }

    #[test]
    fn test_abort_is_idempotent() {
        let mut store = store();
        let root = store.spawn(spec(10), None).unwrap();
        store.spawn(spec(9), Some(&root)).unwrap();

        let first = store.abort_subtree(&root);
        let second = store.abort_subtree(&root);

        assert_eq!(first.aborted, 2);
        assert_eq!(second.aborted, 0, "second sweep must find nothing live");
    }

    #[test]
    fn test_abort_forwards_to_thieves_of_stolen_descendants() {
        let mut store = store();
        let thief = NodeId("thief".to_string());

        let root = store.spawn(spec(10), None).unwrap();
        store.pop_local();
        let child = store.spawn(spec(9), Some(&root)).unwrap();
        let (stolen_id, _, _) = store.steal_one(&thief, 1).expect("grant");
        assert_eq!(stolen_id, child);

        let sweep = store.abort_subtree(&root);

        assert_eq!(sweep.forwards, vec![(thief, child)]);
    }

    // ============================================================
    // SYNC & RESULT CONSUMPTION
    // ============================================================

    #[test]
    fn test_children_status_tracks_terminals() {
        let mut store = store();
        let root = store.spawn(spec(10), None).unwrap();
        let a = store.spawn(spec(9), Some(&root)).unwrap();
        let b = store.spawn(spec(8), Some(&root)).unwrap();

        assert_eq!(store.children_status(&root), SyncStatus::Waiting);

        store.mark_running(&a).unwrap();
        store.finish(&a, done(34));
        assert_eq!(store.children_status(&root), SyncStatus::Waiting);

        store.abort_subtree(&b);
        assert_eq!(store.children_status(&root), SyncStatus::AllTerminal);
    }

    #[test]
    fn test_take_child_results_in_spawn_order_and_releases() {
        let mut store = store();
        let root = store.spawn(spec(10), None).unwrap();
        let a = store.spawn(spec(9), Some(&root)).unwrap();
        let b = store.spawn(spec(8), Some(&root)).unwrap();

        // Finish them out of spawn order.
        store.mark_running(&b).unwrap();
        store.finish(&b, done(21));
        store.mark_running(&a).unwrap();
        store.finish(&a, done(34));

        let results = store.take_child_results(&root).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].job_id, a);
        assert_eq!(results[0].outcome, Some(done(34)));
        assert_eq!(results[1].job_id, b);
        assert_eq!(results[1].outcome, Some(done(21)));

        // Consumed children are released.
        assert!(store.get(&a).is_none());
        assert!(store.get(&b).is_none());
    }

    #[test]
    fn test_aborted_child_contributes_no_result() {
        let mut store = store();
        let root = store.spawn(spec(10), None).unwrap();
        let child = store.spawn(spec(9), Some(&root)).unwrap();
        store.abort_subtree(&child);

        let results = store.take_child_results(&root).unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].outcome.is_none());
    }

    // ============================================================
    // CRASH HOOKS
    // ============================================================

    #[test]
    fn test_reset_for_redo_requeues_stolen_job() {
        let mut store = store();
        let thief = NodeId("thief".to_string());
        let job = store.spawn(spec(5), None).unwrap();
        store.steal_one(&thief, 1).expect("grant");

        assert!(store.reset_for_redo(&job));

        let rec = store.get(&job).unwrap();
        assert_eq!(rec.state, RecordState::Pending);
        assert!(rec.stolen_by.is_none());
        assert_eq!(store.pop_local(), Some(job.clone()));

        // Only Stolen records can be redone.
        assert!(!store.reset_for_redo(&job));
    }

    #[test]
    fn test_orphan_scans_by_direction() {
        let mut store = store();
        let dead = NodeId("dead".to_string());
        let other = NodeId("other".to_string());

        // One job lost to the dead thief, one to a healthy thief.
        let lost = store.spawn(spec(5), None).unwrap();
        store.steal_one(&dead, 1).expect("grant");
        let _kept = store.spawn(spec(4), None).unwrap();
        store.steal_one(&other, 1).expect("grant");

        // One job we stole from the dead node.
        let orphan_id = crate::records::types::JobId {
            node: dead.clone(),
            seq: 3,
        };
        store
            .adopt_stolen(orphan_id.clone(), spec(2), vec![], dead.clone())
            .unwrap();

        assert_eq!(store.stolen_by_node(&dead), vec![lost]);
        assert_eq!(store.stolen_from_node(&dead), vec![orphan_id]);
    }
}
