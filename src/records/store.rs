//! Invocation Record Store
//!
//! One store per node, guarded by a single mutex in the engine. Every method
//! is an O(1)-ish structural operation over the record map and the run queue;
//! serialization and network I/O never happen in here.

use super::types::{ChildResult, InvocationRecord, JobId, JobOutcome, JobSpec, RecordState, now_ms};
use crate::membership::types::NodeId;

use anyhow::Result;
use std::collections::{HashMap, VecDeque};

/// What `finish` did with a delivered result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishDisposition {
    /// Result stored; carries the origin node when the job was stolen.
    Recorded { stolen_from: Option<NodeId> },
    /// Record was Aborted; the late result was discarded.
    Discarded,
    /// Record already Finished; duplicate delivery ignored.
    AlreadyDone,
    /// No such record (already released).
    Unknown,
}

/// Observed state of a parent's children during `sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    AllTerminal,
    Waiting,
    ParentAborted,
    ParentGone,
}

/// Result of marking a subtree Aborted: how many live records were killed,
/// and which thieves must be told about their stolen descendants.
#[derive(Debug, Default)]
pub struct AbortSweep {
    pub aborted: usize,
    pub forwards: Vec<(NodeId, JobId)>,
}

pub struct RecordStore {
    local_node: NodeId,
    records: HashMap<JobId, InvocationRecord>,
    /// Back = owner end (depth-first local execution), front = steal end
    /// (oldest, largest-grained work).
    run_queue: VecDeque<JobId>,
    next_seq: u64,
}

impl RecordStore {
    pub fn new(local_node: NodeId) -> Self {
        Self {
            local_node,
            records: HashMap::new(),
            run_queue: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local_node
    }

    fn next_job_id(&mut self) -> JobId {
        self.next_seq += 1;
        JobId {
            node: self.local_node.clone(),
            seq: self.next_seq,
        }
    }

    /// Creates a Pending record, appends it to the parent's child list, and
    /// enqueues it on the owner end of the run queue.
    ///
    /// Spawning under an aborted ancestor chain is a no-op that creates the
    /// record directly in Aborted, off the queue.
    pub fn spawn(&mut self, spec: JobSpec, parent: Option<&JobId>) -> Result<JobId> {
        let job_id = self.next_job_id();
        anyhow::ensure!(
            !self.records.contains_key(&job_id),
            "protocol violation: duplicate job id {}",
            job_id
        );

        let (parent_id, ancestors, parent_aborted) = match parent {
            Some(p) => {
                let parent_rec = self.records.get_mut(p).ok_or_else(|| {
                    anyhow::anyhow!("protocol violation: spawn under unknown parent {}", p)
                })?;

                let mut ancestors = parent_rec.ancestors.clone();
                ancestors.push(p.clone());
                let aborted = parent_rec.state == RecordState::Aborted;
                parent_rec.children.push(job_id.clone());

                (Some(p.clone()), ancestors, aborted)
            }
            None => (None, Vec::new(), false),
        };

        let record = InvocationRecord {
            job_id: job_id.clone(),
            spec,
            parent: parent_id,
            ancestors,
            children: Vec::new(),
            state: if parent_aborted {
                RecordState::Aborted
            } else {
                RecordState::Pending
            },
            result: None,
            stolen_by: None,
            stolen_from: None,
            spawned_at: now_ms(),
        };

        let runnable = record.state == RecordState::Pending;
        self.records.insert(job_id.clone(), record);
        if runnable {
            self.run_queue.push_back(job_id.clone());
        }

        Ok(job_id)
    }

    /// Inserts a record received from a steal grant. The job keeps its
    /// original id; the origin node is remembered for result delivery.
    pub fn adopt_stolen(
        &mut self,
        job_id: JobId,
        spec: JobSpec,
        ancestors: Vec<JobId>,
        from: NodeId,
    ) -> Result<()> {
        anyhow::ensure!(
            !self.records.contains_key(&job_id),
            "protocol violation: stolen job {} already present",
            job_id
        );

        let record = InvocationRecord {
            job_id: job_id.clone(),
            parent: ancestors.last().cloned(),
            ancestors,
            spec,
            children: Vec::new(),
            state: RecordState::Pending,
            result: None,
            stolen_by: None,
            stolen_from: Some(from),
            spawned_at: now_ms(),
        };

        // Executed directly by the worker, never queued: a just-stolen job
        // must not be re-stealable before it starts.
        self.records.insert(job_id, record);
        Ok(())
    }

    /// Pops the newest Pending job from the owner end, skipping ids whose
    /// records were stolen or aborted since they were queued.
    pub fn pop_local(&mut self) -> Option<JobId> {
        while let Some(id) = self.run_queue.pop_back() {
            if let Some(rec) = self.records.get(&id)
                && rec.state == RecordState::Pending
            {
                return Some(id);
            }
        }
        None
    }

    /// Answers a steal request: removes the oldest Pending job from the steal
    /// end, marks it Stolen (the record stays behind as the outline entry for
    /// abort forwarding), and returns it by value.
    ///
    /// Denied (`None`) when the steal end is empty or the queue holds fewer
    /// than `watermark` jobs.
    pub fn steal_one(
        &mut self,
        thief: &NodeId,
        watermark: usize,
    ) -> Option<(JobId, JobSpec, Vec<JobId>)> {
        // Drop stale ids from the steal end first so the watermark counts
        // actual Pending work.
        while let Some(id) = self.run_queue.front() {
            match self.records.get(id) {
                Some(rec) if rec.state == RecordState::Pending => break,
                _ => {
                    self.run_queue.pop_front();
                }
            }
        }

        if self.run_queue.len() < watermark {
            return None;
        }

        let id = self.run_queue.pop_front()?;
        let rec = self.records.get_mut(&id)?;
        rec.state = RecordState::Stolen;
        rec.stolen_by = Some(thief.clone());

        Some((id, rec.spec.clone(), rec.ancestors.clone()))
    }

    /// Transitions Pending -> Running and hands out the spec to execute.
    ///
    /// Returns `Ok(None)` when there is nothing left to run: the record was
    /// aborted before it started, or a result already arrived (a surviving
    /// replica beating a redo). A record found Running or Stolen is a
    /// protocol violation: a record runs on exactly one node.
    pub fn mark_running(&mut self, job_id: &JobId) -> Result<Option<JobSpec>> {
        let rec = self
            .records
            .get_mut(job_id)
            .ok_or_else(|| anyhow::anyhow!("protocol violation: running unknown job {}", job_id))?;

        match rec.state {
            RecordState::Pending => {
                rec.state = RecordState::Running;
                Ok(Some(rec.spec.clone()))
            }
            RecordState::Aborted | RecordState::Finished => Ok(None),
            other => anyhow::bail!(
                "protocol violation: job {} in state {:?} cannot start",
                job_id,
                other
            ),
        }
    }

    /// Delivers a result. Idempotent against terminal states: an Aborted
    /// record discards the late result, a Finished record ignores duplicates.
    pub fn finish(&mut self, job_id: &JobId, outcome: JobOutcome) -> FinishDisposition {
        match self.records.get_mut(job_id) {
            None => FinishDisposition::Unknown,
            Some(rec) => match rec.state {
                RecordState::Aborted => FinishDisposition::Discarded,
                RecordState::Finished => FinishDisposition::AlreadyDone,
                _ => {
                    rec.state = RecordState::Finished;
                    rec.result = Some(outcome);
                    rec.stolen_by = None;
                    FinishDisposition::Recorded {
                        stolen_from: rec.stolen_from.clone(),
                    }
                }
            },
        }
    }

    /// Marks every live record in the given subtree Aborted and collects the
    /// thieves that must hear about stolen descendants. Re-running the sweep
    /// on an already-dead subtree aborts nothing, which is what makes abort
    /// broadcasts idempotent.
    pub fn abort_subtree(&mut self, root: &JobId) -> AbortSweep {
        let mut sweep = AbortSweep::default();

        for rec in self.records.values_mut() {
            if rec.is_live() && rec.descends_from(root) {
                if rec.state == RecordState::Stolen
                    && let Some(thief) = rec.stolen_by.clone()
                {
                    sweep.forwards.push((thief, rec.job_id.clone()));
                }
                rec.state = RecordState::Aborted;
                rec.result = None;
                sweep.aborted += 1;
            }
        }

        sweep
    }

    pub fn children_status(&self, parent: &JobId) -> SyncStatus {
        let Some(parent_rec) = self.records.get(parent) else {
            return SyncStatus::ParentGone;
        };

        if parent_rec.state == RecordState::Aborted {
            return SyncStatus::ParentAborted;
        }

        for child in &parent_rec.children {
            match self.records.get(child).map(|rec| rec.state) {
                Some(RecordState::Finished) | Some(RecordState::Aborted) | None => {}
                Some(_) => return SyncStatus::Waiting,
            }
        }

        SyncStatus::AllTerminal
    }

    /// Consumes the parent's child results in spawn order and releases the
    /// child records. Callers must have seen `AllTerminal` first.
    pub fn take_child_results(&mut self, parent: &JobId) -> Result<Vec<ChildResult>> {
        let children = match self.records.get_mut(parent) {
            Some(parent_rec) => std::mem::take(&mut parent_rec.children),
            None => anyhow::bail!("protocol violation: sync on unknown parent {}", parent),
        };

        let mut results = Vec::with_capacity(children.len());
        for child in children {
            let Some(rec) = self.records.remove(&child) else {
                continue;
            };

            match rec.state {
                RecordState::Finished => results.push(ChildResult {
                    job_id: child,
                    outcome: rec.result,
                }),
                RecordState::Aborted => results.push(ChildResult {
                    job_id: child,
                    outcome: None,
                }),
                other => anyhow::bail!(
                    "protocol violation: consuming child {} in state {:?}",
                    child,
                    other
                ),
            }
        }

        Ok(results)
    }

    /// Returns a job lost to a crashed thief to the run queue for
    /// re-execution. Only a Stolen record can be redone.
    pub fn reset_for_redo(&mut self, job_id: &JobId) -> bool {
        match self.records.get_mut(job_id) {
            Some(rec) if rec.state == RecordState::Stolen => {
                rec.state = RecordState::Pending;
                rec.stolen_by = None;
                self.run_queue.push_back(job_id.clone());
                true
            }
            _ => false,
        }
    }

    /// Jobs this node lost to the given (dead) thief.
    pub fn stolen_by_node(&self, node: &NodeId) -> Vec<JobId> {
        self.records
            .values()
            .filter(|rec| rec.state == RecordState::Stolen && rec.stolen_by.as_ref() == Some(node))
            .map(|rec| rec.job_id.clone())
            .collect()
    }

    /// Live jobs this node stole from the given (dead) node; their results
    /// have nowhere to go.
    pub fn stolen_from_node(&self, node: &NodeId) -> Vec<JobId> {
        self.records
            .values()
            .filter(|rec| rec.is_live() && rec.stolen_from.as_ref() == Some(node))
            .map(|rec| rec.job_id.clone())
            .collect()
    }

    pub fn release(&mut self, job_id: &JobId) {
        self.records.remove(job_id);
    }

    pub fn get(&self, job_id: &JobId) -> Option<&InvocationRecord> {
        self.records.get(job_id)
    }

    pub fn queue_len(&self) -> usize {
        self.run_queue.len()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}
