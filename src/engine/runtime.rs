//! The Engine
//!
//! One `Engine` per process: the explicitly constructed runtime context that
//! replaces any notion of a global scheduler singleton. It owns the record
//! store behind a single mutex (held only for O(1) structural operations) and
//! composes the networked pieces through narrow interfaces.

use crate::abort::coordinator::AbortCoordinator;
use crate::engine::registry::JobRegistry;
use crate::grt::table::GlobalResultTable;
use crate::membership::service::MembershipService;
use crate::membership::types::NodeId;
use crate::records::store::{FinishDisposition, RecordStore, SyncStatus};
use crate::records::types::{ChildResult, JobId, JobOutcome, JobSpec, RecordState};
use crate::stats::{EngineStats, StatsSnapshot};
use crate::steal::engine::{StealAttempt, StealEngine};
use crate::steal::protocol::{StealReply, StealRequest, StolenJob};
use crate::tuples::space::TupleSpace;

use anyhow::Result;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Tuple-space key prefix under which crash notices travel, so every node
/// handles a death at the same point of the global order.
const CRASH_KEY_PREFIX: &str = "crash/";

/// Tunables of the scheduler. Everything the protocol calls "configurable"
/// lives here; the defaults match a small LAN cluster.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a thief waits for a steal reply before writing the attempt
    /// off as TimedOut.
    pub steal_timeout: Duration,
    /// Idle back-off between failed steal attempts.
    pub steal_backoff: Duration,
    /// Poll interval of the `sync` wait loop.
    pub poll_interval: Duration,
    /// Victims deny steals while their queue holds fewer jobs than this.
    pub steal_watermark: usize,
    /// Deadline for one synchronous replica push before it degrades to
    /// best-effort.
    pub replication_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            steal_timeout: Duration::from_secs(2),
            steal_backoff: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            steal_watermark: 1,
            replication_timeout: Duration::from_secs(2),
        }
    }
}

pub struct Engine {
    pub membership: Arc<MembershipService>,
    pub registry: Arc<JobRegistry>,
    pub stats: Arc<EngineStats>,
    pub tuples: Arc<TupleSpace>,
    pub grt: Arc<GlobalResultTable>,
    store: Mutex<RecordStore>,
    steal: StealEngine,
    aborts: AbortCoordinator,
    config: EngineConfig,
    ft_enabled: AtomicBool,
    replication_factor: AtomicUsize,
}

impl Engine {
    pub fn new(
        membership: Arc<MembershipService>,
        registry: Arc<JobRegistry>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let stats = Arc::new(EngineStats::new());
        let tuples = TupleSpace::new(membership.clone(), stats.clone());
        let grt = GlobalResultTable::new(membership.clone(), stats.clone());
        let steal = StealEngine::new(membership.clone(), stats.clone(), config.steal_timeout);
        let aborts = AbortCoordinator::new(membership.clone(), stats.clone());
        let store = Mutex::new(RecordStore::new(membership.local_node.id.clone()));

        Arc::new(Self {
            membership,
            registry,
            stats,
            tuples,
            grt,
            store,
            steal,
            aborts,
            config,
            ft_enabled: AtomicBool::new(false),
            replication_factor: AtomicUsize::new(2),
        })
    }

    fn lock_store(&self) -> MutexGuard<'_, RecordStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Turns on result replication. From here on, every finished stolen job
    /// is pushed into the result table before its record may be discarded.
    pub fn enable_fault_tolerance(&self, replication_factor: usize) {
        self.replication_factor
            .store(replication_factor.max(1), Ordering::SeqCst);
        self.ft_enabled.store(true, Ordering::SeqCst);
        tracing::info!(
            "Fault tolerance enabled (replication factor {})",
            replication_factor.max(1)
        );
    }

    pub fn fault_tolerance_enabled(&self) -> bool {
        self.ft_enabled.load(Ordering::SeqCst)
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor.load(Ordering::SeqCst)
    }

    pub fn local_node_id(&self) -> NodeId {
        self.membership.local_node.id.clone()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawns the worker loop and the crash-handling plumbing.
    pub fn start(self: &Arc<Self>) {
        let _worker_handle = {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.worker_loop().await;
            })
        };

        // Deaths observed by the local failure detector funnel into the tuple
        // order, so every node handles a crash on the same global timeline.
        let _notice_handle = {
            let engine = self.clone();
            let mut deaths = self.membership.subscribe_deaths();
            tokio::spawn(async move {
                while let Some(dead) = deaths.recv().await {
                    let key = format!("{}{}", CRASH_KEY_PREFIX, dead.0);
                    if let Err(e) = engine
                        .tuples
                        .broadcast(&key, serde_json::json!(dead.0))
                        .await
                    {
                        tracing::warn!("Failed to publish crash notice for {}: {}", dead, e);
                    }
                }
            })
        };

        let _crash_handle = {
            let engine = self.clone();
            let mut applied = self.tuples.subscribe();
            tokio::spawn(async move {
                // Several nodes may publish the same crash; handle each node
                // id once, at its first position in the total order.
                let mut handled: HashSet<String> = HashSet::new();
                while let Some(tuple) = applied.recv().await {
                    if let Some(node) = tuple.key.strip_prefix(CRASH_KEY_PREFIX)
                        && handled.insert(node.to_string())
                    {
                        engine.handle_node_dead(&NodeId(node.to_string())).await;
                    }
                }
            })
        };

        tracing::info!("Engine started");
    }

    // --- spawn / sync / abort (the application surface) ---

    /// Spawns a top-level job; the worker loop picks it up.
    pub fn spawn_root(&self, spec: JobSpec) -> Result<JobId> {
        EngineStats::bump(&self.stats.spawns);
        self.lock_store().spawn(spec, None)
    }

    /// Spawns a child of a running job. Called through `JobContext`.
    pub fn spawn_child(&self, parent: &JobId, spec: JobSpec) -> Result<JobId> {
        EngineStats::bump(&self.stats.spawns);
        self.lock_store().spawn(spec, Some(parent))
    }

    /// Waits until all children of `parent` are terminal and hands back their
    /// results in spawn order.
    ///
    /// Waiting is a poll loop, never a blocked thread: local pending work is
    /// executed depth-first in the meantime, and sleeping between polls lets
    /// incoming steal requests and result deliveries land.
    pub async fn sync(self: &Arc<Self>, parent: &JobId) -> Result<Vec<ChildResult>> {
        EngineStats::bump(&self.stats.syncs);

        loop {
            let next = self.lock_store().pop_local();
            if let Some(job_id) = next {
                self.execute(job_id).await;
                continue;
            }

            let status = self.lock_store().children_status(parent);
            match status {
                SyncStatus::AllTerminal => break,
                SyncStatus::Waiting => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                SyncStatus::ParentAborted => {
                    anyhow::bail!("job {} aborted while syncing", parent)
                }
                SyncStatus::ParentGone => {
                    anyhow::bail!("protocol violation: sync on released job {}", parent)
                }
            }
        }

        self.lock_store().take_child_results(parent)
    }

    /// Cancels a subtree cluster-wide: kills it locally, tells the thieves of
    /// stolen descendants, and broadcasts to everyone else.
    pub async fn abort(&self, job_id: &JobId) {
        EngineStats::bump(&self.stats.aborts);
        self.apply_abort(job_id).await;
        self.aborts.broadcast(job_id).await;
    }

    /// The receiving half of an abort: sweep locally and forward to thieves.
    /// Safe to run any number of times for the same job id.
    pub async fn apply_abort(&self, job_id: &JobId) {
        let sweep = self.lock_store().abort_subtree(job_id);

        if sweep.aborted > 0 {
            EngineStats::add(&self.stats.aborted_jobs, sweep.aborted as u64);
            tracing::info!("Aborted {} jobs under {}", sweep.aborted, job_id);
        }

        self.aborts.forward(&sweep.forwards).await;
    }

    pub fn job_status(&self, job_id: &JobId) -> Option<(RecordState, Option<JobOutcome>)> {
        self.lock_store()
            .get(job_id)
            .map(|rec| (rec.state, rec.result.clone()))
    }

    // --- execution ---

    /// Runs one job to completion, recursively driving whatever it spawns.
    /// Boxed because handlers call back into `sync`, which executes children
    /// through this same function.
    pub fn execute(
        self: &Arc<Self>,
        job_id: JobId,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        let engine = self.clone();

        Box::pin(async move {
            let spec = match engine.lock_store().mark_running(&job_id) {
                Ok(Some(spec)) => spec,
                Ok(None) => {
                    tracing::debug!("Job {} aborted before it started", job_id);
                    return;
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    return;
                }
            };

            EngineStats::bump(&engine.stats.jobs_executed);

            let ctx = JobContext {
                engine: engine.clone(),
                job_id: job_id.clone(),
            };

            let JobSpec { handler, payload } = spec;
            let outcome = match engine.registry.invoke(&handler, ctx, payload).await {
                Ok(value) => JobOutcome::Completed { value },
                Err(e) => JobOutcome::Failed {
                    error: e.to_string(),
                },
            };

            engine.complete(&job_id, outcome).await;
        })
    }

    /// Finishes a job: makes a stolen job's result durable, stores it, and
    /// carries it home if the job came from another node.
    async fn complete(&self, job_id: &JobId, outcome: JobOutcome) {
        let stolen_from = self
            .lock_store()
            .get(job_id)
            .and_then(|rec| rec.stolen_from.clone());

        // Replicate before the origin learns the result: only a durable
        // result permits dropping the record that produced it.
        if stolen_from.is_some() && self.fault_tolerance_enabled() {
            if let Err(e) = self
                .grt
                .record(
                    job_id,
                    outcome.clone(),
                    self.replication_factor(),
                    self.config.replication_timeout,
                )
                .await
            {
                tracing::warn!("Failed to record result of {}: {}", job_id, e);
            }
        }

        let disposition = self.lock_store().finish(job_id, outcome.clone());

        match disposition {
            FinishDisposition::Recorded {
                stolen_from: Some(origin),
            } => {
                if let Err(e) = self.steal.send_result(&origin, job_id, &outcome).await {
                    tracing::warn!(
                        "Failed to return result of {} to {}: {}",
                        job_id,
                        origin,
                        e
                    );
                }
                // The thief is done with this job either way; with fault
                // tolerance on, the result table already holds the outcome.
                self.lock_store().release(job_id);
            }
            FinishDisposition::Recorded { stolen_from: None } => {}
            FinishDisposition::Discarded => {
                tracing::debug!("Discarding result of aborted job {}", job_id);
            }
            FinishDisposition::AlreadyDone | FinishDisposition::Unknown => {}
        }
    }

    // --- the worker loop ---

    /// The one task per node that runs application code: local work first,
    /// depth-first; steal when idle; back off between failed attempts.
    async fn worker_loop(self: Arc<Self>) {
        tracing::info!("Worker loop started");

        loop {
            let next = self.lock_store().pop_local();
            if let Some(job_id) = next {
                self.execute(job_id).await;
                continue;
            }

            let idle_started = Instant::now();
            let load_hint = self.lock_store().queue_len();

            match self.steal.attempt(load_hint).await {
                StealAttempt::Granted { job, victim } => {
                    match self.adopt_stolen_job(job, victim) {
                        Ok(job_id) => self.execute(job_id).await,
                        Err(e) => tracing::error!("{}", e),
                    }
                }
                StealAttempt::Denied | StealAttempt::TimedOut => {
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(self.config.steal_backoff + Duration::from_millis(jitter))
                        .await;
                }
                StealAttempt::NoVictim => {
                    tokio::time::sleep(self.config.steal_backoff * 4).await;
                }
            }

            EngineStats::add(
                &self.stats.idle_time_us,
                idle_started.elapsed().as_micros() as u64,
            );
        }
    }

    /// Inserts a granted job into the local store; execution follows
    /// immediately, the job is never queued.
    pub(crate) fn adopt_stolen_job(&self, job: StolenJob, victim: NodeId) -> Result<JobId> {
        let StolenJob {
            job_id,
            spec,
            ancestors,
        } = job;
        self.lock_store()
            .adopt_stolen(job_id.clone(), spec, ancestors, victim)?;
        Ok(job_id)
    }

    // --- the victim / receiving side ---

    /// Answers an incoming steal request out of the record store.
    pub fn answer_steal(&self, request: &StealRequest) -> StealReply {
        EngineStats::bump(&self.stats.steal_requests);

        match self
            .lock_store()
            .steal_one(&request.thief, self.config.steal_watermark)
        {
            Some((job_id, spec, ancestors)) => {
                tracing::info!("Granting job {} to thief {}", job_id, request.thief);
                StealReply::Granted {
                    request_id: request.request_id.clone(),
                    job: StolenJob {
                        job_id,
                        spec,
                        ancestors,
                    },
                }
            }
            None => StealReply::Denied,
        }
    }

    /// Accepts a stolen job's result coming home. Idempotent; a result for
    /// an aborted or unknown record is dropped on the floor.
    pub fn deliver_result(&self, job_id: &JobId, outcome: JobOutcome) {
        match self.lock_store().finish(job_id, outcome) {
            FinishDisposition::Recorded { .. } => {
                tracing::debug!("Stolen job {} returned its result", job_id);
            }
            FinishDisposition::Discarded => {
                tracing::debug!("Late result for aborted job {} discarded", job_id);
            }
            FinishDisposition::AlreadyDone => {}
            FinishDisposition::Unknown => {
                tracing::warn!("Result for unknown job {} dropped", job_id);
            }
        }
    }

    // --- crash handling ---

    /// Runs once per dead node, at the crash notice's position in the tuple
    /// order.
    pub async fn handle_node_dead(self: &Arc<Self>, dead: &NodeId) {
        tracing::info!("Handling crash of {}", dead);

        // Orphan killing: jobs we stole from the dead node have no parent
        // left to consume their results. Kill the subtrees cluster-wide.
        let orphans = self.lock_store().stolen_from_node(dead);
        if !orphans.is_empty() {
            EngineStats::add(&self.stats.killed_orphans, orphans.len() as u64);
            for job_id in &orphans {
                tracing::info!("Killing orphan {} (owner {} died)", job_id, dead);
                self.apply_abort(job_id).await;
                self.aborts.broadcast(job_id).await;
            }
        }

        // Redo: jobs the dead node stole from us. A surviving replica in the
        // result table wins over re-execution.
        let lost = self.lock_store().stolen_by_node(dead);
        for job_id in lost {
            if self.fault_tolerance_enabled() {
                if let Some(entry) = self.grt.lookup(&job_id).await {
                    tracing::info!("Surviving replica of {} wins over redo", job_id);
                    self.deliver_result(&job_id, entry.outcome);
                    continue;
                }
            }

            if self.lock_store().reset_for_redo(&job_id) {
                EngineStats::bump(&self.stats.redone_jobs);
                tracing::info!("Redoing job {} lost to {}", job_id, dead);
            }
        }

        if self.fault_tolerance_enabled() {
            self.grt
                .handle_crash(
                    dead,
                    self.replication_factor(),
                    self.config.replication_timeout,
                )
                .await;
        }
    }
}

/// Handed to every running job. The context is how application code reaches
/// back into the engine: spawn children, sync on them, abort a subtree.
#[derive(Clone)]
pub struct JobContext {
    engine: Arc<Engine>,
    job_id: JobId,
}

impl JobContext {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Spawns a child of the current job.
    pub fn spawn(&self, handler: &str, payload: serde_json::Value) -> Result<JobId> {
        self.engine.spawn_child(
            &self.job_id,
            JobSpec {
                handler: handler.to_string(),
                payload,
            },
        )
    }

    /// Awaits all children of the current job; results come back in spawn
    /// order, aborted children contributing none.
    pub async fn sync(&self) -> Result<Vec<ChildResult>> {
        self.engine.sync(&self.job_id).await
    }

    /// Cancels a subtree (typically a speculative sibling that lost).
    pub async fn abort(&self, job_id: &JobId) {
        self.engine.abort(job_id).await;
    }
}
