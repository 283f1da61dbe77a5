//! Engine Statistics
//!
//! Passive instrumentation for the scheduler: atomic counters and accumulated
//! wall times bumped by the record store, steal engine, abort coordinator,
//! tuple space, and result table. Never consulted for correctness decisions.
//!
//! A snapshot DTO lets one node collect the counters of its peers for an
//! aggregated report.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineStats {
    // spawn/sync
    pub spawns: AtomicU64,
    pub jobs_executed: AtomicU64,
    pub syncs: AtomicU64,

    // aborts
    pub aborts: AtomicU64,
    pub abort_messages: AtomicU64,
    pub aborted_jobs: AtomicU64,

    // stealing
    pub steal_attempts: AtomicU64,
    pub steal_success: AtomicU64,
    pub steal_requests: AtomicU64,
    pub stolen_jobs: AtomicU64,
    pub steal_bytes: AtomicU64,
    pub steal_time_us: AtomicU64,
    pub idle_time_us: AtomicU64,

    // tuple space
    pub tuple_msgs: AtomicU64,
    pub tuple_bytes: AtomicU64,

    // global result table
    pub table_updates: AtomicU64,
    pub table_lookups: AtomicU64,
    pub table_successful_lookups: AtomicU64,
    pub table_remote_lookups: AtomicU64,

    // fault tolerance
    pub killed_orphans: AtomicU64,
    pub redone_jobs: AtomicU64,
}

/// Serializable copy of all counters, for `/internal/stats` and aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub spawns: u64,
    pub jobs_executed: u64,
    pub syncs: u64,
    pub aborts: u64,
    pub abort_messages: u64,
    pub aborted_jobs: u64,
    pub steal_attempts: u64,
    pub steal_success: u64,
    pub steal_requests: u64,
    pub stolen_jobs: u64,
    pub steal_bytes: u64,
    pub steal_time_us: u64,
    pub idle_time_us: u64,
    pub tuple_msgs: u64,
    pub tuple_bytes: u64,
    pub table_updates: u64,
    pub table_lookups: u64,
    pub table_successful_lookups: u64,
    pub table_remote_lookups: u64,
    pub killed_orphans: u64,
    pub redone_jobs: u64,
}

impl StatsSnapshot {
    /// Accumulates another node's counters into this snapshot.
    pub fn add(&mut self, other: &StatsSnapshot) {
        self.spawns += other.spawns;
        self.jobs_executed += other.jobs_executed;
        self.syncs += other.syncs;
        self.aborts += other.aborts;
        self.abort_messages += other.abort_messages;
        self.aborted_jobs += other.aborted_jobs;
        self.steal_attempts += other.steal_attempts;
        self.steal_success += other.steal_success;
        self.steal_requests += other.steal_requests;
        self.stolen_jobs += other.stolen_jobs;
        self.steal_bytes += other.steal_bytes;
        self.steal_time_us += other.steal_time_us;
        self.idle_time_us += other.idle_time_us;
        self.tuple_msgs += other.tuple_msgs;
        self.tuple_bytes += other.tuple_bytes;
        self.table_updates += other.table_updates;
        self.table_lookups += other.table_lookups;
        self.table_successful_lookups += other.table_successful_lookups;
        self.table_remote_lookups += other.table_remote_lookups;
        self.killed_orphans += other.killed_orphans;
        self.redone_jobs += other.redone_jobs;
    }
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            spawns: self.spawns.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            abort_messages: self.abort_messages.load(Ordering::Relaxed),
            aborted_jobs: self.aborted_jobs.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
            steal_success: self.steal_success.load(Ordering::Relaxed),
            steal_requests: self.steal_requests.load(Ordering::Relaxed),
            stolen_jobs: self.stolen_jobs.load(Ordering::Relaxed),
            steal_bytes: self.steal_bytes.load(Ordering::Relaxed),
            steal_time_us: self.steal_time_us.load(Ordering::Relaxed),
            idle_time_us: self.idle_time_us.load(Ordering::Relaxed),
            tuple_msgs: self.tuple_msgs.load(Ordering::Relaxed),
            tuple_bytes: self.tuple_bytes.load(Ordering::Relaxed),
            table_updates: self.table_updates.load(Ordering::Relaxed),
            table_lookups: self.table_lookups.load(Ordering::Relaxed),
            table_successful_lookups: self.table_successful_lookups.load(Ordering::Relaxed),
            table_remote_lookups: self.table_remote_lookups.load(Ordering::Relaxed),
            killed_orphans: self.killed_orphans.load(Ordering::Relaxed),
            redone_jobs: self.redone_jobs.load(Ordering::Relaxed),
        }
    }

    /// Logs the counter report, one line per subsystem.
    pub fn report(&self) {
        let s = self.snapshot();

        tracing::info!(
            "SPAWN:        {} spawns, {} executed, {} syncs",
            s.spawns,
            s.jobs_executed,
            s.syncs
        );
        tracing::info!(
            "ABORT:        {} aborts, {} abort msgs, {} aborted jobs",
            s.aborts,
            s.abort_messages,
            s.aborted_jobs
        );
        tracing::info!(
            "STEAL:        {} attempts, {} successes, {} requests served, {} jobs, {} bytes",
            s.steal_attempts,
            s.steal_success,
            s.steal_requests,
            s.stolen_jobs,
            s.steal_bytes
        );
        tracing::info!(
            "TUPLE_SPACE:  {} bcasts, {} bytes",
            s.tuple_msgs,
            s.tuple_bytes
        );
        tracing::info!(
            "RESULT_TABLE: {} updates, {} lookups, {} successful, {} remote",
            s.table_updates,
            s.table_lookups,
            s.table_successful_lookups,
            s.table_remote_lookups
        );
        tracing::info!(
            "FT:           {} killed orphans, {} redone jobs",
            s.killed_orphans,
            s.redone_jobs
        );
    }
}
