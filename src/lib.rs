//! Cluster-Wide Divide-and-Conquer Engine Library
//!
//! This library crate defines the core modules that make up the work-stealing
//! runtime. It serves as the foundation for the node binary (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled subsystems:
//!
//! - **`membership`**: The cluster coordination layer. Uses a UDP-based Gossip
//!   protocol (SWIM-like) to manage node discovery, failure detection, and the
//!   per-node view of who is Alive, Suspect, or Dead.
//! - **`records`**: The invocation record store. Owns the spawn tree of
//!   pending/running jobs on a node and the double-ended run queue that local
//!   execution and remote thieves share.
//! - **`steal`**: The steal engine. Picks victims among alive nodes, issues
//!   steal requests, answers incoming steals, and carries job results back to
//!   the node that lost the job.
//! - **`abort`**: Cancellation of a subtree whose result can no longer affect
//!   the final answer, propagated cluster-wide and idempotent on arrival.
//! - **`tuples`**: A broadcast key/value log applied by every node in one
//!   identical total order, established by a sequencer role. Crash handling
//!   routes through this order.
//! - **`grt`**: The global result table. Replicates completed job results
//!   across nodes so they survive the crash of the node that computed them,
//!   and drives orphan killing and redo.
//! - **`engine`**: The composition root. One explicitly constructed `Engine`
//!   per process wires the pieces together and runs the worker loop.
//! - **`stats`**: Passive counters and timers consumed by everything above,
//!   reported periodically.

pub mod abort;
pub mod engine;
pub mod grt;
pub mod membership;
pub mod records;
pub mod stats;
pub mod steal;
pub mod tuples;
