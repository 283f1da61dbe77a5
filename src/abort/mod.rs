//! Abort Module
//!
//! Cancels subtrees whose results can no longer affect the final answer
//! (a pruned branch, or a speculative sibling that lost the race).
//!
//! ## Guarantees
//! - An aborted subtree never contributes a result to a `sync`.
//! - Delivery is at-least-once and receiving is idempotent: duplicate aborts
//!   and late results against an Aborted record are no-ops.
//! - Abort is irreversible per job id.
//!
//! The local sweep and the state transitions live in `records`; this module
//! carries the abort across the wire: broadcast to alive members, plus
//! point-to-point forwarding to the thieves holding stolen descendants.

pub mod coordinator;
pub mod handlers;
pub mod protocol;

#[cfg(test)]
mod tests;
