//! Steal Engine Module
//!
//! Moves unexecuted work from busy nodes to idle ones.
//!
//! ## Architecture Overview
//! The steal engine follows a **Pull-based** model:
//! 1. **Victim Selection**: An idle node picks a uniform-random victim among
//!    alive members (never itself, never a dead node).
//! 2. **Request/Reply**: One HTTP round trip per attempt. The victim either
//!    denies (empty steal end or below its watermark) or grants exactly one
//!    job by value, marking its own record Stolen.
//! 3. **Timeout**: A reply missing its deadline counts as TimedOut; the thief
//!    just picks a fresh victim, so a crashed partner never blocks it.
//! 4. **Result Return**: The thief executes the job and posts the outcome
//!    back to the victim, which is still the node whose spawn tree awaits it.
//!
//! ## Submodules
//! - **`protocol`**: HTTP DTOs for steal requests, grants, and result return.
//! - **`engine`**: The thief side (victim choice, attempts, result posts).
//! - **`handlers`**: The victim side, answering steals out of the engine.

pub mod engine;
pub mod handlers;
pub mod protocol;
