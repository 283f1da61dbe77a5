//! Membership & Discovery Module
//!
//! Implements a Gossip-based membership protocol (inspired by SWIM) to manage the cluster topology.
//! Nodes use this service to discover each other, detect failures, and disseminate cluster state updates.
//!
//! ## Core Mechanisms
//! - **Gossip Protocol**: Nodes periodically exchange status updates via UDP to maintain a consistent view of the cluster.
//! - **Failure Detection**: Uses an "Alive" -> "Suspect" -> "Dead" transition model with timeouts. Dead is terminal:
//!   a dead entry never becomes alive again unless the node re-joins with a fresh `Join` message.
//! - **Incarnation Numbers**: Solves conflict resolution when node state (Alive/Suspect) is disputed.
//! - **Death Notifications**: Subscribers (the engine's crash-handling path) receive every Alive/Suspect -> Dead
//!   transition exactly once over a channel.

pub mod service;
pub mod types;
