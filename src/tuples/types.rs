//! Tuple Space Network Protocol
//!
//! DTOs and endpoints for sequence-number assignment and tuple delivery.

use serde::{Deserialize, Serialize};

/// Endpoint on the sequencer assigning the next sequence number.
pub const ENDPOINT_TUPLE_SEQ: &str = "/internal/tuple/seq";
/// Endpoint delivering a sequenced tuple to a member.
pub const ENDPOINT_TUPLE_PUBLISH: &str = "/internal/tuple/publish";

/// One entry of the global log. `seq` positions it in the single total order
/// shared by all nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tuple {
    pub seq: u64,
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeqReply {
    pub seq: u64,
}
