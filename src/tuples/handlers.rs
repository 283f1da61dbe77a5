use super::space::TupleSpace;
use super::types::{SeqReply, Tuple};

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

/// Serves sequence-number assignment. Any node answers; members only ask the
/// node their membership view elects as sequencer.
pub async fn handle_tuple_seq(
    Extension(space): Extension<Arc<TupleSpace>>,
) -> (StatusCode, Json<SeqReply>) {
    let seq = space.assign_seq();
    tracing::debug!("Assigned tuple sequence {}", seq);
    (StatusCode::OK, Json(SeqReply { seq }))
}

/// Receives a sequenced tuple from a broadcasting peer.
pub async fn handle_tuple_publish(
    Extension(space): Extension<Arc<TupleSpace>>,
    Json(tuple): Json<Tuple>,
) -> StatusCode {
    space.apply(tuple);
    StatusCode::OK
}
