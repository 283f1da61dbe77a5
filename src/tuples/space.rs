use super::types::{ENDPOINT_TUPLE_PUBLISH, ENDPOINT_TUPLE_SEQ, SeqReply, Tuple};
use crate::membership::service::MembershipService;
use crate::membership::types::NodeId;
use crate::stats::EngineStats;

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, mpsc};

struct TupleState {
    /// Sequence number the next applied tuple must carry.
    next_apply: u64,
    /// Out-of-order arrivals parked until their predecessors land.
    pending: BTreeMap<u64, Tuple>,
    /// Latest applied tuple per key.
    applied: HashMap<String, Tuple>,
    applied_count: u64,
    subscribers: Vec<mpsc::UnboundedSender<Tuple>>,
}

/// The totally-ordered broadcast log.
///
/// The hold-back map has to be drained in sequence order, so the whole state
/// sits behind one mutex held only for map operations; the wire work happens
/// outside it.
pub struct TupleSpace {
    membership: Arc<MembershipService>,
    stats: Arc<EngineStats>,
    http_client: reqwest::Client,
    state: Mutex<TupleState>,
    applied_notify: Notify,
    /// Sequencer-side counter. Kept past the highest sequence seen so a
    /// takeover after the previous sequencer's death never reuses a number.
    next_seq: AtomicU64,
}

impl TupleSpace {
    pub fn new(membership: Arc<MembershipService>, stats: Arc<EngineStats>) -> Arc<Self> {
        Arc::new(Self {
            membership,
            stats,
            http_client: reqwest::Client::new(),
            state: Mutex::new(TupleState {
                next_apply: 1,
                pending: BTreeMap::new(),
                applied: HashMap::new(),
                applied_count: 0,
                subscribers: Vec::new(),
            }),
            applied_notify: Notify::new(),
            next_seq: AtomicU64::new(0),
        })
    }

    fn state(&self) -> MutexGuard<'_, TupleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ordered stream of applied tuples. Every subscriber sees the same
    /// sequence the local node applied.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Tuple> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().subscribers.push(tx);
        rx
    }

    /// Hands out the next sequence number. Only meaningful on the node
    /// currently holding the sequencer role.
    pub fn assign_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn next_sequence(&self) -> Result<u64> {
        let sequencer = self
            .membership
            .sequencer()
            .ok_or_else(|| anyhow::anyhow!("no alive nodes to act as sequencer"))?;

        if sequencer == self.membership.local_node.id {
            return Ok(self.assign_seq());
        }

        let node = self
            .membership
            .get_member(&sequencer)
            .ok_or_else(|| anyhow::anyhow!("sequencer {} not in member table", sequencer))?;

        let response = self
            .http_client
            .post(format!("http://{}{}", node.http_addr, ENDPOINT_TUPLE_SEQ))
            .timeout(std::time::Duration::from_millis(500))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("sequence request failed: {}", response.status());
        }

        let reply: SeqReply = response.json().await?;
        Ok(reply.seq)
    }

    /// Appends a tuple to the global log: fetches a sequence number, applies
    /// locally, and delivers to every other member.
    pub async fn broadcast(&self, key: &str, value: serde_json::Value) -> Result<u64> {
        let seq = self.next_sequence().await?;
        let tuple = Tuple {
            seq,
            key: key.to_string(),
            value,
        };

        EngineStats::bump(&self.stats.tuple_msgs);
        if let Ok(encoded) = serde_json::to_vec(&tuple) {
            EngineStats::add(&self.stats.tuple_bytes, encoded.len() as u64);
        }

        self.apply(tuple.clone());

        for member in self.membership.get_alive_members() {
            if member.id == self.membership.local_node.id {
                continue;
            }

            let url = format!("http://{}{}", member.http_addr, ENDPOINT_TUPLE_PUBLISH);
            if let Err(e) = self.post_tuple(&url, &tuple).await {
                tracing::warn!("Failed to deliver tuple {} to {}: {}", seq, member.id, e);
            }
        }

        Ok(seq)
    }

    async fn post_tuple(&self, url: &str, tuple: &Tuple) -> Result<()> {
        let mut delay_ms = 150u64;

        for attempt in 0..3 {
            let response = self
                .http_client
                .post(url)
                .json(tuple)
                .timeout(std::time::Duration::from_millis(500))
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => anyhow::bail!("tuple delivery rejected: {}", resp.status()),
                Err(e) => {
                    if attempt == 2 {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Ok(())
    }

    /// Applies a received tuple, or parks it until its predecessors arrive.
    /// Duplicates below the application horizon are dropped.
    pub fn apply(&self, tuple: Tuple) {
        self.next_seq.fetch_max(tuple.seq, Ordering::SeqCst);

        let mut applied_any = false;
        {
            let mut state = self.state();

            if tuple.seq < state.next_apply {
                tracing::trace!("Dropping duplicate tuple {}", tuple.seq);
                return;
            }

            state.pending.insert(tuple.seq, tuple);

            loop {
                let target = state.next_apply;
                let Some(next) = state.pending.remove(&target) else {
                    break;
                };
                tracing::debug!("Applying tuple {} key={}", next.seq, next.key);
                state.next_apply += 1;
                state.applied_count += 1;
                state.applied.insert(next.key.clone(), next.clone());
                state.subscribers.retain(|tx| tx.send(next.clone()).is_ok());
                applied_any = true;
            }
        }

        if applied_any {
            self.applied_notify.notify_waiters();
        }
    }

    /// Latest applied tuple for a key, if any.
    pub fn read(&self, key: &str) -> Option<Tuple> {
        self.state().applied.get(key).cloned()
    }

    /// Blocks until a tuple with the given key has been locally applied.
    pub async fn await_key(&self, key: &str) -> Tuple {
        loop {
            let notified = self.applied_notify.notified();
            tokio::pin!(notified);
            // Register before checking, or an apply between the check and the
            // await would be missed.
            notified.as_mut().enable();

            if let Some(tuple) = self.read(key) {
                return tuple;
            }
            notified.await;
        }
    }

    pub fn applied_count(&self) -> u64 {
        self.state().applied_count
    }

    pub fn local_node_id(&self) -> NodeId {
        self.membership.local_node.id.clone()
    }
}
