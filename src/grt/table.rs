use super::types::{ENDPOINT_GRT_GET, ENDPOINT_GRT_REPLICATE, GrtEntry, GrtGetResponse,
                   ReplicateEntryRequest};
use crate::membership::service::MembershipService;
use crate::membership::types::{NodeId, NodeState};
use crate::records::types::{JobId, JobOutcome};
use crate::stats::EngineStats;

use anyhow::Result;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// The replicated in-memory map from job id to completed result.
///
/// The shard is a concurrent map; handlers write replica copies into it
/// directly while the worker records and looks up results.
pub struct GlobalResultTable {
    membership: Arc<MembershipService>,
    stats: Arc<EngineStats>,
    entries: DashMap<String, GrtEntry>,
    http_client: reqwest::Client,
    epoch: AtomicU64,
}

impl GlobalResultTable {
    pub fn new(membership: Arc<MembershipService>, stats: Arc<EngineStats>) -> Arc<Self> {
        Arc::new(Self {
            membership,
            stats,
            entries: DashMap::new(),
            http_client: reqwest::Client::new(),
            epoch: AtomicU64::new(0),
        })
    }

    /// Holder priority list for a job id: the sorted alive membership walked
    /// ring-wise from a deterministic hash of the id. Every node computes the
    /// same list from the same view.
    pub fn placement(&self, job_id: &JobId) -> Vec<NodeId> {
        let mut node_ids: Vec<NodeId> = self
            .membership
            .get_alive_members()
            .into_iter()
            .map(|node| node.id)
            .collect();

        if node_ids.is_empty() {
            return vec![];
        }
        node_ids.sort();

        let mut hasher = DefaultHasher::new();
        job_id.key().hash(&mut hasher);
        let start = (hasher.finish() as usize) % node_ids.len();

        (0..node_ids.len())
            .map(|offset| node_ids[(start + offset) % node_ids.len()].clone())
            .collect()
    }

    /// The peers that must receive a copy before a result counts as durable:
    /// the first `replication_factor - 1` placement nodes that are not us.
    pub fn replica_targets(&self, job_id: &JobId, replication_factor: usize) -> Vec<NodeId> {
        let local = &self.membership.local_node.id;

        self.placement(job_id)
            .into_iter()
            .filter(|node_id| node_id != local)
            .take(replication_factor.saturating_sub(1))
            .collect()
    }

    /// Stores a completed result and synchronously pushes copies to the
    /// replica set. Only after this returns may the caller discard the
    /// invocation record the result came from.
    ///
    /// A replica push missing its deadline downgrades to best-effort async
    /// delivery; the durability gap is logged.
    pub async fn record(
        self: &Arc<Self>,
        job_id: &JobId,
        outcome: JobOutcome,
        replication_factor: usize,
        replication_timeout: Duration,
    ) -> Result<()> {
        EngineStats::bump(&self.stats.table_updates);

        let replicas = self.replica_targets(job_id, replication_factor);
        let entry = GrtEntry {
            job_id: job_id.clone(),
            outcome,
            epoch: self.epoch.fetch_add(1, Ordering::SeqCst) + 1,
            owner: self.membership.local_node.id.clone(),
            replicas: replicas.clone(),
        };

        self.entries.insert(job_id.key(), entry.clone());

        for replica in &replicas {
            let push = self.push_replica(replica, &entry);
            match tokio::time::timeout(replication_timeout, push).await {
                Ok(Ok(())) => {
                    tracing::debug!("Replicated result {} to {}", job_id, replica);
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        "Replica push of {} to {} failed: {} (durability at risk)",
                        job_id,
                        replica,
                        e
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        "Replica push of {} to {} timed out, continuing best-effort \
                         (durability at risk)",
                        job_id,
                        replica
                    );
                    let table = self.clone();
                    let replica = replica.clone();
                    let entry = entry.clone();
                    tokio::spawn(async move {
                        if let Err(e) = table.push_replica(&replica, &entry).await {
                            tracing::warn!(
                                "Background replica push of {} to {} failed: {}",
                                entry.job_id,
                                replica,
                                e
                            );
                        }
                    });
                }
            }
        }

        Ok(())
    }

    async fn push_replica(&self, replica: &NodeId, entry: &GrtEntry) -> Result<()> {
        let node = self
            .membership
            .get_member(replica)
            .ok_or_else(|| anyhow::anyhow!("Replica node not found: {}", replica))?;

        let payload = ReplicateEntryRequest {
            entry: entry.clone(),
        };

        let response = self
            .post_with_retry(
                format!("http://{}{}", node.http_addr, ENDPOINT_GRT_REPLICATE),
                &payload,
                Duration::from_millis(500),
                3,
            )
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Replication failed: {}", response.status());
        }

        Ok(())
    }

    /// Local shard lookup.
    pub fn lookup_local(&self, job_id: &JobId) -> Option<GrtEntry> {
        EngineStats::bump(&self.stats.table_lookups);

        let hit = self.entries.get(&job_id.key()).map(|e| e.value().clone());
        if hit.is_some() {
            EngineStats::bump(&self.stats.table_successful_lookups);
        }
        hit
    }

    /// Looks up a result: local shard first, then the placement nodes under
    /// the current membership view.
    pub async fn lookup(&self, job_id: &JobId) -> Option<GrtEntry> {
        if let Some(entry) = self.lookup_local(job_id) {
            return Some(entry);
        }

        let local = &self.membership.local_node.id;
        for holder in self.placement(job_id) {
            if &holder == local {
                continue;
            }

            EngineStats::bump(&self.stats.table_remote_lookups);
            match self.fetch_remote(&holder, job_id).await {
                Ok(Some(entry)) => {
                    tracing::debug!("Found result {} on {}", job_id, holder);
                    return Some(entry);
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Remote lookup of {} on {} failed: {}", job_id, holder, e);
                    continue;
                }
            }
        }

        None
    }

    async fn fetch_remote(&self, holder: &NodeId, job_id: &JobId) -> Result<Option<GrtEntry>> {
        let node = self
            .membership
            .get_member(holder)
            .ok_or_else(|| anyhow::anyhow!("Holder node not found: {}", holder))?;

        let url = format!(
            "http://{}{}/{}",
            node.http_addr,
            ENDPOINT_GRT_GET,
            job_id.key()
        );

        let response = self
            .get_with_retry(url, Duration::from_millis(500), 3)
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("Lookup request failed: {}", response.status());
        }

        let reply: GrtGetResponse = response.json().await?;
        Ok(reply.entry)
    }

    /// Stores a replica copy pushed by an owner. Idempotent.
    pub fn apply_replica(&self, entry: GrtEntry) {
        let key = entry.job_id.key();
        self.entries.entry(key).or_insert(entry);
    }

    pub fn get_by_key(&self, key: &str) -> Option<GrtEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn entries_owned_by(&self, owner: &NodeId) -> Vec<GrtEntry> {
        self.entries
            .iter()
            .filter(|e| &e.value().owner == owner)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Crash handling for the shard: promote surviving replicas of entries
    /// the dead node owned. The first alive replica in priority order adopts
    /// the entry and re-replicates it under the current membership, so the
    /// result keeps its durability margin instead of being redone.
    pub async fn handle_crash(
        self: &Arc<Self>,
        dead: &NodeId,
        replication_factor: usize,
        replication_timeout: Duration,
    ) {
        let local = self.membership.local_node.id.clone();

        for lost in self.entries_owned_by(dead) {
            let first_survivor = lost
                .replicas
                .iter()
                .find(|replica| self.is_alive(replica))
                .cloned();

            if first_survivor.as_ref() != Some(&local) {
                continue;
            }

            tracing::info!(
                "Promoting replica of {} (owner {} died)",
                lost.job_id,
                dead
            );

            if let Err(e) = self
                .record(
                    &lost.job_id,
                    lost.outcome.clone(),
                    replication_factor,
                    replication_timeout,
                )
                .await
            {
                tracing::warn!("Re-replication of {} failed: {}", lost.job_id, e);
            }
        }
    }

    fn is_alive(&self, node_id: &NodeId) -> bool {
        self.membership
            .get_member(node_id)
            .map(|node| node.state == NodeState::Alive)
            .unwrap_or(false)
    }

    // --- HTTP helpers with backoff ---

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    // Simple jitter to prevent thundering herd
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }

    async fn get_with_retry(
        &self,
        url: String,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .get(url.clone())
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}
