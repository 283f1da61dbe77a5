use super::protocol::{
    ENDPOINT_JOB_RESULT, ENDPOINT_STEAL, JobResultMsg, StealReply, StealRequest, StolenJob,
};
use crate::membership::service::MembershipService;
use crate::membership::types::{Node, NodeId};
use crate::records::types::{JobId, JobOutcome};
use crate::stats::EngineStats;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one (thief, victim) steal attempt. The thief's loop goes
/// Idle -> RequestSent -> one of these -> Idle, picking a fresh victim on
/// anything but a grant.
#[derive(Debug)]
pub enum StealAttempt {
    Granted { job: StolenJob, victim: NodeId },
    Denied,
    TimedOut,
    /// Nobody to steal from (single node, or everyone else is dead).
    NoVictim,
}

/// The thief side of the steal protocol.
pub struct StealEngine {
    membership: Arc<MembershipService>,
    stats: Arc<EngineStats>,
    http_client: reqwest::Client,
    steal_timeout: Duration,
}

impl StealEngine {
    pub fn new(
        membership: Arc<MembershipService>,
        stats: Arc<EngineStats>,
        steal_timeout: Duration,
    ) -> Self {
        Self {
            membership,
            stats,
            http_client: reqwest::Client::new(),
            steal_timeout,
        }
    }

    /// Uniform-random choice among alive members, excluding ourselves.
    pub fn pick_victim(&self) -> Option<Node> {
        let local = &self.membership.local_node.id;
        let candidates: Vec<Node> = self
            .membership
            .get_alive_members()
            .into_iter()
            .filter(|node| &node.id != local)
            .collect();

        if candidates.is_empty() {
            return None;
        }

        use rand::Rng;
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx].clone())
    }

    /// One steal attempt against a fresh random victim.
    pub async fn attempt(&self, load_hint: usize) -> StealAttempt {
        let Some(victim) = self.pick_victim() else {
            return StealAttempt::NoVictim;
        };

        EngineStats::bump(&self.stats.steal_attempts);

        let request = StealRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            thief: self.membership.local_node.id.clone(),
            load_hint,
        };

        let started = std::time::Instant::now();
        let response = self
            .http_client
            .post(format!("http://{}{}", victim.http_addr, ENDPOINT_STEAL))
            .json(&request)
            .timeout(self.steal_timeout)
            .send()
            .await;
        EngineStats::add(
            &self.stats.steal_time_us,
            started.elapsed().as_micros() as u64,
        );

        let reply = match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<StealReply>().await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!("Malformed steal reply from {}: {}", victim.id, e);
                    return StealAttempt::Denied;
                }
            },
            Ok(resp) => {
                tracing::warn!("Steal request to {} rejected: {}", victim.id, resp.status());
                return StealAttempt::Denied;
            }
            Err(e) if e.is_timeout() => {
                tracing::debug!("Steal request to {} timed out", victim.id);
                return StealAttempt::TimedOut;
            }
            Err(e) => {
                // Connection refused and friends: the partner may be going
                // down; membership will notice. For us it is the same as a
                // timeout.
                tracing::debug!("Steal request to {} failed: {}", victim.id, e);
                return StealAttempt::TimedOut;
            }
        };

        match reply {
            StealReply::Denied => StealAttempt::Denied,
            StealReply::Granted { request_id, job } => {
                if request_id != request.request_id {
                    tracing::warn!(
                        "Steal reply from {} for foreign request {} (ours {})",
                        victim.id,
                        request_id,
                        request.request_id
                    );
                    return StealAttempt::Denied;
                }

                EngineStats::bump(&self.stats.steal_success);
                EngineStats::bump(&self.stats.stolen_jobs);
                if let Ok(encoded) = serde_json::to_vec(&job) {
                    EngineStats::add(&self.stats.steal_bytes, encoded.len() as u64);
                }

                tracing::info!("Stole job {} from {}", job.job_id, victim.id);
                StealAttempt::Granted {
                    job,
                    victim: victim.id,
                }
            }
        }
    }

    /// Posts a finished stolen job's outcome back to the node it came from.
    pub async fn send_result(
        &self,
        origin: &NodeId,
        job_id: &JobId,
        outcome: &JobOutcome,
    ) -> Result<()> {
        let node = self
            .membership
            .get_member(origin)
            .ok_or_else(|| anyhow::anyhow!("Origin node not found: {}", origin))?;

        let payload = JobResultMsg {
            job_id: job_id.clone(),
            outcome: outcome.clone(),
        };

        let mut delay_ms = 150u64;
        for attempt in 0..3 {
            let response = self
                .http_client
                .post(format!("http://{}{}", node.http_addr, ENDPOINT_JOB_RESULT))
                .json(&payload)
                .timeout(Duration::from_millis(500))
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => anyhow::bail!("Result delivery rejected: {}", resp.status()),
                Err(e) => {
                    if attempt == 2 {
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
