use super::protocol::{AbortMsg, ENDPOINT_ABORT};
use crate::membership::service::MembershipService;
use crate::membership::types::NodeId;
use crate::records::types::JobId;
use crate::stats::EngineStats;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Carries aborts across the wire. The matching state changes happen in the
/// record store; this type only knows who to tell.
pub struct AbortCoordinator {
    membership: Arc<MembershipService>,
    stats: Arc<EngineStats>,
    http_client: reqwest::Client,
}

impl AbortCoordinator {
    pub fn new(membership: Arc<MembershipService>, stats: Arc<EngineStats>) -> Self {
        Self {
            membership,
            stats,
            http_client: reqwest::Client::new(),
        }
    }

    /// Tells every alive member to kill the subtree. At-least-once is enough:
    /// the receiving sweep is idempotent.
    pub async fn broadcast(&self, job_id: &JobId) {
        for member in self.membership.get_alive_members() {
            if member.id == self.membership.local_node.id {
                continue;
            }

            EngineStats::bump(&self.stats.abort_messages);
            if let Err(e) = self.post_abort(&member.id, job_id).await {
                tracing::warn!("Failed to send abort of {} to {}: {}", job_id, member.id, e);
            }
        }
    }

    /// Point-to-point aborts for stolen descendants: each thief learns that a
    /// job it took is dead, and forwards further if it passed children on.
    pub async fn forward(&self, forwards: &[(NodeId, JobId)]) {
        for (thief, job_id) in forwards {
            EngineStats::bump(&self.stats.abort_messages);
            if let Err(e) = self.post_abort(thief, job_id).await {
                tracing::warn!("Failed to forward abort of {} to {}: {}", job_id, thief, e);
            }
        }
    }

    async fn post_abort(&self, target: &NodeId, job_id: &JobId) -> Result<()> {
        let node = self
            .membership
            .get_member(target)
            .ok_or_else(|| anyhow::anyhow!("Abort target not found: {}", target))?;

        let payload = AbortMsg {
            job_id: job_id.clone(),
        };

        let mut delay_ms = 150u64;
        for attempt in 0..2 {
            let response = self
                .http_client
                .post(format!("http://{}{}", node.http_addr, ENDPOINT_ABORT))
                .json(&payload)
                .timeout(Duration::from_millis(500))
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => anyhow::bail!("Abort rejected: {}", resp.status()),
                Err(e) => {
                    if attempt == 1 {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms *= 2;
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}
