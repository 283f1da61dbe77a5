use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};

/// Globally unique job identifier.
///
/// Combines the spawning node's id with that node's monotonic spawn counter.
/// Immutable once assigned; hashed (via its string form) to place the job's
/// result in the global result table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId {
    pub node: NodeId,
    pub seq: u64,
}

impl JobId {
    /// Stable string form, used as the result-table key and in URLs.
    pub fn key(&self) -> String {
        format!("{}@{}", self.seq, self.node.0)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.seq, self.node.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (seq, node) = s
            .split_once('@')
            .ok_or_else(|| anyhow::anyhow!("Malformed job id: {}", s))?;
        Ok(JobId {
            node: NodeId(node.to_string()),
            seq: seq.parse()?,
        })
    }
}

/// The definition of a unit of work: a registered handler name plus an
/// arbitrary JSON payload passed to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub handler: String,
    pub payload: serde_json::Value,
}

/// What a job produced. An application-level failure travels through the
/// spawn tree exactly like a normal result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobOutcome {
    Completed { value: serde_json::Value },
    Failed { error: String },
}

/// Lifecycle state of an invocation record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecordState {
    /// Spawned, waiting in the run queue.
    Pending,
    /// Executing on this node.
    Running,
    /// Transferred to a thief; this record is the victim's outline entry,
    /// kept so aborts can still be forwarded.
    Stolen,
    /// Cancelled. Terminal; late results against it are discarded.
    Aborted,
    /// Result available. Terminal.
    Finished,
}

/// Represents one spawned job.
///
/// The parent reference is a weak back-reference (owning node + job id),
/// never ownership; children are owned and listed in spawn order. The
/// ancestor chain is root-first and travels with the record when stolen,
/// so abort matching works on any node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub parent: Option<JobId>,
    pub ancestors: Vec<JobId>,
    pub children: Vec<JobId>,
    pub state: RecordState,
    pub result: Option<JobOutcome>,
    /// Thief holding this job, when state is Stolen (victim side).
    pub stolen_by: Option<NodeId>,
    /// Node this job was stolen from (thief side); results go back there.
    pub stolen_from: Option<NodeId>,
    pub spawned_at: u64,
}

impl InvocationRecord {
    pub fn is_live(&self) -> bool {
        matches!(
            self.state,
            RecordState::Pending | RecordState::Running | RecordState::Stolen
        )
    }

    /// True when this record is the given job or lies in its subtree.
    pub fn descends_from(&self, job_id: &JobId) -> bool {
        self.job_id == *job_id || self.ancestors.contains(job_id)
    }
}

/// One child's contribution to a `sync`, in spawn order. Aborted children
/// contribute no outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildResult {
    pub job_id: JobId,
    pub outcome: Option<JobOutcome>,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
