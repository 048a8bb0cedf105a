use crate::error::ClusterError;
use async_trait::async_trait;
use model::graph::{assignment::PartitionAssignment, definition::GraphDefinition};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a worker is in its life cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    #[default]
    Idle,
    Running,
    Finished,
    Failed,
    Stopped,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Finished | WorkerState::Failed | WorkerState::Stopped
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Idle => "Idle",
            WorkerState::Running => "Running",
            WorkerState::Finished => "Finished",
            WorkerState::Failed => "Failed",
            WorkerState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// Answer to a status poll: unit counts and aggregated row counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub run_id: Option<String>,
    pub running: usize,
    pub finished: usize,
    pub failed: usize,
    pub rows_read: u64,
    pub rows_written: u64,
    pub errors: u64,
}

/// RPC surface of one worker as seen by the coordinator.
///
/// Implementations own the transport. Every call is wrapped in the
/// coordinator's RPC timeout, so a call may simply hang on a dead peer.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    fn address(&self) -> &str;

    /// Hands the worker the graph and the partitions it owns, and starts it.
    async fn start(
        &self,
        run_id: &str,
        graph: &GraphDefinition,
        assignment: &PartitionAssignment,
    ) -> Result<(), ClusterError>;

    async fn status(&self) -> Result<WorkerStatus, ClusterError>;

    async fn stop(&self) -> Result<(), ClusterError>;

    /// Liveness probe used for discovery.
    async fn heartbeat(&self) -> Result<(), ClusterError>;
}
