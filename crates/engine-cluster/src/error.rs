use engine_runtime::error::{ActorError, EngineError};
use model::error::GraphError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Invalid graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Graph has no key-partitioned step to split across workers")]
    NothingToSplit,

    #[error("Step '{step}' has {partitions} partitions, fewer than the {workers} workers")]
    TooFewPartitions {
        step: String,
        partitions: u32,
        workers: usize,
    },

    #[error("Rows of partitioned step '{from}' would have to move between workers to reach '{to}'")]
    Repartition { from: String, to: String },

    #[error("Step '{step}' reads partitioned rows but also feeds a partitioned step")]
    PartitionedUpstream { step: String },

    #[error("Lookup '{to}' would only see the rows of '{from}' held by its own worker")]
    PartialLookup { from: String, to: String },

    #[error("Step '{to}' would read the full stream of '{from}' on every worker")]
    MixedInput { from: String, to: String },

    #[error("Error rows of '{from}' are produced on every worker but '{to}' runs on one")]
    ReplicatedErrors { from: String, to: String },

    #[error("No worker answered the discovery heartbeat")]
    NoWorkers,

    #[error("Worker {worker} did not answer {operation} within the RPC timeout")]
    Timeout { worker: String, operation: String },

    #[error("Worker {worker} is unreachable: {reason}")]
    Unreachable { worker: String, reason: String },

    #[error("Worker {0} is already running a graph")]
    Busy(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),
}

impl ClusterError {
    /// Transport problems are worth another attempt; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClusterError::Timeout { .. } | ClusterError::Unreachable { .. }
        )
    }
}
