use engine_config::settings::error::SettingsError;
use engine_core::error::StateError;
use engine_processing::error::StepError;
use model::error::GraphError;
use thiserror::Error;

/// Setup failures of a run. Failures *during* a run are reported through
/// `RunResult`, not as errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid graph: {0}")]
    Graph(#[from] GraphError),

    /// A step could not be instantiated (unknown type or bad configuration).
    #[error("Step '{step}': {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("Run journal error: {0}")]
    State(#[from] StateError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// An error occurred while joining a task.
    /// This usually indicates that the task was cancelled or panicked.
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Common error type for all actors in the engine.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("Mailbox closed")]
    MailboxClosed,

    #[error("Actor dropped the reply channel")]
    NoReply,

    #[error("Actor internal error: {0}")]
    Internal(String),
}
