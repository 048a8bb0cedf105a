use engine_cluster::error::ClusterError;
use engine_config::settings::error::SettingsError;
use engine_core::error::StateError;
use engine_runtime::error::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to load configuration: {0}")]
    Settings(#[from] SettingsError),

    #[error("Failed to run the graph: {0}")]
    Engine(#[from] EngineError),

    #[error("Cluster run failed: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Failed to read the run journal: {0}")]
    Journal(#[from] StateError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("No run journal configured (use --state-dir or set state_dir)")]
    NoJournal,

    #[error("The journal holds no runs")]
    NoRuns,

    #[error("At least one worker is required")]
    NoWorkers,
}
