use model::error::GraphError;
use thiserror::Error;

/// Errors raised while loading settings, environment files or graph definitions.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Every problem found by the validator, reported together.
    #[error("Settings validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Invalid env file {path}: {reason}")]
    EnvFile { path: String, reason: String },

    #[error("Undefined variables referenced: {}", .0.join(", "))]
    UndefinedVariables(Vec<String>),

    #[error("Invalid graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Could not determine home directory")]
    NoHomeDir,
}
