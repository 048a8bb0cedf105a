use engine_core::error::{PartitionError, PlaylistError, RowSetError};
use model::{error::ModelError, records::row::Row};
use std::fmt;
use thiserror::Error;

/// A single row that could not be processed. Recoverable through the error hop.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub code: String,
    pub description: String,
    pub field: Option<String>,
    /// Offending row when it differs from the unit's input row, e.g. the raw
    /// record of a source step.
    pub row: Option<Row>,
}

impl RowError {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            field: None,
            row: None,
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.row = Some(row);
        self
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "[{}] {} (field '{}')", self.code, self.description, field),
            None => write!(f, "[{}] {}", self.code, self.description),
        }
    }
}

#[derive(Error, Debug)]
pub enum StepError {
    /// Row-level failure; the unit hands it to the error router.
    #[error("Row error: {0}")]
    Row(RowError),

    #[error("Invalid step configuration: {0}")]
    Config(String),

    #[error("Unknown step type: {0}")]
    UnknownType(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("RowSet error: {0}")]
    RowSet(#[from] RowSetError),

    #[error("Partitioning error: {0}")]
    Partition(#[from] PartitionError),

    #[error("Playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("Row model error: {0}")]
    Model(#[from] ModelError),

    #[error("No output hop to step '{0}'")]
    UnknownTarget(String),

    #[error("No info hop from step '{0}'")]
    UnknownInfo(String),

    #[error("Error threshold exceeded: {errors} errors, {detail}")]
    ThresholdExceeded { errors: u64, detail: String },

    /// The run was stopped while the step waited on a RowSet.
    #[error("Run stopped")]
    Stopped,

    #[error("{0}")]
    Failed(String),
}

impl From<RowError> for StepError {
    fn from(err: RowError) -> Self {
        StepError::Row(err)
    }
}

impl StepError {
    pub fn config(err: impl fmt::Display) -> Self {
        StepError::Config(err.to_string())
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, StepError::Stopped)
    }
}
