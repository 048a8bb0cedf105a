use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowSetError {
    #[error("RowSet {0} is already marked done")]
    AlreadyDone(String),

    /// Every row in a RowSet must share the first row's schema.
    #[error("Row shape differs from the schema already flowing through RowSet {0}")]
    SchemaMismatch(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Partition key field '{0}' is not present in the row")]
    MissingKeyField(String),
}

#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("Failed to read replay log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State store error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Failed to encode journal entry: {0}")]
    Encode(#[from] bincode::Error),

    #[error("No journal entries for run {0}")]
    UnknownRun(String),
}
