use thiserror::Error;

/// Errors raised while building schemas, rows or converting values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Duplicate field name in schema: {0}")]
    DuplicateField(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// A row was built with a different number of values than its schema has fields.
    #[error("Row has {actual} values but schema has {expected} fields")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Cannot convert '{value}' to {target}: {reason}")]
    Conversion {
        value: String,
        target: String,
        reason: String,
    },
}

/// Structural problems found in a graph definition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Graph has no steps")]
    Empty,

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Step '{0}' must run at least one copy")]
    ZeroCopies(String),

    #[error("Hop references unknown step '{step}' ({from} -> {to})")]
    UnknownStep {
        step: String,
        from: String,
        to: String,
    },

    #[error("Hop from '{0}' to itself")]
    SelfLoop(String),

    #[error("Duplicate hop {from} -> {to}")]
    DuplicateHop { from: String, to: String },

    #[error("Step '{0}' declares more than one error hop")]
    MultipleErrorHops(String),

    #[error("Key-partitioned hop {from} -> {to} has no key fields")]
    EmptyPartitionKey { from: String, to: String },

    #[error("Step '{0}' has input hops but is not reachable from any source step")]
    Unreachable(String),

    #[error("Graph contains a cycle through step '{0}'")]
    Cycle(String),
}
