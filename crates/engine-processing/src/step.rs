use crate::{error::StepError, io::StepIo};
use async_trait::async_trait;
use engine_core::playlist::Playlist;
use model::{
    graph::{assignment::PartitionRange, definition::StepDefinition},
    records::row::Row,
};
use std::sync::Arc;

/// What the unit should do after a row was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The step wants no more input. Sources return this once exhausted.
    EndOfInput,
}

/// Everything a step copy knows about where it runs.
#[derive(Clone)]
pub struct StepContext {
    pub run_id: String,
    pub name: Arc<str>,
    pub copy: u32,
    pub copies: u32,
    pub definition: Arc<StepDefinition>,
    pub playlist: Arc<dyn Playlist>,
    /// Cluster-wide partitions owned by this worker, for partitioned steps.
    pub partitions: Option<PartitionRange>,
    /// Name of the cluster worker running this copy.
    pub worker: Option<Arc<str>>,
}

impl StepContext {
    /// Copy number unique across the cluster for partitioned steps.
    pub fn global_copy(&self) -> u32 {
        self.partitions.map(|r| r.start).unwrap_or(0) + self.copy
    }
}

/// The per-row contract every step type implements.
///
/// The runtime owns scheduling and queues. A step only sees one row at a
/// time and writes its results through [`StepIo`].
#[async_trait]
pub trait Step: Send {
    /// One-time setup. A failure here aborts the run before any row moves.
    async fn init(&mut self, ctx: &StepContext) -> Result<(), StepError>;

    /// `row` is `None` for source steps, which are called until they return
    /// [`Flow::EndOfInput`].
    async fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo)
    -> Result<Flow, StepError>;

    /// Called once after the last row, before outputs are marked done.
    async fn flush(&mut self, _io: &mut StepIo) -> Result<(), StepError> {
        Ok(())
    }

    async fn dispose(&mut self) {}
}
