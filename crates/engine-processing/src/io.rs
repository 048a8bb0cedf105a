use crate::error::StepError;
use engine_core::{
    metrics::StepMetrics,
    partition::{Partitioner, Target},
    rowset::{Fetched, PutOutcome, RowSet, StepCopy},
};
use model::records::row::Row;
use std::sync::Arc;
use tracing::{debug, trace};

/// The RowSets one step copy writes to for a single outgoing hop.
pub struct OutputHop {
    target: String,
    rowsets: Vec<Arc<RowSet>>,
    partitioner: Partitioner,
}

impl OutputHop {
    pub fn new(target: impl Into<String>, rowsets: Vec<Arc<RowSet>>, partitioner: Partitioner) -> Self {
        Self {
            target: target.into(),
            rowsets,
            partitioner,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn rowsets(&self) -> &[Arc<RowSet>] {
        &self.rowsets
    }

    async fn dispatch(&mut self, row: Row, metrics: &StepMetrics) -> Result<(), StepError> {
        match self.partitioner.select(&row)? {
            Target::Skip => {
                trace!(target = %self.target, "row belongs to another worker, skipped");
                Ok(())
            }
            Target::One(index) => {
                let rowset = self.rowsets.get(index).ok_or_else(|| {
                    StepError::Failed(format!(
                        "partition {index} out of range for hop to '{}'",
                        self.target
                    ))
                })?;
                put(rowset, row, metrics).await
            }
            Target::All => {
                let Some((last, rest)) = self.rowsets.split_last() else {
                    return Ok(());
                };
                for rowset in rest {
                    put(rowset, row.clone(), metrics).await?;
                }
                put(last, row, metrics).await
            }
        }
    }

    fn mark_done(&self) {
        self.rowsets.iter().for_each(|rs| rs.mark_done());
    }
}

async fn put(rowset: &RowSet, row: Row, metrics: &StepMetrics) -> Result<(), StepError> {
    match rowset.put(row).await? {
        PutOutcome::Accepted => {
            metrics.increment_written(1);
            Ok(())
        }
        PutOutcome::Closed => {
            debug!(rowset = %rowset, "consumer finished early, row discarded");
            Ok(())
        }
        PutOutcome::Stopped => Err(StepError::Stopped),
    }
}

/// RowSets an info hop delivers, read on demand instead of by the input rotation.
pub struct InfoInput {
    source: String,
    rowsets: Vec<Arc<RowSet>>,
}

impl InfoInput {
    pub fn new(source: impl Into<String>, rowsets: Vec<Arc<RowSet>>) -> Self {
        Self {
            source: source.into(),
            rowsets,
        }
    }

    pub fn rowsets(&self) -> &[Arc<RowSet>] {
        &self.rowsets
    }
}

/// Output side of a running step copy, plus its info inputs and counters.
pub struct StepIo {
    step: StepCopy,
    outputs: Vec<OutputHop>,
    error_hop: Option<OutputHop>,
    info: Vec<InfoInput>,
    metrics: StepMetrics,
}

impl StepIo {
    pub fn new(step: StepCopy, metrics: StepMetrics) -> Self {
        Self {
            step,
            outputs: Vec::new(),
            error_hop: None,
            info: Vec::new(),
            metrics,
        }
    }

    pub fn with_output(mut self, hop: OutputHop) -> Self {
        self.outputs.push(hop);
        self
    }

    pub fn with_error_hop(mut self, hop: OutputHop) -> Self {
        self.error_hop = Some(hop);
        self
    }

    pub fn with_info(mut self, input: InfoInput) -> Self {
        self.info.push(input);
        self
    }

    pub fn step(&self) -> &StepCopy {
        &self.step
    }

    pub fn metrics(&self) -> &StepMetrics {
        &self.metrics
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(OutputHop::target)
    }

    /// Every RowSet this copy writes to, error hop included.
    pub fn output_rowsets(&self) -> impl Iterator<Item = &Arc<RowSet>> {
        self.outputs
            .iter()
            .chain(self.error_hop.iter())
            .flat_map(|hop| hop.rowsets.iter())
    }

    pub fn has_error_hop(&self) -> bool {
        self.error_hop.is_some()
    }

    /// Sends the row down every outgoing data hop.
    pub async fn emit(&mut self, row: Row) -> Result<(), StepError> {
        let Some((last, rest)) = self.outputs.split_last_mut() else {
            trace!(step = %self.step, "no outgoing hops, row dropped");
            return Ok(());
        };
        for hop in rest {
            hop.dispatch(row.clone(), &self.metrics).await?;
        }
        last.dispatch(row, &self.metrics).await
    }

    /// Sends the row down the hop leading to `target` only.
    pub async fn emit_to(&mut self, target: &str, row: Row) -> Result<(), StepError> {
        let hop = self
            .outputs
            .iter_mut()
            .find(|hop| hop.target == target)
            .ok_or_else(|| StepError::UnknownTarget(target.to_string()))?;
        hop.dispatch(row, &self.metrics).await
    }

    pub(crate) async fn emit_error(&mut self, row: Row) -> Result<(), StepError> {
        match self.error_hop.as_mut() {
            Some(hop) => hop.dispatch(row, &self.metrics).await,
            None => Err(StepError::Failed(format!("{} has no error hop", self.step))),
        }
    }

    /// Drains every copy of the info step `source` to end-of-stream.
    ///
    /// An info hop can be read once; later calls return no rows.
    pub async fn read_info(&mut self, source: &str) -> Result<Vec<Row>, StepError> {
        let position = self
            .info
            .iter()
            .position(|input| input.source == source)
            .ok_or_else(|| StepError::UnknownInfo(source.to_string()))?;
        let input = &mut self.info[position];

        let mut rows = Vec::new();
        for rowset in std::mem::take(&mut input.rowsets) {
            loop {
                match rowset.get().await {
                    Fetched::Row(row) => rows.push(row),
                    Fetched::EndOfStream => break,
                    Fetched::Stopped => return Err(StepError::Stopped),
                    Fetched::Pending => continue,
                }
            }
        }
        debug!(step = %self.step, source, rows = rows.len(), "info rows loaded");
        Ok(rows)
    }

    /// Marks every output RowSet done, error hop included. Idempotent.
    pub fn mark_done(&self) {
        self.outputs.iter().for_each(OutputHop::mark_done);
        if let Some(hop) = &self.error_hop {
            hop.mark_done();
        }
    }

    /// Releases producers still writing to info hops that were never read.
    pub async fn close_info(&self) {
        for input in &self.info {
            for rowset in &input.rowsets {
                rowset.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{
        core::{
            data_type::DataType,
            schema::{Field, Schema, SchemaRef},
            value::Value,
        },
        graph::definition::Distribution,
    };
    use tokio_util::sync::CancellationToken;

    fn schema() -> SchemaRef {
        Schema::new(vec![Field::new("id", DataType::Integer)])
            .unwrap()
            .into_ref()
    }

    fn row(schema: &SchemaRef, id: i64) -> Row {
        Row::new(schema.clone(), vec![Value::Int(id)]).unwrap()
    }

    fn rowsets(from: &str, to: &str, n: u32, abort: &CancellationToken) -> Vec<Arc<RowSet>> {
        (0..n)
            .map(|c| {
                Arc::new(RowSet::new(
                    StepCopy::new(from, 0),
                    StepCopy::new(to, c),
                    16,
                    abort.clone(),
                ))
            })
            .collect()
    }

    #[tokio::test]
    async fn emit_fans_out_to_every_hop() {
        let abort = CancellationToken::new();
        let a = rowsets("src", "a", 1, &abort);
        let b = rowsets("src", "b", 2, &abort);
        let mut io = StepIo::new(StepCopy::new("src", 0), StepMetrics::new())
            .with_output(OutputHop::new(
                "a",
                a.clone(),
                Partitioner::new(&Distribution::RoundRobin, 1, None),
            ))
            .with_output(OutputHop::new(
                "b",
                b.clone(),
                Partitioner::new(&Distribution::CopyToAll, 2, None),
            ));

        let schema = schema();
        io.emit(row(&schema, 1)).await.unwrap();
        io.emit_to("a", row(&schema, 2)).await.unwrap();
        io.mark_done();

        assert_eq!(a[0].size(), 2);
        assert_eq!(b[0].size(), 1);
        assert_eq!(b[1].size(), 1);
        assert_eq!(io.metrics().snapshot().lines_written, 4);
        assert!(a.iter().chain(b.iter()).all(|rs| rs.is_done()));

        assert!(matches!(
            io.emit_to("nowhere", row(&schema, 3)).await,
            Err(StepError::UnknownTarget(_))
        ));
    }

    #[tokio::test]
    async fn closed_consumer_discards_without_failing() {
        let abort = CancellationToken::new();
        let sets = rowsets("src", "sink", 1, &abort);
        let mut io = StepIo::new(StepCopy::new("src", 0), StepMetrics::new()).with_output(
            OutputHop::new("sink", sets.clone(), Partitioner::new(&Distribution::RoundRobin, 1, None)),
        );

        sets[0].close().await;
        io.emit(row(&schema(), 1)).await.unwrap();
        assert_eq!(io.metrics().snapshot().lines_written, 0);
    }

    #[tokio::test]
    async fn read_info_drains_all_copies_once() {
        let abort = CancellationToken::new();
        let sets = rowsets("lookup", "join", 2, &abort);
        let schema = schema();
        sets[0].put(row(&schema, 1)).await.unwrap();
        sets[1].put(row(&schema, 2)).await.unwrap();
        sets[1].put(row(&schema, 3)).await.unwrap();
        sets.iter().for_each(|rs| rs.mark_done());

        let mut io = StepIo::new(StepCopy::new("join", 0), StepMetrics::new())
            .with_info(InfoInput::new("lookup", sets));

        assert_eq!(io.read_info("lookup").await.unwrap().len(), 3);
        assert!(io.read_info("lookup").await.unwrap().is_empty());
        assert!(matches!(
            io.read_info("other").await,
            Err(StepError::UnknownInfo(_))
        ));
    }
}
