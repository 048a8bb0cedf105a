use engine_core::{
    metrics::StepMetrics,
    rowset::{Fetched, RowSet},
};
use model::records::row::Row;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Outcome of asking the selector for the next row.
#[derive(Debug, PartialEq)]
pub enum Next {
    Row(Row),
    /// Every input reached end-of-stream.
    Exhausted,
    Stopped,
}

/// Chooses which input RowSet a multi-input unit reads from.
///
/// Block round-robin: up to `block` rows are taken from the current input
/// before moving on to the next one in cyclic order. Inputs that are
/// momentarily empty are skipped, exhausted ones are dropped. When all are
/// empty the selector waits `poll` on the current input and then rotates,
/// so a producer feeding several of them cannot stall the unit.
pub struct InputSelector {
    inputs: Vec<Arc<RowSet>>,
    current: usize,
    taken: usize,
    block: usize,
    poll: Duration,
    metrics: StepMetrics,
}

impl InputSelector {
    pub fn new(inputs: Vec<Arc<RowSet>>, block: usize, poll: Duration, metrics: StepMetrics) -> Self {
        Self {
            inputs,
            current: 0,
            taken: 0,
            block: block.max(1),
            poll,
            metrics,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub async fn next(&mut self, stop: &CancellationToken) -> Next {
        loop {
            if self.inputs.is_empty() {
                return Next::Exhausted;
            }
            if stop.is_cancelled() {
                return Next::Stopped;
            }
            if self.taken >= self.block {
                self.rotate();
            }

            let mut attempts = self.inputs.len();
            while attempts > 0 && !self.inputs.is_empty() {
                attempts -= 1;
                match self.inputs[self.current].try_get() {
                    Fetched::Row(row) => return self.take(row),
                    Fetched::EndOfStream => self.drop_current(),
                    Fetched::Stopped => return Next::Stopped,
                    Fetched::Pending => self.rotate(),
                }
            }
            if self.inputs.is_empty() {
                return Next::Exhausted;
            }

            let rowset = self.inputs[self.current].clone();
            let fetched = if self.inputs.len() == 1 {
                tokio::select! {
                    _ = stop.cancelled() => return Next::Stopped,
                    fetched = rowset.get() => fetched,
                }
            } else {
                tokio::select! {
                    _ = stop.cancelled() => return Next::Stopped,
                    fetched = rowset.get_timeout(self.poll) => fetched,
                }
            };
            match fetched {
                Fetched::Row(row) => return self.take(row),
                Fetched::EndOfStream => self.drop_current(),
                Fetched::Stopped => return Next::Stopped,
                Fetched::Pending => self.rotate(),
            }
        }
    }

    /// Releases every producer still writing to this unit.
    pub async fn close_all(&mut self) {
        for rowset in self.inputs.drain(..) {
            rowset.close().await;
        }
    }

    fn take(&mut self, row: Row) -> Next {
        self.taken += 1;
        self.metrics.increment_read(1);
        Next::Row(row)
    }

    fn rotate(&mut self) {
        if !self.inputs.is_empty() {
            self.current = (self.current + 1) % self.inputs.len();
        }
        self.taken = 0;
    }

    fn drop_current(&mut self) {
        let rowset = self.inputs.remove(self.current);
        trace!(rowset = %rowset, "input exhausted");
        if self.current >= self.inputs.len() {
            self.current = 0;
        }
        self.taken = 0;
    }
}
