use crate::{
    transformation::control::RunControl,
    unit::{
        input::{InputSelector, Next},
        status::{StateCell, UnitState},
    },
};
use engine_core::{
    metrics::{MetricsSnapshot, StepMetrics},
    rowset::{RowSet, StepCopy},
};
use engine_processing::{
    error::StepError,
    error_router::ErrorRouter,
    io::StepIo,
    step::{Flow, Step, StepContext},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod input;
pub mod status;

/// Read-only view of a unit, kept by the scheduler for status reporting.
#[derive(Debug, Clone)]
pub struct UnitProbe {
    pub id: StepCopy,
    pub state: Arc<StateCell>,
    pub metrics: StepMetrics,
    outputs: Vec<Arc<RowSet>>,
    inputs: Vec<Arc<RowSet>>,
}

impl UnitProbe {
    /// Unblocks neighbours of a unit that died without cleaning up.
    pub(crate) async fn release(&self) {
        self.outputs.iter().for_each(|rs| rs.mark_done());
        for rowset in &self.inputs {
            rowset.close().await;
        }
    }
}

/// Final state of one unit.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub id: StepCopy,
    pub state: UnitState,
    pub counters: MetricsSnapshot,
    pub error: Option<String>,
}

enum Exit {
    Finished,
    Stopped,
}

/// Drives one step copy: init, then the row loop, then dispose.
pub struct StepUnit {
    id: StepCopy,
    step: Box<dyn Step>,
    ctx: StepContext,
    io: StepIo,
    inputs: InputSelector,
    router: ErrorRouter,
    is_source: bool,
    state: Arc<StateCell>,
    control: RunControl,
}

impl StepUnit {
    pub fn new(
        step: Box<dyn Step>,
        ctx: StepContext,
        io: StepIo,
        inputs: Vec<Arc<RowSet>>,
        block: usize,
        poll: std::time::Duration,
        control: RunControl,
    ) -> (Self, UnitProbe) {
        let id = io.step().clone();
        let metrics = io.metrics().clone();
        let state = Arc::new(StateCell::default());
        let router = ErrorRouter::new(ctx.name.to_string(), ctx.definition.error_handling.clone());

        let probe = UnitProbe {
            id: id.clone(),
            state: state.clone(),
            metrics: metrics.clone(),
            outputs: io_rowsets(&io),
            inputs: inputs.clone(),
        };
        let unit = Self {
            id,
            step,
            ctx,
            io,
            is_source: inputs.is_empty(),
            inputs: InputSelector::new(inputs, block, poll, metrics),
            router,
            state,
            control,
        };
        (unit, probe)
    }

    pub fn id(&self) -> &StepCopy {
        &self.id
    }

    pub fn state(&self) -> UnitState {
        self.state.get()
    }

    /// One-time setup. Leaves the unit `Failed` on error.
    pub async fn init(&mut self) -> Result<(), StepError> {
        self.state.set(UnitState::Initializing);
        match self.step.init(&self.ctx).await {
            Ok(()) => {
                debug!(step = %self.ctx.name, copy = self.id.copy, "Unit initialized");
                Ok(())
            }
            Err(e) => {
                error!(step = %self.ctx.name, copy = self.id.copy, error = %e, "Unit init failed");
                self.state.set(UnitState::Failed);
                Err(e)
            }
        }
    }

    /// Disposes a unit that will never run.
    pub async fn discard(mut self, state: UnitState, error: Option<String>) -> UnitReport {
        self.step.dispose().await;
        self.state.set(state);
        self.report(error)
    }

    /// Runs the row loop to a terminal state and cleans up after it.
    pub async fn run(mut self) -> UnitReport {
        self.state.set(UnitState::Running);
        info!(
            run_id = %self.ctx.run_id,
            step = %self.ctx.name,
            copy = self.id.copy,
            inputs = self.inputs.len(),
            "Unit running"
        );

        let outcome = match self.run_loop().await {
            Ok(Exit::Finished) => match self.step.flush(&mut self.io).await {
                Ok(()) => Ok(UnitState::Finished),
                Err(StepError::Stopped) => Ok(UnitState::Stopped),
                Err(e) => Err(e),
            },
            Ok(Exit::Stopped) => {
                self.state.set(UnitState::Stopping);
                Ok(UnitState::Stopped)
            }
            Err(e) => Err(e),
        };

        self.io.mark_done();
        self.inputs.close_all().await;
        self.io.close_info().await;

        let (state, error) = match outcome {
            Ok(state) => (state, None),
            Err(e) => {
                error!(
                    run_id = %self.ctx.run_id,
                    step = %self.ctx.name,
                    copy = self.id.copy,
                    error = %e,
                    "Unit failed, stopping the run"
                );
                self.control.stop();
                (UnitState::Failed, Some(e.to_string()))
            }
        };

        self.step.dispose().await;
        self.state.set(state);

        let report = self.report(error);
        info!(
            step = %self.ctx.name,
            copy = self.id.copy,
            state = %report.state,
            read = report.counters.lines_read,
            written = report.counters.lines_written,
            errors = report.counters.errors,
            "Unit done"
        );
        report
    }

    async fn run_loop(&mut self) -> Result<Exit, StepError> {
        loop {
            if self.control.is_stopped() {
                return Ok(Exit::Stopped);
            }

            let row = if self.is_source {
                None
            } else {
                match self.inputs.next(self.control.stop_token()).await {
                    Next::Row(row) => Some(row),
                    Next::Exhausted => return Ok(Exit::Finished),
                    Next::Stopped => return Ok(Exit::Stopped),
                }
            };

            match self.step.process_row(row.as_ref(), &mut self.io).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::EndOfInput) => {
                    if !self.inputs.is_empty() {
                        debug!(step = %self.ctx.name, copy = self.id.copy, "Step ended its input early");
                    }
                    return Ok(Exit::Finished);
                }
                Err(StepError::Row(row_error)) => {
                    match self.router.route(&mut self.io, row.as_ref(), row_error).await {
                        Ok(()) => {}
                        Err(StepError::Stopped) => return Ok(Exit::Stopped),
                        Err(e) => return Err(e),
                    }
                }
                Err(StepError::Stopped) => return Ok(Exit::Stopped),
                Err(e) => {
                    if self.control.is_aborted() {
                        warn!(step = %self.ctx.name, error = %e, "Step error after abort");
                        return Ok(Exit::Stopped);
                    }
                    return Err(e);
                }
            }
        }
    }

    fn report(&self, error: Option<String>) -> UnitReport {
        UnitReport {
            id: self.id.clone(),
            state: self.state.get(),
            counters: self.io.metrics().snapshot(),
            error,
        }
    }
}

fn io_rowsets(io: &StepIo) -> Vec<Arc<RowSet>> {
    io.output_rowsets().cloned().collect()
}
