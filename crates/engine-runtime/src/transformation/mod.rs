use crate::{
    context::EngineContext,
    error::EngineError,
    transformation::{
        control::RunControl,
        result::RunResult,
        topology::Topology,
    },
    unit::{UnitProbe, UnitReport, status::UnitState},
};
use chrono::Utc;
use engine_core::metrics::MetricsSnapshot;
use futures::{FutureExt, future::join_all};
use model::graph::{assignment::PartitionAssignment, definition::GraphDefinition};
use serde::Serialize;
use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, OnceLock},
    time::Instant,
};
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod control;
pub mod result;
pub(crate) mod topology;

/// Live view of a run, for status polling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSnapshot {
    pub units: usize,
    pub running: usize,
    pub finished: usize,
    pub failed: usize,
    pub stopped: usize,
    pub counters: MetricsSnapshot,
}

impl RunSnapshot {
    pub fn is_done(&self) -> bool {
        self.units > 0 && self.finished + self.failed + self.stopped == self.units
    }
}

/// Handle to control and observe a run from outside.
#[derive(Clone)]
pub struct RunHandle {
    run_id: String,
    control: RunControl,
    probes: Arc<OnceLock<Vec<UnitProbe>>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Cooperative stop, observed by every unit within one loop iteration.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Stop plus waking every unit blocked on a RowSet.
    pub fn abort(&self) {
        self.control.abort();
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let Some(probes) = self.probes.get() else {
            return RunSnapshot::default();
        };
        let mut snapshot = RunSnapshot {
            units: probes.len(),
            ..Default::default()
        };
        for probe in probes {
            match probe.state.get() {
                UnitState::Finished => snapshot.finished += 1,
                UnitState::Failed => snapshot.failed += 1,
                UnitState::Stopped => snapshot.stopped += 1,
                UnitState::Running | UnitState::Stopping => snapshot.running += 1,
                UnitState::Idle | UnitState::Initializing => {}
            }
            snapshot.counters.merge(&probe.metrics.snapshot());
        }
        snapshot
    }
}

/// One execution of a graph: builds the topology, initializes every unit,
/// runs them concurrently and folds their reports into a [`RunResult`].
pub struct Transformation {
    run_id: String,
    graph: GraphDefinition,
    ctx: EngineContext,
    control: RunControl,
    assignment: Option<PartitionAssignment>,
    probes: Arc<OnceLock<Vec<UnitProbe>>>,
}

impl Transformation {
    pub fn new(graph: GraphDefinition, ctx: EngineContext) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            graph,
            ctx,
            control: RunControl::new(),
            assignment: None,
            probes: Arc::new(OnceLock::new()),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Shares externally owned run flags, e.g. those driven by signal handlers.
    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    /// Restricts partitioned steps to the partitions this worker owns and
    /// leaves out the steps another worker runs.
    pub fn with_assignment(mut self, assignment: PartitionAssignment) -> Self {
        self.graph = assignment.apply(&self.graph);
        self.assignment = Some(assignment);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn graph(&self) -> &GraphDefinition {
        &self.graph
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            run_id: self.run_id.clone(),
            control: self.control.clone(),
            probes: self.probes.clone(),
        }
    }

    /// Runs the graph to completion.
    ///
    /// Returns `Err` only for setup problems (invalid graph, unknown step
    /// type). Unit failures, including failed initialization, come back as
    /// a `Failed` result.
    pub async fn execute(self) -> Result<RunResult, EngineError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let order = self.graph.validate()?;

        let Topology { mut units, probes } = topology::build(
            &self.graph,
            &order,
            &self.ctx,
            &self.control,
            &self.run_id,
            self.assignment.as_ref(),
        )?;
        let _ = self.probes.set(probes.clone());
        info!(
            run_id = %self.run_id,
            graph = %self.graph.name,
            units = units.len(),
            "Transformation starting"
        );

        let init_results = join_all(units.iter_mut().map(|unit| unit.init())).await;
        let init_failed = init_results.iter().filter(|r| r.is_err()).count();
        if init_failed > 0 {
            error!(run_id = %self.run_id, failed = init_failed, "Initialization failed, nothing will run");
            let mut reports = Vec::with_capacity(units.len());
            for (unit, init) in units.into_iter().zip(init_results) {
                let report = match init {
                    Ok(()) => unit.discard(UnitState::Stopped, None).await,
                    Err(e) => unit.discard(UnitState::Failed, Some(e.to_string())).await,
                };
                reports.push(report);
            }
            return Ok(self.finish(reports, started_at, clock));
        }

        let handles: Vec<_> = units
            .into_iter()
            .zip(probes.iter().cloned())
            .map(|(unit, probe)| {
                let control = self.control.clone();
                tokio::spawn(async move {
                    match AssertUnwindSafe(unit.run()).catch_unwind().await {
                        Ok(report) => report,
                        Err(_) => {
                            error!(unit = %probe.id, "Unit panicked");
                            probe.state.set(UnitState::Failed);
                            probe.release().await;
                            control.stop();
                            UnitReport {
                                id: probe.id.clone(),
                                state: UnitState::Failed,
                                counters: probe.metrics.snapshot(),
                                error: Some("step panicked".to_string()),
                            }
                        }
                    }
                })
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (joined, probe) in join_all(handles).await.into_iter().zip(&probes) {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(unit = %probe.id, error = %e, "Unit task did not complete");
                    reports.push(UnitReport {
                        id: probe.id.clone(),
                        state: UnitState::Failed,
                        counters: probe.metrics.snapshot(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(self.finish(reports, started_at, clock))
    }

    fn finish(
        &self,
        reports: Vec<UnitReport>,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
    ) -> RunResult {
        let result = RunResult::from_reports(
            self.run_id.clone(),
            self.graph.name.clone(),
            reports,
            self.control.is_stopped(),
            started_at,
            clock.elapsed(),
        );
        match result.status {
            result::RunStatus::Failed => error!(
                run_id = %result.run_id,
                errors = result.total_errors,
                elapsed_ms = result.elapsed_ms,
                "Transformation failed"
            ),
            status => info!(
                run_id = %result.run_id,
                %status,
                errors = result.total_errors,
                elapsed_ms = result.elapsed_ms,
                "Transformation done"
            ),
        }
        result
    }
}
