use crate::{
    client::{WorkerClient, WorkerState, WorkerStatus},
    error::ClusterError,
    member::{MemberRegistry, MemberRole},
    splitter,
};
use engine_config::settings::validated::ClusterSettings;
use engine_core::retry::{RetryDisposition, RetryError};
use engine_runtime::transformation::result::RunStatus;
use futures::future::join_all;
use model::graph::{assignment::PartitionAssignment, definition::GraphDefinition};
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration, time::Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MASTER: &str = "master";

#[derive(Debug, Clone, Serialize)]
pub struct WorkerOutcome {
    pub address: String,
    pub stale: bool,
    pub status: Option<WorkerStatus>,
}

/// Aggregate outcome of a clustered run.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterResult {
    pub run_id: String,
    pub graph: String,
    pub status: RunStatus,
    pub workers: Vec<WorkerOutcome>,
    pub rows_read: u64,
    pub rows_written: u64,
    pub errors: u64,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ClusterResult {
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }
}

/// Master side of a clustered run.
///
/// Splits the graph's partitioned steps over the live workers, starts them,
/// then polls `status()` every heartbeat interval. The run succeeds only when
/// every worker finishes. A failed worker, or one that misses
/// `max_missed_heartbeats` polls in a row, stops the others and fails the run.
pub struct ClusterCoordinator {
    settings: ClusterSettings,
    candidates: Vec<Arc<dyn WorkerClient>>,
    members: MemberRegistry,
    shutdown: CancellationToken,
}

impl ClusterCoordinator {
    pub fn new(settings: ClusterSettings, candidates: Vec<Arc<dyn WorkerClient>>) -> Self {
        let mut members = MemberRegistry::new();
        members.register(MASTER, MemberRole::Master);
        members.seen(MASTER, None);
        Self {
            settings,
            candidates,
            members,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that, once cancelled, makes the coordinator stop every worker.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn members(&self) -> &MemberRegistry {
        &self.members
    }

    /// Heartbeats every candidate and registers those that answer.
    pub async fn discover(&mut self) -> Result<Vec<Arc<dyn WorkerClient>>, ClusterError> {
        let timeout = self.settings.rpc_timeout;
        let probes = join_all(
            self.candidates
                .iter()
                .map(|w| call(timeout, w.address(), "heartbeat", w.heartbeat())),
        )
        .await;

        let mut alive = Vec::new();
        for (worker, probe) in self.candidates.iter().zip(probes) {
            match probe {
                Ok(()) => {
                    self.members.register(worker.address(), MemberRole::Worker);
                    self.members.seen(worker.address(), None);
                    alive.push(worker.clone());
                }
                Err(e) => warn!(worker = %worker.address(), error = %e, "Worker did not answer discovery"),
            }
        }
        info!(candidates = self.candidates.len(), alive = alive.len(), "Discovery done");

        if alive.is_empty() {
            return Err(ClusterError::NoWorkers);
        }
        Ok(alive)
    }

    /// Runs `graph` across the cluster until every worker is done or the
    /// run fails.
    ///
    /// `Err` means the run could not be set up: invalid graph, nothing to
    /// split, no workers. Everything after that is reported in the result.
    pub async fn run(&mut self, graph: &GraphDefinition) -> Result<ClusterResult, ClusterError> {
        graph.validate()?;
        let clock = Instant::now();
        let run_id = Uuid::new_v4().to_string();

        let workers = self.discover().await?;
        let addresses: Vec<String> = workers.iter().map(|w| w.address().to_string()).collect();
        let assignments = splitter::split(graph, &addresses)?;
        info!(run_id = %run_id, graph = %graph.name, workers = workers.len(), "Cluster run starting");

        let starts = join_all(
            workers
                .iter()
                .zip(&assignments)
                .map(|(w, a)| self.start_worker(w.as_ref(), &run_id, graph, a)),
        )
        .await;
        let failures: Vec<String> = workers
            .iter()
            .zip(&starts)
            .filter_map(|(w, r)| r.as_ref().err().map(|e| format!("{}: {e}", w.address())))
            .collect();

        let (status, reason) = if failures.is_empty() {
            self.supervise(&workers).await
        } else {
            error!(run_id = %run_id, failed = failures.len(), "Workers could not be started");
            self.stop_all(&workers).await;
            (
                RunStatus::Failed,
                Some(format!("start failed on {}", failures.join("; "))),
            )
        };

        let result = self.outcome(run_id, graph, &workers, status, reason, clock);
        match result.status {
            RunStatus::Failed => error!(
                run_id = %result.run_id,
                reason = result.reason.as_deref().unwrap_or(""),
                "Cluster run failed"
            ),
            status => info!(
                run_id = %result.run_id,
                %status,
                rows_read = result.rows_read,
                rows_written = result.rows_written,
                "Cluster run done"
            ),
        }
        Ok(result)
    }

    async fn start_worker(
        &self,
        worker: &dyn WorkerClient,
        run_id: &str,
        graph: &GraphDefinition,
        assignment: &PartitionAssignment,
    ) -> Result<(), ClusterError> {
        let timeout = self.settings.rpc_timeout;
        let what = format!("start {}", worker.address());
        self.settings
            .start_retry
            .run(
                &what,
                move || call(timeout, worker.address(), "start", worker.start(run_id, graph, assignment)),
                |e: &ClusterError| {
                    if e.is_transient() {
                        RetryDisposition::Retry
                    } else {
                        RetryDisposition::Stop
                    }
                },
            )
            .await
            .map_err(RetryError::into_inner)?;
        debug!(worker = %worker.address(), "Worker started");
        Ok(())
    }

    async fn supervise(&mut self, workers: &[Arc<dyn WorkerClient>]) -> (RunStatus, Option<String>) {
        let timeout = self.settings.rpc_timeout;
        let max_missed = self.settings.max_missed_heartbeats;
        let shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stopping = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled(), if !stopping => {
                    warn!("Shutdown requested, stopping workers");
                    stopping = true;
                    self.stop_all(workers).await;
                }
            }

            let polls = join_all(
                workers
                    .iter()
                    .map(|w| call(timeout, w.address(), "status", w.status())),
            )
            .await;
            for (worker, poll) in workers.iter().zip(polls) {
                match poll {
                    Ok(status) => {
                        debug!(worker = %worker.address(), state = %status.state, read = status.rows_read, "Worker status");
                        self.members.seen(worker.address(), Some(status));
                    }
                    Err(e) => {
                        let missed = self.members.missed(worker.address());
                        warn!(worker = %worker.address(), missed, error = %e, "Heartbeat missed");
                    }
                }
            }

            let stale: Vec<String> = self
                .members
                .stale(max_missed)
                .into_iter()
                .map(str::to_string)
                .collect();
            if !stale.is_empty() {
                error!(stale = ?stale, "Workers stopped answering, failing the run");
                self.stop_all(workers).await;
                return (RunStatus::Failed, Some(format!("stale workers: {}", stale.join(", "))));
            }

            let states: Vec<WorkerState> = workers
                .iter()
                .map(|w| {
                    self.members
                        .get(w.address())
                        .and_then(|m| m.last_status.as_ref())
                        .map(|s| s.state)
                        .unwrap_or_default()
                })
                .collect();

            if let Some(i) = states.iter().position(|s| *s == WorkerState::Failed) {
                let failed = workers[i].address().to_string();
                error!(worker = %failed, "Worker failed, stopping the others");
                self.stop_all(workers).await;
                return (RunStatus::Failed, Some(format!("worker {failed} failed")));
            }
            if states.iter().all(WorkerState::is_terminal) {
                if !stopping && states.iter().all(|s| *s == WorkerState::Finished) {
                    return (RunStatus::Finished, None);
                }
                return (RunStatus::Stopped, Some("stopped before completion".to_string()));
            }
        }
    }

    /// Best-effort stop of every worker; failures are only logged.
    async fn stop_all(&self, workers: &[Arc<dyn WorkerClient>]) {
        let timeout = self.settings.rpc_timeout;
        let stops = join_all(
            workers
                .iter()
                .map(|w| call(timeout, w.address(), "stop", w.stop())),
        )
        .await;
        for (worker, stop) in workers.iter().zip(stops) {
            if let Err(e) = stop {
                warn!(worker = %worker.address(), error = %e, "Could not stop worker");
            }
        }
    }

    fn outcome(
        &self,
        run_id: String,
        graph: &GraphDefinition,
        workers: &[Arc<dyn WorkerClient>],
        status: RunStatus,
        reason: Option<String>,
        clock: Instant,
    ) -> ClusterResult {
        let max_missed = self.settings.max_missed_heartbeats;
        let outcomes: Vec<WorkerOutcome> = workers
            .iter()
            .map(|w| {
                let member = self.members.get(w.address());
                WorkerOutcome {
                    address: w.address().to_string(),
                    stale: member.is_some_and(|m| m.is_stale(max_missed)),
                    status: member.and_then(|m| m.last_status.clone()),
                }
            })
            .collect();

        let (rows_read, rows_written, errors) = outcomes
            .iter()
            .filter_map(|o| o.status.as_ref())
            .fold((0, 0, 0), |(r, w, e), s| {
                (r + s.rows_read, w + s.rows_written, e + s.errors)
            });
        ClusterResult {
            run_id,
            graph: graph.name.clone(),
            status,
            workers: outcomes,
            rows_read,
            rows_written,
            errors,
            elapsed_ms: clock.elapsed().as_millis() as u64,
            reason,
        }
    }
}

async fn call<T>(
    timeout: Duration,
    worker: &str,
    operation: &str,
    request: impl Future<Output = Result<T, ClusterError>>,
) -> Result<T, ClusterError> {
    match tokio::time::timeout(timeout, request).await {
        Ok(answer) => answer,
        Err(_) => Err(ClusterError::Timeout {
            worker: worker.to_string(),
            operation: operation.to_string(),
        }),
    }
}
