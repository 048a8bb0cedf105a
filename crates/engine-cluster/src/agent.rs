use crate::{
    client::{WorkerClient, WorkerState, WorkerStatus},
    error::ClusterError,
};
use async_trait::async_trait;
use engine_runtime::{
    actor::{Actor, ActorContext, ActorRef, spawn_actor},
    context::EngineContext,
    error::{ActorError, EngineError},
    transformation::{
        RunHandle, Transformation,
        result::{RunResult, RunStatus},
    },
    unit::status::UnitState,
};
use model::graph::{assignment::PartitionAssignment, definition::GraphDefinition};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{error, info, warn};

#[derive(Debug)]
pub enum WorkerMsg {
    Start {
        run_id: String,
        graph: Box<GraphDefinition>,
        assignment: PartitionAssignment,
        reply: oneshot::Sender<Result<(), ClusterError>>,
    },
    Status(oneshot::Sender<WorkerStatus>),
    Stop(oneshot::Sender<()>),
    Heartbeat(oneshot::Sender<()>),
}

enum Job {
    Running {
        handle: RunHandle,
        task: JoinHandle<Result<RunResult, EngineError>>,
    },
    Done(WorkerStatus),
}

/// In-process worker: runs one transformation at a time for a coordinator.
pub struct WorkerAgent {
    name: String,
    ctx: EngineContext,
    job: Option<Job>,
}

impl WorkerAgent {
    pub fn new(name: impl Into<String>, ctx: EngineContext) -> Self {
        Self {
            name: name.into(),
            ctx,
            job: None,
        }
    }

    /// Spawns the agent and returns a client talking to it.
    pub fn spawn(self) -> (LocalWorkerClient, JoinHandle<()>) {
        let address = self.name.clone();
        let (actor, handle) = spawn_actor(address.clone(), 16, self);
        (LocalWorkerClient { address, actor }, handle)
    }

    fn start(
        &mut self,
        run_id: String,
        graph: GraphDefinition,
        assignment: PartitionAssignment,
    ) -> Result<(), ClusterError> {
        if matches!(self.job, Some(Job::Running { .. })) {
            return Err(ClusterError::Busy(self.name.clone()));
        }
        let transformation = Transformation::new(graph, self.ctx.clone())
            .with_run_id(format!("{run_id}-{}", self.name))
            .with_assignment(assignment);
        let handle = transformation.handle();
        info!(worker = %self.name, run_id = %handle.run_id(), "Worker starting graph");

        let task = tokio::spawn(transformation.execute());
        self.job = Some(Job::Running { handle, task });
        Ok(())
    }

    async fn status(&mut self) -> WorkerStatus {
        let run_id = match &self.job {
            None => return WorkerStatus::default(),
            Some(Job::Done(status)) => return status.clone(),
            Some(Job::Running { handle, task }) => {
                if !task.is_finished() {
                    return running_status(handle);
                }
                handle.run_id().to_string()
            }
        };

        let Some(Job::Running { task, .. }) = self.job.take() else {
            return WorkerStatus::default();
        };
        let status = match task.await {
            Ok(Ok(result)) => final_status(&result),
            Ok(Err(e)) => {
                error!(worker = %self.name, error = %e, "Graph could not be set up");
                failed_status(run_id)
            }
            Err(e) => {
                error!(worker = %self.name, error = %e, "Run task died");
                failed_status(run_id)
            }
        };
        info!(worker = %self.name, state = %status.state, "Worker run complete");
        self.job = Some(Job::Done(status.clone()));
        status
    }

    fn stop(&self) {
        if let Some(Job::Running { handle, .. }) = &self.job {
            warn!(worker = %self.name, run_id = %handle.run_id(), "Stopping worker run");
            handle.stop();
        }
    }
}

fn running_status(handle: &RunHandle) -> WorkerStatus {
    let snapshot = handle.snapshot();
    WorkerStatus {
        state: WorkerState::Running,
        run_id: Some(handle.run_id().to_string()),
        running: snapshot.running,
        finished: snapshot.finished,
        failed: snapshot.failed,
        rows_read: snapshot.counters.lines_read,
        rows_written: snapshot.counters.lines_written,
        errors: snapshot.counters.errors,
    }
}

fn final_status(result: &RunResult) -> WorkerStatus {
    let totals = result.totals();
    let count = |state: UnitState| result.steps.iter().filter(|s| s.status == state).count();
    WorkerStatus {
        state: match result.status {
            RunStatus::Finished => WorkerState::Finished,
            RunStatus::Failed => WorkerState::Failed,
            RunStatus::Stopped => WorkerState::Stopped,
        },
        run_id: Some(result.run_id.clone()),
        running: 0,
        finished: count(UnitState::Finished),
        failed: count(UnitState::Failed),
        rows_read: totals.lines_read,
        rows_written: totals.lines_written,
        errors: result.total_errors,
    }
}

fn failed_status(run_id: String) -> WorkerStatus {
    WorkerStatus {
        state: WorkerState::Failed,
        run_id: Some(run_id),
        errors: 1,
        ..Default::default()
    }
}

#[async_trait]
impl Actor<WorkerMsg> for WorkerAgent {
    async fn on_start(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        info!(worker = ctx.name(), "Worker agent started");
        Ok(())
    }

    async fn handle(&mut self, msg: WorkerMsg, _ctx: &ActorContext) -> Result<(), ActorError> {
        match msg {
            WorkerMsg::Start {
                run_id,
                graph,
                assignment,
                reply,
            } => {
                let _ = reply.send(self.start(run_id, *graph, assignment));
            }
            WorkerMsg::Status(reply) => {
                let status = self.status().await;
                let _ = reply.send(status);
            }
            WorkerMsg::Stop(reply) => {
                self.stop();
                let _ = reply.send(());
            }
            WorkerMsg::Heartbeat(reply) => {
                let _ = reply.send(());
            }
        }
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        self.stop();
        info!(worker = ctx.name(), "Worker agent stopped");
        Ok(())
    }
}

/// [`WorkerClient`] over the mailbox of an in-process [`WorkerAgent`].
#[derive(Clone)]
pub struct LocalWorkerClient {
    address: String,
    actor: ActorRef<WorkerMsg>,
}

impl LocalWorkerClient {
    fn unreachable(&self, e: ActorError) -> ClusterError {
        ClusterError::Unreachable {
            worker: self.address.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl WorkerClient for LocalWorkerClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn start(
        &self,
        run_id: &str,
        graph: &GraphDefinition,
        assignment: &PartitionAssignment,
    ) -> Result<(), ClusterError> {
        self.actor
            .ask(|reply| WorkerMsg::Start {
                run_id: run_id.to_string(),
                graph: Box::new(graph.clone()),
                assignment: assignment.clone(),
                reply,
            })
            .await
            .map_err(|e| self.unreachable(e))?
    }

    async fn status(&self) -> Result<WorkerStatus, ClusterError> {
        self.actor
            .ask(WorkerMsg::Status)
            .await
            .map_err(|e| self.unreachable(e))
    }

    async fn stop(&self) -> Result<(), ClusterError> {
        self.actor
            .ask(WorkerMsg::Stop)
            .await
            .map_err(|e| self.unreachable(e))
    }

    async fn heartbeat(&self) -> Result<(), ClusterError> {
        self.actor
            .ask(WorkerMsg::Heartbeat)
            .await
            .map_err(|e| self.unreachable(e))
    }
}
