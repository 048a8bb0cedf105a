use crate::{
    context::EngineContext,
    error::EngineError,
    transformation::{Transformation, control::RunControl, result::RunResult},
};
use chrono::Utc;
use engine_core::state::{StateStore, models::JournalEntry};
use model::graph::definition::GraphDefinition;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs `graph` once, journaling its start, every unit's outcome and its end
/// when the context carries a journal.
pub async fn run(
    graph: GraphDefinition,
    ctx: EngineContext,
    control: RunControl,
) -> Result<RunResult, EngineError> {
    GraphExecutor::new(graph, ctx, control).execute().await
}

struct GraphExecutor {
    graph: GraphDefinition,
    ctx: EngineContext,
    control: RunControl,
}

impl GraphExecutor {
    fn new(graph: GraphDefinition, ctx: EngineContext, control: RunControl) -> Self {
        Self {
            graph,
            ctx,
            control,
        }
    }

    async fn execute(self) -> Result<RunResult, EngineError> {
        let graph_hash = self.graph.hash();
        let graph_name = self.graph.name.clone();
        let journal = self.ctx.journal.clone();

        let transformation = Transformation::new(self.graph, self.ctx).with_control(self.control);
        let run_id = transformation.run_id().to_string();
        info!(run_id = %run_id, graph = %graph_name, hash = %graph_hash, "Run starting");

        if let Some(journal) = &journal {
            journal
                .append(&JournalEntry::RunStart {
                    run_id: run_id.clone(),
                    graph: graph_name,
                    graph_hash,
                    at: Utc::now(),
                })
                .await?;
        }

        let result = transformation.execute().await?;

        if let Some(journal) = &journal {
            if let Err(e) = Self::record(journal, &result).await {
                warn!(run_id = %run_id, error = %e, "Could not journal run outcome");
            }
        }
        Ok(result)
    }

    async fn record(
        journal: &Arc<dyn StateStore>,
        result: &RunResult,
    ) -> Result<(), engine_core::error::StateError> {
        for step in &result.steps {
            journal
                .append(&JournalEntry::UnitDone {
                    run_id: result.run_id.clone(),
                    step: step.step.clone(),
                    copy: step.copy,
                    status: step.status.to_string(),
                    counters: step.counters,
                    at: result.finished_at,
                })
                .await?;
        }
        journal
            .append(&JournalEntry::RunDone {
                run_id: result.run_id.clone(),
                status: result.status.to_string(),
                total_errors: result.total_errors,
                at: result.finished_at,
            })
            .await
    }
}
