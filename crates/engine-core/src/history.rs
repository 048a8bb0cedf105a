use crate::{
    error::StateError,
    metrics::MetricsSnapshot,
    state::{StateStore, models::JournalEntry},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Reads run summaries back out of the journal.
#[derive(Clone)]
pub struct RunHistory {
    pub store: Arc<dyn StateStore>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UnitSummary {
    pub step: String,
    pub copy: u32,
    pub status: String,
    pub counters: MetricsSnapshot,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub graph: Option<String>,
    pub graph_hash: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `Running` until a `RunDone` entry is seen.
    pub status: String,
    pub total_errors: u64,
    pub units: Vec<UnitSummary>,
}

impl RunHistory {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        RunHistory { store }
    }

    pub async fn summary(&self, run_id: &str) -> Result<RunSummary, StateError> {
        let entries = self.store.entries(run_id).await?;
        if entries.is_empty() {
            return Err(StateError::UnknownRun(run_id.to_string()));
        }

        let mut summary = RunSummary {
            run_id: run_id.to_string(),
            graph: None,
            graph_hash: None,
            started_at: None,
            finished_at: None,
            status: "Running".to_string(),
            total_errors: 0,
            units: Vec::new(),
        };

        for entry in entries {
            match entry {
                JournalEntry::RunStart {
                    graph,
                    graph_hash,
                    at,
                    ..
                } => {
                    summary.graph = Some(graph);
                    summary.graph_hash = Some(graph_hash);
                    summary.started_at = Some(at);
                }
                JournalEntry::UnitDone {
                    step,
                    copy,
                    status,
                    counters,
                    ..
                } => summary.units.push(UnitSummary {
                    step,
                    copy,
                    status,
                    counters,
                }),
                JournalEntry::RunDone {
                    status,
                    total_errors,
                    at,
                    ..
                } => {
                    summary.status = status;
                    summary.total_errors = total_errors;
                    summary.finished_at = Some(at);
                }
            }
        }

        Ok(summary)
    }

    /// Most recent run id, if any run was journaled.
    pub async fn latest_run(&self) -> Result<Option<String>, StateError> {
        Ok(self.store.runs().await?.pop())
    }
}
