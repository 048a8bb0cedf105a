use crate::metrics::MetricsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum JournalEntry {
    RunStart {
        run_id: String,
        graph: String,
        graph_hash: String,
        at: DateTime<Utc>,
    },
    UnitDone {
        run_id: String,
        step: String,
        copy: u32,
        status: String,
        counters: MetricsSnapshot,
        at: DateTime<Utc>,
    },
    RunDone {
        run_id: String,
        status: String,
        total_errors: u64,
        at: DateTime<Utc>,
    },
}

impl JournalEntry {
    pub fn run_id(&self) -> &str {
        match self {
            JournalEntry::RunStart { run_id, .. } => run_id,
            JournalEntry::UnitDone { run_id, .. } => run_id,
            JournalEntry::RunDone { run_id, .. } => run_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            JournalEntry::RunStart { at, .. }
            | JournalEntry::UnitDone { at, .. }
            | JournalEntry::RunDone { at, .. } => *at,
        }
    }
}
