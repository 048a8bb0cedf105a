use crate::unit::{UnitReport, status::UnitState};
use chrono::{DateTime, Utc};
use engine_core::metrics::MetricsSnapshot;
use serde::Serialize;
use std::{fmt, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Finished,
    Failed,
    Stopped,
}

impl RunStatus {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Finished => 0,
            RunStatus::Failed => 1,
            RunStatus::Stopped => 130,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Finished => "Finished",
            RunStatus::Failed => "Failed",
            RunStatus::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: String,
    pub copy: u32,
    pub status: UnitState,
    pub counters: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<UnitReport> for StepResult {
    fn from(report: UnitReport) -> Self {
        Self {
            step: report.id.step.to_string(),
            copy: report.id.copy,
            status: report.state,
            counters: report.counters,
            error: report.error,
        }
    }
}

/// Outcome of one run, as handed to the CLI and the cluster master.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub graph: String,
    pub status: RunStatus,
    pub steps: Vec<StepResult>,
    pub total_errors: u64,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Folds unit reports into a run outcome.
    ///
    /// Any failed unit fails the run; otherwise a requested stop makes it
    /// `Stopped`. A failed unit that counted no row errors still adds one
    /// to the total, so a failed run never reports zero errors.
    pub fn from_reports(
        run_id: impl Into<String>,
        graph: impl Into<String>,
        reports: Vec<UnitReport>,
        stop_requested: bool,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let mut steps: Vec<StepResult> = reports.into_iter().map(StepResult::from).collect();
        steps.sort_by(|a, b| a.step.cmp(&b.step).then(a.copy.cmp(&b.copy)));

        let failed = steps.iter().any(|s| s.status == UnitState::Failed);
        let total_errors = steps
            .iter()
            .map(|s| match (s.status, s.counters.errors) {
                (UnitState::Failed, 0) => 1,
                (_, errors) => errors,
            })
            .sum();
        let status = if failed {
            RunStatus::Failed
        } else if stop_requested || steps.iter().any(|s| s.status == UnitState::Stopped) {
            RunStatus::Stopped
        } else {
            RunStatus::Finished
        };

        Self {
            run_id: run_id.into(),
            graph: graph.into(),
            status,
            steps,
            total_errors,
            elapsed_ms: elapsed.as_millis() as u64,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    /// Counters of every copy of `step`, summed.
    pub fn counters_for(&self, step: &str) -> MetricsSnapshot {
        let mut total = MetricsSnapshot::default();
        self.steps
            .iter()
            .filter(|s| s.step == step)
            .for_each(|s| total.merge(&s.counters));
        total
    }

    pub fn step_copy(&self, step: &str, copy: u32) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step == step && s.copy == copy)
    }

    /// Counters of the whole run.
    pub fn totals(&self) -> MetricsSnapshot {
        let mut total = MetricsSnapshot::default();
        self.steps.iter().for_each(|s| total.merge(&s.counters));
        total
    }
}
