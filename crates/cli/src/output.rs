use crate::error::CliError;
use engine_cluster::coordinator::ClusterResult;
use engine_core::history::RunSummary;
use engine_runtime::transformation::result::RunResult;
use serde::Serialize;
use std::fmt::Write;

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn run_table(result: &RunResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Run {} of '{}': {} in {} ms, {} error(s)",
        result.run_id, result.graph, result.status, result.elapsed_ms, result.total_errors
    );
    let _ = writeln!(
        out,
        "{:<24} {:>4} {:<10} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6}",
        "Step", "Copy", "Status", "Read", "Written", "Input", "Output", "Rejected", "Errors"
    );
    for step in &result.steps {
        let c = &step.counters;
        let _ = writeln!(
            out,
            "{:<24} {:>4} {:<10} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6}",
            step.step,
            step.copy,
            step.status.to_string(),
            c.lines_read,
            c.lines_written,
            c.lines_input,
            c.lines_output,
            c.lines_rejected,
            c.errors
        );
        if let Some(error) = &step.error {
            let _ = writeln!(out, "    {error}");
        }
    }
    out
}

pub fn history_table(summary: &RunSummary) -> String {
    let mut out = String::new();
    let graph = summary.graph.as_deref().unwrap_or("?");
    let _ = writeln!(out, "Run {} of '{graph}': {}", summary.run_id, summary.status);
    let started = summary
        .started_at
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "n/a".to_string());
    let finished = summary
        .finished_at
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "n/a".to_string());
    let _ = writeln!(out, "{:<16} {started}", "Started");
    let _ = writeln!(out, "{:<16} {finished}", "Finished");
    let _ = writeln!(out, "{:<16} {}", "Errors", summary.total_errors);
    let _ = writeln!(out, "{:<16} {}", "Graph hash", summary.graph_hash.as_deref().unwrap_or("n/a"));
    for unit in &summary.units {
        let _ = writeln!(
            out,
            "  {}.{:<4} {:<10} read={} written={} rejected={} errors={}",
            unit.step,
            unit.copy,
            unit.status,
            unit.counters.lines_read,
            unit.counters.lines_written,
            unit.counters.lines_rejected,
            unit.counters.errors
        );
    }
    out
}

pub fn cluster_table(result: &ClusterResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Cluster run {} of '{}': {} in {} ms",
        result.run_id, result.graph, result.status, result.elapsed_ms
    );
    if let Some(reason) = &result.reason {
        let _ = writeln!(out, "Reason: {reason}");
    }
    let _ = writeln!(
        out,
        "Rows read {}, written {}, errors {}",
        result.rows_read, result.rows_written, result.errors
    );
    for worker in &result.workers {
        let state = match &worker.status {
            Some(status) => status.state.to_string(),
            None => "unknown".to_string(),
        };
        let stale = if worker.stale { " (stale)" } else { "" };
        let _ = writeln!(out, "  {:<16} {state}{stale}", worker.address);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engine_core::{history::UnitSummary, metrics::MetricsSnapshot};

    #[test]
    fn history_lists_every_unit() {
        let summary = RunSummary {
            run_id: "r1".into(),
            graph: Some("orders".into()),
            graph_hash: Some("abc".into()),
            started_at: Some(Utc::now()),
            finished_at: None,
            status: "Running".into(),
            total_errors: 0,
            units: vec![UnitSummary {
                step: "load".into(),
                copy: 1,
                status: "Finished".into(),
                counters: MetricsSnapshot {
                    lines_read: 12,
                    ..Default::default()
                },
            }],
        };

        let table = history_table(&summary);
        assert!(table.starts_with("Run r1 of 'orders': Running"));
        assert!(table.contains("load.1"));
        assert!(table.contains("read=12"));
        assert!(table.contains("n/a"));
    }
}
