use crate::error::ClusterError;
use model::graph::{
    assignment::{PartitionAssignment, PartitionRange},
    definition::{GraphDefinition, HopDefinition, HopKind},
};
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

/// Where the steps of a split graph run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Placement<'a> {
    /// Partitioned steps and everything their rows flow into. Each worker
    /// runs them over its own partitions.
    pub distributed: BTreeSet<&'a str>,
    /// Steps every worker runs in full: whatever feeds a partitioned step,
    /// and the lookup streams of distributed steps.
    pub replicated: BTreeSet<&'a str>,
    /// The rest, run by the first worker only.
    pub primary: BTreeSet<&'a str>,
}

/// Sorts the steps of `graph` into distributed, replicated and primary-only
/// ones, rejecting graphs whose rows would have to cross workers.
pub fn place(graph: &GraphDefinition) -> Result<Placement<'_>, ClusterError> {
    let partitioned: Vec<&str> = graph
        .partitioned_steps()
        .into_iter()
        .map(|s| s.name.as_str())
        .collect();
    let distributed = reach(graph, partitioned.iter().copied(), Direction::Down, |h| {
        h.kind != HopKind::Info
    });

    for hop in graph.enabled_hops().filter(|h| distributed.contains(h.from.as_str())) {
        match hop.kind {
            HopKind::Info => {
                return Err(ClusterError::PartialLookup {
                    from: hop.from.clone(),
                    to: hop.to.clone(),
                });
            }
            HopKind::Data if hop.distribution.is_partitioned() => {
                return Err(ClusterError::Repartition {
                    from: hop.from.clone(),
                    to: hop.to.clone(),
                });
            }
            _ => {}
        }
    }

    let feeders = graph
        .enabled_hops()
        .filter(|h| {
            partitioned.contains(&h.to.as_str())
                || (h.kind == HopKind::Info && distributed.contains(h.to.as_str()))
        })
        .map(|h| h.from.as_str());
    let replicated = reach(graph, feeders, Direction::Up, |_| true);
    if let Some(step) = replicated.intersection(&distributed).next() {
        return Err(ClusterError::PartitionedUpstream {
            step: step.to_string(),
        });
    }

    for hop in graph.enabled_hops().filter(|h| replicated.contains(h.from.as_str())) {
        let keyed = hop.kind == HopKind::Data && hop.distribution.is_partitioned();
        if hop.kind != HopKind::Info && !keyed && distributed.contains(hop.to.as_str()) {
            return Err(ClusterError::MixedInput {
                from: hop.from.clone(),
                to: hop.to.clone(),
            });
        }
        if hop.kind == HopKind::Error && !replicated.contains(hop.to.as_str()) {
            return Err(ClusterError::ReplicatedErrors {
                from: hop.from.clone(),
                to: hop.to.clone(),
            });
        }
    }

    let primary = graph
        .steps
        .iter()
        .map(|s| s.name.as_str())
        .filter(|s| !distributed.contains(s) && !replicated.contains(s))
        .collect();
    Ok(Placement {
        distributed,
        replicated,
        primary,
    })
}

#[derive(Clone, Copy)]
enum Direction {
    Down,
    Up,
}

/// `roots` plus every step reachable from them over hops accepted by `follow`.
fn reach<'a>(
    graph: &'a GraphDefinition,
    roots: impl IntoIterator<Item = &'a str>,
    direction: Direction,
    follow: impl Fn(&HopDefinition) -> bool,
) -> BTreeSet<&'a str> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&'a str> = roots.into_iter().collect();
    while let Some(step) = queue.pop_front() {
        if !seen.insert(step) {
            continue;
        }
        for hop in graph.enabled_hops().filter(|h| follow(h)) {
            let (near, far) = match direction {
                Direction::Down => (&hop.from, &hop.to),
                Direction::Up => (&hop.to, &hop.from),
            };
            if near == step {
                queue.push_back(far.as_str());
            }
        }
    }
    seen
}

/// Divides the partitions of every key-partitioned step into contiguous,
/// balanced ranges, one per worker. The first `partitions % workers`
/// workers get one extra partition. Primary-only steps are skipped on every
/// worker but the first.
pub fn split(graph: &GraphDefinition, workers: &[String]) -> Result<Vec<PartitionAssignment>, ClusterError> {
    if workers.is_empty() {
        return Err(ClusterError::NoWorkers);
    }
    let partitioned = graph.partitioned_steps();
    if partitioned.is_empty() {
        return Err(ClusterError::NothingToSplit);
    }
    let placement = place(graph)?;
    debug!(
        distributed = ?placement.distributed,
        replicated = ?placement.replicated,
        primary = ?placement.primary,
        "steps placed"
    );

    let mut assignments: Vec<PartitionAssignment> =
        workers.iter().map(PartitionAssignment::new).collect();
    let count = workers.len() as u32;

    for step in partitioned {
        let total = step.copies;
        if total < count {
            return Err(ClusterError::TooFewPartitions {
                step: step.name.clone(),
                partitions: total,
                workers: workers.len(),
            });
        }
        let (base, extra) = (total / count, total % count);
        let mut start = 0;
        for (i, assignment) in assignments.iter_mut().enumerate() {
            let len = base + u32::from((i as u32) < extra);
            let range = PartitionRange {
                start,
                end: start + len,
                total,
            };
            debug!(step = %step.name, worker = %assignment.worker, ?range, "partitions assigned");
            assignment.ranges.insert(step.name.clone(), range);
            start += len;
        }
    }
    for assignment in assignments.iter_mut().skip(1) {
        assignment.skipped = placement.primary.iter().map(|s| s.to_string()).collect();
    }
    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::graph::definition::{Distribution, HopDefinition, HopKind, StepDefinition};

    fn keyed(from: &str, to: &str) -> HopDefinition {
        HopDefinition::new(from, to).distribution(Distribution::KeyPartitioned {
            fields: vec!["id".into()],
        })
    }

    /// `src` feeding a two-partition `work` step.
    fn fan_in() -> GraphDefinition {
        GraphDefinition::new("g")
            .step(StepDefinition::new("src", "generate-rows"))
            .step(StepDefinition::new("work", "dummy").copies(2))
            .hop(keyed("src", "work"))
    }

    fn graph(copies: u32) -> GraphDefinition {
        GraphDefinition::new("g")
            .step(StepDefinition::new("src", "generate-rows"))
            .step(StepDefinition::new("agg", "dummy").copies(copies))
            .hop(HopDefinition::new("src", "agg").distribution(Distribution::KeyPartitioned {
                fields: vec!["id".into()],
            }))
    }

    fn workers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("w{i}")).collect()
    }

    #[test]
    fn ranges_are_contiguous_and_balanced() {
        let assignments = split(&graph(7), &workers(3)).unwrap();
        let ranges: Vec<(u32, u32)> = assignments
            .iter()
            .map(|a| {
                let r = a.range_for("agg").unwrap();
                (r.start, r.end)
            })
            .collect();
        assert_eq!(ranges, vec![(0, 3), (3, 5), (5, 7)]);
        assert!(assignments.iter().all(|a| a.range_for("src").is_none()));
        assert_eq!(assignments[2].worker, "w2");
    }

    #[test]
    fn rejects_unsplittable_graphs() {
        assert!(matches!(
            split(&graph(2), &workers(3)),
            Err(ClusterError::TooFewPartitions { partitions: 2, .. })
        ));

        let flat = GraphDefinition::new("flat")
            .step(StepDefinition::new("src", "generate-rows"))
            .step(StepDefinition::new("sink", "dummy"))
            .hop(HopDefinition::new("src", "sink"));
        assert!(matches!(
            split(&flat, &workers(2)),
            Err(ClusterError::NothingToSplit)
        ));
        assert!(matches!(split(&graph(4), &[]), Err(ClusterError::NoWorkers)));
    }

    #[test]
    fn side_branches_run_on_the_first_worker_only() {
        let graph = fan_in()
            .step(StepDefinition::new("audit", "dummy"))
            .step(StepDefinition::new("tail", "dummy"))
            .hop(HopDefinition::new("src", "audit"))
            .hop(HopDefinition::new("work", "tail"));

        let placement = place(&graph).unwrap();
        assert_eq!(placement.replicated, BTreeSet::from(["src"]));
        assert_eq!(placement.distributed, BTreeSet::from(["tail", "work"]));
        assert_eq!(placement.primary, BTreeSet::from(["audit"]));

        let assignments = split(&graph, &workers(2)).unwrap();
        assert!(assignments[0].skipped.is_empty());
        assert_eq!(assignments[1].skipped, BTreeSet::from(["audit".to_string()]));
        assert!(!assignments[1].runs("audit"));
    }

    #[test]
    fn rejects_partitioned_rows_feeding_another_keyed_hop() {
        let chained = fan_in()
            .step(StepDefinition::new("agg", "dummy").copies(4))
            .hop(keyed("work", "agg"));
        assert!(matches!(
            split(&chained, &workers(2)),
            Err(ClusterError::Repartition { from, to }) if from == "work" && to == "agg"
        ));

        let detour = fan_in()
            .step(StepDefinition::new("mid", "dummy"))
            .step(StepDefinition::new("agg", "dummy").copies(4))
            .hop(HopDefinition::new("work", "mid"))
            .hop(keyed("mid", "agg"));
        assert!(matches!(
            split(&detour, &workers(2)),
            Err(ClusterError::Repartition { from, .. }) if from == "mid"
        ));
    }

    #[test]
    fn rejects_graphs_mixing_full_and_partitioned_streams() {
        let merged = fan_in()
            .step(StepDefinition::new("merge", "dummy"))
            .hop(HopDefinition::new("work", "merge"))
            .hop(HopDefinition::new("src", "merge"));
        assert!(matches!(
            split(&merged, &workers(2)),
            Err(ClusterError::MixedInput { from, to }) if from == "src" && to == "merge"
        ));

        let lookup = fan_in()
            .step(StepDefinition::new("other", "generate-rows"))
            .step(StepDefinition::new("join", "dummy"))
            .hop(HopDefinition::new("other", "join"))
            .hop(HopDefinition::new("work", "join").kind(HopKind::Info));
        assert!(matches!(
            split(&lookup, &workers(2)),
            Err(ClusterError::PartialLookup { from, .. }) if from == "work"
        ));

        let errors = fan_in()
            .step(StepDefinition::new("rejects", "dummy"))
            .hop(HopDefinition::new("src", "rejects").kind(HopKind::Error));
        assert!(matches!(
            split(&errors, &workers(2)),
            Err(ClusterError::ReplicatedErrors { from, .. }) if from == "src"
        ));
    }

    #[test]
    fn lookups_of_partitioned_steps_are_replicated() {
        let graph = fan_in()
            .step(StepDefinition::new("rates", "generate-rows"))
            .hop(HopDefinition::new("rates", "work").kind(HopKind::Info));

        let placement = place(&graph).unwrap();
        assert_eq!(placement.replicated, BTreeSet::from(["rates", "src"]));
        assert!(placement.primary.is_empty());
    }
}
