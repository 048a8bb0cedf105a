use crate::graph::definition::GraphDefinition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Half-open range `[start, end)` of a step's global partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRange {
    pub start: u32,
    pub end: u32,
    /// Partition count of the step across the whole cluster.
    pub total: u32,
}

impl PartitionRange {
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, partition: u32) -> bool {
        partition >= self.start && partition < self.end
    }
}

/// Work handed to one worker: for every partitioned step, the partitions it
/// owns, and the steps another worker runs instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub worker: String,
    pub ranges: BTreeMap<String, PartitionRange>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skipped: BTreeSet<String>,
}

impl PartitionAssignment {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            ranges: BTreeMap::new(),
            skipped: BTreeSet::new(),
        }
    }

    pub fn range_for(&self, step: &str) -> Option<&PartitionRange> {
        self.ranges.get(step)
    }

    /// False for steps another worker runs. Hops into them still resolve,
    /// the worker just builds no units for them.
    pub fn runs(&self, step: &str) -> bool {
        !self.skipped.contains(step)
    }

    /// The graph this worker actually runs: each partitioned step shrinks to
    /// the number of partitions it owns.
    pub fn apply(&self, graph: &GraphDefinition) -> GraphDefinition {
        let mut local = graph.clone();
        for step in &mut local.steps {
            if let Some(range) = self.ranges.get(&step.name) {
                step.copies = range.len().max(1);
            }
        }
        local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::definition::{HopDefinition, StepDefinition};

    #[test]
    fn apply_resizes_partitioned_steps_only() {
        let graph = GraphDefinition::new("g")
            .step(StepDefinition::new("src", "generate-rows"))
            .step(StepDefinition::new("agg", "dummy").copies(6));

        let mut assignment = PartitionAssignment::new("w1");
        assignment.ranges.insert(
            "agg".into(),
            PartitionRange {
                start: 2,
                end: 4,
                total: 6,
            },
        );

        let local = assignment.apply(&graph);
        assert_eq!(local.find_step("src").unwrap().copies, 1);
        assert_eq!(local.find_step("agg").unwrap().copies, 2);
        assert!(assignment.range_for("agg").unwrap().contains(3));
        assert!(!assignment.range_for("agg").unwrap().contains(4));
    }

    #[test]
    fn skipped_steps_stay_in_the_graph() {
        let graph = GraphDefinition::new("g")
            .step(StepDefinition::new("src", "generate-rows"))
            .step(StepDefinition::new("work", "dummy").copies(2))
            .step(StepDefinition::new("audit", "dummy"))
            .hop(HopDefinition::new("src", "work"))
            .hop(HopDefinition::new("src", "audit"));

        let mut assignment = PartitionAssignment::new("w1");
        assignment.skipped.insert("audit".into());

        let local = assignment.apply(&graph);
        assert!(local.find_step("audit").is_some());
        assert_eq!(local.hops.len(), 2);
        assert!(local.validate().is_ok());
        assert!(assignment.runs("work"));
        assert!(!assignment.runs("audit"));
    }
}
