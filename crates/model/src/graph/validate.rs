use crate::{
    error::GraphError,
    graph::definition::{Distribution, GraphDefinition, HopKind},
};
use std::collections::{HashMap, HashSet, VecDeque};

impl GraphDefinition {
    /// Checks the graph's structure and returns the steps in topological order.
    pub fn validate(&self) -> Result<Vec<&str>, GraphError> {
        if self.steps.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut names = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(GraphError::DuplicateStep(step.name.clone()));
            }
            if step.copies == 0 {
                return Err(GraphError::ZeroCopies(step.name.clone()));
            }
        }

        let mut pairs = HashSet::new();
        let mut error_hops = HashSet::new();
        for hop in self.enabled_hops() {
            for end in [&hop.from, &hop.to] {
                if !names.contains(end.as_str()) {
                    return Err(GraphError::UnknownStep {
                        step: end.clone(),
                        from: hop.from.clone(),
                        to: hop.to.clone(),
                    });
                }
            }
            if hop.from == hop.to {
                return Err(GraphError::SelfLoop(hop.from.clone()));
            }
            if !pairs.insert((hop.from.as_str(), hop.to.as_str())) {
                return Err(GraphError::DuplicateHop {
                    from: hop.from.clone(),
                    to: hop.to.clone(),
                });
            }
            if hop.kind == HopKind::Error && !error_hops.insert(hop.from.as_str()) {
                return Err(GraphError::MultipleErrorHops(hop.from.clone()));
            }
            if matches!(&hop.distribution, Distribution::KeyPartitioned { fields } if fields.is_empty()) {
                return Err(GraphError::EmptyPartitionKey {
                    from: hop.from.clone(),
                    to: hop.to.clone(),
                });
            }
        }

        self.check_reachability()?;
        self.topological_order()
    }

    fn check_reachability(&self) -> Result<(), GraphError> {
        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self
            .steps
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| self.is_source(name))
            .collect();

        while let Some(name) = queue.pop_front() {
            if !reached.insert(name) {
                continue;
            }
            for hop in self.outgoing(name) {
                queue.push_back(hop.to.as_str());
            }
        }

        match self
            .steps
            .iter()
            .find(|s| !reached.contains(s.name.as_str()))
        {
            Some(step) => Err(GraphError::Unreachable(step.name.clone())),
            None => Ok(()),
        }
    }

    /// Kahn's algorithm; steps are emitted in declaration order when free.
    fn topological_order(&self) -> Result<Vec<&str>, GraphError> {
        let mut indegree: HashMap<&str, usize> =
            self.steps.iter().map(|s| (s.name.as_str(), 0)).collect();
        for hop in self.enabled_hops() {
            if let Some(d) = indegree.get_mut(hop.to.as_str()) {
                *d += 1;
            }
        }

        let mut ready: VecDeque<&str> = self
            .steps
            .iter()
            .map(|s| s.name.as_str())
            .filter(|n| indegree.get(n) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(name) = ready.pop_front() {
            order.push(name);
            for hop in self.outgoing(name) {
                if let Some(d) = indegree.get_mut(hop.to.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(hop.to.as_str());
                    }
                }
            }
        }

        if order.len() != self.steps.len() {
            let stuck = self
                .steps
                .iter()
                .find(|s| indegree.get(s.name.as_str()).is_some_and(|d| *d > 0))
                .map(|s| s.name.clone())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::definition::{HopDefinition, StepDefinition};

    fn chain() -> GraphDefinition {
        GraphDefinition::new("chain")
            .step(StepDefinition::new("src", "generate-rows"))
            .step(StepDefinition::new("mid", "dummy"))
            .step(StepDefinition::new("sink", "dummy"))
            .hop(HopDefinition::new("src", "mid"))
            .hop(HopDefinition::new("mid", "sink"))
    }

    #[test]
    fn orders_steps_topologically() {
        let graph = chain();
        assert_eq!(graph.validate().unwrap(), vec!["src", "mid", "sink"]);
    }

    #[test]
    fn rejects_cycle_without_source() {
        // `a` and `b` feed each other and nothing feeds them from a source.
        let graph = chain()
            .step(StepDefinition::new("a", "dummy"))
            .step(StepDefinition::new("b", "dummy"))
            .hop(HopDefinition::new("a", "b"))
            .hop(HopDefinition::new("b", "a"));
        assert_eq!(
            graph.validate().unwrap_err(),
            GraphError::Unreachable("a".into())
        );
    }

    #[test]
    fn rejects_cycle_reachable_from_source() {
        let graph = chain().hop(HopDefinition::new("sink", "mid"));
        assert!(matches!(graph.validate(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn rejects_unknown_and_duplicate_hops() {
        let graph = chain().hop(HopDefinition::new("mid", "nowhere"));
        assert!(matches!(
            graph.validate(),
            Err(GraphError::UnknownStep { .. })
        ));

        let graph = chain().hop(HopDefinition::new("src", "mid"));
        assert!(matches!(
            graph.validate(),
            Err(GraphError::DuplicateHop { .. })
        ));
    }

    #[test]
    fn rejects_second_error_hop_and_empty_key() {
        let graph = chain()
            .step(StepDefinition::new("bad1", "dummy"))
            .step(StepDefinition::new("bad2", "dummy"))
            .hop(HopDefinition::new("mid", "bad1").kind(HopKind::Error))
            .hop(HopDefinition::new("mid", "bad2").kind(HopKind::Error));
        assert_eq!(
            graph.validate().unwrap_err(),
            GraphError::MultipleErrorHops("mid".into())
        );

        let mut graph = chain();
        graph.hops[0].distribution = Distribution::KeyPartitioned { fields: vec![] };
        assert!(matches!(
            graph.validate(),
            Err(GraphError::EmptyPartitionKey { .. })
        ));
    }

    #[test]
    fn disabled_hops_are_ignored() {
        let mut graph = chain().hop(HopDefinition::new("sink", "mid"));
        graph.hops[2].enabled = false;
        assert!(graph.validate().is_ok());
    }
}
