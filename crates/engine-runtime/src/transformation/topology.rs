use crate::{
    context::EngineContext,
    error::EngineError,
    transformation::control::RunControl,
    unit::{StepUnit, UnitProbe},
};
use engine_core::{
    metrics::StepMetrics,
    partition::Partitioner,
    rowset::{RowSet, StepCopy},
};
use engine_processing::{
    io::{InfoInput, OutputHop, StepIo},
    step::StepContext,
};
use model::graph::{
    assignment::PartitionAssignment,
    definition::{Distribution, GraphDefinition, HopKind},
};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

type CopyKey = (String, u32);

/// Units ready to start, plus the probes the scheduler keeps.
pub(crate) struct Topology {
    pub units: Vec<StepUnit>,
    pub probes: Vec<UnitProbe>,
}

#[derive(Default)]
struct Wiring {
    outputs: HashMap<CopyKey, Vec<OutputHop>>,
    errors: HashMap<CopyKey, OutputHop>,
    inputs: HashMap<CopyKey, Vec<Arc<RowSet>>>,
    info: HashMap<CopyKey, Vec<InfoInput>>,
    rowsets: usize,
}

impl Wiring {
    fn attach(&mut self, kind: HopKind, key: CopyKey, out: OutputHop) {
        match kind {
            HopKind::Error => {
                self.errors.insert(key, out);
            }
            HopKind::Data | HopKind::Info => self.outputs.entry(key).or_default().push(out),
        }
    }
}

/// Which producer copy feeds which consumer copy on one hop.
///
/// Copy-to-all and key-partitioned hops connect every pair (P×C sets).
/// Round-robin hops use `max(P, C)` sets, set `k` joining producer `k % P`
/// to consumer `k % C`.
pub(crate) fn pairs(distribution: &Distribution, producers: u32, consumers: u32) -> Vec<(u32, u32)> {
    match distribution {
        Distribution::RoundRobin => (0..producers.max(consumers))
            .map(|k| (k % producers, k % consumers))
            .collect(),
        Distribution::CopyToAll | Distribution::KeyPartitioned { .. } => (0..producers)
            .flat_map(|p| (0..consumers).map(move |c| (p, c)))
            .collect(),
    }
}

/// Creates every RowSet and unit of the run. Nothing runs yet, so no unit
/// can observe a missing RowSet.
pub(crate) fn build(
    graph: &GraphDefinition,
    order: &[&str],
    ctx: &EngineContext,
    control: &RunControl,
    run_id: &str,
    assignment: Option<&PartitionAssignment>,
) -> Result<Topology, EngineError> {
    let copies: HashMap<&str, u32> = graph
        .steps
        .iter()
        .map(|s| (s.name.as_str(), s.copies.max(1)))
        .collect();
    let copies_of = |step: &str| copies.get(step).copied().unwrap_or(1);
    let capacity = ctx.settings.rowset_size();

    let runs = |step: &str| assignment.is_none_or(|a| a.runs(step));

    let mut wiring = Wiring::default();
    for hop in graph.enabled_hops() {
        if !runs(hop.from.as_str()) {
            continue;
        }
        if !runs(hop.to.as_str()) {
            // Another worker runs the consumer: rows sent down this hop go nowhere.
            for p in 0..copies_of(hop.from.as_str()) {
                let out = OutputHop::new(
                    hop.to.clone(),
                    Vec::new(),
                    Partitioner::new(&Distribution::RoundRobin, 0, None),
                );
                wiring.attach(hop.kind, (hop.from.clone(), p), out);
            }
            continue;
        }

        let distribution = match hop.kind {
            HopKind::Error => Distribution::RoundRobin,
            _ => hop.effective_distribution(),
        };
        let window = match (&distribution, assignment) {
            (Distribution::KeyPartitioned { .. }, Some(a)) => a.range_for(&hop.to).copied(),
            _ => None,
        };
        let (producers, consumers) = (copies_of(&hop.from), copies_of(&hop.to));

        let mut produced: Vec<Vec<Arc<RowSet>>> = vec![Vec::new(); producers as usize];
        let mut consumed: Vec<Vec<Arc<RowSet>>> = vec![Vec::new(); consumers as usize];
        for (p, c) in pairs(&distribution, producers, consumers) {
            let rowset = Arc::new(RowSet::new(
                StepCopy::new(hop.from.as_str(), p),
                StepCopy::new(hop.to.as_str(), c),
                capacity,
                control.abort_token().clone(),
            ));
            produced[p as usize].push(rowset.clone());
            consumed[c as usize].push(rowset);
            wiring.rowsets += 1;
        }

        for (p, sets) in produced.into_iter().enumerate() {
            let key = (hop.from.clone(), p as u32);
            let targets = sets.len();
            let out = OutputHop::new(
                hop.to.clone(),
                sets,
                Partitioner::new(&distribution, targets, window),
            );
            wiring.attach(hop.kind, key, out);
        }
        for (c, sets) in consumed.into_iter().enumerate() {
            let key = (hop.to.clone(), c as u32);
            match hop.kind {
                HopKind::Info => wiring
                    .info
                    .entry(key)
                    .or_default()
                    .push(InfoInput::new(hop.from.clone(), sets)),
                HopKind::Data | HopKind::Error => wiring.inputs.entry(key).or_default().extend(sets),
            }
        }
    }

    let worker: Option<Arc<str>> = assignment.map(|a| Arc::from(a.worker.as_str()));
    let mut units = Vec::new();
    let mut probes = Vec::new();
    for &name in order {
        let Some(definition) = graph.find_step(name).filter(|s| runs(s.name.as_str())) else {
            continue;
        };
        let definition = Arc::new(definition.clone());
        let step_copies = copies_of(name);
        let partitions = assignment.and_then(|a| a.range_for(name).copied());
        let step_name: Arc<str> = Arc::from(name);

        for copy in 0..step_copies {
            let key = (name.to_string(), copy);
            let step = ctx
                .registry
                .create(&definition)
                .map_err(|source| EngineError::Step {
                    step: name.to_string(),
                    source,
                })?;

            let mut io = StepIo::new(StepCopy::new(step_name.clone(), copy), StepMetrics::new());
            for hop in wiring.outputs.remove(&key).unwrap_or_default() {
                io = io.with_output(hop);
            }
            if let Some(hop) = wiring.errors.remove(&key) {
                io = io.with_error_hop(hop);
            }
            for input in wiring.info.remove(&key).unwrap_or_default() {
                io = io.with_info(input);
            }

            let step_ctx = StepContext {
                run_id: run_id.to_string(),
                name: step_name.clone(),
                copy,
                copies: step_copies,
                definition: definition.clone(),
                playlist: ctx.playlist.clone(),
                partitions,
                worker: worker.clone(),
            };
            let (unit, probe) = StepUnit::new(
                step,
                step_ctx,
                io,
                wiring.inputs.remove(&key).unwrap_or_default(),
                ctx.settings.input_block_size(),
                ctx.settings.input_poll_interval(),
                control.clone(),
            );
            units.push(unit);
            probes.push(probe);
        }
    }

    debug!(units = units.len(), rowsets = wiring.rowsets, "Topology built");
    Ok(Topology { units, probes })
}
