use crate::error::StepError;
use model::{
    core::schema::{Schema, SchemaRef},
    graph::definition::StepDefinition,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub mod add_constants;
pub mod convert;
pub mod dummy;
pub mod filter_rows;
pub mod generate_rows;
pub mod select_values;
pub mod stream_lookup;
pub mod text_file_input;
pub mod text_file_output;

/// Deserializes a step's `config` block; a missing block reads as `{}`.
pub(crate) fn parse_config<T: DeserializeOwned>(definition: &StepDefinition) -> Result<T, StepError> {
    let raw = if definition.config.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        definition.config.clone()
    };
    serde_json::from_value(raw)
        .map_err(|e| StepError::Config(format!("step '{}': {e}", definition.name)))
}

/// Output schema derived from an input schema, rebuilt only when the input
/// shape changes so every output row shares one schema instance.
#[derive(Debug, Default)]
pub(crate) struct DerivedSchema {
    cached: Option<(SchemaRef, SchemaRef)>,
}

impl DerivedSchema {
    pub(crate) fn resolve<F>(&mut self, input: &SchemaRef, derive: F) -> Result<SchemaRef, StepError>
    where
        F: FnOnce(&Schema) -> Result<Schema, StepError>,
    {
        if let Some((base, output)) = &self.cached {
            if Arc::ptr_eq(base, input) || **base == **input {
                return Ok(output.clone());
            }
        }
        let output = derive(input)?.into_ref();
        self.cached = Some((input.clone(), output.clone()));
        Ok(output)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::{
        io::{OutputHop, StepIo},
        step::StepContext,
    };
    use engine_core::{
        metrics::StepMetrics,
        partition::Partitioner,
        playlist::{PlayAll, Playlist},
        rowset::{Fetched, RowSet, StepCopy},
    };
    use model::{
        graph::definition::{Distribution, StepDefinition},
        records::row::Row,
    };
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    pub fn context(definition: &StepDefinition) -> StepContext {
        context_with(definition, Arc::new(PlayAll))
    }

    pub fn context_with(definition: &StepDefinition, playlist: Arc<dyn Playlist>) -> StepContext {
        StepContext {
            run_id: "test-run".into(),
            name: definition.name.as_str().into(),
            copy: 0,
            copies: definition.copies,
            definition: Arc::new(definition.clone()),
            playlist,
            partitions: None,
            worker: None,
        }
    }

    pub fn rowset(from: &str, to: &str) -> Arc<RowSet> {
        Arc::new(RowSet::new(
            StepCopy::new(from, 0),
            StepCopy::new(to, 0),
            1024,
            CancellationToken::new(),
        ))
    }

    /// IO with one captured output per target name.
    pub fn capture(step: &str, targets: &[&str]) -> (StepIo, Vec<Arc<RowSet>>) {
        let mut io = StepIo::new(StepCopy::new(step, 0), StepMetrics::new());
        let mut sets = Vec::new();
        for target in targets {
            let rs = rowset(step, target);
            io = io.with_output(OutputHop::new(
                *target,
                vec![rs.clone()],
                Partitioner::new(&Distribution::RoundRobin, 1, None),
            ));
            sets.push(rs);
        }
        (io, sets)
    }

    pub fn drain(rowset: &RowSet) -> Vec<Row> {
        let mut rows = Vec::new();
        while let Fetched::Row(row) = rowset.try_get() {
            rows.push(row);
        }
        rows
    }
}
