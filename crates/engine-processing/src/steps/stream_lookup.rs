use crate::{
    error::StepError,
    io::StepIo,
    step::{Flow, Step, StepContext},
    steps::{DerivedSchema, parse_config},
};
use async_trait::async_trait;
use model::{
    core::{
        data_type::DataType,
        schema::{Field, SchemaRef},
        value::Value,
    },
    graph::definition::StepDefinition,
    records::row::Row,
};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyPair {
    /// Field of the main stream.
    pub stream: String,
    /// Field of the lookup rows.
    pub lookup: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupValue {
    pub name: String,
    #[serde(default)]
    pub rename: Option<String>,
    /// Used when no lookup row matches.
    #[serde(default)]
    pub default: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamLookupConfig {
    /// Step feeding the info hop.
    pub lookup_from: String,
    pub keys: Vec<KeyPair>,
    pub values: Vec<LookupValue>,
}

struct Table {
    entries: HashMap<Vec<Value>, Vec<Value>>,
    fields: Vec<Field>,
    defaults: Vec<Value>,
}

/// Joins the main stream against rows read once from an info hop.
///
/// The lookup table is loaded on the first main row. Later duplicates of a
/// lookup key are ignored.
pub struct StreamLookup {
    config: StreamLookupConfig,
    table: Option<Table>,
    stream_keys: Option<(SchemaRef, Vec<usize>)>,
    schema: DerivedSchema,
}

impl StreamLookup {
    pub fn from_definition(definition: &StepDefinition) -> Result<Self, StepError> {
        let config: StreamLookupConfig = parse_config(definition)?;
        if config.keys.is_empty() {
            return Err(StepError::Config(format!(
                "step '{}': at least one key is required",
                definition.name
            )));
        }
        Ok(Self {
            config,
            table: None,
            stream_keys: None,
            schema: DerivedSchema::default(),
        })
    }

    async fn load(&self, io: &mut StepIo) -> Result<Table, StepError> {
        let rows = io.read_info(&self.config.lookup_from).await?;

        let Some(first) = rows.first() else {
            warn!(source = %self.config.lookup_from, "lookup stream is empty, defaults apply");
            let fields = self
                .config
                .values
                .iter()
                .map(|v| Field::new(output_name(v), DataType::String))
                .collect();
            let defaults = self
                .config
                .values
                .iter()
                .map(|v| Value::from_json(&v.default, DataType::String))
                .collect::<Result<_, _>>()?;
            return Ok(Table {
                entries: HashMap::new(),
                fields,
                defaults,
            });
        };

        let schema = first.schema().clone();
        let key_indexes = self
            .config
            .keys
            .iter()
            .map(|k| schema.require_index(&k.lookup))
            .collect::<Result<Vec<_>, _>>()?;
        let value_indexes = self
            .config
            .values
            .iter()
            .map(|v| schema.require_index(&v.name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut fields = Vec::with_capacity(value_indexes.len());
        let mut defaults = Vec::with_capacity(value_indexes.len());
        for (value, &index) in self.config.values.iter().zip(&value_indexes) {
            let source = &schema.fields()[index];
            fields.push(Field {
                name: output_name(value),
                ..source.clone()
            });
            defaults.push(Value::from_json(&value.default, source.data_type)?);
        }

        let mut entries = HashMap::with_capacity(rows.len());
        for row in &rows {
            let pick = |indexes: &[usize]| -> Vec<Value> {
                indexes
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                    .collect()
            };
            entries.entry(pick(&key_indexes)).or_insert_with(|| pick(&value_indexes));
        }
        debug!(source = %self.config.lookup_from, keys = entries.len(), "lookup table built");

        Ok(Table {
            entries,
            fields,
            defaults,
        })
    }
}

fn output_name(value: &LookupValue) -> String {
    value.rename.clone().unwrap_or_else(|| value.name.clone())
}

#[async_trait]
impl Step for StreamLookup {
    async fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    async fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo) -> Result<Flow, StepError> {
        let Some(row) = row else {
            return Ok(Flow::EndOfInput);
        };
        if self.table.is_none() {
            self.table = Some(self.load(io).await?);
        }
        let Some(table) = &self.table else {
            return Ok(Flow::Continue);
        };

        let stale = match &self.stream_keys {
            Some((schema, _)) => !Arc::ptr_eq(schema, row.schema()),
            None => true,
        };
        if stale {
            let indexes = self
                .config
                .keys
                .iter()
                .map(|k| row.schema().require_index(&k.stream))
                .collect::<Result<Vec<_>, _>>()?;
            self.stream_keys = Some((row.schema().clone(), indexes));
        }
        let key: Vec<Value> = self
            .stream_keys
            .as_ref()
            .map(|(_, indexes)| {
                indexes
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .unwrap_or_default();

        let fields = &table.fields;
        let schema = self
            .schema
            .resolve(row.schema(), |input| Ok(input.extend(fields.iter().cloned())?))?;

        let found = table.entries.get(&key).unwrap_or(&table.defaults);
        let mut values = Vec::with_capacity(schema.len());
        values.extend_from_slice(row.values());
        values.extend(found.iter().cloned());
        io.emit(Row::new(schema, values)?).await?;
        Ok(Flow::Continue)
    }
}
