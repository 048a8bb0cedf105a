use crate::{
    error::StepError,
    io::StepIo,
    step::{Flow, Step, StepContext},
    steps::parse_config,
};
use async_trait::async_trait;
use model::{
    core::{
        data_type::DataType,
        schema::{Field, Schema, SchemaRef},
        value::Value,
    },
    graph::definition::StepDefinition,
    records::row::Row,
};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateRowsConfig {
    pub fields: Vec<Field>,
    /// Inline rows, positionally aligned with `fields`.
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Total rows to produce, cycling through `rows`. Defaults to one pass.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Name of an appended integer field counting from 1.
    #[serde(default)]
    pub sequence_field: Option<String>,
}

/// Source step producing rows from its own configuration.
pub struct GenerateRows {
    config: GenerateRowsConfig,
    schema: Option<SchemaRef>,
    values: Vec<Vec<Value>>,
    produced: u64,
}

impl GenerateRows {
    pub fn from_definition(definition: &StepDefinition) -> Result<Self, StepError> {
        let config: GenerateRowsConfig = parse_config(definition)?;
        Ok(Self {
            config,
            schema: None,
            values: Vec::new(),
            produced: 0,
        })
    }

    fn limit(&self) -> u64 {
        self.config.limit.unwrap_or(self.values.len() as u64)
    }
}

#[async_trait]
impl Step for GenerateRows {
    async fn init(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        let mut fields = self.config.fields.clone();
        if let Some(name) = &self.config.sequence_field {
            fields.push(Field::new(name.clone(), DataType::Integer));
        }
        self.schema = Some(Schema::new(fields)?.into_ref());

        let width = self.config.fields.len();
        self.values = self
            .config
            .rows
            .iter()
            .enumerate()
            .map(|(line, raw)| -> Result<Vec<Value>, StepError> {
                if raw.len() != width {
                    return Err(StepError::Config(format!(
                        "row {} has {} values, expected {width}",
                        line + 1,
                        raw.len()
                    )));
                }
                raw.iter()
                    .zip(&self.config.fields)
                    .map(|(json, field)| Value::from_json(json, field.data_type).map_err(StepError::from))
                    .collect()
            })
            .collect::<Result<Vec<_>, StepError>>()?;

        if self.values.is_empty() && self.config.limit.unwrap_or(0) > 0 && width > 0 {
            return Err(StepError::Config(
                "a limit without inline rows needs an empty field list".to_string(),
            ));
        }
        debug!(step = %ctx.name, rows = self.limit(), "row generator ready");
        Ok(())
    }

    async fn process_row(&mut self, _row: Option<&Row>, io: &mut StepIo) -> Result<Flow, StepError> {
        if self.produced >= self.limit() {
            return Ok(Flow::EndOfInput);
        }
        let Some(schema) = self.schema.clone() else {
            return Err(StepError::Failed("generator used before init".to_string()));
        };

        let mut values = if self.values.is_empty() {
            Vec::new()
        } else {
            self.values[(self.produced % self.values.len() as u64) as usize].clone()
        };
        self.produced += 1;
        if self.config.sequence_field.is_some() {
            values.push(Value::Int(self.produced as i64));
        }

        io.metrics().increment_input(1);
        io.emit(Row::new(schema, values)?).await?;
        Ok(Flow::Continue)
    }
}
