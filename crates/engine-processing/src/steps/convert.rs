use crate::{
    error::{RowError, StepError},
    io::StepIo,
    step::{Flow, Step, StepContext},
    steps::{DerivedSchema, parse_config},
};
use async_trait::async_trait;
use model::{
    core::{data_type::DataType, schema::Schema},
    graph::definition::StepDefinition,
    records::row::Row,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Conversion {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConvertConfig {
    pub fields: Vec<Conversion>,
}

/// Changes the logical type of selected fields. A value that does not
/// convert is a row error naming the field.
pub struct Convert {
    config: ConvertConfig,
    schema: DerivedSchema,
    targets: Vec<(usize, DataType)>,
}

impl Convert {
    pub fn from_definition(definition: &StepDefinition) -> Result<Self, StepError> {
        Ok(Self {
            config: parse_config(definition)?,
            schema: DerivedSchema::default(),
            targets: Vec::new(),
        })
    }
}

#[async_trait]
impl Step for Convert {
    async fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    async fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo) -> Result<Flow, StepError> {
        let Some(row) = row else {
            return Ok(Flow::EndOfInput);
        };

        let conversions = &self.config.fields;
        let targets = &mut self.targets;
        let schema = self.schema.resolve(row.schema(), |input: &Schema| {
            let mut fields = input.fields().to_vec();
            targets.clear();
            for conversion in conversions {
                let index = input.require_index(&conversion.name)?;
                fields[index].data_type = conversion.data_type;
                targets.push((index, conversion.data_type));
            }
            Ok(Schema::new(fields)?)
        })?;

        let mut values = row.values().to_vec();
        for &(index, data_type) in &self.targets {
            let converted = values[index].convert_to(data_type).map_err(|e| {
                RowError::new("conversion", e.to_string()).field(schema.fields()[index].name.clone())
            })?;
            values[index] = converted;
        }
        io.emit(Row::new(schema, values)?).await?;
        Ok(Flow::Continue)
    }
}
