use crate::{
    error::StepError,
    io::StepIo,
    step::{Flow, Step, StepContext},
    steps::{DerivedSchema, parse_config},
};
use async_trait::async_trait;
use model::{
    core::{data_type::DataType, schema::Field, value::Value},
    graph::definition::StepDefinition,
    records::row::Row,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Constant {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddConstantsConfig {
    pub constants: Vec<Constant>,
}

/// Appends fixed values to every row.
pub struct AddConstants {
    fields: Vec<Field>,
    values: Vec<Value>,
    schema: DerivedSchema,
}

impl AddConstants {
    pub fn from_definition(definition: &StepDefinition) -> Result<Self, StepError> {
        let config: AddConstantsConfig = parse_config(definition)?;
        let mut fields = Vec::with_capacity(config.constants.len());
        let mut values = Vec::with_capacity(config.constants.len());
        for constant in config.constants {
            values.push(Value::from_json(&constant.value, constant.data_type)?);
            fields.push(Field::new(constant.name, constant.data_type));
        }
        Ok(Self {
            fields,
            values,
            schema: DerivedSchema::default(),
        })
    }
}

#[async_trait]
impl Step for AddConstants {
    async fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    async fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo) -> Result<Flow, StepError> {
        let Some(row) = row else {
            return Ok(Flow::EndOfInput);
        };
        let fields = &self.fields;
        let schema = self
            .schema
            .resolve(row.schema(), |input| Ok(input.extend(fields.iter().cloned())?))?;

        let mut values = Vec::with_capacity(schema.len());
        values.extend_from_slice(row.values());
        values.extend(self.values.iter().cloned());
        io.emit(Row::new(schema, values)?).await?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{capture, context, drain};
    use model::core::schema::Schema;
    use serde_json::json;

    #[tokio::test]
    async fn appends_typed_constants_with_shared_schema() {
        let def = StepDefinition::new("tag", "add-constants").config(json!({
            "constants": [
                { "name": "country", "type": "string", "value": "NO" },
                { "name": "weight", "type": "number", "value": "1.5" }
            ]
        }));
        let mut step = AddConstants::from_definition(&def).unwrap();
        step.init(&context(&def)).await.unwrap();

        let input = Schema::new(vec![Field::new("id", DataType::Integer)]).unwrap().into_ref();
        let (mut io, sets) = capture("tag", &["out"]);
        for id in 0..2 {
            let row = Row::new(input.clone(), vec![Value::Int(id)]).unwrap();
            step.process_row(Some(&row), &mut io).await.unwrap();
        }

        let rows = drain(&sets[0]);
        assert_eq!(
            rows[0].values(),
            &[Value::Int(0), Value::String("NO".into()), Value::Float(1.5)]
        );
        assert!(std::sync::Arc::ptr_eq(rows[0].schema(), rows[1].schema()));
    }

    #[test]
    fn rejects_unconvertible_constant() {
        let def = StepDefinition::new("tag", "add-constants").config(json!({
            "constants": [{ "name": "n", "type": "integer", "value": "abc" }]
        }));
        assert!(matches!(AddConstants::from_definition(&def), Err(StepError::Model(_))));
    }
}
