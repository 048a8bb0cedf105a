use crate::{
    error::StepError,
    io::StepIo,
    step::{Flow, Step, StepContext},
    steps::parse_config,
};
use async_trait::async_trait;
use model::{
    core::schema::{Field, Schema, SchemaRef},
    graph::definition::StepDefinition,
    records::row::Row,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectField {
    pub name: String,
    #[serde(default)]
    pub rename: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectValuesConfig {
    /// Fields to keep, in output order. Empty keeps everything.
    #[serde(default)]
    pub select: Vec<SelectField>,
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Picks, reorders, renames and drops fields.
pub struct SelectValues {
    config: SelectValuesConfig,
    plan: Option<(SchemaRef, SchemaRef, Vec<usize>)>,
}

impl SelectValues {
    pub fn from_definition(definition: &StepDefinition) -> Result<Self, StepError> {
        Ok(Self {
            config: parse_config(definition)?,
            plan: None,
        })
    }

    fn plan(&self, input: &Schema) -> Result<(Schema, Vec<usize>), StepError> {
        let mut picked: Vec<(usize, String)> = if self.config.select.is_empty() {
            input.names().map(str::to_string).enumerate().collect()
        } else {
            self.config
                .select
                .iter()
                .map(|s| -> Result<(usize, String), StepError> {
                    let index = input.require_index(&s.name)?;
                    Ok((index, s.rename.clone().unwrap_or_else(|| s.name.clone())))
                })
                .collect::<Result<_, StepError>>()?
        };

        for name in &self.config.remove {
            input.require_index(name)?;
        }
        picked.retain(|(index, _)| {
            let original = input.fields()[*index].name.as_str();
            !self.config.remove.iter().any(|r| r == original)
        });

        let fields = picked
            .iter()
            .map(|(index, name)| Field {
                name: name.clone(),
                ..input.fields()[*index].clone()
            })
            .collect();
        let indexes = picked.into_iter().map(|(index, _)| index).collect();
        Ok((Schema::new(fields)?, indexes))
    }
}

#[async_trait]
impl Step for SelectValues {
    async fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    async fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo) -> Result<Flow, StepError> {
        let Some(row) = row else {
            return Ok(Flow::EndOfInput);
        };

        let stale = match &self.plan {
            Some((input, _, _)) => !Arc::ptr_eq(input, row.schema()),
            None => true,
        };
        if stale {
            let (output, indexes) = self.plan(row.schema())?;
            self.plan = Some((row.schema().clone(), output.into_ref(), indexes));
        }
        let Some((_, output, indexes)) = &self.plan else {
            return Ok(Flow::Continue);
        };

        let values = indexes
            .iter()
            .filter_map(|&i| row.get(i).cloned())
            .collect();
        io.emit(Row::new(output.clone(), values)?).await?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{capture, context, drain};
    use model::core::{data_type::DataType, value::Value};
    use serde_json::json;

    fn input() -> Row {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Integer),
            Field::new("name", DataType::String),
            Field::new("secret", DataType::String),
        ])
        .unwrap()
        .into_ref();
        Row::new(
            schema,
            vec![Value::Int(1), Value::String("a".into()), Value::String("x".into())],
        )
        .unwrap()
    }

    async fn apply(config: serde_json::Value) -> Result<Row, StepError> {
        let def = StepDefinition::new("sel", "select-values").config(config);
        let mut step = SelectValues::from_definition(&def)?;
        step.init(&context(&def)).await?;
        let (mut io, sets) = capture("sel", &["out"]);
        step.process_row(Some(&input()), &mut io).await?;
        Ok(drain(&sets[0]).remove(0))
    }

    #[tokio::test]
    async fn selects_and_renames_in_order() {
        let row = apply(json!({
            "select": [{ "name": "name", "rename": "label" }, { "name": "id" }]
        }))
        .await
        .unwrap();
        assert_eq!(row.schema().names().collect::<Vec<_>>(), vec!["label", "id"]);
        assert_eq!(row.values(), &[Value::String("a".into()), Value::Int(1)]);
    }

    #[tokio::test]
    async fn removes_fields() {
        let row = apply(json!({ "remove": ["secret"] })).await.unwrap();
        assert_eq!(row.schema().names().collect::<Vec<_>>(), vec!["id", "name"]);
    }

    #[tokio::test]
    async fn unknown_field_fails() {
        assert!(apply(json!({ "remove": ["nope"] })).await.is_err());
    }
}
