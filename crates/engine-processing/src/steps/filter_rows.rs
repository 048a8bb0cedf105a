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
        schema::{Schema, SchemaRef},
        value::Value,
    },
    graph::definition::StepDefinition,
    records::row::Row,
};
use serde::Deserialize;
use std::{cmp::Ordering, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
    NotNull,
    Contains,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterRowsConfig {
    pub conditions: Vec<Condition>,
    /// Match when any condition holds instead of all of them.
    #[serde(default)]
    pub any: bool,
    #[serde(default)]
    pub send_true_to: Option<String>,
    #[serde(default)]
    pub send_false_to: Option<String>,
}

struct Compiled {
    index: usize,
    op: Operator,
    literal: Value,
}

/// Splits the stream on a condition.
///
/// Matching rows go to `send_true_to`, or to every hop when unset.
/// Other rows go to `send_false_to`, or are dropped when unset.
pub struct FilterRows {
    config: FilterRowsConfig,
    compiled: Option<(SchemaRef, Vec<Compiled>)>,
}

impl FilterRows {
    pub fn from_definition(definition: &StepDefinition) -> Result<Self, StepError> {
        let config: FilterRowsConfig = parse_config(definition)?;
        if config.conditions.is_empty() {
            return Err(StepError::Config(format!(
                "step '{}': at least one condition is required",
                definition.name
            )));
        }
        Ok(Self {
            config,
            compiled: None,
        })
    }

    fn compile(&self, schema: &Schema) -> Result<Vec<Compiled>, StepError> {
        self.config
            .conditions
            .iter()
            .map(|c| -> Result<Compiled, StepError> {
                let index = schema.require_index(&c.field)?;
                let data_type = schema.fields()[index].data_type;
                let literal = match c.op {
                    Operator::IsNull | Operator::NotNull => Value::Null,
                    Operator::Contains => Value::from_json(&c.value, DataType::String)?,
                    _ => Value::from_json(&c.value, data_type)?,
                };
                Ok(Compiled {
                    index,
                    op: c.op,
                    literal,
                })
            })
            .collect()
    }

    fn matches(&mut self, row: &Row) -> Result<bool, StepError> {
        let fresh = match &self.compiled {
            Some((schema, _)) => !Arc::ptr_eq(schema, row.schema()),
            None => true,
        };
        if fresh {
            let compiled = self.compile(row.schema())?;
            self.compiled = Some((row.schema().clone(), compiled));
        }
        let Some((_, compiled)) = &self.compiled else {
            return Ok(false);
        };

        let mut results = compiled
            .iter()
            .map(|c| evaluate(c, row.get(c.index).unwrap_or(&Value::Null)));
        Ok(if self.config.any {
            results.any(|hit| hit)
        } else {
            results.all(|hit| hit)
        })
    }
}

fn evaluate(condition: &Compiled, value: &Value) -> bool {
    let ordering = || value.compare(&condition.literal);
    match condition.op {
        Operator::IsNull => value.is_null(),
        Operator::NotNull => !value.is_null(),
        Operator::Contains => match (value.as_string(), condition.literal.as_string()) {
            (Some(haystack), Some(needle)) => haystack.contains(&needle),
            _ => false,
        },
        _ if value.is_null() => false,
        Operator::Eq => ordering() == Some(Ordering::Equal),
        Operator::Ne => ordering() != Some(Ordering::Equal),
        Operator::Lt => ordering() == Some(Ordering::Less),
        Operator::Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        Operator::Gt => ordering() == Some(Ordering::Greater),
        Operator::Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
    }
}

#[async_trait]
impl Step for FilterRows {
    async fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    async fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo) -> Result<Flow, StepError> {
        let Some(row) = row else {
            return Ok(Flow::EndOfInput);
        };

        if self.matches(row)? {
            match &self.config.send_true_to {
                Some(target) => io.emit_to(target, row.clone()).await?,
                None => io.emit(row.clone()).await?,
            }
        } else if let Some(target) = &self.config.send_false_to {
            io.emit_to(target, row.clone()).await?;
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{capture, context, drain};
    use model::core::schema::Field;
    use serde_json::json;

    fn rows() -> Vec<Row> {
        let schema = Schema::new(vec![
            Field::new("amount", DataType::Integer),
            Field::new("city", DataType::String),
        ])
        .unwrap()
        .into_ref();
        [(10, "Oslo"), (250, "Bergen"), (99, "Oslo")]
            .into_iter()
            .map(|(a, c)| Row::new(schema.clone(), vec![Value::Int(a), Value::String(c.into())]).unwrap())
            .chain(std::iter::once(
                Row::new(schema.clone(), vec![Value::Null, Value::Null]).unwrap(),
            ))
            .collect()
    }

    async fn feed(step: &mut FilterRows, io: &mut StepIo) {
        for row in rows() {
            step.process_row(Some(&row), io).await.unwrap();
        }
    }

    #[tokio::test]
    async fn routes_true_and_false_rows() {
        let def = StepDefinition::new("split", "filter-rows").config(json!({
            "conditions": [{ "field": "amount", "op": "ge", "value": "100" }],
            "send_true_to": "big",
            "send_false_to": "small"
        }));
        let mut step = FilterRows::from_definition(&def).unwrap();
        step.init(&context(&def)).await.unwrap();
        let (mut io, sets) = capture("split", &["big", "small"]);
        feed(&mut step, &mut io).await;

        assert_eq!(drain(&sets[0]).len(), 1);
        assert_eq!(drain(&sets[1]).len(), 3);
    }

    #[tokio::test]
    async fn any_mode_without_targets_drops_misses() {
        let def = StepDefinition::new("split", "filter-rows").config(json!({
            "conditions": [
                { "field": "city", "op": "contains", "value": "erg" },
                { "field": "amount", "op": "is-null" }
            ],
            "any": true
        }));
        let mut step = FilterRows::from_definition(&def).unwrap();
        let (mut io, sets) = capture("split", &["out"]);
        feed(&mut step, &mut io).await;
        assert_eq!(drain(&sets[0]).len(), 2);
    }

    #[tokio::test]
    async fn unknown_field_is_an_error() {
        let def = StepDefinition::new("split", "filter-rows")
            .config(json!({ "conditions": [{ "field": "nope", "op": "not-null" }] }));
        let mut step = FilterRows::from_definition(&def).unwrap();
        let (mut io, _sets) = capture("split", &["out"]);
        let row = rows().remove(0);
        assert!(step.process_row(Some(&row), &mut io).await.is_err());
    }
}
