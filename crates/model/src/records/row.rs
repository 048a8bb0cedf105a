use crate::{
    core::{schema::SchemaRef, value::Value},
    error::ModelError,
};

/// A fixed-length row aligned positionally with its schema.
///
/// Rows are never mutated once built; a step that needs a different row
/// builds a new one (see [`Row::with_values`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: SchemaRef,
    values: Vec<Value>,
}

impl Row {
    pub fn new(schema: SchemaRef, values: Vec<Value>) -> Result<Self, ModelError> {
        if schema.len() != values.len() {
            return Err(ModelError::ArityMismatch {
                expected: schema.len(),
                actual: values.len(),
            });
        }
        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Copy of this row under another schema with different values.
    pub fn with_values(&self, schema: SchemaRef, values: Vec<Value>) -> Result<Self, ModelError> {
        Self::new(schema, values)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        data_type::DataType,
        schema::{Field, Schema},
    };

    #[test]
    fn enforces_arity() {
        let schema = Schema::new(vec![Field::new("id", DataType::Integer)])
            .unwrap()
            .into_ref();
        let err = Row::new(schema.clone(), vec![]).unwrap_err();
        assert_eq!(
            err,
            ModelError::ArityMismatch {
                expected: 1,
                actual: 0
            }
        );

        let row = Row::new(schema, vec![Value::Int(1)]).unwrap();
        assert_eq!(row.get_by_name("id"), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("missing"), None);
    }
}
