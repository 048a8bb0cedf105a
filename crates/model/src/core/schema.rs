use crate::{core::data_type::DataType, error::ModelError};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};

/// Shared handle to an immutable schema. Every row of one shape points at
/// the same allocation.
pub type SchemaRef = Arc<Schema>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: None,
            precision: None,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Ordered field descriptors. Field names are unique; position defines
/// alignment with row values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self, ModelError> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ModelError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn into_ref(self) -> SchemaRef {
        Arc::new(self)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn require_index(&self, name: &str) -> Result<usize, ModelError> {
        self.index_of(name)
            .ok_or_else(|| ModelError::UnknownField(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// A new schema with `extra` appended after the existing fields.
    pub fn extend(&self, extra: impl IntoIterator<Item = Field>) -> Result<Self, ModelError> {
        let mut fields = self.fields.clone();
        fields.extend(extra);
        Self::new(fields)
    }
}
