use crate::{
    error::StepError,
    step::Step,
    steps::{
        add_constants::AddConstants, convert::Convert, dummy::Dummy, filter_rows::FilterRows,
        generate_rows::GenerateRows, select_values::SelectValues, stream_lookup::StreamLookup,
        text_file_input::TextFileInput, text_file_output::TextFileOutput,
    },
};
use model::graph::definition::StepDefinition;
use std::{collections::HashMap, fmt, sync::Arc};

pub type StepFactory =
    Arc<dyn Fn(&StepDefinition) -> Result<Box<dyn Step>, StepError> + Send + Sync>;

/// Maps step type ids to constructors. Built once per process and handed
/// to the engine context.
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: HashMap<String, StepFactory>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("generate-rows", |def| Ok(Box::new(GenerateRows::from_definition(def)?)));
        registry.register("text-file-input", |def| Ok(Box::new(TextFileInput::from_definition(def)?)));
        registry.register("text-file-output", |def| {
            Ok(Box::new(TextFileOutput::from_definition(def)?))
        });
        registry.register("dummy", |_| Ok(Box::new(Dummy)));
        registry.register("filter-rows", |def| Ok(Box::new(FilterRows::from_definition(def)?)));
        registry.register("add-constants", |def| Ok(Box::new(AddConstants::from_definition(def)?)));
        registry.register("select-values", |def| Ok(Box::new(SelectValues::from_definition(def)?)));
        registry.register("convert", |def| Ok(Box::new(Convert::from_definition(def)?)));
        registry.register("stream-lookup", |def| Ok(Box::new(StreamLookup::from_definition(def)?)));
        registry
    }

    /// Registers or replaces the constructor for `step_type`.
    pub fn register<F>(&mut self, step_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&StepDefinition) -> Result<Box<dyn Step>, StepError> + Send + Sync + 'static,
    {
        self.factories.insert(step_type.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.factories.contains_key(step_type)
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Builds a fresh step instance; called once per copy.
    pub fn create(&self, definition: &StepDefinition) -> Result<Box<dyn Step>, StepError> {
        let factory = self
            .factories
            .get(&definition.step_type)
            .ok_or_else(|| StepError::UnknownType(definition.step_type.clone()))?;
        factory(definition)
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn creates_builtins_and_rejects_unknown_types() {
        let registry = StepRegistry::with_builtins();
        assert!(registry.contains("text-file-input"));
        assert!(registry.create(&StepDefinition::new("d", "dummy")).is_ok());

        let bad = StepDefinition::new("x", "mail-sender");
        assert!(matches!(registry.create(&bad), Err(StepError::UnknownType(t)) if t == "mail-sender"));
    }

    #[test]
    fn invalid_config_is_reported_at_creation() {
        let registry = StepRegistry::with_builtins();
        let def = StepDefinition::new("f", "filter-rows").config(json!({ "conditions": 42 }));
        assert!(matches!(registry.create(&def), Err(StepError::Config(_))));
    }
}
