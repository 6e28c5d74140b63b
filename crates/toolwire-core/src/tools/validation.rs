//! JSON-Schema validation of tool arguments before execution.

use jsonschema::{JSONSchema, ValidationError};
use serde_json::Value;
use std::collections::HashMap;

use crate::core_types::ToolSpec;

#[derive(Debug, Default)]
pub struct ArgumentValidator {
    schemas: HashMap<String, JSONSchema>,
}

impl ArgumentValidator {
    /// Compiles the parameter schema of every tool that declares one. A schema
    /// that fails to compile disables validation for that tool only.
    pub fn new(tools: &[ToolSpec]) -> Self {
        let mut schemas = HashMap::new();
        for tool in tools {
            if !tool.parameters.is_object() {
                continue;
            }
            match JSONSchema::compile(&tool.parameters) {
                Ok(compiled) => {
                    schemas.insert(tool.name.clone(), compiled);
                }
                Err(e) => log::warn!(
                    "Parameter schema for tool '{}' is invalid, arguments will not be validated: {}",
                    tool.name,
                    e
                ),
            }
        }
        Self { schemas }
    }

    pub fn validate(&self, tool_name: &str, arguments: &Value) -> Result<(), String> {
        let Some(schema) = self.schemas.get(tool_name) else {
            return Ok(());
        };

        if let Err(errors) = schema.validate(arguments) {
            let messages = format_validation_errors(errors);
            return Err(format!(
                "Invalid arguments for '{}': {}",
                tool_name,
                messages.join("; ")
            ));
        }
        Ok(())
    }

    pub fn covers(&self, tool_name: &str) -> bool {
        self.schemas.contains_key(tool_name)
    }
}

fn format_validation_errors<'a>(errors: impl Iterator<Item = ValidationError<'a>>) -> Vec<String> {
    errors
        .map(|error| {
            let path = error.instance_path.to_string();
            let path = if path.is_empty() { "root".to_string() } else { path };
            format!("at '{}': {}", path, error)
        })
        .collect()
}
