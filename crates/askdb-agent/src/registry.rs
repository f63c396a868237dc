//! Name-keyed tool registry

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::tool::{BoxedTool, ToolError, ToolOutput};

/// The tools available to one agent, in registration order.
///
/// Names are unique. Lookup is exact and case-sensitive.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<BoxedTool>,
    /// Cached compiled JSON schema validators keyed by tool name
    validators: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is taken.
    pub fn register(&mut self, tool: BoxedTool) -> Result<()> {
        let name = tool.name().to_string();
        if self.get(&name).is_some() {
            return Err(Error::DuplicateTool(name));
        }

        if let Some(schema) = tool.input_schema() {
            match jsonschema::validator_for(&schema) {
                Ok(validator) => {
                    self.validators.insert(name.clone(), Arc::new(validator));
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid input schema for tool '{}', skipping validation: {}",
                        name,
                        e
                    );
                }
            }
        }

        tracing::debug!(tool = %name, "registered tool");
        self.tools.push(tool);
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, tool: BoxedTool) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    /// Exact-name lookup
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn tools(&self) -> &[BoxedTool] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a registered tool.
    ///
    /// Structured input is checked against the tool's schema before the tool
    /// runs. Input that is not a JSON object is passed through untouched so
    /// tools can accept legacy free-text forms.
    pub async fn invoke(&self, name: &str, input: &str) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::failed(format!("{} is not a valid tool", name)))?;

        if let Some(validator) = self.validators.get(name) {
            if input.trim_start().starts_with('{') {
                let args: serde_json::Value = serde_json::from_str(input.trim())
                    .map_err(|e| ToolError::invalid_input(format!("malformed JSON: {}", e)))?;
                if let Some(err) = validate_with_validator(&args, validator) {
                    return Err(ToolError::InvalidInput(err));
                }
            }
        }

        tool.invoke(input).await
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool input validation failed:\n{}",
            errors.join("\n")
        ))
    }
}
