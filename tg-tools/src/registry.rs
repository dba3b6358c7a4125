//! Name → tool lookup with compiled input schemas.

use crate::error::{Result, ToolError};
use crate::traits::{Tool, to_llm_tool_def};
use jsonschema::Validator;
use std::collections::BTreeMap;
use std::sync::Arc;

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: Validator,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its input schema. Re-registering a name replaces it.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let spec = tool.spec();
        tg_llm::validate_tool_name(&spec.name)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let validator = jsonschema::validator_for(&spec.input_schema).map_err(|e| {
            ToolError::InvalidArguments(format!("invalid schema for {}: {e}", spec.name))
        })?;
        tracing::debug!(tool_name = %spec.name, mutating = spec.is_mutating, "tool registered");
        self.tools
            .insert(spec.name, RegisteredTool { tool, validator });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.tool.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `input` against the named tool's schema.
    pub fn validate(&self, name: &str, input: &serde_json::Value) -> Result<()> {
        let registered = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        if registered.validator.is_valid(input) {
            return Ok(());
        }
        let messages = registered
            .validator
            .iter_errors(input)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        Err(ToolError::InvalidArguments(messages.join("; ")))
    }

    pub fn definitions(&self) -> Vec<tg_llm::ToolDefinition> {
        self.tools
            .values()
            .map(|t| to_llm_tool_def(t.tool.as_ref()))
            .collect()
    }
}
