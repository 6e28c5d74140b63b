//! Tool execution collaborator
//!
//! The turn loop only sees the `ToolExecutor` seam: give it an invocation, get
//! back an outcome. Business-logic failures come back as an outcome carrying an
//! error; an `Err` means something more fundamental went wrong (unknown tool,
//! broken executor) and the loop converts it into an error outcome itself.
//! `ToolRegistry` is the stock executor built from individual `Tool`s.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core_types::{ToolFailureKind, ToolInvocation, ToolOutcome, ToolSpec};
use crate::errors::AgentError;

pub mod calculator;
pub mod validation;

pub use calculator::CalculatorTool;
pub use validation::ArgumentValidator;

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools this executor can run, in the order they are offered to the model.
    fn tool_specs(&self) -> Vec<ToolSpec>;

    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, AgentError>;
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn execute(&self, arguments: Value) -> Result<Value, AgentError>;
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            log::warn!("Tool '{}' registered twice; the later registration wins", name);
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register_tool(tool);
        self
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Specs sorted by name so requests are stable across runs.
    pub fn list_tools(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|tool| tool.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn tool_specs(&self) -> Vec<ToolSpec> {
        self.list_tools()
    }

    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, AgentError> {
        let tool = self
            .get_tool(&invocation.tool_name)
            .ok_or_else(|| AgentError::ToolNotFound(invocation.tool_name.clone()))?;

        match tool.execute(invocation.arguments_value()).await {
            Ok(value) => Ok(ToolOutcome::success(&invocation.call_id, value)),
            Err(AgentError::ToolError { message, .. }) => Ok(ToolOutcome::failure(
                &invocation.call_id,
                ToolFailureKind::Execution,
                message,
            )),
            Err(e) => Err(e),
        }
    }
}

pub struct ToolFactory;

impl ToolFactory {
    pub fn create_calculator() -> Arc<dyn Tool> {
        Arc::new(CalculatorTool::new())
    }

    pub fn create_default_registry() -> ToolRegistry {
        ToolRegistry::new().with_tool(Self::create_calculator())
    }
}
