use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::capabilities::{
    Capability, CapabilityRegistry, CapabilityRegistryBuilder, ToolCallingMode,
};
use crate::errors::AgentError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolwireConfig {
    #[serde(default)]
    pub agent: AgentSection,
    pub transport: TransportConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_loop_ceiling")]
    pub loop_ceiling: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub parallel_tool_execution: bool,
    #[serde(default = "default_true")]
    pub validate_arguments: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            loop_ceiling: default_loop_ceiling(),
            system_prompt: None,
            parallel_tool_execution: false,
            validate_arguments: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Required by the Anthropic messages API; ignored elsewhere.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Overrides layered on top of (or replacing) the built-in capability table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    #[serde(default = "default_true")]
    pub use_builtin: bool,
    #[serde(default)]
    pub default: Option<ToolCallingMode>,
    #[serde(default)]
    pub exact: HashMap<String, Capability>,
    #[serde(default)]
    pub prefixes: HashMap<String, Capability>,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            use_builtin: true,
            default: None,
            exact: HashMap::new(),
            prefixes: HashMap::new(),
        }
    }
}

impl CapabilitiesConfig {
    pub fn to_registry(&self) -> CapabilityRegistry {
        let mut builder = if self.use_builtin {
            CapabilityRegistryBuilder::from_builtin()
        } else {
            CapabilityRegistry::builder()
        };

        for (prefix, capability) in &self.prefixes {
            builder = builder.prefix(prefix, *capability);
        }
        for (model, capability) in &self.exact {
            builder = builder.exact(model, *capability);
        }
        if let Some(mode) = self.default {
            builder = builder.default_capability(Capability::new(mode));
        }

        builder.build()
    }
}

impl ToolwireConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.agent.max_turns == 0 {
            return Err(AgentError::ValidationError(
                "agent.max_turns must be at least 1".to_string(),
            ));
        }
        if self.agent.loop_ceiling == 0 {
            return Err(AgentError::ValidationError(
                "agent.loop_ceiling must be at least 1".to_string(),
            ));
        }
        if self.transport.model.trim().is_empty() {
            return Err(AgentError::ValidationError(
                "transport.model cannot be empty".to_string(),
            ));
        }
        if self.transport.base_url.trim().is_empty() {
            return Err(AgentError::ValidationError(
                "transport.base_url cannot be empty".to_string(),
            ));
        }
        if !self.transport.base_url.starts_with("http://")
            && !self.transport.base_url.starts_with("https://")
        {
            return Err(AgentError::ValidationError(format!(
                "transport.base_url must be an http(s) URL, got '{}'",
                self.transport.base_url
            )));
        }
        if self.transport.timeout_secs == 0 {
            return Err(AgentError::ValidationError(
                "transport.timeout_secs must be at least 1".to_string(),
            ));
        }
        for (key, capability) in self
            .capabilities
            .exact
            .iter()
            .chain(self.capabilities.prefixes.iter())
        {
            if key.trim().is_empty() {
                return Err(AgentError::ValidationError(
                    "capability keys cannot be empty".to_string(),
                ));
            }
            if capability.limits.max_tools_per_request == 0 {
                return Err(AgentError::ValidationError(format!(
                    "capability '{}' must allow at least one tool per request",
                    key
                )));
            }
        }
        Ok(())
    }
}

fn default_max_turns() -> usize {
    10
}

fn default_loop_ceiling() -> usize {
    3
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_true() -> bool {
    true
}
