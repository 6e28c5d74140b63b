//! Capability registry mapping model identifiers to tool-calling modes
//!
//! Every supported provider speaks one of a small closed set of tool-calling
//! dialects. The registry answers, once per agent construction, which dialect a
//! model uses and what limits apply to it. It is an immutable value built up
//! front and handed to the agent, so two agents (or two tests) can run with
//! entirely different tables in the same process.
//!
//! Lookup order is exact model name, then the longest matching prefix, then the
//! configured default. All comparisons are case-insensitive.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::AgentError;

pub const DEFAULT_MAX_TOOLS_PER_REQUEST: usize = 128;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallingMode {
    /// OpenAI-style `tool_calls` array on the assistant message.
    NativeOpenAi,
    /// Anthropic-style `tool_use` content blocks.
    NativeAnthropic,
    /// Gemini-style `functionCall` parts.
    NativeGemini,
    /// Ollama `/api/chat` `message.tool_calls`, falling back to labeled calls
    /// in the text for models the server cannot tool-call with.
    NativeOllama,
    /// The whole completion is expected to be one JSON object describing a call.
    JsonEmit,
    /// Free text; calls are recovered by scanning for JSON or `name(a=1)` syntax.
    TextPattern,
    /// Tools are never extracted.
    None,
}

impl ToolCallingMode {
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            ToolCallingMode::NativeOpenAi
                | ToolCallingMode::NativeAnthropic
                | ToolCallingMode::NativeGemini
                | ToolCallingMode::NativeOllama
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallingMode::NativeOpenAi => "native_openai",
            ToolCallingMode::NativeAnthropic => "native_anthropic",
            ToolCallingMode::NativeGemini => "native_gemini",
            ToolCallingMode::NativeOllama => "native_ollama",
            ToolCallingMode::JsonEmit => "json_emit",
            ToolCallingMode::TextPattern => "text_pattern",
            ToolCallingMode::None => "none",
        }
    }
}

impl std::fmt::Display for ToolCallingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityLimits {
    #[serde(default = "default_max_tools")]
    pub max_tools_per_request: usize,
    #[serde(default)]
    pub parallel_calls: bool,
}

fn default_max_tools() -> usize {
    DEFAULT_MAX_TOOLS_PER_REQUEST
}

impl Default for CapabilityLimits {
    fn default() -> Self {
        Self {
            max_tools_per_request: DEFAULT_MAX_TOOLS_PER_REQUEST,
            parallel_calls: false,
        }
    }
}

/// A mode together with its limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capability {
    pub mode: ToolCallingMode,
    #[serde(flatten)]
    pub limits: CapabilityLimits,
}

impl Capability {
    pub fn new(mode: ToolCallingMode) -> Self {
        Self {
            mode,
            limits: CapabilityLimits::default(),
        }
    }

    pub fn with_parallel_calls(mut self, parallel: bool) -> Self {
        self.limits.parallel_calls = parallel;
        self
    }

    pub fn with_max_tools(mut self, max: usize) -> Self {
        self.limits.max_tools_per_request = max;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    exact: HashMap<String, Capability>,
    prefixes: Vec<(String, Capability)>,
    default: Option<Capability>,
}

impl CapabilityRegistry {
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    /// Table derived from the naming conventions of the common providers, with
    /// `TextPattern` as the catch-all.
    pub fn with_builtin_defaults() -> Self {
        builtin_builder().build()
    }

    pub fn resolve(&self, model_id: &str) -> Result<Capability, AgentError> {
        let key = model_id.trim().to_lowercase();

        if let Some(capability) = self.exact.get(&key) {
            log::debug!("Resolved model '{}' by exact match: {}", model_id, capability.mode);
            return Ok(*capability);
        }

        // Prefixes are kept sorted longest-first, so the first hit is the most specific.
        if let Some((prefix, capability)) = self
            .prefixes
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
        {
            log::debug!(
                "Resolved model '{}' by prefix '{}': {}",
                model_id,
                prefix,
                capability.mode
            );
            return Ok(*capability);
        }

        match self.default {
            Some(capability) => {
                log::debug!("Resolved model '{}' to default mode {}", model_id, capability.mode);
                Ok(capability)
            }
            None => Err(AgentError::UnknownProviderMode(model_id.to_string())),
        }
    }

    pub fn default_capability(&self) -> Option<Capability> {
        self.default
    }

    pub fn exact_count(&self) -> usize {
        self.exact.len()
    }

    pub fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistryBuilder {
    exact: HashMap<String, Capability>,
    prefixes: HashMap<String, Capability>,
    default: Option<Capability>,
}

impl CapabilityRegistryBuilder {
    /// Starts from the built-in table so callers only add overrides.
    pub fn from_builtin() -> Self {
        builtin_builder()
    }

    pub fn exact(mut self, model: &str, capability: Capability) -> Self {
        self.exact.insert(model.trim().to_lowercase(), capability);
        self
    }

    pub fn prefix(mut self, prefix: &str, capability: Capability) -> Self {
        self.prefixes.insert(prefix.trim().to_lowercase(), capability);
        self
    }

    pub fn default_capability(mut self, capability: Capability) -> Self {
        self.default = Some(capability);
        self
    }

    pub fn without_default(mut self) -> Self {
        self.default = None;
        self
    }

    pub fn build(self) -> CapabilityRegistry {
        let mut prefixes: Vec<(String, Capability)> = self
            .prefixes
            .into_iter()
            .filter(|(prefix, _)| !prefix.is_empty())
            .collect();
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        CapabilityRegistry {
            exact: self.exact,
            prefixes,
            default: self.default,
        }
    }
}

fn builtin_builder() -> CapabilityRegistryBuilder {
    let openai = Capability::new(ToolCallingMode::NativeOpenAi);
    let anthropic = Capability::new(ToolCallingMode::NativeAnthropic).with_parallel_calls(true);
    let gemini = Capability::new(ToolCallingMode::NativeGemini).with_parallel_calls(true);
    let ollama = Capability::new(ToolCallingMode::NativeOllama);
    let text = Capability::new(ToolCallingMode::TextPattern);

    CapabilityRegistryBuilder::default()
        .prefix("gpt-", openai)
        .prefix("gpt-4", openai.with_parallel_calls(true))
        .prefix("o1", openai)
        .prefix("o3", openai)
        .prefix("o4", openai)
        .prefix("openai/", openai)
        .prefix("groq/", openai)
        .prefix("claude", anthropic)
        .prefix("anthropic/", anthropic)
        .prefix("gemini", gemini)
        .prefix("google/", gemini)
        .prefix("ollama/", ollama)
        .prefix("llama", text)
        .prefix("qwen", text)
        .prefix("mistral", text)
        .prefix("phi", text)
        .prefix("gemma", text)
        .exact("text-davinci-003", Capability::new(ToolCallingMode::None))
        .default_capability(text)
}
