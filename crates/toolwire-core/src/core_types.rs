//! Core type definitions shared by extractors, encoders, memory and the loop
//!
//! These types are the normalized vocabulary every provider format is folded
//! into. A provider response comes in as a `RawResponse`, leaves the extractor
//! as zero or more `ToolInvocation`s, comes back from the executor as
//! `ToolOutcome`s, and is finally written to history as `ConversationMessage`s.
//! Nothing in here knows about a specific wire protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capabilities::ToolCallingMode;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A callable tool offered to the model. Owned by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-Schema-like description of the argument object.
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Where in the raw response an invocation was found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawOrigin {
    /// JSON path into a structured response, e.g. `choices[0].message.tool_calls[1]`.
    Path { path: String },
    /// Byte range into the response text.
    TextSpan { start: usize, end: usize },
}

impl RawOrigin {
    pub fn path(path: impl Into<String>) -> Self {
        RawOrigin::Path { path: path.into() }
    }
}

/// A normalized request to run one tool. Never mutated after extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub raw_origin: RawOrigin,
}

impl ToolInvocation {
    /// Builds an invocation, synthesizing a call id when the provider gave none.
    pub fn new(
        call_id: Option<String>,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
        raw_origin: RawOrigin,
    ) -> Self {
        let call_id = call_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(synthesize_call_id);
        Self {
            call_id,
            tool_name: tool_name.into(),
            arguments,
            raw_origin,
        }
    }

    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

pub fn synthesize_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// The tool ran and reported a business-logic failure.
    Execution,
    /// No tool with that name is registered.
    NotFound,
    /// Arguments did not satisfy the tool's parameter schema.
    InvalidArguments,
    /// The call was intercepted by loop detection and never executed.
    LoopDetected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
}

/// Result (or error) of executing one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

impl ToolOutcome {
    pub fn success(call_id: impl Into<String>, value: Value) -> Self {
        Self {
            call_id: call_id.into(),
            value,
            error: None,
        }
    }

    pub fn failure(call_id: impl Into<String>, kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            value: Value::Null,
            error: Some(ToolFailure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Text form of the value as it is shown to the model.
    pub fn payload_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    /// An assistant turn that requested tools.
    ToolCalls {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        calls: Vec<ToolInvocation>,
    },
    /// A structured tool result for providers with a correlation slot.
    ToolResult {
        call_id: String,
        tool_name: String,
        payload: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_call_id: Option<String>,
}

impl ConversationMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text { text: text.into() },
            originating_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    pub fn assistant_tool_calls(text: Option<String>, calls: Vec<ToolInvocation>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCalls { text, calls },
            originating_call_id: None,
        }
    }

    /// Plain text view of the message, whatever its structure.
    pub fn text_content(&self) -> String {
        match &self.content {
            MessageContent::Text { text } => text.clone(),
            MessageContent::ToolCalls { text, .. } => text.clone().unwrap_or_default(),
            MessageContent::ToolResult { payload, .. } => payload.clone(),
        }
    }
}

/// Provider-shaped output of one model call, tagged with the mode it was
/// requested under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawResponse {
    pub mode: ToolCallingMode,
    pub body: Value,
}

impl RawResponse {
    pub fn new(mode: ToolCallingMode, body: Value) -> Self {
        Self { mode, body }
    }

    /// Wraps a bare completion string, as returned by text-only models.
    pub fn from_text(mode: ToolCallingMode, text: impl Into<String>) -> Self {
        Self {
            mode,
            body: Value::String(text.into()),
        }
    }
}
