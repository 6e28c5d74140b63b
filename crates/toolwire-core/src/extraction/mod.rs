//! Tool-call extraction from raw provider responses.
//!
//! One extractor exists per `ToolCallingMode`, selected through the `extract`
//! dispatch function. Extractors are pure: the same raw response always yields
//! the same invocations (including synthesized call ids, which are derived from
//! the response content rather than drawn at random). Malformed input is never
//! an error. It produces fewer invocations plus diagnostics on the returned
//! `Extraction` envelope, because "the model did not call a tool" is the normal
//! way a conversation ends.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::capabilities::{CapabilityLimits, ToolCallingMode};
use crate::core_types::{RawResponse, ToolInvocation, ToolSpec};

pub mod native;
pub mod text;

/// Why part of a response could not be turned into an invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionDiagnostic {
    /// Arguments could not be parsed; the invocation was kept with `{}`.
    MalformedArguments { tool_name: String, detail: String },
    /// An entry had no usable tool name and was skipped.
    MissingToolName { origin: String },
    /// A text-recovered call named a tool that was not offered.
    UnknownTool { tool_name: String },
    /// Invocations beyond the provider limit were dropped.
    Truncated { limit: usize, dropped: Vec<String> },
    /// A JSON object was found but did not describe a call.
    NotACall { detail: String },
    /// Two calls in one response shared an id; the later one was renamed.
    DuplicateCallId { call_id: String, replacement: String },
}

impl std::fmt::Display for ExtractionDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionDiagnostic::MalformedArguments { tool_name, detail } => {
                write!(f, "malformed arguments for '{}': {}", tool_name, detail)
            }
            ExtractionDiagnostic::MissingToolName { origin } => {
                write!(f, "tool call without a name at {}", origin)
            }
            ExtractionDiagnostic::UnknownTool { tool_name } => {
                write!(f, "call to unknown tool '{}' ignored", tool_name)
            }
            ExtractionDiagnostic::Truncated { limit, dropped } => {
                write!(f, "{} call(s) beyond limit {} dropped: {}", dropped.len(), limit, dropped.join(", "))
            }
            ExtractionDiagnostic::NotACall { detail } => write!(f, "not a tool call: {}", detail),
            ExtractionDiagnostic::DuplicateCallId { call_id, replacement } => {
                write!(f, "duplicate call id '{}' replaced with '{}'", call_id, replacement)
            }
        }
    }
}

/// Result envelope of one extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Extraction {
    pub invocations: Vec<ToolInvocation>,
    pub diagnostics: Vec<ExtractionDiagnostic>,
    /// Natural-language part of the response, if any.
    pub final_text: Option<String>,
}

impl Extraction {
    pub fn has_invocations(&self) -> bool {
        !self.invocations.is_empty()
    }
}

/// Extracts invocations using the extractor for `mode`, then applies the
/// provider's per-request limit.
pub fn extract(
    mode: ToolCallingMode,
    raw: &RawResponse,
    requested_tools: &[ToolSpec],
    limits: &CapabilityLimits,
) -> Extraction {
    let mut extraction = match mode {
        ToolCallingMode::NativeOpenAi => native::extract_openai(raw),
        ToolCallingMode::NativeAnthropic => native::extract_anthropic(raw),
        ToolCallingMode::NativeGemini => native::extract_gemini(raw),
        ToolCallingMode::NativeOllama => native::extract_ollama(raw, requested_tools),
        ToolCallingMode::JsonEmit => text::extract_json_emit(raw, requested_tools),
        ToolCallingMode::TextPattern => text::extract_text_pattern(raw, requested_tools),
        ToolCallingMode::None => Extraction {
            invocations: Vec::new(),
            diagnostics: Vec::new(),
            final_text: response_text(raw),
        },
    };

    dedupe_call_ids(&mut extraction, raw);
    enforce_limit(&mut extraction, limits.max_tools_per_request);

    for diagnostic in &extraction.diagnostics {
        log::warn!("Extraction ({}): {}", mode, diagnostic);
    }
    log::debug!(
        "Extracted {} invocation(s) in mode {}",
        extraction.invocations.len(),
        mode
    );

    extraction
}

/// Guesses the dialect of a response body from its shape alone, for when no
/// model identifier is at hand. Anything unrecognized, plain text included,
/// is scanned as text.
pub fn detect_mode(body: &Value) -> ToolCallingMode {
    let Value::Object(map) = body else {
        return ToolCallingMode::TextPattern;
    };

    if body.pointer("/choices/0/message").is_some() || map.contains_key("tool_calls") {
        ToolCallingMode::NativeOpenAi
    } else if body.pointer("/candidates/0/content").is_some() {
        ToolCallingMode::NativeGemini
    } else if map
        .get("content")
        .and_then(Value::as_array)
        .is_some_and(|blocks| blocks.iter().any(|block| block.get("type").is_some()))
    {
        ToolCallingMode::NativeAnthropic
    } else if map.get("message").is_some_and(Value::is_object) {
        ToolCallingMode::NativeOllama
    } else {
        ToolCallingMode::TextPattern
    }
}

/// Makes call ids unique within one response. The first holder of an id
/// keeps it.
fn dedupe_call_ids(extraction: &mut Extraction, raw: &RawResponse) {
    let mut seen: HashSet<String> = HashSet::new();
    for (index, invocation) in extraction.invocations.iter_mut().enumerate() {
        if seen.insert(invocation.call_id.clone()) {
            continue;
        }
        let mut replacement = derived_call_id(raw, index);
        if seen.contains(&replacement) {
            replacement = format!("{}_{}", invocation.call_id, index);
        }
        extraction.diagnostics.push(ExtractionDiagnostic::DuplicateCallId {
            call_id: std::mem::replace(&mut invocation.call_id, replacement.clone()),
            replacement: replacement.clone(),
        });
        seen.insert(replacement);
    }
}

fn enforce_limit(extraction: &mut Extraction, limit: usize) {
    if extraction.invocations.len() <= limit {
        return;
    }
    let dropped: Vec<String> = extraction
        .invocations
        .drain(limit..)
        .map(|invocation| invocation.tool_name)
        .collect();
    extraction
        .diagnostics
        .push(ExtractionDiagnostic::Truncated { limit, dropped });
}

/// Pulls the natural-language text out of any of the supported response shapes.
pub fn response_text(raw: &RawResponse) -> Option<String> {
    let body = &raw.body;

    let text = match body {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => {
            if let Some(content) = body.pointer("/choices/0/message/content") {
                content_to_text(content)
            } else if let Some(parts) = body.pointer("/candidates/0/content/parts") {
                content_to_text(parts)
            } else if let Some(content) = body.pointer("/message/content") {
                content_to_text(content)
            } else if let Some(content) = body.get("content") {
                content_to_text(content)
            } else {
                body.get("response").and_then(Value::as_str).map(str::to_string)
            }
        }
        _ => None,
    };

    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Joins text from either a plain string or an array of text-bearing blocks
/// (`{"type":"text","text":..}` or `{"text":..}`).
fn content_to_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|block| {
                    block
                        .get("type")
                        .and_then(Value::as_str)
                        .map_or(true, |t| t == "text")
                })
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(""))
            }
        }
        _ => None,
    }
}

/// Parses an argument payload that may be absent, an object, or a JSON string
/// encoding an object.
pub(crate) fn parse_arguments(raw: Option<&Value>) -> Result<Map<String, Value>, String> {
    match raw {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(Map::new());
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(format!("arguments are not a JSON object: {}", other)),
                Err(e) => Err(format!("invalid arguments JSON: {}", e)),
            }
        }
        Some(other) => Err(format!("arguments are not a JSON object: {}", other)),
    }
}

/// Deterministic call id for providers that do not supply one.
pub(crate) fn derived_call_id(raw: &RawResponse, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.mode.as_str().as_bytes());
    hasher.update(raw.body.to_string().as_bytes());
    hasher.update(index.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("call_{}", &digest[..24])
}
