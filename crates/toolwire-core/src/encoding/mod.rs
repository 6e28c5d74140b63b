//! Result encoders and provider wire rendering.
//!
//! `encode` turns a tool outcome into the history message the provider expects
//! to see next. Native modes get a structured tool-result message correlated by
//! `call_id`; text modes have no such slot and get a plain user message instead.
//! `render_for_provider` walks the normalized history and produces the request
//! body fragment each provider family accepts.

use serde_json::{json, Map, Value};

use crate::capabilities::ToolCallingMode;
use crate::core_types::{
    ConversationMessage, MessageContent, Role, ToolInvocation, ToolOutcome, ToolSpec,
};

/// Encodes one outcome as the message appended to history. Failures are still
/// encoded, never dropped.
pub fn encode(
    mode: ToolCallingMode,
    invocation: &ToolInvocation,
    outcome: &ToolOutcome,
) -> ConversationMessage {
    if mode.is_native() {
        let payload = match &outcome.error {
            Some(failure) => format!("Error: {}", failure.message),
            None => outcome.payload_text(),
        };
        return ConversationMessage {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                call_id: invocation.call_id.clone(),
                tool_name: invocation.tool_name.clone(),
                payload,
                is_error: outcome.is_error(),
            },
            originating_call_id: Some(invocation.call_id.clone()),
        };
    }

    let text = match &outcome.error {
        Some(failure) => format!("Calling {} failed: {}", invocation.tool_name, failure.message),
        None => format!(
            "The result of calling {} is: {}",
            invocation.tool_name,
            outcome.payload_text()
        ),
    };
    ConversationMessage {
        role: Role::User,
        content: MessageContent::Text { text },
        originating_call_id: Some(invocation.call_id.clone()),
    }
}

/// Renders history into the request shape of the provider family behind `mode`.
///
/// * OpenAI and the text modes: `{"messages": [...]}`
/// * Ollama: `{"messages": [...]}` with object arguments and named tool results
/// * Anthropic: `{"system": "...", "messages": [...]}`
/// * Gemini: `{"systemInstruction": {...}, "contents": [...]}`
pub fn render_for_provider(mode: ToolCallingMode, history: &[ConversationMessage]) -> Value {
    match mode {
        ToolCallingMode::NativeOpenAi => json!({ "messages": render_openai(history) }),
        ToolCallingMode::NativeAnthropic => render_anthropic(history),
        ToolCallingMode::NativeGemini => render_gemini(history),
        ToolCallingMode::NativeOllama => json!({ "messages": render_ollama(history) }),
        ToolCallingMode::JsonEmit | ToolCallingMode::TextPattern | ToolCallingMode::None => {
            json!({ "messages": render_plain(history) })
        }
    }
}

/// Tool declarations in the provider's format. Text modes declare tools through
/// the system prompt instead, so they get `None`.
pub fn render_tools(mode: ToolCallingMode, tools: &[ToolSpec]) -> Option<Value> {
    if tools.is_empty() {
        return None;
    }
    match mode {
        ToolCallingMode::NativeOpenAi | ToolCallingMode::NativeOllama => Some(Value::Array(
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect(),
        )),
        ToolCallingMode::NativeAnthropic => Some(Value::Array(
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect(),
        )),
        ToolCallingMode::NativeGemini => {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            Some(json!([{ "functionDeclarations": declarations }]))
        }
        ToolCallingMode::JsonEmit | ToolCallingMode::TextPattern | ToolCallingMode::None => None,
    }
}

/// System-prompt instructions teaching a text-only model how to call tools.
pub fn tool_instructions(mode: ToolCallingMode, tools: &[ToolSpec]) -> Option<String> {
    if tools.is_empty() {
        return None;
    }

    let catalogue = tools
        .iter()
        .map(describe_tool)
        .collect::<Vec<_>>()
        .join("\n");

    match mode {
        ToolCallingMode::JsonEmit => Some(format!(
            "You have access to the following functions:\n\n{}\n\
             To call a function, respond with only a JSON object of the form \
             {{\"name\": \"function_name\", \"arguments\": {{\"param\": \"value\"}}}}. \
             When you have the final answer, reply in plain text without any JSON.",
            catalogue
        )),
        ToolCallingMode::TextPattern => Some(format!(
            "You have access to the following functions. To use them, output exactly \
             [FUNCTION_CALL] function_name(param1=value1, param2=value2) [/FUNCTION_CALL].\n\n{}\n\
             After you receive the result, answer the user in plain text.",
            catalogue
        )),
        // Served models without tool support on the server answer in text.
        ToolCallingMode::NativeOllama => Some(format!(
            "If you cannot call a function natively, output exactly \
             [FUNCTION_CALL] function_name(param1=value1, param2=value2) [/FUNCTION_CALL] instead.\n\n{}",
            catalogue
        )),
        _ => None,
    }
}

fn describe_tool(tool: &ToolSpec) -> String {
    let params = tool
        .parameters
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, schema)| {
                    let kind = schema.get("type").and_then(Value::as_str).unwrap_or("any");
                    format!("{} ({})", name, kind)
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    format!("Function: {}({})\nDescription: {}\n", tool.name, params, tool.description)
}

/// `name(key=value, ...)` rendering of a call, used when a text-mode assistant
/// turn has to be replayed without its original text.
pub fn labeled_call_text(invocation: &ToolInvocation) -> String {
    let args = invocation
        .arguments
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(", ");
    format!("[FUNCTION_CALL] {}({}) [/FUNCTION_CALL]", invocation.tool_name, args)
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn render_openai(history: &[ConversationMessage]) -> Vec<Value> {
    history
        .iter()
        .map(|message| match &message.content {
            MessageContent::Text { text } => json!({
                "role": role_name(message.role),
                "content": text,
            }),
            MessageContent::ToolCalls { text, calls } => {
                let tool_calls: Vec<Value> = calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.call_id,
                            "type": "function",
                            "function": {
                                "name": call.tool_name,
                                "arguments": call.arguments_value().to_string(),
                            }
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": text,
                    "tool_calls": tool_calls,
                })
            }
            MessageContent::ToolResult {
                call_id, payload, ..
            } => json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": payload,
            }),
        })
        .collect()
}

/// OpenAI-like, but Ollama takes arguments as an object and correlates
/// results by tool name rather than by id.
fn render_ollama(history: &[ConversationMessage]) -> Vec<Value> {
    history
        .iter()
        .map(|message| match &message.content {
            MessageContent::Text { text } => json!({
                "role": role_name(message.role),
                "content": text,
            }),
            MessageContent::ToolCalls { text, calls } => {
                let tool_calls: Vec<Value> = calls
                    .iter()
                    .map(|call| {
                        json!({
                            "function": {
                                "name": call.tool_name,
                                "arguments": call.arguments_value(),
                            }
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": text.clone().unwrap_or_default(),
                    "tool_calls": tool_calls,
                })
            }
            MessageContent::ToolResult {
                tool_name, payload, ..
            } => json!({
                "role": "tool",
                "content": payload,
                "tool_name": tool_name,
            }),
        })
        .collect()
}

/// Everything flattened to text for models without a tool protocol.
fn render_plain(history: &[ConversationMessage]) -> Vec<Value> {
    history
        .iter()
        .map(|message| match &message.content {
            MessageContent::Text { text } => json!({
                "role": role_name(message.role),
                "content": text,
            }),
            MessageContent::ToolCalls { text, calls } => {
                let content = match text {
                    Some(text) if !text.trim().is_empty() => text.clone(),
                    _ => calls.iter().map(labeled_call_text).collect::<Vec<_>>().join("\n"),
                };
                json!({ "role": "assistant", "content": content })
            }
            MessageContent::ToolResult {
                tool_name,
                payload,
                is_error,
                ..
            } => {
                let content = if *is_error {
                    format!("Calling {} failed: {}", tool_name, payload)
                } else {
                    format!("The result of calling {} is: {}", tool_name, payload)
                };
                json!({ "role": "user", "content": content })
            }
        })
        .collect()
}

fn render_anthropic(history: &[ConversationMessage]) -> Value {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<Value> = Vec::new();
    let mut pending_role: Option<&'static str> = None;
    let mut pending: Vec<Value> = Vec::new();

    for message in history {
        let (role, blocks): (&'static str, Vec<Value>) = match (&message.role, &message.content) {
            (Role::System, content) => {
                if let MessageContent::Text { text } = content {
                    system_parts.push(text);
                }
                continue;
            }
            (_, MessageContent::ToolResult {
                call_id,
                payload,
                is_error,
                ..
            }) => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": payload,
                    "is_error": is_error,
                })],
            ),
            (_, MessageContent::ToolCalls { text, calls }) => {
                let mut blocks = Vec::new();
                if let Some(text) = text.as_deref().filter(|t| !t.trim().is_empty()) {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
                blocks.extend(calls.iter().map(|call| {
                    json!({
                        "type": "tool_use",
                        "id": call.call_id,
                        "name": call.tool_name,
                        "input": call.arguments_value(),
                    })
                }));
                ("assistant", blocks)
            }
            (Role::Assistant, MessageContent::Text { text }) => {
                ("assistant", vec![json!({ "type": "text", "text": text })])
            }
            (_, MessageContent::Text { text }) => {
                ("user", vec![json!({ "type": "text", "text": text })])
            }
        };

        // Anthropic requires alternating roles, so adjacent same-role turns merge.
        if pending_role != Some(role) {
            flush_turn(pending_role, &mut pending, &mut messages);
            pending_role = Some(role);
        }
        pending.extend(blocks);
    }
    flush_turn(pending_role, &mut pending, &mut messages);

    let mut body = Map::new();
    if !system_parts.is_empty() {
        body.insert("system".to_string(), Value::String(system_parts.join("\n\n")));
    }
    body.insert("messages".to_string(), Value::Array(messages));
    Value::Object(body)
}

fn flush_turn(role: Option<&'static str>, blocks: &mut Vec<Value>, messages: &mut Vec<Value>) {
    if let Some(role) = role {
        if !blocks.is_empty() {
            messages.push(json!({ "role": role, "content": std::mem::take(blocks) }));
        }
    }
}

fn render_gemini(history: &[ConversationMessage]) -> Value {
    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in history {
        match (&message.role, &message.content) {
            (Role::System, MessageContent::Text { text }) => {
                system_parts.push(json!({ "text": text }));
            }
            (_, MessageContent::ToolResult {
                call_id,
                tool_name,
                payload,
                is_error,
            }) => {
                let part = json!({
                    "functionResponse": {
                        "id": call_id,
                        "name": tool_name,
                        "response": {
                            "name": tool_name,
                            "content": payload,
                            "is_error": is_error,
                        }
                    }
                });
                // Results of one parallel batch travel in a single content.
                let merged = contents.last_mut().and_then(|last| {
                    let is_function = last.get("role").and_then(Value::as_str) == Some("function");
                    if is_function {
                        last.get_mut("parts").and_then(Value::as_array_mut)
                    } else {
                        None
                    }
                });
                match merged {
                    Some(parts) => parts.push(part),
                    None => contents.push(json!({ "role": "function", "parts": [part] })),
                }
            }
            (_, MessageContent::ToolCalls { text, calls }) => {
                let mut parts = Vec::new();
                if let Some(text) = text.as_deref().filter(|t| !t.trim().is_empty()) {
                    parts.push(json!({ "text": text }));
                }
                parts.extend(calls.iter().map(|call| {
                    json!({
                        "functionCall": {
                            "id": call.call_id,
                            "name": call.tool_name,
                            "args": call.arguments_value(),
                        }
                    })
                }));
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            (Role::Assistant, MessageContent::Text { text }) => {
                contents.push(json!({ "role": "model", "parts": [{ "text": text }] }));
            }
            (_, MessageContent::Text { text }) => {
                contents.push(json!({ "role": "user", "parts": [{ "text": text }] }));
            }
        }
    }

    let mut body = Map::new();
    if !system_parts.is_empty() {
        body.insert("systemInstruction".to_string(), json!({ "parts": system_parts }));
    }
    body.insert("contents".to_string(), Value::Array(contents));
    Value::Object(body)
}
