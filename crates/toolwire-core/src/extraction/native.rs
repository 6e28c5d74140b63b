use serde_json::Value;

use super::{
    derived_call_id, parse_arguments, response_text, text, Extraction, ExtractionDiagnostic,
};
use crate::core_types::{RawOrigin, RawResponse, ToolInvocation, ToolSpec};

/// OpenAI-style extraction.
///
/// Accepts a full chat completion (`choices[0].message`), a response wrapping
/// a single `message`, a bare assistant message, or an object that only
/// carries a `tool_calls` array. Each entry
/// may nest its name and arguments under `function` or carry them directly.
/// The legacy single `function_call` field is honoured when no `tool_calls`
/// are present.
pub fn extract_openai(raw: &RawResponse) -> Extraction {
    let body = &raw.body;
    let (message, base_path) = match body.pointer("/choices/0/message") {
        Some(message) => (message, "choices[0].message"),
        None => match body.get("message").filter(|v| v.is_object()) {
            Some(message) => (message, "message"),
            None => (body, "$"),
        },
    };

    let mut extraction = Extraction {
        final_text: response_text(raw),
        ..Default::default()
    };

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for (index, call) in calls.iter().enumerate() {
            let path = format!("{}.tool_calls[{}]", base_path, index);
            let function = call.get("function").unwrap_or(call);
            let id = call.get("id").and_then(Value::as_str).map(str::to_string);
            push_call(
                &mut extraction,
                raw,
                index,
                id,
                function.get("name"),
                function.get("arguments"),
                path,
            );
        }
    } else if let Some(function_call) = message.get("function_call").filter(|v| v.is_object()) {
        let path = format!("{}.function_call", base_path);
        push_call(
            &mut extraction,
            raw,
            0,
            None,
            function_call.get("name"),
            function_call.get("arguments"),
            path,
        );
    }

    extraction
}

/// Anthropic-style extraction from `tool_use` content blocks.
pub fn extract_anthropic(raw: &RawResponse) -> Extraction {
    let body = &raw.body;
    let (blocks, base_path) = match body.get("content").and_then(Value::as_array) {
        Some(blocks) => (Some(blocks), "content"),
        None => (
            body.pointer("/choices/0/message/content").and_then(Value::as_array),
            "choices[0].message.content",
        ),
    };

    let mut extraction = Extraction {
        final_text: response_text(raw),
        ..Default::default()
    };

    let Some(blocks) = blocks else {
        return extraction;
    };

    for (index, block) in blocks.iter().enumerate() {
        if block.get("type").and_then(Value::as_str) != Some("tool_use") {
            continue;
        }
        let id = block.get("id").and_then(Value::as_str).map(str::to_string);
        push_call(
            &mut extraction,
            raw,
            index,
            id,
            block.get("name"),
            block.get("input"),
            format!("{}[{}]", base_path, index),
        );
    }

    extraction
}

/// Gemini-style extraction from `functionCall` parts. Older Gemini models send
/// no call ids, in which case a derived one is used.
pub fn extract_gemini(raw: &RawResponse) -> Extraction {
    let mut extraction = Extraction {
        final_text: response_text(raw),
        ..Default::default()
    };

    let Some(parts) = raw
        .body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
    else {
        return extraction;
    };

    for (index, part) in parts.iter().enumerate() {
        let Some(function_call) = part.get("functionCall").filter(|v| v.is_object()) else {
            continue;
        };
        push_call(
            &mut extraction,
            raw,
            index,
            function_call.get("id").and_then(Value::as_str).map(str::to_string),
            function_call.get("name"),
            function_call.get("args"),
            format!("candidates[0].content.parts[{}].functionCall", index),
        );
    }

    extraction
}

/// Ollama-style extraction.
///
/// Calls sit under `message.tool_calls` with arguments as an object (or, via
/// OpenAI-compatible proxies, as a JSON string) and usually without ids. When
/// the response carries no structured call the text is scanned for labeled
/// `[FUNCTION_CALL]` calls or call JSON instead.
pub fn extract_ollama(raw: &RawResponse, requested_tools: &[ToolSpec]) -> Extraction {
    let body = &raw.body;
    let found = [
        ("/message/tool_calls", "message"),
        ("/choices/0/message/tool_calls", "choices[0].message"),
    ]
    .into_iter()
    .find_map(|(pointer, base_path)| {
        body.pointer(pointer)
            .and_then(Value::as_array)
            .filter(|calls| !calls.is_empty())
            .map(|calls| (calls, base_path))
    });

    let Some((calls, base_path)) = found else {
        return text::extract_text_pattern(raw, requested_tools);
    };

    let mut extraction = Extraction {
        final_text: response_text(raw),
        ..Default::default()
    };
    for (index, call) in calls.iter().enumerate() {
        let function = call.get("function").unwrap_or(call);
        push_call(
            &mut extraction,
            raw,
            index,
            call.get("id").and_then(Value::as_str).map(str::to_string),
            function.get("name"),
            function.get("arguments"),
            format!("{}.tool_calls[{}]", base_path, index),
        );
    }

    extraction
}

fn push_call(
    extraction: &mut Extraction,
    raw: &RawResponse,
    index: usize,
    id: Option<String>,
    name: Option<&Value>,
    arguments: Option<&Value>,
    path: String,
) {
    let name = match name.and_then(Value::as_str).map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            extraction
                .diagnostics
                .push(ExtractionDiagnostic::MissingToolName { origin: path });
            return;
        }
    };

    let arguments = match parse_arguments(arguments) {
        Ok(arguments) => arguments,
        Err(detail) => {
            extraction.diagnostics.push(ExtractionDiagnostic::MalformedArguments {
                tool_name: name.clone(),
                detail,
            });
            serde_json::Map::new()
        }
    };

    let id = id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| derived_call_id(raw, index));

    extraction
        .invocations
        .push(ToolInvocation::new(Some(id), name, arguments, RawOrigin::path(path)));
}
