//! Best-effort recovery of tool calls from plain completion text.
//!
//! Two scans are tried in order: a balanced-brace JSON object scan, then a
//! labeled-call scan for `name(key=value, ...)` syntax, optionally wrapped in
//! `[FUNCTION_CALL] ... [/FUNCTION_CALL]` delimiters. The first scan that
//! produces at least one accepted invocation wins.

use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::sync::LazyLock;

use super::{derived_call_id, parse_arguments, response_text, Extraction, ExtractionDiagnostic};
use crate::core_types::{RawOrigin, RawResponse, ToolInvocation, ToolSpec};

// Patterns are constant; a failed compile simply disables the labeled-call scan.
static DELIMITED_CALL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)\[FUNCTION_CALL\](.*?)\[/FUNCTION_CALL\]").ok());

static CALL_EXPRESSION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_.\-]*)\s*\((.*)\)$").ok());

static BARE_CALL_OPEN_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").ok());

/// A call found in the text before name validation.
#[derive(Debug)]
struct Candidate {
    id: Option<String>,
    name: String,
    arguments: Result<Map<String, Value>, String>,
    start: usize,
    end: usize,
}

/// The whole completion is expected to be a single JSON call object. When it
/// does not parse as-is, the first balanced `{...}` span is tried instead.
pub fn extract_json_emit(raw: &RawResponse, requested_tools: &[ToolSpec]) -> Extraction {
    let text = response_text(raw).unwrap_or_default();
    let mut extraction = Extraction {
        final_text: Some(text.clone()).filter(|t| !t.is_empty()),
        ..Default::default()
    };

    let found = match serde_json::from_str::<Value>(&text) {
        Ok(value) => Some((0, text.len(), value)),
        Err(_) => json_objects(&text).into_iter().next(),
    };

    let Some((start, end, value)) = found else {
        return extraction;
    };

    let candidates = candidates_from_value(&value, start, end);
    if candidates.is_empty() {
        extraction.diagnostics.push(ExtractionDiagnostic::NotACall {
            detail: format!("JSON at {}..{} has no recognizable tool name", start, end),
        });
        return extraction;
    }

    accept_candidates(&mut extraction, raw, candidates, requested_tools);
    extraction
}

pub fn extract_text_pattern(raw: &RawResponse, requested_tools: &[ToolSpec]) -> Extraction {
    let text = response_text(raw).unwrap_or_default();
    let mut extraction = Extraction {
        final_text: Some(text.clone()).filter(|t| !t.is_empty()),
        ..Default::default()
    };
    if text.is_empty() {
        return extraction;
    }

    let mut json_stage = Extraction::default();
    let mut candidates = Vec::new();
    for (start, end, value) in json_objects(&text) {
        candidates.extend(candidates_from_value(&value, start, end));
    }
    if accept_candidates(&mut json_stage, raw, candidates, requested_tools) > 0 {
        extraction.invocations = json_stage.invocations;
        extraction.diagnostics = json_stage.diagnostics;
        return extraction;
    }

    let mut labeled_stage = Extraction::default();
    let candidates = labeled_calls(&text, requested_tools, &mut labeled_stage.diagnostics);
    if accept_candidates(&mut labeled_stage, raw, candidates, requested_tools) > 0 {
        extraction.invocations = labeled_stage.invocations;
        extraction.diagnostics = labeled_stage.diagnostics;
        return extraction;
    }

    extraction.diagnostics.extend(json_stage.diagnostics);
    extraction.diagnostics.extend(labeled_stage.diagnostics);
    extraction
}

/// Validates names and turns candidates into invocations. Returns how many
/// were accepted.
fn accept_candidates(
    extraction: &mut Extraction,
    raw: &RawResponse,
    candidates: Vec<Candidate>,
    requested_tools: &[ToolSpec],
) -> usize {
    let known: HashSet<&str> = requested_tools.iter().map(|t| t.name.as_str()).collect();
    let mut accepted = 0;

    for (index, candidate) in candidates.into_iter().enumerate() {
        if !known.is_empty() && !known.contains(candidate.name.as_str()) {
            extraction.diagnostics.push(ExtractionDiagnostic::UnknownTool {
                tool_name: candidate.name,
            });
            continue;
        }

        let arguments = match candidate.arguments {
            Ok(arguments) => arguments,
            Err(detail) => {
                extraction.diagnostics.push(ExtractionDiagnostic::MalformedArguments {
                    tool_name: candidate.name.clone(),
                    detail,
                });
                Map::new()
            }
        };

        let id = candidate.id.unwrap_or_else(|| derived_call_id(raw, index));
        extraction.invocations.push(ToolInvocation::new(
            Some(id),
            candidate.name,
            arguments,
            RawOrigin::TextSpan {
                start: candidate.start,
                end: candidate.end,
            },
        ));
        accepted += 1;
    }

    accepted
}

fn candidates_from_value(value: &Value, start: usize, end: usize) -> Vec<Candidate> {
    if let Some(items) = value.as_array() {
        return items
            .iter()
            .filter_map(|item| candidate_from_object(item, start, end))
            .collect();
    }

    if let Some(calls) = value.get("tool_calls").and_then(Value::as_array) {
        return calls
            .iter()
            .filter_map(|call| candidate_from_object(call, start, end))
            .collect();
    }

    candidate_from_object(value, start, end).into_iter().collect()
}

/// Recognizes `{name, parameters|arguments}`, `{function: {name, arguments}}`
/// and `{tool|tool_name, arguments|args|parameters}`.
fn candidate_from_object(value: &Value, start: usize, end: usize) -> Option<Candidate> {
    let object = value.as_object()?;

    let (name, arguments) = match object.get("function") {
        Some(Value::Object(function)) => (
            function.get("name"),
            function.get("arguments").or_else(|| function.get("parameters")),
        ),
        Some(name @ Value::String(_)) => (Some(name), arguments_field(object)),
        _ => (
            object
                .get("name")
                .or_else(|| object.get("tool"))
                .or_else(|| object.get("tool_name")),
            arguments_field(object),
        ),
    };

    let name = name?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let id = object
        .get("id")
        .or_else(|| object.get("call_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    Some(Candidate {
        id,
        name: name.to_string(),
        arguments: parse_arguments(arguments),
        start,
        end,
    })
}

fn arguments_field(object: &Map<String, Value>) -> Option<&Value> {
    object
        .get("arguments")
        .or_else(|| object.get("parameters"))
        .or_else(|| object.get("args"))
        .or_else(|| object.get("input"))
}

/// Every balanced `{...}` span that parses as a JSON object, earliest start
/// first and never overlapping. Spans come from a single pass over the text,
/// so stray unmatched braces cost nothing extra.
fn json_objects(text: &str) -> Vec<(usize, usize, Value)> {
    let mut found = Vec::new();
    let mut cursor = 0;
    for (start, end) in balanced_spans(text) {
        if start < cursor {
            continue;
        }
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..end]) {
            found.push((start, end, value));
            cursor = end;
        }
    }
    found
}

/// Matched brace pairs sorted by start offset. Braces inside string literals
/// are ignored; quotes outside any brace are prose and do not open a string.
fn balanced_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' if !open.is_empty() => in_string = !in_string,
            '{' if !in_string => open.push(i),
            '}' if !in_string => {
                if let Some(start) = open.pop() {
                    spans.push((start, i + ch.len_utf8()));
                }
            }
            _ => {}
        }
    }

    spans.sort_unstable_by_key(|&(start, _)| start);
    spans
}

fn labeled_calls(
    text: &str,
    requested_tools: &[ToolSpec],
    diagnostics: &mut Vec<ExtractionDiagnostic>,
) -> Vec<Candidate> {
    let mut calls = Vec::new();
    let (Some(delimited_re), Some(expression_re), Some(bare_re)) = (
        DELIMITED_CALL_RE.as_ref(),
        CALL_EXPRESSION_RE.as_ref(),
        BARE_CALL_OPEN_RE.as_ref(),
    ) else {
        return calls;
    };

    for captures in delimited_re.captures_iter(text) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let expression = inner.as_str().trim();
        let Some(parts) = expression_re.captures(expression) else {
            diagnostics.push(ExtractionDiagnostic::NotACall {
                detail: format!("unparseable call block '{}'", expression),
            });
            continue;
        };
        let name = parts.get(1).map_or("", |m| m.as_str());
        let args_text = parts.get(2).map_or("", |m| m.as_str());
        calls.push(Candidate {
            id: None,
            name: name.to_string(),
            arguments: parse_labeled_arguments(name, args_text, diagnostics),
            start: whole.start(),
            end: whole.end(),
        });
    }

    if !calls.is_empty() || requested_tools.is_empty() {
        return calls;
    }

    // Undelimited calls are only trusted when they name an offered tool.
    let known: HashSet<&str> = requested_tools.iter().map(|t| t.name.as_str()).collect();
    let mut cursor = 0;
    for captures in bare_re.captures_iter(text) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        if whole.start() < cursor || !known.contains(name.as_str()) {
            continue;
        }
        let open = whole.end() - 1;
        let Some(close) = find_closing_paren(text, open) else {
            continue;
        };
        calls.push(Candidate {
            id: None,
            name: name.as_str().to_string(),
            arguments: parse_labeled_arguments(name.as_str(), &text[open + 1..close], diagnostics),
            start: whole.start(),
            end: close + 1,
        });
        cursor = close + 1;
    }

    calls
}

fn find_closing_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escape_next = false;

    for (i, ch) in text[open..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escape_next = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return (ch == ')').then_some(open + i);
                }
            }
            _ => {}
        }
    }

    None
}

fn parse_labeled_arguments(
    tool_name: &str,
    args_text: &str,
    diagnostics: &mut Vec<ExtractionDiagnostic>,
) -> Result<Map<String, Value>, String> {
    let trimmed = args_text.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    if trimmed.starts_with('{') {
        return parse_arguments(Some(&Value::String(trimmed.to_string())));
    }

    let mut arguments = Map::new();
    let mut positional = Vec::new();
    for piece in split_top_level(trimmed) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        match split_key_value(piece) {
            Some((key, value)) => {
                arguments.insert(key.to_string(), typed_value(value));
            }
            None => positional.push(piece.to_string()),
        }
    }

    if !positional.is_empty() {
        diagnostics.push(ExtractionDiagnostic::MalformedArguments {
            tool_name: tool_name.to_string(),
            detail: format!("positional arguments ignored: {}", positional.join(", ")),
        });
    }

    Ok(arguments)
}

/// Splits on commas that are outside quotes and brackets.
fn split_top_level(input: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escape_next = false;
    let mut piece_start = 0;

    for (i, ch) in input.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escape_next = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                pieces.push(&input[piece_start..i]);
                piece_start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&input[piece_start..]);
    pieces
}

/// Accepts `key=value`, `key: value` and a quoted key in either form.
fn split_key_value(piece: &str) -> Option<(&str, &str)> {
    let (key, rest) = match piece.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let close = piece[1..].find(q)? + 1;
            (&piece[1..close], &piece[close + 1..])
        }
        _ => {
            let key_len = piece
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(piece.len());
            piece.split_at(key_len)
        }
    };

    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let rest = rest.trim_start();
    let value = rest.strip_prefix('=').or_else(|| rest.strip_prefix(':'))?;
    Some((key, value.trim()))
}

/// Types a literal the way a model usually means it: quoted text is a string,
/// digits are numbers, `true`/`false` are booleans.
fn typed_value(raw: &str) -> Value {
    let raw = raw.trim();

    if let Some(inner) = strip_matching_quotes(raw) {
        return Value::String(unescape(inner));
    }

    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "none" => return Value::Null,
        _ => {}
    }

    if is_integer(raw) {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::from(n);
        }
    }
    if is_decimal(raw) {
        if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    if raw.starts_with('[') || raw.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return value;
        }
    }

    Value::String(raw.to_string())
}

fn strip_matching_quotes(raw: &str) -> Option<&str> {
    let first = raw.chars().next()?;
    if raw.len() < 2 || !(first == '"' || first == '\'') || !raw.ends_with(first) {
        return None;
    }
    Some(&raw[1..raw.len() - 1])
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn is_integer(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn is_decimal(raw: &str) -> bool {
    let body = raw.strip_prefix('-').unwrap_or(raw);
    match body.split_once('.') {
        Some((whole, frac)) => is_integer(whole) && is_integer(frac) && !frac.starts_with('-'),
        None => false,
    }
}
