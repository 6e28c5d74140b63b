//! Loop detection for repeated tool calls
//!
//! A call is identified by its `CallFingerprint`: the tool name plus a
//! canonical rendering of its arguments, so that key order, key case, stray
//! quoting and `1` vs `1.0` do not make two otherwise identical calls look
//! different. The `LoopLedger` only remembers the most recent fingerprint and
//! how many times in a row it has been seen. Two tools alternating forever are
//! not detected here; the turn ceiling bounds that case instead.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

use crate::core_types::ToolInvocation;

/// How many fingerprints are kept for abort diagnostics.
pub const FINGERPRINT_HISTORY: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CallFingerprint {
    pub tool_name: String,
    pub canonical_arguments: String,
}

impl CallFingerprint {
    pub fn new(tool_name: &str, arguments: &Map<String, Value>) -> Self {
        let canonical = canonicalize(&Value::Object(arguments.clone()));
        Self {
            tool_name: tool_name.trim().to_string(),
            canonical_arguments: canonical.to_string(),
        }
    }

    pub fn of(invocation: &ToolInvocation) -> Self {
        Self::new(&invocation.tool_name, &invocation.arguments)
    }

    /// Short stable digest suitable for logs and events.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tool_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.canonical_arguments.as_bytes());
        let hex = format!("{:x}", hasher.finalize());
        format!("{}:{}", self.tool_name, &hex[..12])
    }
}

impl std::fmt::Display for CallFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.tool_name, self.canonical_arguments)
    }
}

/// Canonical form used for fingerprint comparison.
///
/// Keys fold to lower case unless two keys of the same object would then
/// collide; those keep their original spelling.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut folded: HashMap<String, usize> = HashMap::new();
            for key in map.keys() {
                *folded.entry(key.trim().to_lowercase()).or_default() += 1;
            }
            let mut entries: Vec<(String, Value)> = map
                .iter()
                .map(|(key, child)| {
                    let lower = key.trim().to_lowercase();
                    let key = if folded.get(&lower).copied().unwrap_or_default() > 1 {
                        key.clone()
                    } else {
                        lower
                    };
                    (key, canonicalize(child))
                })
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(strip_quotes(s.trim()).to_string()),
        Value::Number(n) => canonical_number(n),
        other => other.clone(),
    }
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Largest magnitude below which every integer is exactly representable as f64.
const EXACT_F64_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Integers are kept verbatim. Whole floats such as `1.0` fold to an integer
/// only while that conversion is exact.
fn canonical_number(n: &Number) -> Value {
    if n.is_i64() || n.is_u64() {
        return Value::Number(n.clone());
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < EXACT_F64_INTEGER => Value::from(f as i64),
        _ => Value::Number(n.clone()),
    }
}

/// Consecutive-repeat counter.
#[derive(Debug, Default, Clone)]
pub struct LoopLedger {
    last: Option<CallFingerprint>,
    count: usize,
    recent: VecDeque<CallFingerprint>,
}

impl LoopLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a call and returns how many times in a row it has now been seen.
    pub fn record(&mut self, fingerprint: &CallFingerprint) -> usize {
        if self.last.as_ref() == Some(fingerprint) {
            self.count += 1;
        } else {
            self.last = Some(fingerprint.clone());
            self.count = 1;
        }

        self.recent.push_back(fingerprint.clone());
        if self.recent.len() > FINGERPRINT_HISTORY {
            self.recent.pop_front();
        }

        self.count
    }

    /// Starts a fresh run of `fingerprint` at count zero.
    pub fn reset_on(&mut self, fingerprint: &CallFingerprint) {
        self.last = Some(fingerprint.clone());
        self.count = 0;
    }

    pub fn clear(&mut self) {
        self.last = None;
        self.count = 0;
        self.recent.clear();
    }

    pub fn current(&self) -> Option<(&CallFingerprint, usize)> {
        self.last.as_ref().map(|fingerprint| (fingerprint, self.count))
    }

    /// Last `n` recorded fingerprints, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&CallFingerprint> {
        let skip = self.recent.len().saturating_sub(n);
        self.recent.iter().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_fingerprint_ignores_key_order_case_and_quotes() {
        let a = CallFingerprint::new("add", &args(json!({"a": 1, "b": "x"})));
        let b = CallFingerprint::new("add", &args(json!({"B": " 'x' ", "A": 1.0})));
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_fingerprint_distinguishes_values_and_tools() {
        let a = CallFingerprint::new("add", &args(json!({"a": 1})));
        let b = CallFingerprint::new("add", &args(json!({"a": 2})));
        let c = CallFingerprint::new("sub", &args(json!({"a": 1})));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        let a = canonicalize(&json!({"outer": {"z": 1, "a": [{"y": 2, "b": 3}]}}));
        let b = canonicalize(&json!({"OUTER": {"a": [{"b": 3.0, "y": 2}], "z": 1}}));
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_case_colliding_keys_stay_distinct() {
        let a = CallFingerprint::new("set", &args(json!({"a": 1, "A": 2})));
        let b = CallFingerprint::new("set", &args(json!({"a": 2, "A": 1})));
        assert_ne!(a, b);

        // Without a collision the key still folds.
        let c = CallFingerprint::new("set", &args(json!({"Mode": "x", "a": 1})));
        let d = CallFingerprint::new("set", &args(json!({"mode": "x", "a": 1})));
        assert_eq!(c, d);
    }

    #[test]
    fn test_large_integers_are_not_rounded() {
        let a = CallFingerprint::new("get", &args(json!({"id": 9007199254740993u64})));
        let b = CallFingerprint::new("get", &args(json!({"id": 9007199254740992u64})));
        assert_ne!(a, b);
        assert_eq!(a.canonical_arguments, "{\"id\":9007199254740993}");

        let whole = CallFingerprint::new("get", &args(json!({"id": 7.0})));
        let int = CallFingerprint::new("get", &args(json!({"id": 7})));
        assert_eq!(whole, int);

        let fraction = CallFingerprint::new("get", &args(json!({"id": 7.5})));
        assert_ne!(fraction, int);
    }

    #[test]
    fn test_ledger_counts_consecutive_only() {
        let mut ledger = LoopLedger::new();
        let a = CallFingerprint::new("add", &args(json!({"a": 1, "b": 1})));
        let b = CallFingerprint::new("search", &args(json!({"q": "x"})));

        assert_eq!(ledger.record(&a), 1);
        assert_eq!(ledger.record(&a), 2);
        assert_eq!(ledger.record(&a), 3);
        assert_eq!(ledger.record(&b), 1);
        assert_eq!(ledger.record(&a), 1);
        assert_eq!(ledger.record(&b), 1);
    }

    #[test]
    fn test_reset_on_restarts_count() {
        let mut ledger = LoopLedger::new();
        let a = CallFingerprint::new("add", &Map::new());
        ledger.record(&a);
        ledger.record(&a);
        ledger.reset_on(&a);
        assert_eq!(ledger.record(&a), 1);
    }

    #[test]
    fn test_recent_is_bounded_and_ordered() {
        let mut ledger = LoopLedger::new();
        for i in 0..(FINGERPRINT_HISTORY + 4) {
            ledger.record(&CallFingerprint::new("t", &args(json!({"i": i}))));
        }
        let recent = ledger.recent(100);
        assert_eq!(recent.len(), FINGERPRINT_HISTORY);
        assert_eq!(recent.last().unwrap().canonical_arguments, format!("{{\"i\":{}}}", FINGERPRINT_HISTORY + 3));

        let last_two = ledger.recent(2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].canonical_arguments, format!("{{\"i\":{}}}", FINGERPRINT_HISTORY + 2));
    }
}
