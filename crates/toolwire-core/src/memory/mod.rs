//! Append-only conversation history plus the loop ledger.
//!
//! One `ConversationMemory` is owned by exactly one agent. Messages are never
//! edited or removed once appended (short of an explicit `clear`), so the
//! history always reflects what was actually sent and received, including
//! failed tool outcomes.

use crate::core_types::{ConversationMessage, MessageContent, Role};
use crate::loop_detection::{CallFingerprint, LoopLedger};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryStats {
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub tool_calls: usize,
    pub tool_results: usize,
    pub failed_tool_results: usize,
}

#[derive(Debug, Default, Clone)]
pub struct ConversationMemory {
    messages: Vec<ConversationMessage>,
    ledger: LoopLedger,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: ConversationMessage) {
        log::debug!(
            "Memory append: role={:?}, {} message(s) total",
            message.role,
            self.messages.len() + 1
        );
        self.messages.push(message);
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Records a call and returns its current consecutive count.
    pub fn record_call(&mut self, fingerprint: &CallFingerprint) -> usize {
        self.ledger.record(fingerprint)
    }

    pub fn reset_ledger_on(&mut self, fingerprint: &CallFingerprint) {
        self.ledger.reset_on(fingerprint);
    }

    /// Forgets the ledger but keeps the history.
    pub fn clear_ledger(&mut self) {
        self.ledger.clear();
    }

    /// Digests of the last `n` recorded fingerprints, oldest first.
    pub fn recent_fingerprints(&self, n: usize) -> Vec<String> {
        self.ledger
            .recent(n)
            .into_iter()
            .map(CallFingerprint::digest)
            .collect()
    }

    pub fn ledger(&self) -> &LoopLedger {
        &self.ledger
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ledger.clear();
    }

    pub fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats {
            message_count: self.messages.len(),
            ..Default::default()
        };

        for message in &self.messages {
            match (&message.role, &message.content) {
                (Role::User, MessageContent::Text { .. }) => stats.user_messages += 1,
                (Role::Assistant, MessageContent::ToolCalls { calls, .. }) => {
                    stats.assistant_messages += 1;
                    stats.tool_calls += calls.len();
                }
                (Role::Assistant, _) => stats.assistant_messages += 1,
                (_, MessageContent::ToolResult { is_error, .. }) => {
                    stats.tool_results += 1;
                    if *is_error {
                        stats.failed_tool_results += 1;
                    }
                }
                _ => {}
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{RawOrigin, ToolInvocation};
    use serde_json::{json, Map};

    #[test]
    fn test_append_preserves_order() {
        let mut memory = ConversationMemory::new();
        memory.append(ConversationMessage::system("be brief"));
        memory.append(ConversationMessage::user("hi"));
        memory.append(ConversationMessage::assistant("hello"));

        let roles: Vec<Role> = memory.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(memory.len(), 3);
    }

    #[test]
    fn test_record_call_and_recent_fingerprints() {
        let mut memory = ConversationMemory::new();
        let args = json!({"a": 1, "b": 1}).as_object().cloned().unwrap();
        let fingerprint = CallFingerprint::new("add", &args);

        assert_eq!(memory.record_call(&fingerprint), 1);
        assert_eq!(memory.record_call(&fingerprint), 2);
        memory.reset_ledger_on(&fingerprint);
        assert_eq!(memory.record_call(&fingerprint), 1);

        let recent = memory.recent_fingerprints(2);
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|d| d.starts_with("add:")));
    }

    #[test]
    fn test_clear_ledger_keeps_history() {
        let mut memory = ConversationMemory::new();
        memory.append(ConversationMessage::user("hi"));
        memory.record_call(&CallFingerprint::new("t", &Map::new()));
        memory.clear_ledger();

        assert_eq!(memory.len(), 1);
        assert!(memory.recent_fingerprints(5).is_empty());

        memory.clear();
        assert!(memory.is_empty());
    }

    #[test]
    fn test_stats() {
        let mut memory = ConversationMemory::new();
        memory.append(ConversationMessage::user("add 2 and 2"));
        memory.append(ConversationMessage::assistant_tool_calls(
            None,
            vec![ToolInvocation::new(
                Some("c1".into()),
                "add",
                Map::new(),
                RawOrigin::path("$"),
            )],
        ));
        memory.append(ConversationMessage {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                call_id: "c1".into(),
                tool_name: "add".into(),
                payload: "boom".into(),
                is_error: true,
            },
            originating_call_id: Some("c1".into()),
        });

        let stats = memory.stats();
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.tool_calls, 1);
        assert_eq!(stats.tool_results, 1);
        assert_eq!(stats.failed_tool_results, 1);
    }
}
