//! Per-peer conversation history sent to the generation backend.
//!
//! Each [`Target`] owns an ordered list of messages whose first entry is the pinned
//! system prompt. The list is bounded twice: by entry count (`max_history_len`
//! non-system entries) and by the summed character length of the non-system entries
//! (`max_context_chars`). Oldest entries go first.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::logutil::safe_text;
use crate::meshtastic::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    fn chars(&self) -> usize {
        self.content.chars().count()
    }
}

pub struct ContextLedger {
    system_prompt: String,
    max_len: usize,
    max_chars: usize,
    max_text_len: usize,
    histories: Mutex<HashMap<Target, Vec<ChatMessage>>>,
}

impl ContextLedger {
    pub fn new(system_prompt: &str, max_len: usize, max_chars: usize, max_text_len: usize) -> Self {
        Self {
            system_prompt: system_prompt.to_string(),
            max_len,
            max_chars,
            max_text_len,
            histories: Mutex::new(HashMap::new()),
        }
    }

    /// Record one message for `peer` and return a copy of the trimmed history.
    pub fn append(&self, peer: Target, role: Role, content: &str) -> Vec<ChatMessage> {
        let entry = ChatMessage::new(role, safe_text(content, self.max_text_len));
        let mut histories = match self.histories.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let hist = histories.entry(peer).or_default();

        if hist.first().map(|m| m.role) != Some(Role::System) {
            hist.insert(0, ChatMessage::new(Role::System, self.system_prompt.clone()));
        }
        hist.push(entry);

        if hist.len() > self.max_len + 1 {
            let excess = hist.len() - (self.max_len + 1);
            hist.drain(1..1 + excess);
        }

        let mut total: usize = hist[1..].iter().map(ChatMessage::chars).sum();
        while total > self.max_chars && hist.len() > 1 {
            let removed = hist.remove(1);
            total -= removed.chars();
        }

        hist.clone()
    }

    /// Current history for `peer`, empty if nothing was recorded yet.
    pub fn snapshot(&self, peer: Target) -> Vec<ChatMessage> {
        self.histories
            .lock()
            .map(|h| h.get(&peer).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn peers(&self) -> usize {
        self.histories.lock().map(|h| h.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_system(h: &[ChatMessage]) -> Vec<&ChatMessage> {
        h.iter().filter(|m| m.role != Role::System).collect()
    }

    #[test]
    fn system_entry_is_pinned_once() {
        let ledger = ContextLedger::new("be brief", 20, 4000, 1024);
        let peer = Target::Node(1);
        ledger.append(peer, Role::User, "hi");
        let h = ledger.append(peer, Role::Assistant, "yo");
        assert_eq!(h.len(), 3);
        assert_eq!(h[0], ChatMessage::new(Role::System, "be brief"));
        assert_eq!(h.iter().filter(|m| m.role == Role::System).count(), 1);
    }

    #[test]
    fn count_bound_keeps_most_recent() {
        let ledger = ContextLedger::new("sys", 4, 4000, 1024);
        let peer = Target::Channel(0);
        let mut last = Vec::new();
        for i in 0..10 {
            last = ledger.append(peer, Role::User, &format!("m{}", i));
            assert!(non_system(&last).len() <= 4);
        }
        let contents: Vec<_> = last[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m6", "m7", "m8", "m9"]);
        assert_eq!(last[0].role, Role::System);
    }

    #[test]
    fn char_budget_evicts_oldest() {
        let ledger = ContextLedger::new("a much longer system prompt", 20, 10, 1024);
        let peer = Target::Node(2);
        ledger.append(peer, Role::User, "aaaa");
        ledger.append(peer, Role::Assistant, "bbbb");
        let h = ledger.append(peer, Role::User, "cccc");
        let contents: Vec<_> = h[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["bbbb", "cccc"]);
        let total: usize = h[1..].iter().map(|m| m.content.chars().count()).sum();
        assert!(total <= 10);
    }

    #[test]
    fn oversized_single_entry_is_evicted_entirely() {
        let ledger = ContextLedger::new("sys", 20, 5, 1024);
        let h = ledger.append(Target::Node(3), Role::User, "this is far too long");
        assert_eq!(h.len(), 1);
        assert_eq!(h[0].role, Role::System);
    }

    #[test]
    fn budget_counts_characters_not_bytes() {
        let ledger = ContextLedger::new("sys", 20, 6, 1024);
        let peer = Target::Node(4);
        ledger.append(peer, Role::User, "ééé");
        let h = ledger.append(peer, Role::User, "日本語");
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn peers_are_isolated_and_content_is_sanitized() {
        let ledger = ContextLedger::new("sys", 20, 4000, 1024);
        ledger.append(Target::Node(1), Role::User, "line1\nline2");
        ledger.append(Target::Channel(1), Role::User, "other");
        let h = ledger.snapshot(Target::Node(1));
        assert_eq!(h[1].content, "line1\\nline2");
        assert_eq!(ledger.snapshot(Target::Channel(1)).len(), 2);
        assert!(ledger.snapshot(Target::Channel(9)).is_empty());
        assert_eq!(ledger.peers(), 2);
    }

    #[test]
    fn returned_snapshot_is_detached() {
        let ledger = ContextLedger::new("sys", 20, 4000, 1024);
        let mut h = ledger.append(Target::Node(1), Role::User, "hi");
        h.clear();
        assert_eq!(ledger.snapshot(Target::Node(1)).len(), 2);
    }
}
