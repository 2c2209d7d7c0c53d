//! Decides whether an inbound message is meant for the relay.
//!
//! Direct messages always are. On shared channels a message counts when it starts with a
//! registered command keyword or mentions the handle as a whole word. Either of those
//! also makes the channel "warm" for that user: for `convo_timeout` afterwards their
//! plain follow-ups are answered without repeating the handle. Warmth is only ever set by
//! a command or a mention; answering a warm follow-up does not extend it.
use log::trace;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressReason {
    Direct,
    Command,
    Mention,
    WarmConversation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    Unaddressed,
    Addressed(AddressReason),
}

impl Addressing {
    pub fn is_addressed(&self) -> bool {
        matches!(self, Addressing::Addressed(_))
    }
}

pub struct AddressingState {
    handle: String,
    /// keyword -> whether using it refreshes warmth
    commands: HashMap<String, bool>,
    timeout: Duration,
    warm: Mutex<HashMap<u32, (u32, Instant)>>,
}

impl AddressingState {
    pub fn new(handle: &str, timeout: Duration) -> Self {
        Self {
            handle: handle.to_lowercase(),
            commands: HashMap::new(),
            timeout,
            warm: Mutex::new(HashMap::new()),
        }
    }

    /// Register a command keyword (matched case-insensitively against the first word).
    pub fn register_command(&mut self, keyword: &str, refreshes_warmth: bool) {
        self.commands
            .insert(keyword.to_lowercase(), refreshes_warmth);
    }

    pub fn with_command(mut self, keyword: &str, refreshes_warmth: bool) -> Self {
        self.register_command(keyword, refreshes_warmth);
        self
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn evaluate(&self, text: &str, direct: bool, channel: u32, user: u32) -> Addressing {
        self.evaluate_at(text, direct, channel, user, Instant::now())
    }

    /// Apply the addressing rules as of `now`.
    pub fn evaluate_at(
        &self,
        text: &str,
        direct: bool,
        channel: u32,
        user: u32,
        now: Instant,
    ) -> Addressing {
        if direct {
            return Addressing::Addressed(AddressReason::Direct);
        }
        if let Some(refreshes) = self.command_for(text) {
            if refreshes {
                self.mark_warm(channel, user, now);
            }
            return Addressing::Addressed(AddressReason::Command);
        }
        if mentions_handle(text, &self.handle) {
            self.mark_warm(channel, user, now);
            return Addressing::Addressed(AddressReason::Mention);
        }
        if self.is_warm(channel, user, now) {
            return Addressing::Addressed(AddressReason::WarmConversation);
        }
        Addressing::Unaddressed
    }

    /// The registered keyword `text` starts with, if any, and its warmth flag.
    fn command_for(&self, text: &str) -> Option<bool> {
        let first = text.split_whitespace().next()?;
        self.commands.get(&first.to_lowercase()).copied()
    }

    pub fn mark_warm(&self, channel: u32, user: u32, now: Instant) {
        if let Ok(mut warm) = self.warm.lock() {
            trace!("channel {} warm for user {}", channel, user);
            warm.insert(channel, (user, now));
        }
    }

    fn is_warm(&self, channel: u32, user: u32, now: Instant) -> bool {
        let Ok(warm) = self.warm.lock() else {
            return false;
        };
        match warm.get(&channel) {
            Some(&(last_user, since)) => {
                last_user == user && now.saturating_duration_since(since) < self.timeout
            }
            None => false,
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whole-word, case-insensitive search for `handle` in `text`.
pub fn mentions_handle(text: &str, handle: &str) -> bool {
    if handle.is_empty() {
        return false;
    }
    text.split(|c: char| !is_word_char(c))
        .any(|word| !word.is_empty() && word.to_lowercase() == handle.to_lowercase())
}

/// Drop a leading `<handle>`, `<handle>:` or `<handle>,` salutation.
pub fn strip_leading_handle<'a>(text: &'a str, handle: &str) -> &'a str {
    let trimmed = text.trim_start();
    let end = trimmed
        .char_indices()
        .find(|&(_, c)| !is_word_char(c))
        .map_or(trimmed.len(), |(i, _)| i);
    let (word, rest) = trimmed.split_at(end);
    if word.is_empty() || word.to_lowercase() != handle.to_lowercase() {
        return text;
    }
    let rest = rest.strip_prefix([':', ',']).unwrap_or(rest);
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return text;
    }
    rest.trim_start()
}
