//! # Collaborator Services
//!
//! Everything the relay can answer with besides its own rules lives here, behind two
//! narrow traits:
//!
//! - [`CommandHandler`]: a keyword-prefixed command (`bbs`, `weather`, `zork`) that turns
//!   the rest of the message into a reply string. Handlers own whatever state they need.
//! - [`generation::GenerationBackend`]: free text goes to an LLM with the peer's history.
//!
//! The relay core only ever holds these as trait objects.
use async_trait::async_trait;

use crate::meshtastic::Target;

pub mod adventure;
pub mod board;
pub mod generation;
#[cfg(feature = "weather")]
pub mod weather;

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// First word that selects this handler (lowercase).
    fn keyword(&self) -> &'static str;

    /// Whether using the command keeps a channel conversation warm.
    fn refreshes_warmth(&self) -> bool {
        true
    }

    /// Produce the reply for `args` (the text after the keyword).
    async fn handle(&self, args: &str, target: Target, user: u32) -> String;
}

/// Split `text` into its first word (lowercased) and the trimmed remainder.
pub fn split_command(text: &str) -> (String, &str) {
    let trimmed = text.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head.to_lowercase(), rest.trim_start()),
        None => (trimmed.to_lowercase(), ""),
    }
}

#[cfg(test)]
mod tests {
    use super::split_command;

    #[test]
    fn splits_keyword_and_args() {
        assert_eq!(split_command("BBS post hi there"), ("bbs".to_string(), "post hi there"));
        assert_eq!(split_command("  zork  "), ("zork".to_string(), ""));
        assert_eq!(split_command("weather\tParis"), ("weather".to_string(), "Paris"));
    }
}
