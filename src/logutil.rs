//! Logging utilities for sanitizing user/content strings so logs stay single-line,
//! plus the redaction used before text is written to the audit log or transmitted.

use std::fmt::Write;

/// Keys whose values are masked by [`redact_sensitive`].
const SENSITIVE_KEYS: &[&str] = &["password", "psk", "token", "secret", "api_key", "message"];

const LOG_PREVIEW_CHARS: usize = 300;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates very long strings (over `LOG_PREVIEW_CHARS`) with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(LOG_PREVIEW_CHARS) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= LOG_PREVIEW_CHARS {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// UTF-8 safe truncation for log display. Never slices inside a multi-byte char.
pub fn truncate_for_log(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return escape_log(input);
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = escape_log(&input[..cut]);
    out.push_str("...");
    out
}

/// Make text safe to store or transmit: CR/LF become literal `\r`/`\n`, other control
/// characters become `\xNN` (lowercase hex), and the result is capped at `max_chars`
/// characters.
pub fn safe_text(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars));
    for ch in s.chars() {
        match ch {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    match out.char_indices().nth(max_chars) {
        Some((idx, _)) => out[..idx].to_string(),
        None => out,
    }
}

/// Prepare a reply for the air: secrets masked, control characters other than `\n`
/// escaped like [`safe_text`], and capped at `max_chars` characters. Newlines survive so
/// menus and lists keep their shape.
pub fn outbound_text(s: &str, max_chars: usize) -> String {
    let redacted = redact_sensitive(s);
    let mut out = String::with_capacity(redacted.len().min(max_chars));
    for (count, ch) in redacted.chars().enumerate() {
        if count >= max_chars {
            break;
        }
        match ch {
            '\n' => out.push('\n'),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    match out.char_indices().nth(max_chars) {
        Some((idx, _)) => out[..idx].to_string(),
        None => out,
    }
}

/// [`escape_log`] after [`redact_sensitive`]; use for any packet or reply text that
/// reaches a log line.
pub fn redact_for_log(s: &str) -> String {
    escape_log(&redact_sensitive(s))
}

/// Mask `key=value` / `key: value` pairs whose key looks secret. Keys match
/// case-insensitively and only at a word start; the value runs to the next whitespace.
pub fn redact_sensitive(s: &str) -> String {
    let lower = s.to_ascii_lowercase();
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        if let Some(value_start) = match_sensitive_key(&lower, i) {
            let mut end = value_start;
            while end < bytes.len() && !bytes[end].is_ascii_whitespace() {
                end += 1;
            }
            out.push_str(&s[i..value_start]);
            out.push_str("[REDACTED]");
            i = end;
            continue;
        }
        let ch_len = s[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&s[i..i + ch_len]);
        i += ch_len;
    }
    out
}

// Returns the byte index where the secret value begins when a sensitive key starts at `at`.
fn match_sensitive_key(lower: &str, at: usize) -> Option<usize> {
    let bytes = lower.as_bytes();
    if at > 0 {
        let prev = bytes[at - 1];
        if prev.is_ascii_alphanumeric() || prev == b'_' {
            return None;
        }
    }
    for key in SENSITIVE_KEYS {
        if !lower[at..].starts_with(key) {
            continue;
        }
        let mut pos = at + key.len();
        while pos < bytes.len() && bytes[pos] == b' ' {
            pos += 1;
        }
        if pos < bytes.len() && (bytes[pos] == b'=' || bytes[pos] == b':') {
            pos += 1;
            while pos < bytes.len() && bytes[pos] == b' ' {
                pos += 1;
            }
            return Some(pos);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_escape_keeps_packets_on_one_line() {
        assert_eq!(escape_log("relay\nwx?\r\tok"), "relay\\nwx?\\r\\tok");
        assert_eq!(escape_log("bell\u{7}"), "bell\\x07");
        let long = "x".repeat(LOG_PREVIEW_CHARS + 5);
        assert!(escape_log(&long).ends_with('…'));
    }

    #[test]
    fn truncate_does_not_split_multibyte() {
        let s = "12345€7890";
        assert_eq!(truncate_for_log(s, 10), "12345...");
        assert_eq!(truncate_for_log("hello", 10), "hello");
    }

    #[test]
    fn safe_text_escapes_control_characters() {
        assert_eq!(safe_text("a\r\nb", 100), "a\\r\\nb");
        assert_eq!(safe_text("\x00", 100), "\\x00");
        assert_eq!(safe_text("\x1b[31m", 100), "\\x1b[31m");
    }

    #[test]
    fn safe_text_caps_length_in_characters() {
        assert_eq!(safe_text("héllo wörld", 5), "héllo");
        assert_eq!(safe_text("abc", 0), "");
    }

    #[test]
    fn redacts_secret_values() {
        assert_eq!(
            redact_sensitive("login password=hunter2 ok"),
            "login password=[REDACTED] ok"
        );
        assert_eq!(redact_sensitive("PSK: abcd1234"), "PSK: [REDACTED]");
        assert_eq!(
            redact_sensitive("api_key=sk-1 token=t"),
            "api_key=[REDACTED] token=[REDACTED]"
        );
    }

    #[test]
    fn outbound_text_keeps_newlines_and_masks_secrets() {
        assert_eq!(
            outbound_text("Posts:\n1. psk=abc\r\x07", 100),
            "Posts:\n1. psk=[REDACTED]\\r\\x07"
        );
        assert_eq!(outbound_text("héllo\nwörld", 7), "héllo\nw");
        assert_eq!(outbound_text(&"y".repeat(50), 10).chars().count(), 10);
    }

    #[test]
    fn log_redaction_masks_before_escaping() {
        let line = redact_for_log("hi\npassword=hunter2 token: t0k");
        assert_eq!(line, "hi\\npassword=[REDACTED] token: [REDACTED]");
        assert!(!line.contains("hunter2"));
    }

    #[test]
    fn redaction_requires_word_start_and_separator() {
        assert_eq!(redact_sensitive("mypassword=x"), "mypassword=x");
        assert_eq!(redact_sensitive("the password is long"), "the password is long");
    }
}
