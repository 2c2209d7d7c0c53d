//! Outbound text framing.
//!
//! Meshtastic text packets carry roughly 230 bytes of payload, and the relay leaves
//! headroom below that for protocol overhead. Longer replies are cut at natural
//! boundaries into byte-bounded chunks, then numbered `[i/total] ` so the far end can
//! spot gaps and reordering.

/// Lazy iterator over byte-bounded chunks of a text. A clone is an independent cursor
/// over whatever text is still left.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a str,
    limit: usize,
}

/// Split `text` into chunks whose UTF-8 length is at most `byte_limit`.
///
/// Cuts prefer the last newline or space before the byte-fit point and never land inside
/// a character. Whitespace at a cut is trimmed from both sides and chunks that trim to
/// nothing are skipped. A single character wider than `byte_limit` is emitted on its
/// own so the iterator always makes progress.
pub fn split(text: &str, byte_limit: usize) -> Chunks<'_> {
    Chunks {
        rest: text,
        limit: byte_limit,
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            if self.rest.is_empty() {
                return None;
            }
            if self.rest.len() <= self.limit {
                let last = self.rest.trim_end();
                self.rest = "";
                return if last.is_empty() { None } else { Some(last) };
            }

            let mut cut = self.limit;
            while cut > 0 && !self.rest.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == 0 {
                cut = self.rest.chars().next().map_or(self.rest.len(), char::len_utf8);
            } else if let Some(pos) = self.rest[..cut].rfind(['\n', ' ']) {
                if pos > 0 {
                    cut = pos;
                }
            }

            let chunk = self.rest[..cut].trim_end();
            self.rest = self.rest[cut..].trim_start();
            if !chunk.is_empty() {
                return Some(chunk);
            }
        }
    }
}

/// One numbered piece of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: usize,
    pub total: usize,
    pub payload: String,
}

impl Frame {
    /// Wire form: `[index/total] payload`.
    pub fn render(&self) -> String {
        format!("[{}/{}] {}", self.index, self.total, self.payload)
    }
}

fn digits(n: usize) -> usize {
    let mut d = 1;
    let mut n = n / 10;
    while n > 0 {
        d += 1;
        n /= 10;
    }
    d
}

// "[" + index + "/" + total + "] " with both numbers `d` digits wide.
fn prefix_len(d: usize) -> usize {
    4 + 2 * d
}

/// Frame `text` so that every rendered frame fits in `frame_limit` bytes.
///
/// The prefix width depends on the total, and the total depends on how much budget the
/// prefix leaves, so the digit width is iterated until the chunk count agrees with it.
pub fn frame(text: &str, frame_limit: usize) -> Vec<Frame> {
    let mut width = 1;
    let payloads: Vec<&str> = loop {
        let budget = frame_limit.saturating_sub(prefix_len(width)).max(1);
        let chunks: Vec<&str> = split(text, budget).collect();
        let needed = digits(chunks.len());
        if needed <= width {
            break chunks;
        }
        width = needed;
    };

    let total = payloads.len();
    payloads
        .into_iter()
        .enumerate()
        .map(|(i, payload)| Frame {
            index: i + 1,
            total,
            payload: payload.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn empty_and_whitespace_yield_nothing() {
        assert_eq!(split("", 10).count(), 0);
        assert_eq!(split("   \n ", 10).count(), 0);
        assert!(frame("", 200).is_empty());
    }

    #[test]
    fn short_text_is_one_frame() {
        let frames = frame("hello mesh", 200);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].render(), "[1/1] hello mesh");
    }

    #[test]
    fn prefers_space_and_newline_boundaries() {
        let chunks: Vec<_> = split("alpha beta gamma\ndelta", 12).collect();
        assert_eq!(chunks, vec!["alpha beta", "gamma\ndelta"]);
    }

    #[test]
    fn hard_cut_without_boundary() {
        let chunks: Vec<_> = split("abcdefghij", 4).collect();
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn never_cuts_inside_a_character() {
        let text = "ééééé";
        let chunks: Vec<_> = split(text, 3).collect();
        assert_eq!(chunks, vec!["é", "é", "é", "é", "é"]);
        let wide: Vec<_> = split("🙂🙂", 2).collect();
        assert_eq!(wide, vec!["🙂", "🙂"]);
    }

    #[test]
    fn chunks_respect_limit_and_reconstruct() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20)
            + "Ünïcödé wörds mixed in with 日本語 text\nand a second line.";
        for limit in [8usize, 13, 40, 97, 180] {
            let chunks: Vec<_> = split(&text, limit).collect();
            for c in &chunks {
                assert!(c.len() <= limit, "chunk {:?} exceeds {}", c, limit);
            }
            assert_eq!(squash(&chunks.concat()), squash(&text));
        }
    }

    #[test]
    fn iterator_is_restartable() {
        let it = split("one two three four", 8);
        let first: Vec<_> = it.clone().collect();
        let second: Vec<_> = it.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn three_budgets_make_three_frames() {
        let limit = 200;
        let text = "x".repeat(3 * (limit - prefix_len(1)));
        let frames = frame(&text, limit);
        assert_eq!(frames.len(), 3);
        for (i, f) in frames.iter().enumerate() {
            assert!(f.render().starts_with(&format!("[{}/3] ", i + 1)));
            assert!(f.render().len() <= limit);
        }
    }

    #[test]
    fn prefix_growth_is_accounted_for() {
        // Nine single-digit frames fill exactly; one more character forces two-digit totals.
        let limit = 16;
        let budget = limit - prefix_len(1);
        let text = "y".repeat(9 * budget + 1);
        let frames = frame(&text, limit);
        assert!(frames.len() >= 10);
        for f in &frames {
            assert!(f.render().len() <= limit, "{:?}", f.render());
            assert_eq!(f.total, frames.len());
        }
    }
}
