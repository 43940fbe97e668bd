//! Rolling text buffer fed by the observer.
//!
//! Bounded, append-only between explicit resets. `raw_count` tracks
//! logical character insertions since the last reset; combining marks that
//! join an existing grapheme do not increment it, so it equals the number
//! of backspaces needed to erase the typed region in the target app.

use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// Default capacity in bytes. Oldest text is truncated on overflow.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

/// How many trailing chars are re-normalized after an append. NFC
/// composition only ever reaches back across a short combining run.
const NORMALIZE_TAIL_CHARS: usize = 8;

#[derive(Debug)]
pub struct TextBuffer {
    text: String,
    raw_count: usize,
    capacity: usize,
    overflow_count: u64,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }
}

impl TextBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::new(),
            raw_count: 0,
            capacity,
            overflow_count: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn raw_count(&self) -> usize {
        self.raw_count
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Append one composed character. Returns true when the insertion
    /// created a new grapheme (and therefore bumped `raw_count`).
    pub fn append(&mut self, ch: char) -> bool {
        let graphemes_before = self.text.graphemes(true).count();
        self.text.push(ch);
        self.normalize_tail();

        let graphemes_after = self.text.graphemes(true).count();
        let new_grapheme = graphemes_after > graphemes_before;
        if new_grapheme {
            self.raw_count += 1;
        }

        if self.text.len() > self.capacity {
            self.truncate_head();
        }
        new_grapheme
    }

    /// Remove the last grapheme, mirroring a Backspace in the target app.
    pub fn backspace(&mut self) {
        if let Some((offset, _)) = self.text.grapheme_indices(true).next_back() {
            self.text.truncate(offset);
            self.raw_count = self.raw_count.saturating_sub(1);
        }
    }

    pub fn reset(&mut self) {
        self.text.clear();
        self.raw_count = 0;
    }

    /// Re-run NFC over the last few chars so composition never spans the
    /// whole buffer on each keystroke.
    fn normalize_tail(&mut self) {
        let tail_start = self
            .text
            .char_indices()
            .rev()
            .nth(NORMALIZE_TAIL_CHARS - 1)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let tail = &self.text[tail_start..];
        if unicode_normalization::is_nfc(tail) {
            return;
        }
        let normalized: String = tail.nfc().collect();
        self.text.truncate(tail_start);
        self.text.push_str(&normalized);
    }

    fn truncate_head(&mut self) {
        let overshoot = self.text.len() - self.capacity;
        // Cut at the first grapheme boundary at or past the overshoot.
        let cut = self
            .text
            .grapheme_indices(true)
            .map(|(i, _)| i)
            .find(|&i| i >= overshoot)
            .unwrap_or(self.text.len());
        self.text.drain(..cut);
        self.overflow_count += 1;
        tracing::debug!(
            dropped_bytes = cut,
            overflow_count = self.overflow_count,
            "Text buffer overflow, truncated from head"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_str(buf: &mut TextBuffer, s: &str) {
        for ch in s.chars() {
            buf.append(ch);
        }
    }

    #[test]
    fn append_builds_text_and_raw_count() {
        let mut buf = TextBuffer::default();
        append_str(&mut buf, "hellow");
        assert_eq!(buf.as_str(), "hellow");
        assert_eq!(buf.raw_count(), 6);
    }

    #[test]
    fn backspace_removes_one_grapheme_and_one_count() {
        let mut buf = TextBuffer::default();
        append_str(&mut buf, "abc");
        buf.backspace();
        assert_eq!(buf.as_str(), "ab");
        assert_eq!(buf.raw_count(), 2);
    }

    #[test]
    fn backspace_on_empty_is_a_no_op() {
        let mut buf = TextBuffer::default();
        buf.backspace();
        assert_eq!(buf.as_str(), "");
        assert_eq!(buf.raw_count(), 0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut buf = TextBuffer::default();
        append_str(&mut buf, "text");
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.raw_count(), 0);
    }

    #[test]
    fn combining_mark_joins_grapheme_without_counting() {
        let mut buf = TextBuffer::default();
        buf.append('e');
        assert_eq!(buf.raw_count(), 1);
        // U+0301 combining acute joins the previous grapheme.
        buf.append('\u{0301}');
        assert_eq!(buf.raw_count(), 1);
        // NFC composes to the precomposed form.
        assert_eq!(buf.as_str(), "\u{00e9}");
    }

    #[test]
    fn backspace_after_composition_deletes_the_composed_char() {
        let mut buf = TextBuffer::default();
        buf.append('e');
        buf.append('\u{0301}');
        buf.backspace();
        assert!(buf.is_empty());
        assert_eq!(buf.raw_count(), 0);
    }

    #[test]
    fn overflow_truncates_from_head() {
        let mut buf = TextBuffer::with_capacity(8);
        append_str(&mut buf, "abcdefghij");
        assert!(buf.as_str().len() <= 8);
        assert!(buf.as_str().ends_with("ij"));
        assert_eq!(buf.overflow_count(), 2);
    }

    #[test]
    fn concatenation_property_without_backspace() {
        // Property 1: with no backspace, the buffer equals the
        // concatenation of the printable normalizations.
        let inputs = "The quick brown fox";
        let mut buf = TextBuffer::default();
        append_str(&mut buf, inputs);
        assert_eq!(buf.as_str(), inputs);
        assert_eq!(buf.raw_count(), inputs.chars().count());
    }
}
