//! Escaping for the injector subprocess invocation.
//!
//! The alphabet is pinned to exactly `\\`, `\n`, `\r`, `\t`. Unescape is
//! the left inverse of escape and rejects any other `\x` sequence so a
//! drifting producer fails loudly instead of typing garbage.

use overtype_foundation::InjectionError;

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn unescape(text: &str) -> Result<String, InjectionError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => return Err(InjectionError::InvalidEscape(other)),
            None => return Err(InjectionError::InvalidEscape('\0')),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_the_pinned_alphabet() {
        assert_eq!(escape("a\nb\tc\rd\\e"), "a\\nb\\tc\\rd\\\\e");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(escape("hello world"), "hello world");
        assert_eq!(unescape("hello world").unwrap(), "hello world");
    }

    #[test]
    fn unescape_is_left_inverse_of_escape() {
        let cases = [
            "plain",
            "line\none",
            "tab\tsep",
            "cr\rlf\n",
            "back\\slash",
            "\\n literal backslash n",
            "mixed \\ \n \r \t end",
            "trailing backslash \\",
            "unicode caf\u{00e9} \u{1f980}",
        ];
        for case in cases {
            assert_eq!(unescape(&escape(case)).unwrap(), case, "case: {case:?}");
        }
    }

    #[test]
    fn unknown_escape_is_rejected() {
        match unescape("bad \\x sequence") {
            Err(InjectionError::InvalidEscape('x')) => {}
            other => panic!("expected InvalidEscape, got {:?}", other),
        }
    }

    #[test]
    fn dangling_backslash_is_rejected() {
        assert!(unescape("dangling \\").is_err());
    }
}
