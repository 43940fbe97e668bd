//! Indent normalization applied once per session before typing.
//!
//! Editors apply their own auto-indent when Enter is synthesized, so
//! leading whitespace on each line would double up. Leading and trailing
//! blank lines carry no information at the caret either.

pub fn normalize_for_typing(text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(|line| line.trim_start()).collect();

    let first = lines
        .iter()
        .position(|line| !line.is_empty())
        .unwrap_or(lines.len());
    let last = lines
        .iter()
        .rposition(|line| !line.is_empty())
        .map(|i| i + 1)
        .unwrap_or(first);

    lines[first..last].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_per_line_leading_whitespace() {
        let input = "def add(a, b):\n    return a + b";
        assert_eq!(normalize_for_typing(input), "def add(a, b):\nreturn a + b");
    }

    #[test]
    fn trims_leading_and_trailing_blank_lines() {
        let input = "\n\n  text body\nsecond line\n\n";
        assert_eq!(normalize_for_typing(input), "text body\nsecond line");
    }

    #[test]
    fn interior_blank_lines_survive() {
        let input = "para one\n\npara two";
        assert_eq!(normalize_for_typing(input), "para one\n\npara two");
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(normalize_for_typing("Hello"), "Hello");
    }

    #[test]
    fn all_blank_input_collapses_to_empty() {
        assert_eq!(normalize_for_typing("\n  \n\t\n"), "");
    }

    #[test]
    fn tabs_count_as_leading_whitespace() {
        assert_eq!(normalize_for_typing("\t\tindented"), "indented");
    }
}
