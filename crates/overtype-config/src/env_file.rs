//! Key-value provider configuration file.
//!
//! The on-disk format is part of the external contract: one `KEY=value`
//! per line, `#` comment lines, values optionally quoted. Keys whose
//! values are empty, absent, or still contain a placeholder marker are
//! treated as unset.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use overtype_foundation::ConfigError;

/// Substrings that mark a value as never having been filled in.
const PLACEHOLDER_MARKERS: [&str; 3] = ["your-api-key", "placeholder", "changeme"];

#[derive(Debug, Clone, Default)]
pub struct EnvFile {
    values: BTreeMap<String, String>,
}

impl EnvFile {
    pub fn parse(raw: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::warn!(line, "Skipping malformed config line");
                continue;
            };
            let key = key.trim().to_string();
            let value = unquote(value.trim()).to_string();
            values.insert(key, value);
        }
        Self { values }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Self::parse(&raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No provider config file");
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source: err,
            }),
        }
    }

    /// A key is set only if present, nonempty, and not a placeholder.
    pub fn get(&self, key: &str) -> Option<&str> {
        let value = self.values.get(key)?;
        if value.is_empty() {
            return None;
        }
        let lower = value.to_ascii_lowercase();
        if PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m)) {
            return None;
        }
        Some(value)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Raw value regardless of placeholder status, for diagnostics.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comments_and_pairs() {
        let env = EnvFile::parse(
            "# provider keys\nOPENAI_API_KEY=sk-abc123\n\nANTHROPIC_API_KEY=\"sk-ant-xyz\"\n",
        );
        assert_eq!(env.get("OPENAI_API_KEY"), Some("sk-abc123"));
        assert_eq!(env.get("ANTHROPIC_API_KEY"), Some("sk-ant-xyz"));
    }

    #[test]
    fn empty_and_placeholder_values_are_unset() {
        let env = EnvFile::parse(
            "OPENAI_API_KEY=\nGROQ_API_KEY=your-api-key-here\nGEMINI_API_KEY=PLACEHOLDER\n",
        );
        assert!(!env.is_set("OPENAI_API_KEY"));
        assert!(!env.is_set("GROQ_API_KEY"));
        assert!(!env.is_set("GEMINI_API_KEY"));
        assert!(!env.is_set("NEVER_MENTIONED"));
        // Raw value is still visible for diagnostics.
        assert_eq!(env.raw("GROQ_API_KEY"), Some("your-api-key-here"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let env = EnvFile::parse("not a pair\nGOOD=1\n");
        assert_eq!(env.get("GOOD"), Some("1"));
        assert_eq!(env.keys().count(), 1);
    }

    #[test]
    fn values_may_contain_equals() {
        let env = EnvFile::parse("TOKEN=abc=def==\n");
        assert_eq!(env.get("TOKEN"), Some("abc=def=="));
    }
}
