//! Sensitive-context classification.
//!
//! A window is sensitive when its title or process identity matches the
//! built-in privacy list or a user-supplied pattern. While a sensitive
//! window holds focus the buffer runs in shadow mode: no trigger fires,
//! and the buffer resets when focus moves away.

use regex::RegexSet;

/// Built-in substrings checked case-insensitively against both the window
/// title and the process identity.
const BUILTIN_MARKERS: [&str; 14] = [
    "password",
    "passphrase",
    "1password",
    "bitwarden",
    "keepass",
    "lastpass",
    "login",
    "log in",
    "sign in",
    "signin",
    "authenticat",
    "banking",
    "incognito",
    "private browsing",
];

pub struct SensitiveClassifier {
    user_patterns: Option<RegexSet>,
}

impl Default for SensitiveClassifier {
    fn default() -> Self {
        Self {
            user_patterns: None,
        }
    }
}

impl SensitiveClassifier {
    /// Build with extra user patterns; invalid patterns are rejected as a
    /// whole so a typo is noticed instead of silently weakening privacy.
    pub fn with_patterns(patterns: &[String]) -> Result<Self, regex::Error> {
        let user_patterns = if patterns.is_empty() {
            None
        } else {
            Some(RegexSet::new(patterns.iter().map(|p| format!("(?i){p}")))?)
        };
        Ok(Self { user_patterns })
    }

    pub fn is_sensitive(&self, window_title: &str, process_identity: &str) -> bool {
        let title = window_title.to_lowercase();
        let process = process_identity.to_lowercase();

        if BUILTIN_MARKERS
            .iter()
            .any(|m| title.contains(m) || process.contains(m))
        {
            return true;
        }

        if let Some(set) = &self.user_patterns {
            if set.is_match(window_title) || set.is_match(process_identity) {
                return true;
            }
        }
        false
    }
}
