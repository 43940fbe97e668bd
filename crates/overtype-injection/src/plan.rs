//! Keystroke plan for a delete-and-type operation.
//!
//! The plan is backend-independent: backspaces strictly precede the
//! replacement text, newlines become Enter, tabs follow the user's tab
//! policy, and humanized timing (including rare typo-then-backspace runs)
//! is decided here so every backend behaves identically.

use std::time::Duration;

/// Humanized inter-keystroke timing: ~55 ms center with ±25 ms jitter.
const HUMAN_DELAY_CENTER_MS: u64 = 55;
const HUMAN_DELAY_JITTER_MS: u64 = 25;

/// At most one synthetic typo per this many characters.
const TYPO_BLOCK_CHARS: usize = 40;

/// Chance that an eligible block actually gets a typo.
const TYPO_CHANCE: f32 = 0.35;
const ULTRA_TYPO_CHANCE: f32 = 0.7;

const TAB_SPACES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStep {
    Backspace,
    Char(char),
    Enter,
    Tab,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedKey {
    pub step: KeyStep,
    pub delay_before: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    pub humanize: bool,
    pub ultra_human: bool,
    pub tab_as_spaces: bool,
}

#[derive(Debug, Clone)]
pub struct InjectionPlan {
    pub keys: Vec<PlannedKey>,
}

impl InjectionPlan {
    pub fn build(text: &str, backspace_count: usize, opts: PlanOptions) -> Self {
        let mut keys = Vec::with_capacity(backspace_count + text.len());

        for _ in 0..backspace_count {
            keys.push(PlannedKey {
                step: KeyStep::Backspace,
                delay_before: backspace_delay(opts),
            });
        }

        let mut since_typo = 0usize;
        for ch in text.chars() {
            since_typo += 1;
            if opts.humanize && since_typo >= TYPO_BLOCK_CHARS && maybe_typo(opts, ch, &mut keys) {
                since_typo = 0;
            }
            let step = step_for(ch, opts, &mut keys);
            keys.push(PlannedKey {
                step,
                delay_before: char_delay(opts),
            });
        }

        Self { keys }
    }

    /// Total sleep time, used by callers sizing their patience.
    pub fn total_delay(&self) -> Duration {
        self.keys.iter().map(|k| k.delay_before).sum()
    }

    pub fn backspace_count(&self) -> usize {
        self.keys
            .iter()
            .filter(|k| k.step == KeyStep::Backspace)
            .count()
    }
}

fn step_for(ch: char, opts: PlanOptions, keys: &mut Vec<PlannedKey>) -> KeyStep {
    match ch {
        '\n' => KeyStep::Enter,
        '\r' => KeyStep::Enter,
        '\t' if opts.tab_as_spaces => {
            // Emit n-1 spaces here; the caller pushes the final one.
            for _ in 0..TAB_SPACES - 1 {
                keys.push(PlannedKey {
                    step: KeyStep::Char(' '),
                    delay_before: char_delay(opts),
                });
            }
            KeyStep::Char(' ')
        }
        '\t' => KeyStep::Tab,
        other => KeyStep::Char(other),
    }
}

/// Occasionally mistype a neighbor key and immediately backspace it.
/// Purely observable texture; the net text is unchanged.
fn maybe_typo(opts: PlanOptions, intended: char, keys: &mut Vec<PlannedKey>) -> bool {
    let chance = if opts.ultra_human {
        ULTRA_TYPO_CHANCE
    } else {
        TYPO_CHANCE
    };
    if !intended.is_ascii_alphabetic() || fastrand::f32() >= chance {
        return false;
    }
    keys.push(PlannedKey {
        step: KeyStep::Char(neighbor_key(intended)),
        delay_before: char_delay(opts),
    });
    keys.push(PlannedKey {
        step: KeyStep::Backspace,
        delay_before: char_delay(opts),
    });
    true
}

fn neighbor_key(ch: char) -> char {
    const ROWS: [&str; 3] = ["qwertyuiop", "asdfghjkl", "zxcvbnm"];
    let lower = ch.to_ascii_lowercase();
    for row in ROWS {
        if let Some(pos) = row.find(lower) {
            let bytes = row.as_bytes();
            let neighbor = if pos + 1 < row.len() {
                bytes[pos + 1]
            } else {
                bytes[pos - 1]
            } as char;
            return if ch.is_ascii_uppercase() {
                neighbor.to_ascii_uppercase()
            } else {
                neighbor
            };
        }
    }
    ch
}

fn char_delay(opts: PlanOptions) -> Duration {
    if !opts.humanize {
        return Duration::ZERO;
    }
    let jitter = fastrand::i64(-(HUMAN_DELAY_JITTER_MS as i64)..=HUMAN_DELAY_JITTER_MS as i64);
    let ms = (HUMAN_DELAY_CENTER_MS as i64 + jitter).max(1) as u64;
    Duration::from_millis(ms)
}

/// Backspaces run faster than typed text even when humanized.
fn backspace_delay(opts: PlanOptions) -> Duration {
    if !opts.humanize {
        return Duration::ZERO;
    }
    Duration::from_millis(fastrand::u64(10..=30))
}
