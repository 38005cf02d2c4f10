//! Typos that get corrected, right away or a few dozen characters later.

use rand::Rng;

use crate::keyboard::adjacent_key;
use crate::output::{Flow, TypedOutput};
use crate::request::TypingRequest;

/// Common words and the misspelling typed in their place.
const COMMON_MISSPELLINGS: &[(&str, &str)] = &[
    ("the", "teh"),
    ("and", "adn"),
    ("that", "taht"),
    ("with", "wiht"),
    ("have", "ahve"),
    ("this", "tihs"),
    ("from", "form"),
    ("they", "tehy"),
    ("their", "thier"),
    ("there", "tehre"),
    ("which", "whcih"),
    ("would", "woudl"),
    ("could", "coudl"),
    ("should", "shoudl"),
    ("about", "abotu"),
    ("because", "becuase"),
    ("people", "poeple"),
    ("just", "jsut"),
    ("what", "waht"),
    ("when", "wehn"),
    ("your", "yoru"),
    ("were", "wree"),
    ("been", "bene"),
    ("also", "aslo"),
    ("really", "realy"),
    ("other", "ohter"),
    ("think", "thnik"),
    ("know", "konw"),
    ("into", "inot"),
    ("some", "soem"),
    ("where", "wehre"),
    ("going", "giong"),
];

const HESITATION_TOKENS: [&str; 4] = ["um", "ah", "er", "uh"];

/// Misspelling for a common word, keeping its capitalization.
pub fn misspelling_for(word: &str) -> Option<String> {
    let lower = word.to_ascii_lowercase();
    let (_, wrong) = COMMON_MISSPELLINGS
        .iter()
        .find(|(correct, _)| *correct == lower)?;

    if word == lower {
        return Some((*wrong).to_string());
    }
    if word.chars().all(|c| c.is_ascii_uppercase()) {
        return Some(wrong.to_ascii_uppercase());
    }

    let mut chars = word.chars();
    let first_upper = chars.next().is_some_and(|c| c.is_ascii_uppercase());
    if first_upper && chars.all(|c| c.is_ascii_lowercase()) {
        let mut out = String::with_capacity(wrong.len());
        let mut wrong_chars = wrong.chars();
        if let Some(first) = wrong_chars.next() {
            out.push(first.to_ascii_uppercase());
        }
        out.extend(wrong_chars);
        return Some(out);
    }

    None
}

/// Characters that make up a word for planting misspellings and for filler detours.
pub(crate) fn is_word_char(c: char) -> bool {
    c.is_ascii_alphabetic()
}

/// Typing `c` finishes whatever word precedes it.
pub(crate) fn ends_word(c: char) -> bool {
    !is_word_char(c)
}

/// A misspelling left in the text, to be fixed later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedCorrection {
    /// Index of the misspelling's first character in the visible text.
    pub inserted_at: usize,
    pub wrong_word: String,
    pub correct_word: String,
    pub chars_since_insert: usize,
    pub threshold: usize,
}

/// Type a filler token such as "um" and take it back.
pub(crate) fn micro_hesitation(out: &mut TypedOutput) -> Flow {
    let token = HESITATION_TOKENS[out.rng.gen_range(0..HESITATION_TOKENS.len())];
    out.type_str(token)?;
    let hold = out.timing.typo_notice(&mut out.rng);
    out.wait(hold)?;
    out.backspace_n(token.chars().count())
}

pub(crate) struct MistakeInjector {
    typo_rate: f64,
    advanced: bool,
    delayed_chance: f64,
    threshold_range: (usize, usize),
    max_pending: usize,
    hesitation_chance: f64,
    pending: Vec<DelayedCorrection>,
    typos_injected: usize,
}

impl MistakeInjector {
    pub(crate) fn new(request: &TypingRequest) -> Self {
        let b = request.behavior();
        Self {
            typo_rate: request.typo_rate(),
            advanced: request.advanced_anti_detect(),
            delayed_chance: b.delayed_correction_chance,
            threshold_range: (b.correction_threshold_min, b.correction_threshold_max),
            max_pending: b.max_pending_corrections,
            hesitation_chance: b.hesitation_chance,
            pending: Vec::new(),
            typos_injected: 0,
        }
    }

    pub(crate) fn typos_injected(&self) -> usize {
        self.typos_injected
    }

    pub(crate) fn pending(&self) -> &[DelayedCorrection] {
        &self.pending
    }

    /// Typo rate in effect; halved while a delayed correction is outstanding.
    pub(crate) fn effective_typo_rate(&self) -> f64 {
        if self.pending.is_empty() {
            self.typo_rate
        } else {
            self.typo_rate / 2.0
        }
    }

    /// One more source character has been reached.
    pub(crate) fn tick(&mut self) {
        for correction in &mut self.pending {
            correction.chars_since_insert += 1;
        }
    }

    /// Fix the first correction whose threshold has been reached, if any.
    pub(crate) fn resolve_due(&mut self, out: &mut TypedOutput) -> Flow<bool> {
        let Some(idx) = self
            .pending
            .iter()
            .position(|c| c.chars_since_insert >= c.threshold)
        else {
            return Ok(false);
        };
        self.resolve(idx, out)?;
        Ok(true)
    }

    /// Fix everything still outstanding. Used before a session reports completion.
    pub(crate) fn resolve_all(&mut self, out: &mut TypedOutput) -> Flow {
        while !self.pending.is_empty() {
            self.resolve(0, out)?;
        }
        Ok(())
    }

    fn resolve(&mut self, idx: usize, out: &mut TypedOutput) -> Flow {
        let correction = self.pending.remove(idx);
        let wrong: Vec<char> = correction.wrong_word.chars().collect();
        let start = correction.inserted_at;
        let end = start + wrong.len();

        let visible = out.visible();
        if visible.get(start..end) != Some(wrong.as_slice()) {
            tracing::warn!(
                wrong = %correction.wrong_word,
                at = start,
                "misspelling no longer where it was typed, skipping correction"
            );
            return Ok(());
        }
        let tail: Vec<char> = visible[end..].to_vec();

        tracing::debug!(
            wrong = %correction.wrong_word,
            correct = %correction.correct_word,
            retyped = tail.len(),
            "resolving delayed correction"
        );

        let notice = out.timing.typo_notice(&mut out.rng);
        out.wait(notice)?;
        out.backspace_n(tail.len() + wrong.len())?;
        out.type_str(&correction.correct_word)?;
        out.type_chars(&tail)?;

        let correct_len = correction.correct_word.chars().count();
        for other in &mut self.pending {
            if other.inserted_at > start {
                other.inserted_at = other.inserted_at + correct_len - wrong.len();
            }
        }
        Ok(())
    }

    /// Called before a word-ending character is typed. May swap the word that was just
    /// finished for a misspelling and remember to fix it later.
    pub(crate) fn maybe_plant(&mut self, out: &mut TypedOutput) -> Flow<bool> {
        if !self.advanced
            || self.typo_rate <= 0.0
            || self.pending.len() >= self.max_pending
        {
            return Ok(false);
        }

        let visible = out.visible();
        let word_len = visible
            .iter()
            .rev()
            .take_while(|&&c| is_word_char(c))
            .count();
        if word_len == 0 {
            return Ok(false);
        }
        let start = visible.len() - word_len;
        let word: String = visible[start..].iter().collect();
        let Some(wrong) = misspelling_for(&word) else {
            return Ok(false);
        };
        if !out.rng.gen_bool(self.delayed_chance) {
            return Ok(false);
        }

        tracing::debug!(%word, %wrong, "planting delayed correction");
        out.backspace_n(word_len)?;
        out.type_str(&wrong)?;

        let (lo, hi) = self.threshold_range;
        let threshold = out.rng.gen_range(lo..=hi);
        self.pending.push(DelayedCorrection {
            inserted_at: start,
            wrong_word: wrong,
            correct_word: word,
            chars_since_insert: 0,
            threshold,
        });
        self.typos_injected += 1;
        Ok(true)
    }

    /// Hit a neighboring key instead of `c`, notice, and erase it. The caller types `c`.
    pub(crate) fn maybe_immediate_typo(&mut self, out: &mut TypedOutput, c: char) -> Flow<bool> {
        let rate = self.effective_typo_rate();
        if rate <= 0.0 || c.is_whitespace() {
            return Ok(false);
        }
        if !out.rng.gen_bool(rate) {
            return Ok(false);
        }
        let Some(wrong) = adjacent_key(c, &mut out.rng) else {
            return Ok(false);
        };

        out.press(wrong)?;
        let notice = out.timing.typo_notice(&mut out.rng);
        out.wait(notice)?;
        out.backspace()?;
        self.typos_injected += 1;
        Ok(true)
    }

    pub(crate) fn maybe_hesitate(&mut self, out: &mut TypedOutput) -> Flow<bool> {
        if !self.advanced || self.hesitation_chance <= 0.0 {
            return Ok(false);
        }
        if !out.rng.gen_bool(self.hesitation_chance) {
            return Ok(false);
        }
        micro_hesitation(out)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misspelling_keeps_capitalization() {
        assert_eq!(misspelling_for("the").as_deref(), Some("teh"));
        assert_eq!(misspelling_for("The").as_deref(), Some("Teh"));
        assert_eq!(misspelling_for("THE").as_deref(), Some("TEH"));
        assert_eq!(misspelling_for("tHe"), None);
        assert_eq!(misspelling_for("zebra"), None);
    }

    #[test]
    fn every_misspelling_differs_and_is_plain_ascii() {
        for (correct, wrong) in COMMON_MISSPELLINGS {
            assert_ne!(correct, wrong);
            assert!(wrong.chars().all(|c| c.is_ascii_lowercase()), "{wrong}");
        }
    }
}
