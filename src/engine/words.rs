//! Word reconstruction from the letter-key stream.
//!
//! Letters accumulate into a tentative buffer while each press follows the
//! previous one within the boundary timeout. A backspace pops the last
//! buffered letter and charges editing time; any other non-letter key, a
//! timeout, or a burst close finalizes the buffer into a candidate word.

use crate::dictionary::{Dictionary, MIN_WORD_LENGTH};
use crate::hasher::WordHasher;
use crate::keymap;

/// A dictionary-validated word observation ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedWord {
    /// Canonical-case form (dictionary casing).
    pub word: String,
    pub layout: String,
    pub total_letters: u32,
    pub total_duration_ms: i64,
    pub speed_ms_per_letter: f64,
    pub backspace_count: u32,
    pub editing_time_ms: i64,
    pub last_seen_ms: i64,
}

pub struct WordSegmenter {
    boundary_timeout_ms: i64,
    buffer: Vec<(char, i64)>,
    backspace_count: u32,
    editing_time_ms: i64,
}

impl WordSegmenter {
    pub fn new(boundary_timeout_ms: i64) -> Self {
        WordSegmenter {
            boundary_timeout_ms,
            buffer: Vec::new(),
            backspace_count: 0,
            editing_time_ms: 0,
        }
    }

    /// Feeds one press. May finalize the buffered word (boundary timeout or
    /// non-letter key) and returns it when it survives validation.
    pub fn on_press(
        &mut self,
        keycode: u16,
        key_name: &str,
        timestamp_ms: i64,
        layout: &str,
        dictionary: &Dictionary,
        hasher: &WordHasher,
    ) -> Option<FinalizedWord> {
        if keycode == keymap::KEY_BACKSPACE {
            if let Some((_, last_ms)) = self.buffer.last().copied() {
                self.buffer.pop();
                self.backspace_count += 1;
                self.editing_time_ms += (timestamp_ms - last_ms).max(0);
                if let Some(last) = self.buffer.last_mut() {
                    // Editing continues the word; later gaps measure from here.
                    last.1 = timestamp_ms;
                }
            }
            return None;
        }

        if !keymap::is_letter_key(key_name) {
            return self.finalize(layout, dictionary, hasher);
        }

        let letter = key_name.chars().next()?;
        if let Some((_, last_ms)) = self.buffer.last().copied() {
            if timestamp_ms - last_ms > self.boundary_timeout_ms {
                let finalized = self.finalize(layout, dictionary, hasher);
                self.buffer.push((letter, timestamp_ms));
                return finalized;
            }
        }
        self.buffer.push((letter, timestamp_ms));
        None
    }

    /// Finalizes the buffer (burst close or shutdown).
    pub fn flush(
        &mut self,
        layout: &str,
        dictionary: &Dictionary,
        hasher: &WordHasher,
    ) -> Option<FinalizedWord> {
        self.finalize(layout, dictionary, hasher)
    }

    fn finalize(
        &mut self,
        layout: &str,
        dictionary: &Dictionary,
        hasher: &WordHasher,
    ) -> Option<FinalizedWord> {
        let buffer = std::mem::take(&mut self.buffer);
        let backspace_count = std::mem::take(&mut self.backspace_count);
        let editing_time_ms = std::mem::take(&mut self.editing_time_ms);

        if buffer.len() < MIN_WORD_LENGTH {
            return None;
        }

        let lower: String = buffer.iter().flat_map(|(c, _)| c.to_lowercase()).collect();
        if !lower.chars().all(char::is_alphabetic) {
            return None;
        }
        // A run of one repeated letter is key chatter, not a word.
        let mut chars = lower.chars();
        let first_char = chars.next()?;
        if chars.all(|c| c == first_char) {
            return None;
        }
        if dictionary.is_abbreviation(&lower) {
            return None;
        }
        if !dictionary.is_valid_word(&lower) {
            return None;
        }
        if dictionary.is_ignored(&lower, hasher) || dictionary.is_name(&lower) {
            return None;
        }

        let first_ms = buffer.first().map(|(_, t)| *t)?;
        let last_ms = buffer.last().map(|(_, t)| *t)?;
        let total_duration_ms = (last_ms - first_ms).max(0);
        let total_letters = buffer.len() as u32;

        Some(FinalizedWord {
            word: dictionary.get_capitalized_form(&lower),
            layout: layout.to_string(),
            total_letters,
            total_duration_ms,
            speed_ms_per_letter: total_duration_ms as f64 / f64::from(total_letters),
            backspace_count,
            editing_time_ms,
            last_seen_ms: last_ms,
        })
    }
}
