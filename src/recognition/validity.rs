//! Plausibility checks for recognized words
//!
//! The recognizer always emits something, even for smudges and stray
//! strokes. Words that cannot be Russian text are replaced with
//! [`INVALID_MARKER`] and dropped when the transcript is assembled.

use crate::config::RecognitionConfig;

/// Placeholder text for a rejected word
pub const INVALID_MARKER: &str = "[INVALID]";

/// Filter selected by `recognition.filter_invalid`
pub fn filter_for(config: &RecognitionConfig) -> Box<dyn ValidityFilter> {
    if config.filter_invalid {
        Box::new(PlausibleWordFilter::default())
    } else {
        Box::new(AcceptAll)
    }
}

/// Decides whether a recognized word is worth keeping
pub trait ValidityFilter {
    fn is_plausible(&self, text: &str) -> bool;

    /// The text itself, or [`INVALID_MARKER`] when rejected
    fn screen(&self, text: String) -> String {
        if self.is_plausible(&text) {
            text
        } else {
            INVALID_MARKER.to_string()
        }
    }
}

/// Keeps every word
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ValidityFilter for AcceptAll {
    fn is_plausible(&self, _text: &str) -> bool {
        true
    }
}

/// Heuristic filter for Cyrillic handwriting.
///
/// After dropping punctuation, a word is rejected when it is empty, mixes
/// Cyrillic and Latin letters, is mostly repeated characters, mixes digits
/// with Cyrillic letters, or is Latin only. Pure numbers pass.
#[derive(Debug, Clone, Copy)]
pub struct PlausibleWordFilter {
    /// Minimum share of distinct characters
    pub min_unique_ratio: f32,
}

impl Default for PlausibleWordFilter {
    fn default() -> Self {
        Self {
            min_unique_ratio: 0.5,
        }
    }
}

fn is_cyrillic(c: char) -> bool {
    matches!(c, 'А'..='я' | 'Ё' | 'ё')
}

fn is_latin(c: char) -> bool {
    c.is_ascii_alphabetic()
}

impl ValidityFilter for PlausibleWordFilter {
    fn is_plausible(&self, text: &str) -> bool {
        let cleaned: Vec<char> = text
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if cleaned.is_empty() {
            return false;
        }

        let has_cyrillic = cleaned.iter().any(|&c| is_cyrillic(c));
        let has_latin = cleaned.iter().any(|&c| is_latin(c));
        if has_cyrillic && has_latin {
            return false;
        }

        let mut unique = cleaned.clone();
        unique.sort_unstable();
        unique.dedup();
        if (unique.len() as f32) / (cleaned.len() as f32) < self.min_unique_ratio {
            return false;
        }

        if has_cyrillic && cleaned.iter().any(|c| c.is_numeric()) {
            return false;
        }

        !has_latin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plausible_words() {
        let filter = PlausibleWordFilter::default();
        assert!(filter.is_plausible("привет"));
        assert!(filter.is_plausible("Ёжик,"));
        assert!(filter.is_plausible("42"));
        assert!(filter.is_plausible("(дом)"));
    }

    #[test]
    fn test_rejected_words() {
        let filter = PlausibleWordFilter::default();
        assert!(!filter.is_plausible(""));
        assert!(!filter.is_plausible("..."));
        assert!(!filter.is_plausible("дoм")); // Latin 'o'
        assert!(!filter.is_plausible("hello"));
        assert!(!filter.is_plausible("ааааб"));
        assert!(!filter.is_plausible("дом2"));
    }

    #[test]
    fn test_screen_replaces_rejected() {
        let filter = PlausibleWordFilter::default();
        assert_eq!(filter.screen("слово".to_string()), "слово");
        assert_eq!(filter.screen("word".to_string()), INVALID_MARKER);
        assert_eq!(AcceptAll.screen("word".to_string()), "word");
    }

    #[test]
    fn test_filter_follows_config() {
        let mut config = RecognitionConfig::default();
        assert_eq!(filter_for(&config).screen("word".to_string()), INVALID_MARKER);
        config.filter_invalid = false;
        assert_eq!(filter_for(&config).screen("word".to_string()), "word");
    }
}
