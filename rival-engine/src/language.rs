//! Supported game languages and their letter statistics

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Number of letters in every guess.
pub const WORD_LEN: usize = 5;

/// A game language with its own alphabet and letter statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
    De,
    Fr,
}

// Approximate letter frequencies in percent, most frequent first.
const EN_FREQ: &[(char, f32)] = &[
    ('e', 12.7),
    ('t', 9.1),
    ('a', 8.2),
    ('o', 7.5),
    ('i', 7.0),
    ('n', 6.7),
    ('s', 6.3),
    ('h', 6.1),
    ('r', 6.0),
    ('d', 4.3),
    ('l', 4.0),
    ('c', 2.8),
    ('u', 2.8),
    ('m', 2.4),
    ('w', 2.4),
    ('f', 2.2),
    ('g', 2.0),
    ('y', 2.0),
    ('p', 1.9),
    ('b', 1.5),
    ('v', 1.0),
    ('k', 0.8),
    ('j', 0.15),
    ('x', 0.15),
    ('q', 0.1),
    ('z', 0.07),
];

const ES_FREQ: &[(char, f32)] = &[
    ('e', 13.7),
    ('a', 12.5),
    ('o', 8.7),
    ('s', 8.0),
    ('r', 6.9),
    ('n', 6.7),
    ('i', 6.3),
    ('d', 5.9),
    ('l', 5.0),
    ('c', 4.7),
    ('t', 4.6),
    ('u', 3.9),
    ('m', 3.2),
    ('p', 2.5),
    ('b', 1.4),
    ('g', 1.0),
    ('v', 0.9),
    ('y', 0.9),
    ('q', 0.9),
    ('h', 0.7),
    ('f', 0.7),
    ('z', 0.5),
    ('j', 0.4),
    ('ñ', 0.3),
    ('x', 0.2),
    ('k', 0.02),
    ('w', 0.02),
];

const DE_FREQ: &[(char, f32)] = &[
    ('e', 16.4),
    ('n', 9.8),
    ('s', 7.3),
    ('r', 7.0),
    ('i', 6.6),
    ('a', 6.5),
    ('t', 6.2),
    ('d', 5.1),
    ('h', 4.6),
    ('u', 4.2),
    ('l', 3.4),
    ('g', 3.0),
    ('c', 2.7),
    ('o', 2.6),
    ('m', 2.5),
    ('b', 1.9),
    ('w', 1.9),
    ('f', 1.7),
    ('k', 1.4),
    ('z', 1.1),
    ('ü', 0.99),
    ('v', 0.8),
    ('p', 0.7),
    ('ä', 0.58),
    ('ö', 0.44),
    ('ß', 0.31),
    ('j', 0.27),
    ('y', 0.04),
    ('x', 0.03),
    ('q', 0.02),
];

const FR_FREQ: &[(char, f32)] = &[
    ('e', 14.7),
    ('s', 7.9),
    ('a', 7.6),
    ('i', 7.5),
    ('t', 7.2),
    ('n', 7.1),
    ('r', 6.6),
    ('u', 6.3),
    ('o', 5.8),
    ('l', 5.5),
    ('d', 3.7),
    ('c', 3.3),
    ('m', 3.0),
    ('p', 3.0),
    ('v', 1.8),
    ('q', 1.4),
    ('f', 1.1),
    ('b', 0.9),
    ('g', 0.9),
    ('h', 0.7),
    ('j', 0.5),
    ('x', 0.4),
    ('y', 0.1),
    ('z', 0.1),
    ('w', 0.05),
    ('k', 0.05),
];

impl Language {
    pub const ALL: [Language; 4] = [Language::En, Language::Es, Language::De, Language::Fr];

    /// Two-letter language code ("en", "es", ...).
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
            Language::De => "de",
            Language::Fr => "fr",
        }
    }

    /// Letter frequency table, most frequent first.
    pub fn frequencies(self) -> &'static [(char, f32)] {
        match self {
            Language::En => EN_FREQ,
            Language::Es => ES_FREQ,
            Language::De => DE_FREQ,
            Language::Fr => FR_FREQ,
        }
    }

    /// Letters ordered by descending frequency.
    pub fn frequency_order(self) -> impl Iterator<Item = char> {
        self.frequencies().iter().map(|&(c, _)| c)
    }

    /// Unigram frequency of `letter` as a fraction (0.0 for letters outside the alphabet).
    pub fn unigram(self, letter: char) -> f32 {
        self.frequencies()
            .iter()
            .find(|&&(c, _)| c == letter)
            .map(|&(_, pct)| pct / 100.0)
            .unwrap_or(0.0)
    }

    pub fn is_letter(self, c: char) -> bool {
        self.frequencies().iter().any(|&(l, _)| l == c)
    }

    pub fn is_vowel(self, c: char) -> bool {
        match self {
            Language::En | Language::Es => matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'),
            Language::De => matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'ä' | 'ö' | 'ü'),
            Language::Fr => matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y'),
        }
    }

    /// Letters that should never appear doubled in an opener.
    pub fn hard_letters(self) -> &'static [char] {
        match self {
            Language::En => &['q', 'j', 'x', 'z'],
            _ => &[],
        }
    }

    /// Last-resort opener when neither the model nor the vocabulary yields one.
    pub fn fallback_opener(self) -> &'static str {
        match self {
            Language::En => "crane",
            Language::Es => "cerdo",
            Language::De => "karte",
            Language::Fr => "carte",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "es" | "spanish" => Ok(Language::Es),
            "de" | "german" => Ok(Language::De),
            "fr" | "french" => Ok(Language::Fr),
            other => Err(EngineError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// Lowercase `word` and check it is exactly [`WORD_LEN`] letters of `language`.
pub fn normalize_word(word: &str, language: Language) -> Option<String> {
    let lower = word.trim().to_lowercase();
    let count = lower.chars().count();
    if count == WORD_LEN && lower.chars().all(|c| language.is_letter(c)) {
        Some(lower)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_tables_sorted() {
        for lang in Language::ALL {
            let freqs = lang.frequencies();
            for pair in freqs.windows(2) {
                assert!(
                    pair[0].1 >= pair[1].1,
                    "{} table out of order at {:?}",
                    lang,
                    pair
                );
            }
        }
    }

    #[test]
    fn test_fallback_openers_are_valid() {
        for lang in Language::ALL {
            assert!(normalize_word(lang.fallback_opener(), lang).is_some());
        }
    }

    #[test]
    fn test_parse_language() {
        assert_eq!("EN".parse::<Language>().unwrap(), Language::En);
        assert_eq!("german".parse::<Language>().unwrap(), Language::De);
        assert!("xx".parse::<Language>().is_err());
    }

    #[test]
    fn test_normalize_word() {
        assert_eq!(normalize_word("CRANE", Language::En).as_deref(), Some("crane"));
        assert_eq!(normalize_word("niño", Language::Es), None);
        assert_eq!(normalize_word("niños", Language::Es).as_deref(), Some("niños"));
        assert_eq!(normalize_word("niños", Language::En), None);
        assert_eq!(normalize_word("cranes", Language::En), None);
    }

    #[test]
    fn test_unigram_lookup() {
        assert!((Language::En.unigram('e') - 0.127).abs() < 1e-6);
        assert_eq!(Language::En.unigram('ñ'), 0.0);
        assert_eq!(Language::En.frequency_order().next(), Some('e'));
    }
}
