//! Per-language views of the tokenizer vocabulary
//!
//! Sampling is restricted to ids that decode to a single letter of the target
//! language, and the opener pool consists of ids that decode to a whole word.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::language::{Language, WORD_LEN, normalize_word};
use crate::tokenizer::Tokenizer;

/// Letter and word id maps for one language.
#[derive(Debug, Clone, Default)]
pub struct LanguageVocab {
    letter_by_id: HashMap<u32, char>,
    /// Letter → ids in ascending order
    ids_by_letter: BTreeMap<char, Vec<u32>>,
    /// Sorted candidate ids for the letter positions
    letter_ids: Vec<u32>,
    word_by_id: BTreeMap<u32, String>,
    words: BTreeSet<String>,
}

impl LanguageVocab {
    pub fn letter_of(&self, id: u32) -> Option<char> {
        self.letter_by_id.get(&id).copied()
    }

    /// Ids that decode to `letter`, ascending.
    pub fn ids_for(&self, letter: char) -> &[u32] {
        self.ids_by_letter
            .get(&letter)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Preferred id to feed back into the model for `letter`.
    pub fn id_for(&self, letter: char) -> Option<u32> {
        self.ids_for(letter).first().copied()
    }

    /// All single-letter candidate ids, ascending.
    pub fn letter_ids(&self) -> &[u32] {
        &self.letter_ids
    }

    /// Whole-word candidate ids with their words, ascending by id.
    pub fn word_entries(&self) -> impl Iterator<Item = (u32, &str)> {
        self.word_by_id.iter().map(|(&id, w)| (id, w.as_str()))
    }

    pub fn word_of(&self, id: u32) -> Option<&str> {
        self.word_by_id.get(&id).map(String::as_str)
    }

    pub fn word_count(&self) -> usize {
        self.word_by_id.len()
    }

    /// Distinct whole words known from the vocabulary.
    pub fn words(&self) -> &BTreeSet<String> {
        &self.words
    }
}

/// Vocabulary maps for every supported language, built once per engine.
#[derive(Debug, Clone, Default)]
pub struct VocabMaps {
    languages: HashMap<Language, LanguageVocab>,
    /// Returned for languages that were not built
    empty: LanguageVocab,
}

impl VocabMaps {
    pub fn build(tokenizer: &Tokenizer, languages: &[Language]) -> Self {
        let mut maps = Self::default();
        for &language in languages {
            maps.languages.insert(language, LanguageVocab::default());
        }

        for id in 0..tokenizer.vocab_size() as u32 {
            if tokenizer.is_special(id) || tokenizer.piece(id).is_none() {
                continue;
            }
            let decoded = match tokenizer.decode(&[id]) {
                Ok(decoded) => decoded,
                Err(e) => {
                    debug!("Skipping token {}: {}", id, e);
                    continue;
                }
            };
            let text = decoded.trim().to_lowercase();
            let mut chars = text.chars();
            let single = match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => None,
            };

            for (&language, vocab) in maps.languages.iter_mut() {
                if let Some(c) = single
                    && language.is_letter(c)
                {
                    vocab.letter_by_id.insert(id, c);
                    vocab.ids_by_letter.entry(c).or_default().push(id);
                    vocab.letter_ids.push(id);
                } else if text.chars().count() == WORD_LEN
                    && let Some(word) = normalize_word(&text, language)
                {
                    vocab.words.insert(word.clone());
                    vocab.word_by_id.insert(id, word);
                }
            }
        }

        for (language, vocab) in &maps.languages {
            debug!(
                "Vocab maps for {}: {} letter ids, {} word ids",
                language,
                vocab.letter_ids.len(),
                vocab.word_by_id.len()
            );
        }
        maps
    }

    /// Maps for `language`; empty when the language was not built.
    pub fn get(&self, language: Language) -> &LanguageVocab {
        self.languages.get(&language).unwrap_or(&self.empty)
    }

    pub fn languages(&self) -> impl Iterator<Item = Language> + '_ {
        self.languages.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::AddedToken;

    fn tokenizer() -> Tokenizer {
        let pieces = ["<unk>", "a", "b", "▁c", "C", "ñ", "crane", "▁slate", "ab", "toolong"];
        let vocab = pieces
            .iter()
            .enumerate()
            .map(|(i, p)| (p.to_string(), i as u32))
            .collect();
        let added = vec![AddedToken {
            id: 0,
            content: "<unk>".into(),
            special: true,
        }];
        Tokenizer::new(vocab, Vec::new(), added).unwrap()
    }

    #[test]
    fn test_letters_per_language() {
        let maps = VocabMaps::build(&tokenizer(), &[Language::En, Language::Es]);
        let en = maps.get(Language::En);
        assert_eq!(en.letter_of(1), Some('a'));
        assert_eq!(en.letter_of(3), Some('c'));
        assert_eq!(en.letter_of(4), Some('c'));
        assert_eq!(en.letter_of(5), None);
        assert_eq!(en.ids_for('c'), &[3, 4]);
        assert_eq!(en.id_for('c'), Some(3));

        let es = maps.get(Language::Es);
        assert_eq!(es.letter_of(5), Some('ñ'));
    }

    #[test]
    fn test_whole_words() {
        let maps = VocabMaps::build(&tokenizer(), &[Language::En]);
        let en = maps.get(Language::En);
        assert_eq!(en.word_of(6), Some("crane"));
        assert_eq!(en.word_of(7), Some("slate"));
        assert_eq!(en.word_of(9), None);
        assert_eq!(en.word_count(), 2);
        assert!(en.words().contains("slate"));
    }

    #[test]
    fn test_special_ids_excluded() {
        let maps = VocabMaps::build(&tokenizer(), &[Language::En]);
        assert!(!maps.get(Language::En).letter_ids().contains(&0));
    }

    #[test]
    fn test_unbuilt_language_is_empty() {
        let maps = VocabMaps::build(&tokenizer(), &[Language::En]);
        assert!(maps.get(Language::De).letter_ids().is_empty());
        assert_eq!(maps.get(Language::De).word_count(), 0);
        assert_eq!(maps.languages().collect::<Vec<_>>(), vec![Language::En]);
    }
}
