//! Guess feedback marks and history rows
//!
//! Feedback strings may use emoji squares (`🟩🟨⬛⬜`) or letter codes
//! (`G`/`Y`/`B`/`X`/`-`/`.`, or `2`/`1`/`0`). Unrecognized symbols are read
//! as gray unless strict parsing is requested.

use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use crate::error::{EngineError, Result};
use crate::language::{Language, WORD_LEN, normalize_word};

/// Per-position feedback signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mark {
    /// Letter absent (subject to per-row duplicate counting)
    Gray,
    /// Letter present at another position
    Yellow,
    /// Letter correct at this position
    Green,
}

impl Mark {
    /// Parse a single feedback symbol. Returns `None` for unknown symbols.
    pub fn from_symbol(c: char) -> Option<Self> {
        match c {
            '🟩' | 'G' | 'g' | '2' => Some(Mark::Green),
            '🟨' | '🟧' | 'Y' | 'y' | '1' => Some(Mark::Yellow),
            '⬛' | '⬜' | 'B' | 'b' | 'X' | 'x' | '-' | '_' | '.' | '0' => Some(Mark::Gray),
            _ => None,
        }
    }

    pub fn is_colored(self) -> bool {
        !matches!(self, Mark::Gray)
    }

    pub fn emoji(self) -> char {
        match self {
            Mark::Green => '🟩',
            Mark::Yellow => '🟨',
            Mark::Gray => '⬛',
        }
    }

    /// Single-letter code used in model prompts.
    pub fn code(self) -> char {
        match self {
            Mark::Green => 'G',
            Mark::Yellow => 'Y',
            Mark::Gray => 'X',
        }
    }
}

/// Feedback for one guessed word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Feedback(pub [Mark; WORD_LEN]);

impl Feedback {
    pub const SOLVED: Feedback = Feedback([Mark::Green; WORD_LEN]);

    /// Parse a feedback string.
    ///
    /// Emoji variation selectors and whitespace are ignored. With `strict`,
    /// unknown symbols are rejected; otherwise they are read as gray.
    pub fn parse(text: &str, strict: bool) -> Result<Self> {
        let symbols: Vec<char> = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\u{fe0f}')
            .collect();
        if symbols.len() != WORD_LEN {
            return Err(EngineError::InvalidFeedback(format!(
                "expected {} marks, got {} in '{}'",
                WORD_LEN,
                symbols.len(),
                text
            )));
        }

        let mut marks = [Mark::Gray; WORD_LEN];
        for (slot, &symbol) in marks.iter_mut().zip(&symbols) {
            *slot = match Mark::from_symbol(symbol) {
                Some(mark) => mark,
                None if strict => {
                    return Err(EngineError::InvalidFeedback(format!(
                        "unknown mark '{}' in '{}'",
                        symbol, text
                    )));
                }
                None => {
                    warn!("Unknown feedback mark {:?}, reading as gray", symbol);
                    Mark::Gray
                }
            };
        }
        Ok(Feedback(marks))
    }

    /// Score `guess` against `answer` with Wordle duplicate-letter rules.
    ///
    /// Greens are assigned first; yellows then consume the remaining copies of
    /// each answer letter from left to right.
    pub fn score(guess: &str, answer: &str) -> Self {
        let guess: Vec<char> = guess.chars().collect();
        let answer: Vec<char> = answer.chars().collect();
        let mut marks = [Mark::Gray; WORD_LEN];
        let mut remaining: HashMap<char, usize> = HashMap::new();

        for i in 0..WORD_LEN.min(guess.len()).min(answer.len()) {
            if guess[i] == answer[i] {
                marks[i] = Mark::Green;
            } else {
                *remaining.entry(answer[i]).or_default() += 1;
            }
        }
        for i in 0..WORD_LEN.min(guess.len()) {
            if marks[i] == Mark::Green {
                continue;
            }
            if let Some(count) = remaining.get_mut(&guess[i])
                && *count > 0
            {
                marks[i] = Mark::Yellow;
                *count -= 1;
            }
        }
        Feedback(marks)
    }

    pub fn is_solved(&self) -> bool {
        self.0.iter().all(|&m| m == Mark::Green)
    }

    pub fn marks(&self) -> &[Mark; WORD_LEN] {
        &self.0
    }

    pub fn to_codes(&self) -> String {
        self.0.iter().map(|m| m.code()).collect()
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for mark in &self.0 {
            write!(f, "{}", mark.emoji())?;
        }
        Ok(())
    }
}

/// One guessed word together with its feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    word: String,
    letters: [char; WORD_LEN],
    feedback: Feedback,
}

impl HistoryEntry {
    pub fn new(word: &str, feedback: Feedback, language: Language) -> Result<Self> {
        let word =
            normalize_word(word, language).ok_or_else(|| EngineError::InvalidWord(word.into()))?;
        let mut letters = [' '; WORD_LEN];
        for (slot, c) in letters.iter_mut().zip(word.chars()) {
            *slot = c;
        }
        Ok(Self {
            word,
            letters,
            feedback,
        })
    }

    /// Parse a `(word, feedback string)` row.
    pub fn parse(word: &str, feedback: &str, language: Language, strict: bool) -> Result<Self> {
        Self::new(word, Feedback::parse(feedback, strict)?, language)
    }

    pub fn word(&self) -> &str {
        &self.word
    }

    pub fn letters(&self) -> &[char; WORD_LEN] {
        &self.letters
    }

    pub fn feedback(&self) -> &Feedback {
        &self.feedback
    }

    /// Iterate `(position, letter, mark)` triples.
    pub fn cells(&self) -> impl Iterator<Item = (usize, char, Mark)> + '_ {
        self.letters
            .iter()
            .zip(self.feedback.0.iter())
            .enumerate()
            .map(|(i, (&c, &m))| (i, c, m))
    }
}

/// Parse a whole history given as `(word, feedback)` string pairs.
pub fn parse_history<W, F>(
    rows: &[(W, F)],
    language: Language,
    strict: bool,
) -> Result<Vec<HistoryEntry>>
where
    W: AsRef<str>,
    F: AsRef<str>,
{
    rows.iter()
        .map(|(w, f)| HistoryEntry::parse(w.as_ref(), f.as_ref(), language, strict))
        .collect()
}
