//! Hard letter constraints derived from guess feedback
//!
//! The state is rebuilt from the full history on every call. Per row, each
//! letter's colored (green + yellow) and gray copies are counted:
//!
//! - `min_count` is the largest colored count seen in any single row
//! - a row with both colored and gray copies caps `max_count` at its colored count
//! - a letter that is gray in some row and colored in none is disallowed (`max = 0`)
//! - defined maxima never exceed the richest single-row colored count

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::feedback::{HistoryEntry, Mark};
use crate::language::WORD_LEN;
use crate::vocab::LanguageVocab;

/// Number of occurrences of `letter` in `used`.
pub fn count_in(used: &[char], letter: char) -> usize {
    used.iter().filter(|&&c| c == letter).count()
}

/// Hard bounds a guess must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintState {
    /// Letter forced at each position (green)
    pub fixed: [Option<char>; WORD_LEN],
    /// Letters forbidden at each position (yellow / gray at that position)
    pub banned_at: [BTreeSet<char>; WORD_LEN],
    /// Letters forbidden everywhere
    pub disallow: BTreeSet<char>,
    pub min_count: BTreeMap<char, usize>,
    pub max_count: BTreeMap<char, usize>,
}

impl ConstraintState {
    /// Build the state for a complete history.
    pub fn from_history(history: &[HistoryEntry]) -> Self {
        let mut model = ConstraintModel::new();
        model.ingest(history)
    }

    pub fn min_of(&self, letter: char) -> usize {
        self.min_count.get(&letter).copied().unwrap_or(0)
    }

    pub fn max_of(&self, letter: char) -> Option<usize> {
        self.max_count.get(&letter).copied()
    }

    /// Whether placing `letter` at `position` after `used` keeps every hard bound.
    pub fn permits(&self, position: usize, letter: char, used: &[char]) -> bool {
        if let Some(fixed) = self.fixed[position] {
            return letter == fixed;
        }
        if self.disallow.contains(&letter) || self.banned_at[position].contains(&letter) {
            return false;
        }
        match self.max_of(letter) {
            Some(max) => count_in(used, letter) < max,
            None => true,
        }
    }

    /// Mask every letter candidate in `logits` that the constraints forbid at `position`.
    pub fn apply(&self, position: usize, used: &[char], logits: &mut [f32], vocab: &LanguageVocab) {
        for &id in vocab.letter_ids() {
            let Some(slot) = logits.get_mut(id as usize) else {
                continue;
            };
            let Some(letter) = vocab.letter_of(id) else {
                continue;
            };
            if !self.permits(position, letter, used) {
                *slot = f32::NEG_INFINITY;
            }
        }
    }

    /// Copies still required to reach every minimum, given `used`.
    pub fn deficit(&self, used: &[char]) -> usize {
        self.min_count
            .iter()
            .map(|(&c, &min)| min.saturating_sub(count_in(used, c)))
            .sum()
    }

    /// Letters whose minimum is not yet reached by `used`.
    pub fn needed_letters(&self, used: &[char]) -> Vec<char> {
        self.min_count
            .iter()
            .filter(|&(&c, &min)| count_in(used, c) < min)
            .map(|(&c, _)| c)
            .collect()
    }

    /// Copies of `letter` a guess may carry once all minimums are satisfied.
    pub fn allowed_copies(&self, letter: char) -> usize {
        self.max_of(letter)
            .unwrap_or_else(|| self.min_of(letter).max(1))
    }

    /// Whether a complete word satisfies every constraint.
    pub fn matches_word(&self, word: &str) -> bool {
        let letters: Vec<char> = word.chars().collect();
        if letters.len() != WORD_LEN {
            return false;
        }
        for (i, &c) in letters.iter().enumerate() {
            if let Some(fixed) = self.fixed[i] {
                if c != fixed {
                    return false;
                }
            } else if self.banned_at[i].contains(&c) || self.disallow.contains(&c) {
                return false;
            }
        }
        let counts_ok = self.min_count.iter().all(|(&c, &min)| count_in(&letters, c) >= min);
        let max_ok = self
            .max_count
            .iter()
            .all(|(&c, &max)| count_in(&letters, c) <= max);
        counts_ok && max_ok
    }

    /// `used` extended with the fixed letters of every position after `position`.
    ///
    /// Count bounds are checked against this projection so that a later green
    /// is already accounted for when sampling earlier positions.
    pub fn with_future_fixed(&self, position: usize, used: &[char]) -> Vec<char> {
        let mut projected = used.to_vec();
        projected.extend(self.fixed.iter().skip(position + 1).flatten());
        projected
    }

    /// Free (non-fixed) positions from `position` to the end of the word.
    pub fn free_positions_from(&self, position: usize) -> usize {
        self.fixed
            .iter()
            .skip(position)
            .filter(|f| f.is_none())
            .count()
    }

    /// Number of positions with a fixed letter.
    pub fn fixed_count(&self) -> usize {
        self.fixed.iter().filter(|f| f.is_some()).count()
    }
}

/// Accumulates history rows and produces a fresh [`ConstraintState`].
#[derive(Debug, Clone, Default)]
pub struct ConstraintModel {
    fixed: [Option<char>; WORD_LEN],
    banned_at: [BTreeSet<char>; WORD_LEN],
    min_count: BTreeMap<char, usize>,
    max_count: BTreeMap<char, usize>,
    /// Largest colored count of each letter in any single row
    richest: BTreeMap<char, usize>,
    /// Letters that appeared only gray in at least one row
    gray_only: BTreeSet<char>,
}

impl ConstraintModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold `history` into the model and return the resulting state.
    pub fn ingest(&mut self, history: &[HistoryEntry]) -> ConstraintState {
        for row in history {
            self.ingest_row(row);
        }
        self.state()
    }

    fn ingest_row(&mut self, row: &HistoryEntry) {
        let mut colored: BTreeMap<char, usize> = BTreeMap::new();
        let mut gray: BTreeMap<char, usize> = BTreeMap::new();

        for (i, c, mark) in row.cells() {
            match mark {
                Mark::Green => {
                    if let Some(prev) = self.fixed[i]
                        && prev != c
                    {
                        warn!(
                            "Conflicting greens at position {}: '{}' then '{}'",
                            i, prev, c
                        );
                    }
                    self.fixed[i] = Some(c);
                    *colored.entry(c).or_default() += 1;
                }
                Mark::Yellow => {
                    self.banned_at[i].insert(c);
                    *colored.entry(c).or_default() += 1;
                }
                Mark::Gray => {
                    self.banned_at[i].insert(c);
                    *gray.entry(c).or_default() += 1;
                }
            }
        }

        for (&c, &n) in &colored {
            let min = self.min_count.entry(c).or_default();
            *min = (*min).max(n);
            let richest = self.richest.entry(c).or_default();
            *richest = (*richest).max(n);
            if gray.contains_key(&c) {
                let max = self.max_count.entry(c).or_insert(n);
                *max = (*max).min(n);
            }
        }
        for &c in gray.keys() {
            if !colored.contains_key(&c) {
                self.gray_only.insert(c);
            }
        }
    }

    /// Current state with global disallows and clamps applied.
    pub fn state(&self) -> ConstraintState {
        let mut state = ConstraintState {
            fixed: self.fixed,
            banned_at: self.banned_at.clone(),
            disallow: BTreeSet::new(),
            min_count: self.min_count.clone(),
            max_count: self.max_count.clone(),
        };

        for &c in &self.gray_only {
            if !self.richest.contains_key(&c) {
                state.disallow.insert(c);
                state.max_count.insert(c, 0);
            }
        }

        for (&c, max) in state.max_count.iter_mut() {
            if let Some(&richest) = self.richest.get(&c) {
                *max = (*max).min(richest);
            }
            let min = state.min_count.get(&c).copied().unwrap_or(0);
            if *max < min {
                warn!(
                    "Contradictory counts for '{}': min {} > max {}, raising max",
                    c, min, *max
                );
                *max = min;
            }
        }

        // A green letter is never banned at its own position.
        for (i, fixed) in state.fixed.iter().enumerate() {
            if let Some(c) = fixed {
                state.banned_at[i].remove(c);
            }
        }

        debug!(
            "Constraints: fixed={:?} disallow={:?} min={:?} max={:?}",
            state.fixed, state.disallow, state.min_count, state.max_count
        );
        state
    }
}
