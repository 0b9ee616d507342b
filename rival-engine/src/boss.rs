//! Boss difficulty: gradual discovery of a hidden answer
//!
//! When the game exposes its answer, the boss opponent does not play it
//! outright. Each turn it may learn one more present letter and may lock one
//! more green position, and the accumulated knowledge tightens the
//! constraints before letters are sampled.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::Rng;
use tracing::{debug, warn};

use crate::config::BossSettings;
use crate::constraints::{ConstraintState, count_in};
use crate::language::{Language, WORD_LEN, normalize_word};

/// Supplies the hidden answer for a language, when one is known.
pub trait AnswerSource: Send {
    fn answer(&self, language: Language) -> Option<String>;
}

impl<F> AnswerSource for F
where
    F: Fn(Language) -> Option<String> + Send,
{
    fn answer(&self, language: Language) -> Option<String> {
        self(language)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Knowledge {
    answer: String,
    /// Letter → copies known to be present
    present: BTreeMap<char, usize>,
    locked: BTreeSet<usize>,
}

#[derive(Debug, Clone)]
pub struct BossMemory {
    settings: BossSettings,
    languages: HashMap<Language, Knowledge>,
}

impl BossMemory {
    pub fn new(settings: BossSettings) -> Self {
        Self {
            settings,
            languages: HashMap::new(),
        }
    }

    /// Forget everything learned for `language`.
    pub fn reset(&mut self, language: Language) {
        self.languages.remove(&language);
    }

    /// Letters and positions learned so far, for inspection.
    pub fn known(&self, language: Language) -> Option<(&BTreeMap<char, usize>, &BTreeSet<usize>)> {
        self.languages
            .get(&language)
            .map(|k| (&k.present, &k.locked))
    }

    /// Run one turn of discovery and tighten `state` with everything known.
    ///
    /// `turn` is the 0-based index of the guess being made; turn 0 starts over.
    pub fn consult<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        language: Language,
        turn: usize,
        answer: &str,
        state: &mut ConstraintState,
    ) {
        let Some(answer) = normalize_word(answer, language) else {
            warn!("Ignoring hidden answer {:?} for {}", answer, language);
            return;
        };
        if turn == 0 {
            self.reset(language);
        }
        let knowledge = self.languages.entry(language).or_default();
        if knowledge.answer != answer {
            *knowledge = Knowledge {
                answer: answer.clone(),
                ..Knowledge::default()
            };
        }
        let letters: Vec<char> = answer.chars().collect();

        if rng.random_bool(self.settings.learn_probability.clamp(0.0, 1.0)) {
            learn_letter(rng, knowledge, &letters, state);
        }
        if rng.random_bool(self.settings.lock_probability.clamp(0.0, 1.0)) {
            lock_position(rng, knowledge, &letters, state);
        }
        apply(knowledge, &letters, state);
    }
}

fn learn_letter<R: Rng + ?Sized>(
    rng: &mut R,
    knowledge: &mut Knowledge,
    letters: &[char],
    state: &ConstraintState,
) {
    let distinct: BTreeSet<char> = letters.iter().copied().collect();
    let missing: Vec<(char, usize)> = distinct
        .into_iter()
        .filter_map(|c| {
            let known = knowledge
                .present
                .get(&c)
                .copied()
                .unwrap_or(0)
                .max(state.min_of(c));
            let remaining = count_in(letters, c).saturating_sub(known);
            (remaining > 0).then_some((c, remaining))
        })
        .collect();
    let total: usize = missing.iter().map(|&(_, n)| n).sum();
    if total == 0 {
        return;
    }

    let mut draw = rng.random_range(0..total);
    for &(letter, weight) in &missing {
        if draw < weight {
            let known = knowledge.present.entry(letter).or_insert(0);
            *known = (*known).max(state.min_of(letter)) + 1;
            debug!("Boss learned '{}' (x{})", letter, known);
            return;
        }
        draw -= weight;
    }
}

fn lock_position<R: Rng + ?Sized>(
    rng: &mut R,
    knowledge: &mut Knowledge,
    letters: &[char],
    state: &ConstraintState,
) {
    let unknown: Vec<usize> = (0..WORD_LEN)
        .filter(|&i| state.fixed[i].is_none() && !knowledge.locked.contains(&i))
        .collect();
    // the final unknown position is left for the model
    if unknown.len() <= 1 {
        return;
    }

    let hinted: Vec<usize> = unknown
        .iter()
        .copied()
        .filter(|&i| {
            let c = letters[i];
            state.min_of(c) > 0 || knowledge.present.contains_key(&c)
        })
        .collect();
    let pool = if hinted.is_empty() { &unknown } else { &hinted };
    let position = pool[rng.random_range(0..pool.len())];
    knowledge.locked.insert(position);
    debug!("Boss locked position {} = '{}'", position, letters[position]);
}

fn apply(knowledge: &Knowledge, letters: &[char], state: &mut ConstraintState) {
    for (&letter, &count) in &knowledge.present {
        let min = state.min_count.entry(letter).or_insert(0);
        *min = (*min).max(count);
        state.disallow.remove(&letter);
    }
    for &position in &knowledge.locked {
        let letter = letters[position];
        state.fixed[position] = Some(letter);
        state.banned_at[position].remove(&letter);
        state.disallow.remove(&letter);
        let min = state.min_count.entry(letter).or_insert(0);
        let fixed = state.fixed.iter().filter(|f| **f == Some(letter)).count();
        *min = (*min).max(fixed);
    }

    let distinct: BTreeSet<char> = letters.iter().copied().collect();
    for letter in distinct {
        let actual = count_in(letters, letter);
        let max = state.max_count.entry(letter).or_insert(actual);
        *max = (*max).min(actual).max(state.min_count.get(&letter).copied().unwrap_or(0));
    }
}
