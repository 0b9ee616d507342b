//! Letter selection from raw model logits
//!
//! Each position goes through a fixed pipeline before selection:
//!
//! 1. restriction to single-letter ids plus the hard constraint mask
//! 2. anti-repeat penalty for copies beyond a letter's minimum
//! 3. deficit forcing when the still-required letters fill the free positions,
//!    or when a required letter could not go anywhere later
//! 4. duplicate suppression once every minimum is met
//!
//! Steps 3 and 4 are skipped when they would leave no candidate.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constraints::{ConstraintState, count_in};
use crate::language::Language;
use crate::vocab::LanguageVocab;

/// Temperature / top-k pair for one draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// `<= 0` selects greedy argmax
    pub temperature: f32,
    /// `0` disables the top-k restriction
    pub top_k: usize,
}

impl SamplingParams {
    pub const GREEDY: SamplingParams = SamplingParams {
        temperature: 0.0,
        top_k: 1,
    };
}

/// Soft penalty weights subtracted from logits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Per extra copy beyond the required minimum
    pub repeat_penalty: f32,
    /// Added when the letter repeats the previous position
    pub run_penalty: f32,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            repeat_penalty: 1.5,
            run_penalty: 2.0,
        }
    }
}

/// Everything needed to choose the letter at one position.
#[derive(Debug, Clone, Copy)]
pub struct LetterRequest<'a> {
    pub position: usize,
    /// Letters already placed at positions `0..position`
    pub used: &'a [char],
    pub constraints: &'a ConstraintState,
    pub vocab: &'a LanguageVocab,
    pub params: SamplingParams,
}

#[derive(Debug, Clone, Default)]
pub struct Sampler {
    penalties: PenaltyConfig,
}

impl Sampler {
    pub fn new(penalties: PenaltyConfig) -> Self {
        Self { penalties }
    }

    /// Choose a token id for the requested position, or `None` when every
    /// candidate is masked.
    pub fn choose_letter<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        logits: &[f32],
        request: &LetterRequest<'_>,
    ) -> Option<u32> {
        let scores = self.shape(logits, request);
        select(rng, &scores, request.params)
    }

    /// Apply masking and penalties, returning adjusted scores over the full
    /// vocabulary (`-inf` for excluded ids).
    pub fn shape(&self, logits: &[f32], request: &LetterRequest<'_>) -> Vec<f32> {
        let LetterRequest {
            position,
            used,
            constraints,
            vocab,
            ..
        } = *request;

        let mut scores = vec![f32::NEG_INFINITY; logits.len()];
        for &id in vocab.letter_ids() {
            if let Some(&logit) = logits.get(id as usize)
                && !logit.is_nan()
            {
                scores[id as usize] = logit;
            }
        }

        let projected = constraints.with_future_fixed(position, used);
        constraints.apply(position, &projected, &mut scores, vocab);
        if constraints.fixed[position].is_some() {
            return scores;
        }

        self.penalize_repeats(&mut scores, request);

        let deficit = constraints.deficit(&projected);
        let free = constraints.free_positions_from(position);
        let needed = constraints.needed_letters(&projected);
        // required letters banned at every later free position
        let stranded: Vec<char> = needed
            .iter()
            .copied()
            .filter(|&c| !placeable_after(constraints, position, c))
            .collect();
        if deficit > 0 && (deficit >= free || !stranded.is_empty()) {
            let must = if deficit >= free { &needed } else { &stranded };
            let forced = mask_where(&mut scores, vocab, |c| !must.contains(&c));
            debug!(
                "Position {}: deficit {}, free {}, forcing {:?} (applied={})",
                position, deficit, free, must, forced
            );
        } else if deficit == 0 {
            let suppressed = mask_where(&mut scores, vocab, |c| {
                count_in(&projected, c) >= constraints.allowed_copies(c)
            });
            if !suppressed {
                debug!("Position {}: duplicate suppression skipped", position);
            }
        }

        scores
    }

    fn penalize_repeats(&self, scores: &mut [f32], request: &LetterRequest<'_>) {
        let previous = request.used.last().copied();
        for &id in request.vocab.letter_ids() {
            let Some(score) = scores.get_mut(id as usize) else {
                continue;
            };
            if !score.is_finite() {
                continue;
            }
            let Some(letter) = request.vocab.letter_of(id) else {
                continue;
            };
            let used = count_in(request.used, letter);
            let min = request.constraints.min_of(letter);
            if used == 0 || used < min {
                continue;
            }
            let extra = (used - min + 1) as f32;
            let mut penalty = self.penalties.repeat_penalty * extra;
            if previous == Some(letter) {
                penalty += self.penalties.run_penalty;
            }
            *score -= penalty;
        }
    }
}

/// Whether `letter` may still go at some free position after `position`.
fn placeable_after(constraints: &ConstraintState, position: usize, letter: char) -> bool {
    (position + 1..constraints.fixed.len())
        .any(|p| constraints.fixed[p].is_none() && !constraints.banned_at[p].contains(&letter))
}

/// Mask finite letter scores whose letter matches `reject`, unless that would
/// leave nothing selectable. Returns whether the mask was applied.
fn mask_where(scores: &mut [f32], vocab: &LanguageVocab, reject: impl Fn(char) -> bool) -> bool {
    let survivors = vocab.letter_ids().iter().any(|&id| {
        scores.get(id as usize).is_some_and(|s| s.is_finite())
            && vocab.letter_of(id).is_some_and(|c| !reject(c))
    });
    if !survivors {
        return false;
    }
    for &id in vocab.letter_ids() {
        if let Some(letter) = vocab.letter_of(id)
            && reject(letter)
            && let Some(score) = scores.get_mut(id as usize)
        {
            *score = f32::NEG_INFINITY;
        }
    }
    true
}

/// Pick an id from `scores`: greedy argmax when `temperature <= 0`, otherwise
/// top-k softmax with temperature and a cumulative-probability draw.
///
/// Ties resolve to the lowest id. Returns `None` when no score is finite.
pub fn select<R: Rng + ?Sized>(rng: &mut R, scores: &[f32], params: SamplingParams) -> Option<u32> {
    let mut candidates: Vec<(u32, f32)> = scores
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .map(|(i, &s)| (i as u32, s))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    if params.temperature <= 0.0 {
        return Some(candidates[0].0);
    }
    if params.top_k > 0 {
        candidates.truncate(params.top_k);
    }

    let best = candidates[0].1;
    let weights: Vec<f32> = candidates
        .iter()
        .map(|&(_, s)| ((s - best) / params.temperature).exp())
        .collect();
    let total: f32 = weights.iter().sum();
    let draw = rng.random::<f32>() * total;

    let mut cumulative = 0.0;
    for (&(id, _), weight) in candidates.iter().zip(&weights) {
        cumulative += weight;
        if draw < cumulative {
            return Some(id);
        }
    }
    candidates.last().map(|&(id, _)| id)
}

/// Deterministic replacement letter when sampling produced nothing usable.
///
/// Walks the language's frequency order preferring, in turn, letters still
/// below their minimum, letters not yet used, then any permitted letter.
/// `available` filters out letters the vocabulary cannot emit.
pub fn fallback_letter(
    language: Language,
    position: usize,
    used: &[char],
    constraints: &ConstraintState,
    available: impl Fn(char) -> bool,
) -> char {
    if let Some(fixed) = constraints.fixed[position] {
        return fixed;
    }
    let projected = constraints.with_future_fixed(position, used);
    let permitted = |c: char| available(c) && constraints.permits(position, c, &projected);
    let needed = constraints.needed_letters(&projected);

    language
        .frequency_order()
        .find(|&c| needed.contains(&c) && permitted(c))
        .or_else(|| {
            language
                .frequency_order()
                .find(|&c| count_in(used, c) == 0 && permitted(c))
        })
        .or_else(|| language.frequency_order().find(|&c| permitted(c)))
        .or_else(|| language.frequency_order().find(|&c| available(c)))
        .unwrap_or_else(|| {
            language
                .frequency_order()
                .next()
                .unwrap_or('e')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::HistoryEntry;
    use crate::tokenizer::Tokenizer;
    use crate::vocab::VocabMaps;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn letter_vocab() -> VocabMaps {
        let vocab: HashMap<String, u32> = ('a'..='z')
            .enumerate()
            .map(|(i, c)| (c.to_string(), i as u32))
            .collect();
        let tok = Tokenizer::new(vocab, Vec::new(), Vec::new()).unwrap();
        VocabMaps::build(&tok, &[Language::En])
    }

    fn id(c: char) -> usize {
        (c as u8 - b'a') as usize
    }

    fn state(rows: &[(&str, &str)]) -> ConstraintState {
        let history: Vec<HistoryEntry> = rows
            .iter()
            .map(|(w, f)| HistoryEntry::parse(w, f, Language::En, false).unwrap())
            .collect();
        ConstraintState::from_history(&history)
    }

    #[test]
    fn test_greedy_picks_highest_allowed() {
        let maps = letter_vocab();
        let constraints = state(&[("crane", "XXXXX")]);
        let mut logits = vec![0.0f32; 26];
        logits[id('e')] = 9.0; // disallowed
        logits[id('o')] = 5.0;
        let request = LetterRequest {
            position: 0,
            used: &[],
            constraints: &constraints,
            vocab: maps.get(Language::En),
            params: SamplingParams::GREEDY,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let chosen = Sampler::default().choose_letter(&mut rng, &logits, &request);
        assert_eq!(chosen, Some(id('o') as u32));
    }

    #[test]
    fn test_deficit_forcing() {
        let maps = letter_vocab();
        // 'r' and 'e' needed somewhere; two free positions left
        let constraints = state(&[("rebus", "YYXXX")]);
        let mut logits = vec![0.0f32; 26];
        logits[id('o')] = 10.0;
        let request = LetterRequest {
            position: 3,
            used: &['t', 'o', 'w'],
            constraints: &constraints,
            vocab: maps.get(Language::En),
            params: SamplingParams::GREEDY,
        };
        let scores = Sampler::default().shape(&logits, &request);
        let alive: Vec<usize> = (0..26).filter(|&i| scores[i].is_finite()).collect();
        assert_eq!(alive, vec![id('e'), id('r')]);
    }

    #[test]
    fn test_forces_letter_with_no_later_slot() {
        let maps = letter_vocab();
        // 'e' is required but banned at the last position
        let constraints = state(&[("slate", "XXXXY")]);
        let mut logits = vec![0.0f32; 26];
        logits[id('o')] = 10.0;
        let request = LetterRequest {
            position: 3,
            used: &['p', 'i', 'o'],
            constraints: &constraints,
            vocab: maps.get(Language::En),
            params: SamplingParams::GREEDY,
        };
        let scores = Sampler::default().shape(&logits, &request);
        let alive: Vec<usize> = (0..26).filter(|&i| scores[i].is_finite()).collect();
        assert_eq!(alive, vec![id('e')]);
    }

    #[test]
    fn test_duplicate_suppression_after_minimums() {
        let maps = letter_vocab();
        let constraints = ConstraintState::default();
        let logits = vec![0.0f32; 26];
        let request = LetterRequest {
            position: 2,
            used: &['l', 'o'],
            constraints: &constraints,
            vocab: maps.get(Language::En),
            params: SamplingParams::GREEDY,
        };
        let scores = Sampler::default().shape(&logits, &request);
        assert!(scores[id('o')].is_infinite());
        assert!(scores[id('l')].is_infinite());
        assert!(scores[id('a')].is_finite());
    }

    #[test]
    fn test_repeat_penalty_prefers_fresh_letters() {
        let maps = letter_vocab();
        // two 'e' allowed, one required
        let mut constraints = ConstraintState::default();
        constraints.min_count.insert('e', 1);
        constraints.max_count.insert('e', 2);
        let mut logits = vec![f32::NEG_INFINITY; 26];
        logits[id('e')] = 1.0;
        logits[id('t')] = 0.5;
        let request = LetterRequest {
            position: 1,
            used: &['e'],
            constraints: &constraints,
            vocab: maps.get(Language::En),
            params: SamplingParams::GREEDY,
        };
        let scores = Sampler::default().shape(&logits, &request);
        assert!(scores[id('e')] < scores[id('t')]);
    }

    #[test]
    fn test_select_respects_top_k() {
        let mut scores = vec![f32::NEG_INFINITY; 10];
        scores[2] = 3.0;
        scores[5] = 2.9;
        scores[7] = -4.0;
        let params = SamplingParams {
            temperature: 5.0,
            top_k: 2,
        };
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let id = select(&mut rng, &scores, params).unwrap();
            assert!(id == 2 || id == 5);
        }
    }

    #[test]
    fn test_select_empty_and_ties() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            select(&mut rng, &[f32::NEG_INFINITY; 4], SamplingParams::GREEDY),
            None
        );
        assert_eq!(select(&mut rng, &[1.0, 3.0, 3.0], SamplingParams::GREEDY), Some(1));
    }

    #[test]
    fn test_fallback_letter_order() {
        let constraints = state(&[("rebus", "YXXXX")]);
        // needed 'r' first
        assert_eq!(
            fallback_letter(Language::En, 1, &['t'], &constraints, |_| true),
            'r'
        );
        // minimum met: most frequent unused permitted letter ('e' disallowed)
        assert_eq!(
            fallback_letter(Language::En, 2, &['t', 'r'], &constraints, |_| true),
            'a'
        );
        // fixed positions win
        let fixed = state(&[("crane", "GXXXX")]);
        assert_eq!(fallback_letter(Language::En, 0, &[], &fixed, |_| true), 'c');
    }
}
