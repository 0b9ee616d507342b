//! First-guess selection
//!
//! Whole-word vocabulary ids form the candidate pool. Each candidate's raw
//! model logit is shifted by a letter-statistics bias, recently used openers
//! are excluded, and sampled words must pass a hard gate. After the attempt
//! budget the first gate-passing pool member is used, then a fixed word per
//! language.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use tracing::{debug, warn};

use crate::config::OpenerSettings;
use crate::cooldown::OpenerCooldown;
use crate::language::{Language, WORD_LEN};
use crate::sampling::select;
use crate::vocab::LanguageVocab;

/// Per-letter unigram coverage cap
const COVERAGE_CAP: f32 = 0.08;
/// Consecutive letter-code run length rejected by the gate
const MONOTONIC_RUN: usize = 4;

/// Where the chosen opener came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenerSource {
    Sampled,
    FirstPassing,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenerChoice {
    pub word: String,
    pub id: Option<u32>,
    pub source: OpenerSource,
}

fn letter_counts(word: &str) -> BTreeMap<char, usize> {
    let mut counts = BTreeMap::new();
    for c in word.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }
    counts
}

fn doubles_hard_letter(counts: &BTreeMap<char, usize>, language: Language) -> bool {
    language
        .hard_letters()
        .iter()
        .any(|c| counts.get(c).is_some_and(|&n| n >= 2))
}

/// Longest run of letters whose codes step by +1 or by -1.
fn longest_monotonic_run(word: &str) -> usize {
    let codes: Vec<i64> = word.chars().map(|c| c as i64).collect();
    let mut best = codes.len().min(1);
    for step in [1, -1] {
        let mut run = 1;
        for pair in codes.windows(2) {
            if pair[1] - pair[0] == step {
                run += 1;
                best = best.max(run);
            } else {
                run = 1;
            }
        }
    }
    best
}

/// Composite letter-statistics score of a candidate opener. Higher is better.
pub fn opener_bias(word: &str, language: Language) -> f32 {
    let counts = letter_counts(word);
    let total = word.chars().count().max(1) as f32;

    let entropy: f32 = counts
        .values()
        .map(|&n| {
            let p = n as f32 / total;
            -p * p.log2()
        })
        .sum();
    let mut score = entropy / (WORD_LEN as f32).log2() * 1.5;

    let vowels = counts.keys().filter(|&&c| language.is_vowel(c)).count();
    if vowels >= 2 {
        score += 0.4;
    } else if vowels == 0 {
        score -= 0.8;
    }

    let coverage: f32 = counts
        .keys()
        .map(|&c| language.unigram(c).min(COVERAGE_CAP))
        .sum();
    score += coverage / (COVERAGE_CAP * WORD_LEN as f32);

    let chars: Vec<char> = word.chars().collect();
    let bigrams: BTreeSet<(char, char)> = chars.windows(2).map(|w| (w[0], w[1])).collect();
    score += bigrams.len() as f32 / (WORD_LEN - 1) as f32 * 0.3;

    if counts.len() == WORD_LEN {
        score += 0.5;
    }
    if counts.values().any(|&n| n >= 3) {
        score -= 2.0;
    }
    if counts.values().filter(|&&n| n >= 2).count() >= 2 {
        score -= 1.0;
    }
    if doubles_hard_letter(&counts, language) {
        score -= 1.5;
    }
    score
}

/// Hard acceptance test for an opener.
pub fn passes_gate(word: &str, language: Language, strict: bool) -> bool {
    if word.chars().count() != WORD_LEN {
        return false;
    }
    let counts = letter_counts(word);
    let min_distinct = if strict { 4 } else { 3 };
    counts.values().all(|&n| n < 3)
        && counts.values().filter(|&&n| n >= 2).count() <= 1
        && counts.len() >= min_distinct
        && longest_monotonic_run(word) < MONOTONIC_RUN
        && !doubles_hard_letter(&counts, language)
}

/// Choose an opener and record it in `cooldown`.
///
/// `logits` are the model's next-token logits for the opener prompt, or
/// `None` to rank by the bias alone.
pub fn choose_opener<R: Rng + ?Sized>(
    rng: &mut R,
    language: Language,
    vocab: &LanguageVocab,
    logits: Option<&[f32]>,
    settings: &OpenerSettings,
    cooldown: &mut OpenerCooldown,
) -> OpenerChoice {
    let pool: Vec<(u32, &str)> = vocab.word_entries().collect();
    if pool.is_empty() {
        warn!("No whole-word candidates for {}, using fallback opener", language);
        return fallback(language);
    }
    let pool_ids: Vec<u32> = pool.iter().map(|&(id, _)| id).collect();
    cooldown.refresh(language, &pool_ids);

    let max_id = pool_ids.iter().copied().max().unwrap_or(0) as usize;
    let len = logits.map_or(0, <[f32]>::len).max(max_id + 1);
    let mut scores = vec![f32::NEG_INFINITY; len];
    for &(id, word) in &pool {
        if cooldown.contains(language, id) {
            continue;
        }
        let raw = logits
            .and_then(|l| l.get(id as usize))
            .copied()
            .filter(|x| x.is_finite())
            .unwrap_or(0.0);
        scores[id as usize] = raw + settings.bias_scale * opener_bias(word, language);
    }

    let params = settings.sampling();
    for attempt in 0..settings.max_attempts {
        let Some(id) = select(rng, &scores, params) else {
            break;
        };
        scores[id as usize] = f32::NEG_INFINITY;
        let Some(word) = vocab.word_of(id) else {
            continue;
        };
        if passes_gate(word, language, settings.strict) {
            debug!("Opener '{}' accepted on attempt {}", word, attempt + 1);
            cooldown.record(language, id, pool.len());
            return OpenerChoice {
                word: word.to_string(),
                id: Some(id),
                source: OpenerSource::Sampled,
            };
        }
        debug!("Opener '{}' rejected by gate", word);
    }

    if let Some(&(id, word)) = pool
        .iter()
        .find(|(_, w)| passes_gate(w, language, settings.strict))
    {
        debug!("Opener sampling exhausted, using first passing '{}'", word);
        cooldown.record(language, id, pool.len());
        return OpenerChoice {
            word: word.to_string(),
            id: Some(id),
            source: OpenerSource::FirstPassing,
        };
    }

    warn!("No pool member passes the opener gate for {}", language);
    fallback(language)
}

fn fallback(language: Language) -> OpenerChoice {
    OpenerChoice {
        word: language.fallback_opener().to_string(),
        id: None,
        source: OpenerSource::Fallback,
    }
}
