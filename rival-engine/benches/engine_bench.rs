//! Benchmarks for the per-guess hot paths
//!
//! Run with: cargo bench

use std::collections::HashMap;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rival_engine::sampling::{LetterRequest, SamplingParams};
use rival_engine::{
    ConstraintState, Feedback, HistoryEntry, Language, OpenerCooldown, PenaltyConfig, Sampler,
    Tokenizer, VocabMaps, choose_opener, config::OpenerSettings,
};

const WORDS: &[&str] = &[
    "crane", "slate", "pilot", "lemon", "melon", "mound", "fight", "brick", "glove", "shark",
    "plumb", "dwelt", "audio", "raise", "stare", "tonic",
];

fn tokenizer() -> Tokenizer {
    let mut pieces: Vec<String> = vec!["<s>".into(), "▁".into()];
    pieces.extend(('a'..='z').map(String::from));
    pieces.extend(WORDS.iter().map(|w| w.to_string()));
    let vocab: HashMap<String, u32> = pieces
        .into_iter()
        .enumerate()
        .map(|(i, p)| (p, i as u32))
        .collect();
    Tokenizer::new(vocab, Vec::new(), Vec::new()).unwrap()
}

fn history() -> Vec<HistoryEntry> {
    ["crane", "moist", "pilaf"]
        .iter()
        .map(|g| HistoryEntry::new(g, Feedback::score(g, "pilot"), Language::En).unwrap())
        .collect()
}

fn bench_constraints(c: &mut Criterion) {
    let rows = history();
    c.bench_function("constraints_from_history", |b| {
        b.iter(|| ConstraintState::from_history(black_box(&rows)))
    });
}

fn bench_sampling(c: &mut Criterion) {
    let tok = tokenizer();
    let maps = VocabMaps::build(&tok, &[Language::En]);
    let vocab = maps.get(Language::En);
    let state = ConstraintState::from_history(&history());
    let sampler = Sampler::new(PenaltyConfig::default());
    let logits: Vec<f32> = (0..tok.vocab_size()).map(|i| (i % 7) as f32).collect();
    let used = ['p', 'i'];
    let request = LetterRequest {
        position: 2,
        used: &used,
        constraints: &state,
        vocab,
        params: SamplingParams {
            temperature: 0.8,
            top_k: 20,
        },
    };
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("choose_letter", |b| {
        b.iter(|| sampler.choose_letter(&mut rng, black_box(&logits), &request))
    });
}

fn bench_opener(c: &mut Criterion) {
    let tok = tokenizer();
    let maps = VocabMaps::build(&tok, &[Language::En]);
    let settings = OpenerSettings {
        strict: false,
        max_attempts: 24,
        bias_scale: 1.0,
        temperature: 0.9,
        top_k: 64,
        cooldown_file: None,
    };
    let mut rng = StdRng::seed_from_u64(2);

    c.bench_function("choose_opener", |b| {
        b.iter(|| {
            let mut cooldown = OpenerCooldown::new();
            choose_opener(
                &mut rng,
                Language::En,
                maps.get(Language::En),
                None,
                &settings,
                &mut cooldown,
            )
        })
    });
}

criterion_group!(benches, bench_constraints, bench_sampling, bench_opener);
criterion_main!(benches);
