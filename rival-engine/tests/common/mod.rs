//! Shared fixtures: a letter-level tokenizer and scripted models.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{ArrayD, IxDyn};
use rival_engine::inference::{NamedTensor, SequenceModel, TensorModel};
use rival_engine::{EngineError, Result, Settings, Tokenizer};

pub const LETTERS: &str = "abcdefghijklmnopqrstuvwxyz";

/// Whole-word tokens; these double as the opener pool and known answers.
pub const WORDS: &[&str] = &[
    "crane", "slate", "pilot", "lemon", "melon", "mound", "fight", "brick", "glove", "shark",
    "plumb", "dwelt",
];

pub const PREFILL_LEN: usize = 16;

/// `<s>`, `<unk>`, `<pad>`, every letter, the space marker, prompt
/// punctuation and the whole words above. No merges, so text encodes one
/// character per token.
pub fn tokenizer() -> Tokenizer {
    let mut pieces: Vec<String> = ["<s>", "<unk>", "<pad>"].map(String::from).to_vec();
    pieces.extend(LETTERS.chars().map(String::from));
    pieces.extend(["▁", ":", "<", ">"].map(String::from));
    pieces.extend(WORDS.iter().map(|w| w.to_string()));
    let vocab: HashMap<String, u32> = pieces
        .into_iter()
        .enumerate()
        .map(|(i, p)| (p, i as u32))
        .collect();
    Tokenizer::new(vocab, Vec::new(), Vec::new()).unwrap()
}

/// Small model shape, fixed seed, cooldown kept under `dir`.
pub fn settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.seed = Some(7);
    settings.model.num_layers = 1;
    settings.model.num_heads = 1;
    settings.model.head_dim = 2;
    settings.model.prefill_len = PREFILL_LEN;
    settings.model.decode_window = 8;
    settings.opener.cooldown_file = Some(dir.join("cooldown.tsv"));
    settings
}

/// Flat logits with `letter` (if any) boosted well above the rest.
pub fn logits_for(tokenizer: &Tokenizer, letter: Option<char>) -> Vec<f32> {
    let mut logits = vec![0.0f32; tokenizer.vocab_size()];
    if let Some(id) = letter.and_then(|c| tokenizer.id_of(&c.to_string())) {
        logits[id as usize] = 20.0;
    }
    logits
}

/// Stateless model steering each position toward a target word, or flat
/// logits when no target is set.
pub struct TargetSequence {
    tokenizer: Tokenizer,
    target: Option<Vec<char>>,
    space_id: u32,
    pub calls: Arc<AtomicUsize>,
}

impl TargetSequence {
    pub fn new(tokenizer: &Tokenizer, target: Option<&str>) -> Self {
        Self {
            tokenizer: tokenizer.clone(),
            target: target.map(|t| t.chars().collect()),
            space_id: tokenizer.id_of("▁").unwrap(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SequenceModel for TargetSequence {
    fn name(&self) -> &str {
        "target-sequence"
    }

    fn logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // letters emitted since the trailing cue
        let position = tokens
            .iter()
            .rev()
            .take_while(|&&t| t != self.space_id)
            .count();
        let letter = self
            .target
            .as_ref()
            .and_then(|t| t.get(position).copied());
        Ok(logits_for(&self.tokenizer, letter))
    }
}

/// How a [`KvStub`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvFault {
    None,
    /// Decode calls return an error
    DecodeError,
    /// Decode calls return no recognizable logits
    DecodeShape,
}

/// Prefill/decode graph producing `logits` and `present.0.*` tensors in the
/// layout the engine expects.
pub struct KvStub {
    name: &'static str,
    tokenizer: Tokenizer,
    target: Option<Vec<char>>,
    fault: KvFault,
    position: Arc<AtomicUsize>,
    /// Space marker id when positions are tracked from the fed tokens
    cue: Option<u32>,
    pub calls: Arc<AtomicUsize>,
}

impl KvStub {
    /// A prefill and a decode stub sharing one position counter.
    pub fn pair(tokenizer: &Tokenizer, target: Option<&str>, fault: KvFault) -> (Self, Self) {
        let position = Arc::new(AtomicUsize::new(0));
        let make = |name, fault| Self {
            name,
            tokenizer: tokenizer.clone(),
            target: target.map(|t| t.chars().collect()),
            fault,
            position: Arc::clone(&position),
            cue: None,
            calls: Arc::new(AtomicUsize::new(0)),
        };
        (make("prefill", KvFault::None), make("decode", fault))
    }

    /// A decode graph used without a prefill model. The prompt arrives one
    /// token at a time, so the letter position is counted from the last
    /// space marker it was fed.
    pub fn decoder_only(tokenizer: &Tokenizer, target: Option<&str>, fault: KvFault) -> Self {
        Self {
            name: "decode",
            tokenizer: tokenizer.clone(),
            target: target.map(|t| t.chars().collect()),
            fault,
            position: Arc::new(AtomicUsize::new(0)),
            cue: tokenizer.id_of("▁"),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn present(len: usize) -> ArrayD<f32> {
        ArrayD::zeros(IxDyn(&[1, 1, len, 2]))
    }
}

impl TensorModel for KvStub {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&mut self, inputs: Vec<NamedTensor>) -> Result<Vec<NamedTensor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ids = inputs
            .iter()
            .find(|t| t.name == "input_ids")
            .ok_or_else(|| EngineError::Inference("missing input_ids".into()))?;
        let mask = inputs
            .iter()
            .find(|t| t.name == "attention_mask")
            .ok_or_else(|| EngineError::Inference("missing attention_mask".into()))?;
        let seq = ids.shape()[1];
        let total = mask.shape()[1];

        let position = if let Some(cue) = self.cue {
            match self.fault {
                KvFault::DecodeError => return Err(EngineError::Inference("decode broke".into())),
                KvFault::DecodeShape => return Ok(Vec::new()),
                KvFault::None => {}
            }
            let token = ids
                .as_i64()
                .and_then(|a| a.iter().last().copied())
                .ok_or_else(|| EngineError::Inference("input_ids not i64".into()))?;
            if token == cue as i64 {
                self.position.store(0, Ordering::SeqCst);
                0
            } else {
                self.position.fetch_add(1, Ordering::SeqCst) + 1
            }
        } else if seq > 1 {
            self.position.store(0, Ordering::SeqCst);
            0
        } else {
            match self.fault {
                KvFault::DecodeError => return Err(EngineError::Inference("decode broke".into())),
                KvFault::DecodeShape => return Ok(Vec::new()),
                KvFault::None => {}
            }
            self.position.fetch_add(1, Ordering::SeqCst) + 1
        };

        let letter = self
            .target
            .as_ref()
            .and_then(|t| t.get(position).copied());
        let row = logits_for(&self.tokenizer, letter);
        let vocab = row.len();
        let data: Vec<f32> = (0..seq).flat_map(|_| row.iter().copied()).collect();
        let logits = ArrayD::from_shape_vec(IxDyn(&[1, seq, vocab]), data)
            .map_err(|e| EngineError::Inference(e.into()))?;

        Ok(vec![
            NamedTensor::f32("logits", logits),
            NamedTensor::f32("present.0.key", Self::present(total)),
            NamedTensor::f32("present.0.value", Self::present(total)),
        ])
    }
}
