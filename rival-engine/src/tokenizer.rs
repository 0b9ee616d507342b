//! Byte-pair-encoding tokenizer backed by HuggingFace `tokenizers`
//!
//! Files are read as HuggingFace `tokenizer.json`. In-memory tokenizers are
//! assembled as the same JSON document, with a plain BPE model, a normalizer
//! that turns spaces into the vocabulary's space marker (`▁` or `Ġ`) and a
//! decoder that turns it back. Text is NFKC-normalized and lowercased before
//! it reaches the BPE model; added-token literals are matched first and passed
//! through verbatim.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde_json::json;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::error::{EngineError, Result};

const BOS_CANDIDATES: &[&str] = &["<s>", "<bos>", "<|begin_of_text|>", "<|startoftext|>"];
const EOS_CANDIDATES: &[&str] = &["</s>", "<eos>", "<|endoftext|>", "<|end_of_text|>"];
const UNK_CANDIDATES: &[&str] = &["<unk>", "[UNK]", "<|unk|>"];
const PAD_CANDIDATES: &[&str] = &["<pad>", "[PAD]", "<|pad|>"];

/// A token matched verbatim before BPE runs (control markers, BOS/EOS, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedToken {
    pub id: u32,
    pub content: String,
    pub special: bool,
}

enum Segment<'a> {
    Added(u32),
    Text(&'a str),
}

/// Reversible text ↔ token id mapping.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
    /// Token string per id (empty for unused ids)
    pieces: Vec<String>,
    /// Added tokens, longest literal first
    added: Vec<AddedToken>,
    special_ids: HashSet<u32>,
    unk_id: Option<u32>,
    bos_id: Option<u32>,
    eos_id: Option<u32>,
    pad_id: Option<u32>,
}

impl Tokenizer {
    /// Load a tokenizer from a `tokenizer.json` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::TokenizerMissing(path.to_path_buf()));
        }
        let inner =
            tokenizers::Tokenizer::from_file(path).map_err(EngineError::TokenizerMalformed)?;
        Self::wrap(inner)
    }

    /// Parse a tokenizer from `tokenizer.json` content.
    pub fn from_json(content: &str) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(content.as_bytes())
            .map_err(EngineError::TokenizerMalformed)?;
        Self::wrap(inner)
    }

    /// Build a tokenizer from an in-memory vocabulary and ordered merge list.
    ///
    /// Merge rank is the position in `merges` (earlier merges apply first).
    pub fn new(
        mut vocab: HashMap<String, u32>,
        merges: Vec<(String, String)>,
        added: Vec<AddedToken>,
    ) -> Result<Self> {
        for token in &added {
            vocab.entry(token.content.clone()).or_insert(token.id);
        }
        if vocab.is_empty() {
            return Err(EngineError::TokenizerMalformed("empty vocabulary".into()));
        }

        let marker = if vocab.keys().any(|k| k.contains('▁')) {
            Some("▁")
        } else if vocab.keys().any(|k| k.contains('Ġ')) {
            Some("Ġ")
        } else {
            None
        };
        let unk = UNK_CANDIDATES.iter().find(|c| vocab.contains_key(**c));

        let (normalizer, decoder) = match marker {
            Some(marker) => (
                json!({"type": "Replace", "pattern": {"String": " "}, "content": marker}),
                json!({"type": "Replace", "pattern": {"String": marker}, "content": " "}),
            ),
            None => (serde_json::Value::Null, json!({"type": "Fuse"})),
        };
        let added_tokens: Vec<serde_json::Value> = added
            .iter()
            .map(|t| {
                json!({
                    "id": t.id,
                    "content": t.content,
                    "single_word": false,
                    "lstrip": false,
                    "rstrip": false,
                    "normalized": false,
                    "special": t.special,
                })
            })
            .collect();
        let merges: Vec<[String; 2]> = merges.into_iter().map(|(a, b)| [a, b]).collect();

        let document = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": normalizer,
            "pre_tokenizer": null,
            "post_processor": null,
            "decoder": decoder,
            "model": {
                "type": "BPE",
                "dropout": null,
                "unk_token": unk,
                "continuing_subword_prefix": null,
                "end_of_word_suffix": null,
                "fuse_unk": false,
                "byte_fallback": false,
                "ignore_merges": false,
                "vocab": vocab,
                "merges": merges,
            },
        });
        let content = serde_json::to_string(&document)
            .map_err(|e| EngineError::TokenizerMalformed(e.into()))?;
        Self::from_json(&content)
    }

    fn wrap(mut inner: tokenizers::Tokenizer) -> Result<Self> {
        // Sequence length is managed by the inference backends.
        inner.with_padding(None);
        inner.with_truncation(None).ok();

        let vocab = inner.get_vocab(true);
        if vocab.is_empty() {
            return Err(EngineError::TokenizerMalformed("empty vocabulary".into()));
        }
        let size = vocab.values().copied().max().map_or(0, |m| m as usize + 1);
        let mut pieces = vec![String::new(); size];
        for (piece, &id) in &vocab {
            pieces[id as usize] = piece.clone();
        }

        let mut added: Vec<AddedToken> = inner
            .get_added_tokens_decoder()
            .into_iter()
            .filter(|(_, token)| !token.content.is_empty())
            .map(|(id, token)| AddedToken {
                id,
                content: token.content,
                special: token.special,
            })
            .collect();
        // Longest literal first so overlapping markers split correctly.
        added.sort_by(|a, b| b.content.len().cmp(&a.content.len()).then(a.id.cmp(&b.id)));

        let lookup = |candidates: &[&str]| candidates.iter().find_map(|c| inner.token_to_id(c));
        let unk_id = lookup(UNK_CANDIDATES);
        let bos_id = lookup(BOS_CANDIDATES);
        let eos_id = lookup(EOS_CANDIDATES);
        let pad_id = lookup(PAD_CANDIDATES);

        let mut special_ids: HashSet<u32> = added.iter().filter(|t| t.special).map(|t| t.id).collect();
        special_ids.extend([unk_id, bos_id, eos_id, pad_id].into_iter().flatten());

        debug!(
            "Tokenizer ready: {} pieces, {} added tokens",
            pieces.len(),
            added.len()
        );

        Ok(Self {
            inner,
            pieces,
            added,
            special_ids,
            unk_id,
            bos_id,
            eos_id,
            pad_id,
        })
    }

    /// Encode text into token ids, optionally prefixed with the begin marker.
    pub fn encode(&self, text: &str, add_begin: bool) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        if add_begin && let Some(bos) = self.bos_id {
            ids.push(bos);
        }
        for segment in self.split_added(text) {
            match segment {
                Segment::Added(id) => ids.push(id),
                Segment::Text(chunk) => {
                    let normalized: String = chunk.nfkc().flat_map(char::to_lowercase).collect();
                    let encoding = self
                        .inner
                        .encode(normalized.as_str(), false)
                        .map_err(EngineError::Inference)?;
                    ids.extend_from_slice(encoding.get_ids());
                }
            }
        }
        Ok(ids)
    }

    /// Decode token ids to text, dropping special and control tokens.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        let kept: Vec<u32> = ids
            .iter()
            .copied()
            .filter(|id| !self.special_ids.contains(id))
            .filter(|&id| self.piece(id).is_some_and(|p| !is_control_piece(p)))
            .collect();
        self.inner
            .decode(&kept, true)
            .map_err(EngineError::Inference)
    }

    pub fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    pub fn bos_id(&self) -> Option<u32> {
        self.bos_id
    }

    pub fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }

    pub fn pad_id(&self) -> Option<u32> {
        self.pad_id
    }

    pub fn unk_id(&self) -> Option<u32> {
        self.unk_id
    }

    pub fn is_special(&self, id: u32) -> bool {
        self.special_ids.contains(&id)
    }

    /// Raw vocabulary piece for `id`.
    pub fn piece(&self, id: u32) -> Option<&str> {
        self.pieces
            .get(id as usize)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }

    pub fn id_of(&self, piece: &str) -> Option<u32> {
        self.inner.token_to_id(piece)
    }

    fn split_added<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        let mut segments = Vec::new();
        let mut rest = text;
        while !rest.is_empty() {
            // Leftmost match wins; `added` is sorted longest first for ties.
            let hit = self
                .added
                .iter()
                .filter_map(|t| rest.find(&t.content).map(|pos| (pos, t)))
                .min_by_key(|(pos, _)| *pos);
            match hit {
                Some((pos, token)) => {
                    if pos > 0 {
                        segments.push(Segment::Text(&rest[..pos]));
                    }
                    segments.push(Segment::Added(token.id));
                    rest = &rest[pos + token.content.len()..];
                }
                None => {
                    segments.push(Segment::Text(rest));
                    break;
                }
            }
        }
        segments
    }
}

/// Byte-fallback pieces (`<0x0A>`) and pieces made only of control characters.
fn is_control_piece(piece: &str) -> bool {
    (piece.starts_with("<0x") && piece.ends_with('>')) || piece.chars().all(char::is_control)
}
