//! Inference strategies
//!
//! [`Backend`] is chosen once from the models that could be loaded. Each
//! guess opens a fresh [`LogitsSession`] that owns its token buffer and KV
//! cache, so no scratch state is shared between guesses.

use std::fmt;

use tracing::{debug, info, warn};

use crate::config::{ModelSettings, layer_name};
use crate::error::{EngineError, Result};
use crate::inference::kv_cache::KvCache;
use crate::inference::outputs::{OutputRoles, Row, batch_steps};
use crate::inference::tensor::{NamedTensor, SequenceModel, TensorModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Prefill model seeds the cache, decode model advances one token at a time
    KvCached,
    /// Decode model alone, prompt fed token by token
    DecoderOnly,
    /// Whole sequence re-encoded every step
    Stateless,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::KvCached => "kv-cached",
            Strategy::DecoderOnly => "decoder-only",
            Strategy::Stateless => "stateless",
        };
        f.write_str(name)
    }
}

/// Whatever model files could be loaded.
#[derive(Default)]
pub struct LoadedModels {
    pub prefill: Option<Box<dyn TensorModel>>,
    pub decode: Option<Box<dyn TensorModel>>,
    pub stateless: Option<Box<dyn SequenceModel>>,
}

pub enum Backend {
    KvCached {
        prefill: Box<dyn TensorModel>,
        decode: Box<dyn TensorModel>,
        fallback: Option<Box<dyn SequenceModel>>,
    },
    DecoderOnly {
        decode: Box<dyn TensorModel>,
        fallback: Option<Box<dyn SequenceModel>>,
    },
    Stateless {
        model: Box<dyn SequenceModel>,
    },
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("strategy", &self.strategy())
            .field("has_fallback", &self.has_fallback())
            .finish()
    }
}

/// Pick the strategy for the available models.
///
/// | prefill | decode | stateless | strategy                 |
/// |---------|--------|-----------|--------------------------|
/// | yes     | yes    | any       | KvCached (+ fallback)    |
/// | no      | yes    | any       | DecoderOnly (+ fallback) |
/// | any     | no     | yes       | Stateless                |
/// | any     | no     | no        | `ModelUnavailable`       |
pub fn determine_strategy(prefill: bool, decode: bool, stateless: bool) -> Option<Strategy> {
    match (prefill, decode, stateless) {
        (true, true, _) => Some(Strategy::KvCached),
        (false, true, _) => Some(Strategy::DecoderOnly),
        (_, false, true) => Some(Strategy::Stateless),
        (_, false, false) => None,
    }
}

impl Backend {
    pub fn select(models: LoadedModels) -> Result<Self> {
        let LoadedModels {
            prefill,
            decode,
            stateless,
        } = models;
        let strategy = determine_strategy(prefill.is_some(), decode.is_some(), stateless.is_some());

        let backend = match (strategy, prefill, decode, stateless) {
            (Some(Strategy::KvCached), Some(prefill), Some(decode), fallback) => Backend::KvCached {
                prefill,
                decode,
                fallback,
            },
            (Some(Strategy::DecoderOnly), _, Some(decode), fallback) => Backend::DecoderOnly {
                decode,
                fallback,
            },
            (Some(Strategy::Stateless), prefill, _, Some(model)) => {
                if prefill.is_some() {
                    warn!("Prefill model without a decode model is unused");
                }
                Backend::Stateless { model }
            }
            _ => {
                return Err(EngineError::ModelUnavailable(
                    "no decode or stateless model available".into(),
                ));
            }
        };
        info!(
            "Inference strategy: {} (stateless fallback: {})",
            backend.strategy(),
            backend.has_fallback()
        );
        Ok(backend)
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Backend::KvCached { .. } => Strategy::KvCached,
            Backend::DecoderOnly { .. } => Strategy::DecoderOnly,
            Backend::Stateless { .. } => Strategy::Stateless,
        }
    }

    pub fn has_fallback(&self) -> bool {
        match self {
            Backend::KvCached { fallback, .. } | Backend::DecoderOnly { fallback, .. } => {
                fallback.is_some()
            }
            Backend::Stateless { .. } => false,
        }
    }

    /// Session for the primary strategy.
    pub fn session<'a>(&'a mut self, ctx: &'a SessionContext) -> Box<dyn LogitsSession + 'a> {
        match self {
            Backend::KvCached {
                prefill, decode, ..
            } => Box::new(CachedSession::new(Some(prefill.as_mut()), decode.as_mut(), ctx)),
            Backend::DecoderOnly { decode, .. } => {
                Box::new(CachedSession::new(None, decode.as_mut(), ctx))
            }
            Backend::Stateless { model } => Box::new(StatelessSession::new(model.as_mut())),
        }
    }

    /// Stateless session used to restart a failed guess, if one exists.
    pub fn fallback_session(&mut self) -> Option<Box<dyn LogitsSession + '_>> {
        match self {
            Backend::KvCached { fallback, .. } | Backend::DecoderOnly { fallback, .. } => {
                let model = fallback.as_mut()?;
                Some(Box::new(StatelessSession::new(model.as_mut())))
            }
            Backend::Stateless { .. } => None,
        }
    }
}

/// Per-engine values every session needs.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub model: ModelSettings,
    pub vocab_size: usize,
    pub pad_id: u32,
}

/// One guess worth of model state.
pub trait LogitsSession {
    fn strategy(&self) -> Strategy;

    /// Consume the prompt and return logits for the first letter.
    fn prefill(&mut self, prompt: &[u32]) -> Result<Vec<f32>>;

    /// Advance by one chosen token and return logits for the next position.
    fn step(&mut self, token: u32) -> Result<Vec<f32>>;
}

/// KV-cached session. Without a prefill model the prompt is fed through the
/// decode model one token at a time.
struct CachedSession<'a> {
    prefill: Option<&'a mut dyn TensorModel>,
    decode: &'a mut dyn TensorModel,
    ctx: &'a SessionContext,
    cache: KvCache,
    position: usize,
    prefill_roles: OutputRoles,
    decode_roles: OutputRoles,
}

impl<'a> CachedSession<'a> {
    fn new(
        prefill: Option<&'a mut dyn TensorModel>,
        decode: &'a mut dyn TensorModel,
        ctx: &'a SessionContext,
    ) -> Self {
        let model = &ctx.model;
        let cache = KvCache::new(
            model.num_layers,
            model.num_heads,
            model.decode_past_len(),
            model.head_dim,
        );
        let prefill_roles = OutputRoles::new(
            prefill.as_ref().map_or("prefill", |m| m.name()),
            &model.io,
            ctx.vocab_size,
            model.num_layers,
        );
        let decode_roles =
            OutputRoles::new(decode.name(), &model.io, ctx.vocab_size, model.num_layers);
        Self {
            prefill,
            decode,
            ctx,
            cache,
            position: 0,
            prefill_roles,
            decode_roles,
        }
    }

    fn run_prefill(&mut self, prompt: &[u32]) -> Result<Vec<f32>> {
        let Some(prefill) = self.prefill.as_deref_mut() else {
            return Err(EngineError::ModelUnavailable("prefill model".into()));
        };
        let model = &self.ctx.model;
        let len = model.prefill_len;

        // left-truncate long prompts, right-pad short ones
        let kept = &prompt[prompt.len().saturating_sub(len)..];
        let consumed = kept.len();
        if consumed == 0 {
            return Err(EngineError::bad_shape(prefill.name(), "input_ids"));
        }
        let mut ids: Vec<i64> = kept.iter().map(|&t| t as i64).collect();
        ids.resize(len, self.ctx.pad_id as i64);
        let mut mask = vec![1i64; consumed];
        mask.resize(len, 0);

        let mut inputs = vec![
            NamedTensor::i64(model.io.input_ids.as_str(), &[1, len], ids)?,
            NamedTensor::i64(model.io.attention_mask.as_str(), &[1, len], mask)?,
        ];
        if let Some(name) = &model.io.position_ids {
            let positions = (0..len as i64).collect();
            inputs.push(NamedTensor::i64(name.as_str(), &[1, len], positions)?);
        }

        let outputs = prefill.run(inputs)?;
        let logits = self.prefill_roles.logits(&outputs, Row::At(consumed - 1))?;
        let kv = self.prefill_roles.key_values(&outputs)?;

        self.cache.clear();
        let steps: Vec<_> = kv
            .iter()
            .map(|(k, v)| {
                let real = 0..consumed.min(k.shape()[2]).min(v.shape()[2]);
                (batch_steps(k, real.clone()), batch_steps(v, real))
            })
            .collect();
        let views: Vec<_> = steps.iter().map(|(k, v)| (k.view(), v.view())).collect();
        self.cache.append(&views)?;
        self.position = consumed;
        debug!(
            "Prefill consumed {} tokens, cache holds {}/{}",
            consumed,
            self.cache.valid_len(),
            self.cache.window()
        );
        Ok(logits)
    }

    fn decode_one(&mut self, token: u32) -> Result<Vec<f32>> {
        let model = &self.ctx.model;
        let past_len = self.cache.window();
        let past = self.cache.past_inputs(past_len);

        let mut inputs = vec![
            NamedTensor::i64(model.io.input_ids.as_str(), &[1, 1], vec![token as i64])?,
            NamedTensor::i64(model.io.attention_mask.as_str(), &[1, past_len + 1], past.mask)?,
        ];
        if let Some(name) = &model.io.position_ids {
            inputs.push(NamedTensor::i64(name.as_str(), &[1, 1], vec![self.position as i64])?);
        }
        for (layer, (k, v)) in past.keys.into_iter().zip(past.values).enumerate() {
            inputs.push(NamedTensor::f32(layer_name(&model.io.past_key, layer), k.into_dyn()));
            inputs.push(NamedTensor::f32(layer_name(&model.io.past_value, layer), v.into_dyn()));
        }

        let outputs = self.decode.run(inputs)?;
        let logits = self.decode_roles.logits(&outputs, Row::Last)?;
        let kv = self.decode_roles.key_values(&outputs)?;

        // newest timestep of each present tensor
        let steps: Vec<_> = kv
            .iter()
            .map(|(k, v)| {
                let (tk, tv) = (k.shape()[2], v.shape()[2]);
                (
                    batch_steps(k, tk.saturating_sub(1)..tk),
                    batch_steps(v, tv.saturating_sub(1)..tv),
                )
            })
            .collect();
        let views: Vec<_> = steps.iter().map(|(k, v)| (k.view(), v.view())).collect();
        self.cache.append(&views)?;
        self.position += 1;
        Ok(logits)
    }
}

impl LogitsSession for CachedSession<'_> {
    fn strategy(&self) -> Strategy {
        if self.prefill.is_some() {
            Strategy::KvCached
        } else {
            Strategy::DecoderOnly
        }
    }

    fn prefill(&mut self, prompt: &[u32]) -> Result<Vec<f32>> {
        if prompt.is_empty() {
            return Err(EngineError::Inference("empty prompt".into()));
        }
        if self.prefill.is_some() {
            return self.run_prefill(prompt);
        }
        self.cache.clear();
        self.position = 0;
        let mut logits = Vec::new();
        for &token in prompt {
            logits = self.decode_one(token)?;
        }
        Ok(logits)
    }

    fn step(&mut self, token: u32) -> Result<Vec<f32>> {
        let position = self.position;
        self.decode_one(token)
            .map_err(|e| EngineError::DecodeStepFailure {
                position,
                source: Box::new(e),
            })
    }
}

/// Re-encodes the growing sequence on every call.
struct StatelessSession<'a> {
    model: &'a mut dyn SequenceModel,
    tokens: Vec<u32>,
}

impl<'a> StatelessSession<'a> {
    fn new(model: &'a mut dyn SequenceModel) -> Self {
        Self {
            model,
            tokens: Vec::new(),
        }
    }
}

impl LogitsSession for StatelessSession<'_> {
    fn strategy(&self) -> Strategy {
        Strategy::Stateless
    }

    fn prefill(&mut self, prompt: &[u32]) -> Result<Vec<f32>> {
        if prompt.is_empty() {
            return Err(EngineError::Inference("empty prompt".into()));
        }
        self.tokens.clear();
        self.tokens.extend_from_slice(prompt);
        self.model.logits(&self.tokens)
    }

    fn step(&mut self, token: u32) -> Result<Vec<f32>> {
        self.tokens.push(token);
        self.model.logits(&self.tokens)
    }
}

/// Drives a full-sequence [`TensorModel`] as a [`SequenceModel`].
pub struct TensorSequenceModel {
    model: Box<dyn TensorModel>,
    settings: ModelSettings,
    roles: OutputRoles,
}

impl TensorSequenceModel {
    pub fn new(model: Box<dyn TensorModel>, settings: ModelSettings, vocab_size: usize) -> Self {
        let roles = OutputRoles::new(model.name(), &settings.io, vocab_size, settings.num_layers);
        Self {
            model,
            settings,
            roles,
        }
    }
}

impl SequenceModel for TensorSequenceModel {
    fn name(&self) -> &str {
        self.model.name()
    }

    fn logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>> {
        let io = &self.settings.io;
        let n = tokens.len();
        let ids = tokens.iter().map(|&t| t as i64).collect();
        let mut inputs = vec![
            NamedTensor::i64(io.input_ids.as_str(), &[1, n], ids)?,
            NamedTensor::i64(io.attention_mask.as_str(), &[1, n], vec![1; n])?,
        ];
        if let Some(name) = &io.position_ids {
            inputs.push(NamedTensor::i64(name.as_str(), &[1, n], (0..n as i64).collect())?);
        }
        let outputs = self.model.run(inputs)?;
        self.roles.logits(&outputs, Row::Last)
    }
}
