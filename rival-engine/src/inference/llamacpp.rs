//! llama.cpp based GGUF inference for the stateless strategy
//!
//! Enable with the `llamacpp` feature flag.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::OnceLock;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::token::LlamaToken;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::inference::tensor::SequenceModel;

/// Global llama.cpp backend (can only be initialized once)
static LLAMA_BACKEND: OnceLock<std::result::Result<LlamaBackend, String>> = OnceLock::new();

fn get_backend() -> Result<&'static LlamaBackend> {
    let result = LLAMA_BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        backend.void_logs();
        Ok(backend)
    });
    match result {
        Ok(backend) => Ok(backend),
        Err(e) => Err(EngineError::ModelLoad(
            format!("Failed to initialize llama.cpp backend: {}", e).into(),
        )),
    }
}

/// GGUF model evaluated with a fresh context per call.
pub struct LlamaCppModel {
    model: LlamaModel,
    n_ctx: NonZeroU32,
    n_threads: u32,
}

impl LlamaCppModel {
    /// Load a GGUF model on the CPU.
    pub fn from_file<P: AsRef<Path>>(path: P, n_ctx: u32, n_threads: u32) -> Result<Self> {
        let backend = get_backend()?;
        info!("Loading GGUF model from {:?}", path.as_ref());

        let model_params = LlamaModelParams::default().with_n_gpu_layers(0);
        let model = LlamaModel::load_from_file(backend, path.as_ref(), &model_params)
            .map_err(|e| EngineError::ModelLoad(e.into()))?;
        let n_ctx = NonZeroU32::new(n_ctx)
            .ok_or_else(|| EngineError::ModelLoad("n_ctx must be non-zero".into()))?;

        Ok(Self {
            model,
            n_ctx,
            n_threads,
        })
    }

    fn context_params(&self) -> LlamaContextParams {
        let params = LlamaContextParams::default().with_n_ctx(Some(self.n_ctx));
        if self.n_threads > 0 {
            params
                .with_n_threads(self.n_threads as i32)
                .with_n_threads_batch(self.n_threads as i32)
        } else {
            params
        }
    }

    /// Process a token sequence and return the logits at the last position.
    fn eval_sequence(&self, tokens: &[LlamaToken]) -> Result<Vec<f32>> {
        let backend = get_backend()?;
        let mut ctx = self
            .model
            .new_context(backend, self.context_params())
            .map_err(|e| EngineError::Inference(e.into()))?;

        let mut batch = LlamaBatch::new(tokens.len().max(512), 1);
        for (i, token) in tokens.iter().enumerate() {
            let is_last = i == tokens.len() - 1;
            batch
                .add(*token, i as i32, &[0], is_last)
                .map_err(|e| EngineError::Inference(e.into()))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| EngineError::Inference(e.into()))?;

        Ok(ctx.get_logits().to_vec())
    }
}

impl SequenceModel for LlamaCppModel {
    fn name(&self) -> &str {
        "gguf"
    }

    fn logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>> {
        if tokens.is_empty() {
            return Err(EngineError::Inference("empty token sequence".into()));
        }
        // keep the most recent tokens that fit the context
        let limit = self.n_ctx.get() as usize;
        let start = tokens.len().saturating_sub(limit);
        let tokens: Vec<LlamaToken> = tokens[start..]
            .iter()
            .map(|&id| LlamaToken(id as i32))
            .collect();
        self.eval_sequence(&tokens)
    }
}
