//! Error types for the guess engine

use std::path::PathBuf;

/// Errors that can occur while building or driving the guess engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no inference backend could be constructed: {0}")]
    ModelUnavailable(String),

    #[error("tokenizer not found at {0:?}")]
    TokenizerMissing(PathBuf),

    #[error("tokenizer definition is malformed")]
    TokenizerMalformed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("model load failed")]
    ModelLoad(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("inference failed")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{model} model output has no recognizable {role} tensor")]
    BadModelOutputShape { model: String, role: &'static str },

    #[error("decode step failed at position {position}")]
    DecodeStepFailure {
        position: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("all {attempts} inference strategies failed")]
    NoUsableBackend {
        attempts: usize,
        #[source]
        last: Box<EngineError>,
    },

    #[error("invalid feedback: {0}")]
    InvalidFeedback(String),

    #[error("invalid word: '{0}'")]
    InvalidWord(String),

    #[error("unsupported language: '{0}'")]
    UnsupportedLanguage(String),

    #[error("unknown difficulty: '{0}'")]
    UnknownDifficulty(String),
}

impl EngineError {
    /// Whether a failure inside one strategy should restart the guess under the
    /// next strategy instead of surfacing to the caller.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            EngineError::BadModelOutputShape { .. }
                | EngineError::DecodeStepFailure { .. }
                | EngineError::Inference(_)
        )
    }

    pub(crate) fn bad_shape(model: &str, role: &'static str) -> Self {
        EngineError::BadModelOutputShape {
            model: model.to_string(),
            role,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
