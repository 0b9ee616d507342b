pub mod boss;
pub mod config;
pub mod constraints;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod inference;
pub mod language;
pub mod opener;
pub mod prompt;
pub mod sampling;
pub mod tokenizer;
pub mod vocab;

pub use boss::{AnswerSource, BossMemory};
pub use config::{Difficulty, PromptSettings, Settings};
pub use constraints::{ConstraintModel, ConstraintState};
pub use cooldown::OpenerCooldown;
pub use engine::{GuessEngine, SharedCooldown};
pub use error::{EngineError, Result};
pub use feedback::{Feedback, HistoryEntry, Mark, parse_history};
pub use inference::{LoadedModels, SequenceModel, Strategy, TensorModel};
pub use language::{Language, WORD_LEN, normalize_word};
pub use opener::{OpenerChoice, OpenerSource, choose_opener, passes_gate};
pub use prompt::build_prompt;
pub use sampling::{PenaltyConfig, Sampler, SamplingParams};
pub use tokenizer::Tokenizer;
pub use vocab::{LanguageVocab, VocabMaps};
