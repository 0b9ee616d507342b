//! Engine settings
//!
//! Default values live in `config/default.toml` and are embedded at build
//! time. A user file only needs the keys it overrides.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::language::Language;
use crate::sampling::{PenaltyConfig, SamplingParams};

/// Default configuration TOML embedded from config/default.toml
const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Fixed RNG seed; entropy-seeded when unset
    #[serde(default)]
    pub seed: Option<u64>,
    pub assets: AssetSettings,
    pub model: ModelSettings,
    pub prompt: PromptSettings,
    pub difficulty: DifficultySettings,
    pub sampling: PenaltyConfig,
    pub opener: OpenerSettings,
    pub boss: BossSettings,
    pub feedback: FeedbackSettings,
}

/// Model and tokenizer locations. Acquisition of these files is the
/// caller's concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetSettings {
    pub tokenizer: Option<PathBuf>,
    pub prefill_model: Option<PathBuf>,
    pub decode_model: Option<PathBuf>,
    pub stateless_model: Option<PathBuf>,
    /// Language code → word list file
    #[serde(default)]
    pub word_lists: BTreeMap<String, PathBuf>,
}

/// Shape of the exported transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub num_layers: usize,
    pub num_heads: usize,
    pub head_dim: usize,
    pub prefill_len: usize,
    pub decode_window: usize,
    #[serde(default)]
    pub vocab_size: Option<usize>,
    pub n_ctx: u32,
    pub n_threads: u32,
    pub io: ModelIo,
}

impl ModelSettings {
    /// Past length fed to the decode model alongside one new token.
    pub fn decode_past_len(&self) -> usize {
        self.decode_window.saturating_sub(1)
    }
}

/// Declared input and output names. `{layer}` is replaced by the layer index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelIo {
    pub input_ids: String,
    pub attention_mask: String,
    #[serde(default)]
    pub position_ids: Option<String>,
    pub past_key: String,
    pub past_value: String,
    #[serde(default)]
    pub present_key: Option<String>,
    #[serde(default)]
    pub present_value: Option<String>,
    #[serde(default)]
    pub logits: Option<String>,
}

/// Expand a `{layer}` name pattern.
pub fn layer_name(pattern: &str, layer: usize) -> String {
    pattern.replace("{layer}", &layer.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSettings {
    /// `{lang}` is replaced by the language code
    pub header: String,
    /// `{word}` and `{marks}` are replaced per history row
    pub row: String,
    /// Appended after the last row, right before the generated letters
    pub cue: String,
}

/// Game difficulty, selecting a sampling temperature and top-k.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    /// Hard sampling plus boss memory when a hidden answer is available
    Boss,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Boss => "boss",
        };
        f.write_str(name)
    }
}

impl FromStr for Difficulty {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" | "normal" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            "boss" => Ok(Difficulty::Boss),
            other => Err(EngineError::UnknownDifficulty(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultySettings {
    pub easy: SamplingParams,
    pub medium: SamplingParams,
    pub hard: SamplingParams,
    pub boss: SamplingParams,
}

impl DifficultySettings {
    pub fn params(&self, difficulty: Difficulty) -> SamplingParams {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
            Difficulty::Boss => self.boss,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenerSettings {
    /// Require 4 distinct letters instead of 3
    pub strict: bool,
    pub max_attempts: usize,
    pub bias_scale: f32,
    pub temperature: f32,
    pub top_k: usize,
    #[serde(default)]
    pub cooldown_file: Option<PathBuf>,
}

impl OpenerSettings {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_k: self.top_k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossSettings {
    pub learn_probability: f64,
    pub lock_probability: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSettings {
    pub strict: bool,
}

impl Default for Settings {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("embedded default.toml must be valid")
    }
}

/// Recursively merge `overlay` TOML values on top of `base`.
fn merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(key) {
                    Some(base_value) => merge_toml(base_value, value),
                    None => {
                        base_table.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, _) => *base = overlay.clone(),
    }
}

fn parse_with_defaults(user_content: &str) -> Result<Settings> {
    let mut base: toml::Value = toml::from_str(DEFAULT_CONFIG_TOML)?;
    let user: toml::Value = toml::from_str(user_content)?;
    merge_toml(&mut base, &user);
    Ok(base.try_into()?)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "rival", "rival")
}

impl Settings {
    pub fn data_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    pub fn config_file() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Opener cooldown location: the configured file, else
    /// `<data dir>/opener_cooldown.tsv`.
    pub fn cooldown_file(&self) -> Option<PathBuf> {
        self.opener
            .cooldown_file
            .clone()
            .or_else(|| Self::data_dir().map(|dir| dir.join("opener_cooldown.tsv")))
    }

    /// Tokenizer location: the configured file, else
    /// `<data dir>/tokenizer.json`.
    pub fn tokenizer_path(&self) -> PathBuf {
        self.assets.tokenizer.clone().unwrap_or_else(|| {
            Self::data_dir()
                .map(|dir| dir.join("tokenizer.json"))
                .unwrap_or_else(|| PathBuf::from("tokenizer.json"))
        })
    }

    /// Word list configured for `language`, if any.
    pub fn word_list(&self, language: Language) -> Option<&Path> {
        self.assets
            .word_lists
            .get(language.code())
            .map(PathBuf::as_path)
    }

    /// Load the user configuration file, or the defaults when it is absent.
    pub fn load() -> Result<Self> {
        let Some(config_file) = Self::config_file() else {
            warn!("Could not determine config directory, using defaults");
            return Ok(Self::default());
        };
        if !config_file.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&config_file)
    }

    /// Load settings from a specific file, merged on top of defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let content = fs::read_to_string(path)?;
        parse_with_defaults(&content)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
