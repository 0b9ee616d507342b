//! Guess orchestration
//!
//! [`GuessEngine`] owns everything needed to answer "what next?" for a game:
//! the tokenizer and its letter/word maps, the selected inference backend,
//! the sampler and the opener cooldown. Each guess builds constraints from
//! the history, short-circuits when only one known word still fits, and
//! otherwise samples five letters through the primary strategy, restarting
//! once under the stateless fallback when the primary one breaks.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::boss::{AnswerSource, BossMemory};
use crate::config::{Difficulty, Settings};
use crate::constraints::ConstraintState;
use crate::cooldown::OpenerCooldown;
use crate::error::{EngineError, Result};
use crate::feedback::{HistoryEntry, parse_history};
use crate::inference::{Backend, LoadedModels, LogitsSession, SessionContext, Strategy};
use crate::language::{Language, WORD_LEN, normalize_word};
use crate::opener::{OpenerChoice, choose_opener};
use crate::prompt::build_prompt;
use crate::sampling::{LetterRequest, Sampler, SamplingParams, fallback_letter};
use crate::tokenizer::Tokenizer;
use crate::vocab::{LanguageVocab, VocabMaps};

/// Opener cooldown shared between engines of one process.
pub type SharedCooldown = Arc<Mutex<OpenerCooldown>>;

pub struct GuessEngine {
    settings: Settings,
    tokenizer: Tokenizer,
    vocab: VocabMaps,
    backend: Backend,
    session_ctx: SessionContext,
    sampler: Sampler,
    rng: StdRng,
    cooldown: SharedCooldown,
    cooldown_file: Option<PathBuf>,
    boss: BossMemory,
    answers: Option<Box<dyn AnswerSource>>,
    known_words: HashMap<Language, BTreeSet<String>>,
}

impl std::fmt::Debug for GuessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuessEngine")
            .field("backend", &self.backend)
            .field("vocab_size", &self.session_ctx.vocab_size)
            .field("cooldown_file", &self.cooldown_file)
            .finish_non_exhaustive()
    }
}

impl GuessEngine {
    /// Assemble an engine from an already built tokenizer and model set.
    ///
    /// Fails only when no inference strategy can be formed from `models`.
    pub fn new(settings: Settings, tokenizer: Tokenizer, models: LoadedModels) -> Result<Self> {
        let backend = Backend::select(models)?;
        let vocab = VocabMaps::build(&tokenizer, &Language::ALL);

        let session_ctx = SessionContext {
            model: settings.model.clone(),
            vocab_size: settings.model.vocab_size.unwrap_or(tokenizer.vocab_size()),
            pad_id: tokenizer.pad_id().or(tokenizer.eos_id()).unwrap_or(0),
        };

        let mut known_words = HashMap::new();
        for language in Language::ALL {
            let mut words = vocab.get(language).words().clone();
            if let Some(path) = settings.word_list(language) {
                match load_word_list(path, language) {
                    Ok(list) => words.extend(list),
                    Err(e) => warn!("Failed to read word list {:?}: {}", path, e),
                }
            }
            debug!("{} known words for {}", words.len(), language);
            known_words.insert(language, words);
        }

        let cooldown_file = settings.cooldown_file();
        let cooldown = match &cooldown_file {
            Some(path) => OpenerCooldown::load_or_default(path).unwrap_or_else(|e| {
                warn!("Failed to load opener cooldown {:?}: {}", path, e);
                OpenerCooldown::new()
            }),
            None => OpenerCooldown::new(),
        };

        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            sampler: Sampler::new(settings.sampling),
            boss: BossMemory::new(settings.boss.clone()),
            settings,
            tokenizer,
            vocab,
            backend,
            session_ctx,
            rng,
            cooldown: Arc::new(Mutex::new(cooldown)),
            cooldown_file,
            answers: None,
            known_words,
        })
    }

    /// Load the tokenizer and every configured model file.
    ///
    /// Model files that fail to load are skipped with a warning; it is an
    /// error only when nothing usable remains.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let tokenizer_path = settings.tokenizer_path();
        let tokenizer = Tokenizer::from_file(&tokenizer_path)?;
        info!(
            "Loaded tokenizer from {:?} ({} tokens)",
            tokenizer_path,
            tokenizer.vocab_size()
        );
        let vocab_size = settings.model.vocab_size.unwrap_or(tokenizer.vocab_size());
        let models = load_models(&settings, vocab_size);
        Self::new(settings, tokenizer, models)
    }

    /// Build an engine on a background thread so the caller stays responsive
    /// while models load.
    pub fn spawn_load(settings: Settings) -> JoinHandle<Result<Self>> {
        std::thread::spawn(move || Self::from_settings(settings))
    }

    /// Reveal hidden answers to the boss difficulty.
    pub fn with_answer_source(mut self, source: impl AnswerSource + 'static) -> Self {
        self.answers = Some(Box::new(source));
        self
    }

    /// Share an opener cooldown with other engines. `file` is where it is
    /// persisted after each opener; `None` keeps it in memory.
    pub fn with_cooldown(mut self, cooldown: SharedCooldown, file: Option<PathBuf>) -> Self {
        self.cooldown = cooldown;
        self.cooldown_file = file;
        self
    }

    pub fn cooldown(&self) -> SharedCooldown {
        Arc::clone(&self.cooldown)
    }

    /// Add answer-capable words for `language`. Words that do not normalize
    /// to a five-letter word of the language are ignored.
    pub fn extend_known_words<I, S>(&mut self, language: Language, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let known = self.known_words.entry(language).or_default();
        known.extend(
            words
                .into_iter()
                .filter_map(|w| normalize_word(w.as_ref(), language)),
        );
    }

    pub fn known_word_count(&self, language: Language) -> usize {
        self.known_words.get(&language).map_or(0, BTreeSet::len)
    }

    pub fn strategy(&self) -> Strategy {
        self.backend.strategy()
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn vocab(&self, language: Language) -> &LanguageVocab {
        self.vocab.get(language)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// What the boss difficulty has discovered in the current game.
    pub fn boss(&self) -> &BossMemory {
        &self.boss
    }

    /// Run one throwaway prefill so lazy runtime initialization happens
    /// before the first real guess.
    pub fn warm_up(&mut self) -> Result<()> {
        let prompt = build_prompt(&self.settings.prompt, Language::En, &[]);
        let tokens = self.tokenizer.encode(&prompt, true)?;
        let mut session = self.backend.session(&self.session_ctx);
        session.prefill(&tokens)?;
        debug!("Warm-up complete ({})", session.strategy());
        Ok(())
    }

    /// Next guess for a history given as `(word, feedback)` string pairs.
    pub fn guess_next<W, F>(
        &mut self,
        rows: &[(W, F)],
        language: Language,
        difficulty: Difficulty,
    ) -> Result<String>
    where
        W: AsRef<str>,
        F: AsRef<str>,
    {
        let history = parse_history(rows, language, self.settings.feedback.strict)?;
        self.guess_from_history(&history, language, difficulty)
    }

    /// Next guess for an already parsed history.
    pub fn guess_from_history(
        &mut self,
        history: &[HistoryEntry],
        language: Language,
        difficulty: Difficulty,
    ) -> Result<String> {
        if history.is_empty() {
            return Ok(self.pick_opener(language));
        }

        let mut constraints = ConstraintState::from_history(history);
        if difficulty == Difficulty::Boss
            && let Some(answer) = self.answers.as_ref().and_then(|s| s.answer(language))
        {
            // the opener is never consulted, so the first model guess is turn 0
            let turn = history.len() - 1;
            self.boss
                .consult(&mut self.rng, language, turn, &answer, &mut constraints);
        }

        if let Some(word) = self.obvious_answer(language, &constraints) {
            debug!("Only '{}' still fits, skipping the model", word);
            return Ok(word);
        }

        let vocab = self.vocab.get(language);
        if vocab.letter_ids().is_empty() {
            return Err(EngineError::ModelUnavailable(format!(
                "tokenizer has no single-letter tokens for {}",
                language
            )));
        }

        let prompt = build_prompt(&self.settings.prompt, language, history);
        let tokens = self.tokenizer.encode(&prompt, true)?;
        let mut generation = Generation {
            sampler: &self.sampler,
            rng: &mut self.rng,
            vocab,
            constraints: &constraints,
            language,
            params: self.settings.difficulty.params(difficulty),
        };

        let primary = {
            let mut session = self.backend.session(&self.session_ctx);
            generation.run(session.as_mut(), &tokens)
        };
        let error = match primary {
            Ok(word) => return Ok(word),
            Err(e) if e.triggers_fallback() => e,
            Err(e) => return Err(e),
        };

        let primary_strategy = self.backend.strategy();
        let Some(mut session) = self.backend.fallback_session() else {
            return Err(EngineError::NoUsableBackend {
                attempts: 1,
                last: Box::new(error),
            });
        };
        warn!(
            "{} strategy failed ({}), retrying with {}",
            primary_strategy,
            error,
            session.strategy()
        );
        generation
            .run(session.as_mut(), &tokens)
            .map_err(|last| EngineError::NoUsableBackend {
                attempts: 2,
                last: Box::new(last),
            })
    }

    /// Next-token logits for the opener prompt, from the primary strategy or
    /// else the stateless fallback.
    fn opener_logits(&mut self, language: Language) -> Option<Vec<f32>> {
        let prompt = build_prompt(&self.settings.prompt, language, &[]);
        let tokens = match self.tokenizer.encode(&prompt, true) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Opener prompt failed to encode, ranking by letter statistics: {}", e);
                return None;
            }
        };

        let error = {
            let mut session = self.backend.session(&self.session_ctx);
            match session.prefill(&tokens) {
                Ok(logits) => return Some(logits),
                Err(e) => e,
            }
        };
        let Some(mut session) = self.backend.fallback_session() else {
            warn!("Opener prefill failed, ranking by letter statistics: {}", error);
            return None;
        };
        warn!(
            "Opener prefill failed ({}), retrying with {}",
            error,
            session.strategy()
        );
        match session.prefill(&tokens) {
            Ok(logits) => Some(logits),
            Err(e) => {
                warn!("Opener prefill failed, ranking by letter statistics: {}", e);
                None
            }
        }
    }

    /// The single known word satisfying `constraints`, if exactly one does.
    fn obvious_answer(&self, language: Language, constraints: &ConstraintState) -> Option<String> {
        let words = self.known_words.get(&language)?;
        let mut matching = words.iter().filter(|w| constraints.matches_word(w));
        let first = matching.next()?;
        matching.next().is_none().then(|| first.clone())
    }

    /// First guess of a game. Starts a new game for the boss memory.
    ///
    /// Never fails: model trouble falls back to the letter-statistics
    /// ranking, an empty pool to a fixed word.
    pub fn pick_opener(&mut self, language: Language) -> String {
        self.boss.reset(language);
        let logits = self.opener_logits(language);

        let mut cooldown = self.cooldown.lock().unwrap_or_else(PoisonError::into_inner);
        let OpenerChoice { word, id, source } = choose_opener(
            &mut self.rng,
            language,
            self.vocab.get(language),
            logits.as_deref(),
            &self.settings.opener,
            &mut cooldown,
        );
        debug!("Opener '{}' for {} ({:?})", word, language, source);

        if id.is_some()
            && cooldown.is_dirty()
            && let Some(path) = &self.cooldown_file
            && let Err(e) = cooldown.save(path)
        {
            warn!("Failed to save opener cooldown to {:?}: {}", path, e);
        }
        word
    }
}

/// Borrowed state for sampling one word.
struct Generation<'a> {
    sampler: &'a Sampler,
    rng: &'a mut StdRng,
    vocab: &'a LanguageVocab,
    constraints: &'a ConstraintState,
    language: Language,
    params: SamplingParams,
}

impl Generation<'_> {
    fn run(&mut self, session: &mut dyn LogitsSession, prompt: &[u32]) -> Result<String> {
        let mut logits = session.prefill(prompt)?;
        let mut used: Vec<char> = Vec::with_capacity(WORD_LEN);

        for position in 0..WORD_LEN {
            let request = LetterRequest {
                position,
                used: &used,
                constraints: self.constraints,
                vocab: self.vocab,
                params: self.params,
            };
            let sampled = self
                .sampler
                .choose_letter(&mut *self.rng, &logits, &request)
                .and_then(|id| self.vocab.letter_of(id).map(|c| (c, id)));

            let (letter, id) = match sampled {
                Some(pick) => pick,
                None => {
                    let vocab = self.vocab;
                    let letter = fallback_letter(
                        self.language,
                        position,
                        &used,
                        self.constraints,
                        |c| vocab.id_for(c).is_some(),
                    );
                    let id = vocab.id_for(letter).ok_or_else(|| {
                        EngineError::ModelUnavailable(format!(
                            "no token for letter '{}' in {}",
                            letter, self.language
                        ))
                    })?;
                    debug!("Position {}: nothing sampled, using '{}'", position, letter);
                    (letter, id)
                }
            };
            used.push(letter);

            if position + 1 < WORD_LEN {
                logits = session.step(id)?;
            }
        }
        Ok(used.into_iter().collect())
    }
}

fn load_models(settings: &Settings, vocab_size: usize) -> LoadedModels {
    let assets = &settings.assets;
    let mut models = LoadedModels::default();

    if let Some(path) = &assets.prefill_model {
        models.prefill = load_or_warn(path, "prefill", |p| tensor_model(p, "prefill", settings));
    }
    if let Some(path) = &assets.decode_model {
        models.decode = load_or_warn(path, "decode", |p| tensor_model(p, "decode", settings));
    }
    if let Some(path) = &assets.stateless_model {
        models.stateless =
            load_or_warn(path, "stateless", |p| sequence_model(p, settings, vocab_size));
    }
    models
}

fn load_or_warn<T>(path: &Path, role: &str, load: impl FnOnce(&Path) -> Result<T>) -> Option<T> {
    match load(path) {
        Ok(model) => {
            info!("Loaded {} model from {:?}", role, path);
            Some(model)
        }
        Err(e) => {
            warn!("Failed to load {} model {:?}: {}", role, path, e);
            None
        }
    }
}

#[cfg(feature = "onnx")]
fn tensor_model(
    path: &Path,
    name: &str,
    settings: &Settings,
) -> Result<Box<dyn crate::inference::TensorModel>> {
    let model = crate::inference::onnx::OnnxModel::from_file(path, name, settings.model.n_threads)?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "onnx"))]
fn tensor_model(
    _path: &Path,
    _name: &str,
    _settings: &Settings,
) -> Result<Box<dyn crate::inference::TensorModel>> {
    Err(EngineError::ModelUnavailable(
        "built without ONNX support".to_string(),
    ))
}

fn is_gguf(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
}

fn sequence_model(
    path: &Path,
    settings: &Settings,
    vocab_size: usize,
) -> Result<Box<dyn crate::inference::SequenceModel>> {
    if is_gguf(path) {
        return gguf_model(path, settings);
    }
    let graph = tensor_model(path, "stateless", settings)?;
    Ok(Box::new(crate::inference::TensorSequenceModel::new(
        graph,
        settings.model.clone(),
        vocab_size,
    )))
}

#[cfg(feature = "llamacpp")]
fn gguf_model(path: &Path, settings: &Settings) -> Result<Box<dyn crate::inference::SequenceModel>> {
    let model = crate::inference::llamacpp::LlamaCppModel::from_file(
        path,
        settings.model.n_ctx,
        settings.model.n_threads,
    )?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "llamacpp"))]
fn gguf_model(
    _path: &Path,
    _settings: &Settings,
) -> Result<Box<dyn crate::inference::SequenceModel>> {
    Err(EngineError::ModelUnavailable(
        "built without llama.cpp support".to_string(),
    ))
}

/// One word per line; blank lines, `#` comments and words that are not five
/// letters of `language` are skipped.
fn load_word_list(path: &Path, language: Language) -> std::io::Result<Vec<String>> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut words = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(word) = normalize_word(line, language) {
            words.push(word);
        }
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_word_list_skips_noise() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# answers").unwrap();
        writeln!(file, "Crane").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "toolong").unwrap();
        writeln!(file, "pilot").unwrap();
        file.flush().unwrap();

        let words = load_word_list(file.path(), Language::En).unwrap();
        assert_eq!(words, vec!["crane".to_string(), "pilot".to_string()]);
    }

    #[test]
    fn test_gguf_extension() {
        assert!(is_gguf(Path::new("model.gguf")));
        assert!(is_gguf(Path::new("MODEL.GGUF")));
        assert!(!is_gguf(Path::new("model.onnx")));
        assert!(!is_gguf(Path::new("model")));
    }

    #[test]
    fn test_missing_tokenizer_is_fatal() {
        let mut settings = Settings::default();
        settings.assets.tokenizer = Some(PathBuf::from("/nonexistent/rival/tokenizer.json"));
        let err = GuessEngine::from_settings(settings).unwrap_err();
        assert!(matches!(err, EngineError::TokenizerMissing(_)));
    }
}
