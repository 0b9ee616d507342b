//! Command-line front end for the rival guess engine

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use rival_engine::{
    ConstraintState, Difficulty, Feedback, GuessEngine, Language, Settings, normalize_word,
    parse_history,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Wordle-style opponent
#[derive(Parser, Debug)]
#[command(name = "rival", version)]
struct Cli {
    /// Settings file (default: user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured RNG seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce the next guess for a game in progress
    Guess {
        /// History row as WORD:FEEDBACK, oldest first (e.g. crane:GYXXX)
        #[arg(long = "row")]
        rows: Vec<String>,

        #[arg(long, default_value = "en")]
        lang: Language,

        #[arg(long, default_value = "medium")]
        difficulty: Difficulty,

        /// Hidden answer revealed to the boss difficulty
        #[arg(long)]
        answer: Option<String>,
    },
    /// Produce opening guesses
    Opener {
        #[arg(long, default_value = "en")]
        lang: Language,

        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Show the constraints implied by a history
    Constraints {
        #[arg(long = "row")]
        rows: Vec<String>,

        #[arg(long, default_value = "en")]
        lang: Language,

        /// Feedback must use canonical symbols only
        #[arg(long)]
        strict: bool,
    },
    /// Score a guess against an answer
    Score {
        guess: String,
        answer: String,

        #[arg(long, default_value = "en")]
        lang: Language,
    },
    /// Load the models and run one throwaway inference
    Warmup,
}

fn split_rows(rows: &[String]) -> Result<Vec<(String, String)>> {
    rows.iter()
        .map(|row| {
            row.split_once(':')
                .map(|(w, f)| (w.trim().to_string(), f.trim().to_string()))
                .ok_or_else(|| anyhow!("row '{}' is not WORD:FEEDBACK", row))
        })
        .collect()
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load settings from {:?}", path))?,
        None => Settings::load()?,
    };
    if cli.seed.is_some() {
        settings.seed = cli.seed;
    }
    Ok(settings)
}

fn load_engine(settings: Settings) -> Result<GuessEngine> {
    let handle = GuessEngine::spawn_load(settings);
    let engine = handle
        .join()
        .map_err(|_| anyhow!("engine loader thread panicked"))??;
    tracing::info!("Engine ready ({})", engine.strategy());
    Ok(engine)
}

fn print_constraints(state: &ConstraintState) {
    let pattern: String = state
        .fixed
        .iter()
        .map(|f| f.unwrap_or('_'))
        .collect();
    println!("fixed:    {}", pattern);
    for (i, banned) in state.banned_at.iter().enumerate() {
        if !banned.is_empty() {
            let letters: String = banned.iter().collect();
            println!("not at {}: {}", i + 1, letters);
        }
    }
    let absent: String = state.disallow.iter().collect();
    println!("absent:   {}", absent);
    for (c, min) in &state.min_count {
        match state.max_of(*c) {
            Some(max) if max == *min => println!("'{}' exactly {}", c, min),
            Some(max) => println!("'{}' {}..={}", c, min, max),
            None => println!("'{}' at least {}", c, min),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "rival=debug,rival_engine=debug"
    } else {
        "rival=info,rival_engine=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match &cli.command {
        Command::Score {
            guess,
            answer,
            lang,
        } => {
            let lang = *lang;
            let guess = normalize_word(guess, lang).ok_or_else(|| anyhow!("bad guess '{}'", guess))?;
            let answer =
                normalize_word(answer, lang).ok_or_else(|| anyhow!("bad answer '{}'", answer))?;
            let feedback = Feedback::score(&guess, &answer);
            println!("{} {}", feedback, feedback.to_codes());
        }
        Command::Constraints { rows, lang, strict } => {
            let history = parse_history(&split_rows(rows)?, *lang, *strict)?;
            print_constraints(&ConstraintState::from_history(&history));
        }
        Command::Guess {
            rows,
            lang,
            difficulty,
            answer,
        } => {
            let rows = split_rows(rows)?;
            let mut engine = load_engine(load_settings(&cli)?)?;
            if let Some(answer) = answer.clone() {
                engine = engine.with_answer_source(move |_: Language| Some(answer.clone()));
            }
            let word = engine.guess_next(&rows, *lang, *difficulty)?;
            println!("{}", word);
        }
        Command::Opener { lang, count } => {
            let mut engine = load_engine(load_settings(&cli)?)?;
            for _ in 0..*count {
                println!("{}", engine.pick_opener(*lang));
            }
        }
        Command::Warmup => {
            let mut engine = load_engine(load_settings(&cli)?)?;
            let start = std::time::Instant::now();
            engine.warm_up()?;
            println!("{} warm-up in {:.1?}", engine.strategy(), start.elapsed());
        }
    }
    Ok(())
}
