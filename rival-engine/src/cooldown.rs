//! Recently used openers per language.
//!
//! Openers chosen recently are excluded from the candidate pool so that
//! consecutive games do not start with the same word. Persisted as a simple
//! TSV file (`language\ttoken_id`), oldest entry first.

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, Write};
use std::path::Path;

use tracing::debug;

use crate::language::Language;

#[derive(Debug, Default)]
pub struct OpenerCooldown {
    recent: HashMap<Language, VecDeque<u32>>,
    dirty: bool,
}

impl OpenerCooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum remembered openers for a pool of `pool_size` candidates:
    /// 5% of the pool, kept within `64..=512`.
    pub fn budget(pool_size: usize) -> usize {
        (pool_size * 5 / 100).clamp(64, 512)
    }

    /// Fewest pool members that must stay eligible before old entries are
    /// released.
    pub fn min_eligible(pool_size: usize) -> usize {
        (pool_size / 4).max(8).min(pool_size)
    }

    pub fn contains(&self, language: Language, id: u32) -> bool {
        self.recent
            .get(&language)
            .is_some_and(|ids| ids.contains(&id))
    }

    /// Remembered ids for `language`, oldest first.
    pub fn recent(&self, language: Language) -> impl Iterator<Item = u32> + '_ {
        self.recent.get(&language).into_iter().flatten().copied()
    }

    pub fn len(&self, language: Language) -> usize {
        self.recent.get(&language).map_or(0, VecDeque::len)
    }

    /// Remember `id` as the newest opener, evicting the oldest entries over budget.
    pub fn record(&mut self, language: Language, id: u32, pool_size: usize) {
        let ids = self.recent.entry(language).or_default();
        ids.retain(|&x| x != id);
        ids.push_back(id);
        let budget = Self::budget(pool_size);
        while ids.len() > budget {
            ids.pop_front();
        }
        self.dirty = true;
    }

    /// Release the oldest entries until enough of `pool` is eligible again.
    /// Returns the number of eligible pool members.
    pub fn refresh(&mut self, language: Language, pool: &[u32]) -> usize {
        let wanted = Self::min_eligible(pool.len());
        let Some(ids) = self.recent.get_mut(&language) else {
            return pool.len();
        };
        let eligible = |ids: &VecDeque<u32>| pool.iter().filter(|id| !ids.contains(id)).count();

        let mut count = eligible(ids);
        let mut released = 0;
        while count < wanted && !ids.is_empty() {
            ids.pop_front();
            released += 1;
            count = eligible(ids);
        }
        if released > 0 {
            debug!(
                "Opener cooldown for {}: released {} entries, {} eligible",
                language, released, count
            );
            self.dirty = true;
        }
        count
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Load from a TSV file. Lines starting with `#` are comments; malformed
    /// lines are skipped.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut cooldown = Self::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((lang, id)) = line.split_once('\t') else {
                continue;
            };
            let (Ok(language), Ok(id)) = (lang.parse::<Language>(), id.trim().parse::<u32>()) else {
                continue;
            };
            cooldown.recent.entry(language).or_default().push_back(id);
        }
        Ok(cooldown)
    }

    /// Load from `path`, or start empty when the file does not exist yet.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&mut self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        writeln!(writer, "# rival opener cooldown v1")?;

        let mut languages: Vec<&Language> = self.recent.keys().collect();
        languages.sort();
        for language in languages {
            if let Some(ids) = self.recent.get(language) {
                for id in ids {
                    writeln!(writer, "{}\t{}", language.code(), id)?;
                }
            }
        }

        writer.flush()?;
        self.dirty = false;
        Ok(())
    }
}
