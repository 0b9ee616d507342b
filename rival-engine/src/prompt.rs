//! Model prompt construction

use crate::config::PromptSettings;
use crate::feedback::HistoryEntry;
use crate::language::Language;

/// Render the prompt for the next guess in `language`.
///
/// ```
/// use rival_engine::{HistoryEntry, Language, PromptSettings, build_prompt};
///
/// let settings = PromptSettings {
///     header: "<{lang}>".into(),
///     row: " {word}:{marks}".into(),
///     cue: " ".into(),
/// };
/// let history = [HistoryEntry::parse("crane", "GYXXX", Language::En, false).unwrap()];
/// assert_eq!(build_prompt(&settings, Language::En, &history), "<en> crane:GYXXX ");
/// ```
pub fn build_prompt(settings: &PromptSettings, language: Language, history: &[HistoryEntry]) -> String {
    let mut prompt = settings.header.replace("{lang}", language.code());
    for entry in history {
        prompt.push_str(
            &settings
                .row
                .replace("{word}", entry.word())
                .replace("{marks}", &entry.feedback().to_codes()),
        );
    }
    prompt.push_str(&settings.cue);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history() {
        let settings = PromptSettings {
            header: "[{lang}]\n".into(),
            row: "{word} {marks}\n".into(),
            cue: String::new(),
        };
        assert_eq!(build_prompt(&settings, Language::De, &[]), "[de]\n");
    }

    #[test]
    fn test_rows_in_order() {
        let settings = PromptSettings {
            header: String::new(),
            row: "{word}={marks};".into(),
            cue: ">".into(),
        };
        let history = vec![
            HistoryEntry::parse("crane", "XXXXX", Language::En, false).unwrap(),
            HistoryEntry::parse("pilot", "🟩⬛⬛🟨⬛", Language::En, false).unwrap(),
        ];
        assert_eq!(
            build_prompt(&settings, Language::En, &history),
            "crane=XXXXX;pilot=GXXYX;>"
        );
    }
}
