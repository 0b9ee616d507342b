use rival_engine::{ConstraintState, Feedback, HistoryEntry, Language, parse_history};

fn history(answer: &str, guesses: &[&str]) -> Vec<HistoryEntry> {
    guesses
        .iter()
        .map(|g| HistoryEntry::new(g, Feedback::score(g, answer), Language::En).unwrap())
        .collect()
}

#[test]
fn test_answer_always_matches_its_history() {
    let games: &[(&str, &[&str])] = &[
        ("lemon", &["crane", "melon", "slate"]),
        ("geese", &["eerie", "sheep", "verge"]),
        ("pilot", &["llama", "polls", "pilaf"]),
        ("abbey", &["babes", "ebbed", "kebab"]),
    ];
    for (answer, guesses) in games {
        let state = ConstraintState::from_history(&history(answer, guesses));
        assert!(state.matches_word(answer), "{} vs {:?}", answer, guesses);
    }
}

#[test]
fn test_guessed_non_answers_are_excluded() {
    let rows = history("lemon", &["crane", "melon"]);
    let state = ConstraintState::from_history(&rows);
    assert!(!state.matches_word("crane"));
    assert!(!state.matches_word("melon"));
    assert!(state.matches_word("lemon"));
}

#[test]
fn test_duplicate_letter_bounds() {
    // "sheep" against "geese": one green e, one yellow e, no gray e
    let state = ConstraintState::from_history(&history("geese", &["sheep"]));
    assert_eq!(state.min_of('e'), 2);
    assert_eq!(state.max_of('e'), None);

    // "eerie" against "lemon": one green e, two gray e
    let state = ConstraintState::from_history(&history("lemon", &["eerie"]));
    assert_eq!(state.min_of('e'), 1);
    assert_eq!(state.max_of('e'), Some(1));
    assert!(!state.disallow.contains(&'e'));
}

#[test]
fn test_string_history_accepts_mixed_symbols() {
    let rows = parse_history(
        &[("crane", "⬛🟨XX🟩"), ("PILOT", "b-y.x")],
        Language::En,
        false,
    )
    .unwrap();
    let state = ConstraintState::from_history(&rows);
    assert_eq!(state.fixed[4], Some('e'));
    assert_eq!(state.min_of('r'), 1);
    assert_eq!(state.min_of('l'), 1);
    assert!(state.disallow.contains(&'p'));

    assert!(parse_history(&[("crane", "⬛🟨XX?")], Language::En, false).is_ok());
    assert!(parse_history(&[("crane", "⬛🟨XX?")], Language::En, true).is_err());
}
