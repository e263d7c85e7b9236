use engine::tokenizer::{Analyzer, EnglishAnalyzer};

#[test]
fn it_normalizes_and_stems() {
    let words = EnglishAnalyzer.analyze("Running Runners RUN! The café's menu.");
    // Stemming to "run" should appear
    assert!(words.contains(&"run".to_string()));
    // Unicode normalization keeps accented letters as one token
    assert!(words.iter().any(|w| w.starts_with("caf")));
}

#[test]
fn it_filters_stopwords() {
    let words = EnglishAnalyzer.analyze("The quick brown fox and the lazy dog");
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
    assert!(words.contains(&"fox".to_string()));
}

#[test]
fn it_keeps_token_order() {
    let words = EnglishAnalyzer.analyze("zebra apple mango");
    assert_eq!(words, vec!["zebra", "appl", "mango"]);
}
