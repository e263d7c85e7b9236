use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// Shortest normalized token kept in the index.
pub const MIN_TOKEN_LEN: usize = 3;

/// Text normalization used by both indexing and querying.
pub trait Analyzer: Send + Sync {
    /// Splits text into lowercase word tokens, in order.
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Reduces a single token to its index form.
    fn normalize(&self, word: &str) -> String;

    fn is_stopword(&self, token: &str) -> bool;

    /// Tokenize, drop stop-words, normalize, drop short tokens.
    fn analyze(&self, text: &str) -> Vec<String> {
        self.tokenize(text)
            .into_iter()
            .filter(|t| !self.is_stopword(t))
            .map(|t| self.normalize(&t))
            .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
            .collect()
    }
}

/// Widens a query with related words. Expanded words never count as
/// original query terms.
pub trait QueryExpander: Send + Sync {
    fn expand(&self, terms: &[String]) -> Vec<String>;
}

/// NFKC + lowercase + English stop-words + Snowball stemming.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnglishAnalyzer;

impl Analyzer for EnglishAnalyzer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let normalized = text.nfkc().collect::<String>().to_lowercase();
        RE.find_iter(&normalized).map(|m| m.as_str().to_string()).collect()
    }

    fn normalize(&self, word: &str) -> String {
        let lower = word.to_lowercase();
        STEMMER.stem(lower.trim_matches('\'')).to_string()
    }

    fn is_stopword(&self, token: &str) -> bool {
        STOPWORDS.contains(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = EnglishAnalyzer.analyze("Running, runner's run!");
        assert!(t.iter().any(|w| w == "run"));
    }

    #[test]
    fn drops_short_tokens() {
        let t = EnglishAnalyzer.analyze("Go ox pie");
        assert_eq!(t, vec!["pie".to_string()]);
    }
}
