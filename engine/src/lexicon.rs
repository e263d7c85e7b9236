use crate::error::Result;
use crate::persist::{append_rows, load_counter, parse_id, read_rows, save_counter, IndexPaths};
use crate::WordId;
use std::collections::HashMap;
use std::path::PathBuf;

const HEADER: &[&str] = &["ID", "Word"];

/// Append-only word <-> id dictionary. Ids start at 1 and are never reused,
/// including across restarts: the latest assigned id is persisted separately
/// from the rows.
#[derive(Debug)]
pub struct Lexicon {
    words: HashMap<String, WordId>,
    latest_id: WordId,
    pending: Vec<(WordId, String)>,
    rows_path: PathBuf,
    counter_path: PathBuf,
}

impl Lexicon {
    pub fn load(paths: &IndexPaths) -> Result<Self> {
        let rows_path = paths.lexicon();
        let counter_path = paths.latest_word_id();
        let mut words = HashMap::new();
        let mut max_seen = 0;
        for row in read_rows(&rows_path, HEADER.len())? {
            let id = match parse_id(&row.cells[0], || format!("lexicon line {}", row.line)) {
                Ok(id) if id > 0 => id,
                Ok(_) => {
                    tracing::warn!(line = row.line, "skipping lexicon row with id 0");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping lexicon row");
                    continue;
                }
            };
            let word = row.cells[1].clone();
            if word.is_empty() || words.contains_key(&word) {
                tracing::warn!(line = row.line, word = %word, "skipping empty or repeated lexicon word");
                continue;
            }
            max_seen = max_seen.max(id);
            words.insert(word, id);
        }
        let latest_id = load_counter(&counter_path)?.max(max_seen);
        tracing::info!(words = words.len(), latest_id, "lexicon loaded");
        Ok(Self { words, latest_id, pending: Vec::new(), rows_path, counter_path })
    }

    pub fn lookup(&self, word: &str) -> Option<WordId> {
        self.words.get(word).copied()
    }

    /// Returns the id of `word`, assigning the next one if unseen. New
    /// assignments stay pending until [`Lexicon::flush_new`].
    pub fn get_or_assign(&mut self, word: &str) -> WordId {
        if let Some(id) = self.lookup(word) {
            return id;
        }
        self.latest_id += 1;
        let id = self.latest_id;
        self.words.insert(word.to_string(), id);
        self.pending.push((id, word.to_string()));
        id
    }

    /// Persists pending words and the latest id. Must complete before any
    /// posting that references a new id is written.
    pub fn flush_new(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let rows = self.pending.iter().map(|(id, w)| vec![id.to_string(), w.clone()]);
        let written = append_rows(&self.rows_path, HEADER, rows)?;
        save_counter(&self.counter_path, self.latest_id)?;
        self.pending.clear();
        tracing::debug!(written, latest_id = self.latest_id, "lexicon flushed");
        Ok(written)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn latest_id(&self) -> WordId {
        self.latest_id
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ids_are_contiguous_and_survive_reload() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let mut lex = Lexicon::load(&paths).unwrap();
        assert_eq!(lex.get_or_assign("apple"), 1);
        assert_eq!(lex.get_or_assign("pie"), 2);
        assert_eq!(lex.get_or_assign("apple"), 1);
        lex.flush_new().unwrap();

        let mut lex = Lexicon::load(&paths).unwrap();
        assert_eq!(lex.lookup("pie"), Some(2));
        assert_eq!(lex.lookup("missing"), None);
        assert_eq!(lex.get_or_assign("recipe"), 3);
    }

    #[test]
    fn counter_prevents_reuse_of_unflushed_rows() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        save_counter(&paths.latest_word_id(), 9).unwrap();
        let mut lex = Lexicon::load(&paths).unwrap();
        assert_eq!(lex.get_or_assign("fresh"), 10);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        std::fs::write(paths.lexicon(), "ID\tWord\n1\tapple\nx\tbad\n2\n3\tpear\n").unwrap();
        let lex = Lexicon::load(&paths).unwrap();
        assert_eq!(lex.len(), 2);
        assert_eq!(lex.lookup("pear"), Some(3));
        assert_eq!(lex.latest_id(), 3);
    }
}
