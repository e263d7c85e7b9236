use serde::{Deserialize, Serialize};

pub mod barrel;
pub mod cache;
pub mod config;
pub mod docstore;
pub mod engine;
pub mod error;
pub mod forward;
pub mod inverted;
pub mod lexicon;
pub mod persist;
pub mod ranking;
pub mod search;
pub mod tokenizer;
pub mod updater;

pub use config::EngineConfig;
pub use engine::{BuildSummary, IndexStatus, IngestOutcome, SearchEngine};
pub use error::{Error, Result};
pub use search::{ResultRecord, SearchResponse};

pub type WordId = u32;
pub type DocId = u32;

/// Where in a document a token occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldTag {
    #[serde(rename = "T")]
    Title,
    #[serde(rename = "Te")]
    Body,
    #[serde(rename = "Ta")]
    Tag,
    #[serde(rename = "A")]
    Author,
}

impl FieldTag {
    pub fn code(self) -> &'static str {
        match self {
            FieldTag::Title => "T",
            FieldTag::Body => "Te",
            FieldTag::Tag => "Ta",
            FieldTag::Author => "A",
        }
    }
}

/// Occurrences of one word in one document. `positions` and `sources` are
/// parallel and both have `frequency` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub frequency: u32,
    pub positions: Vec<u32>,
    pub sources: Vec<FieldTag>,
}

impl Posting {
    pub fn record(&mut self, position: u32, source: FieldTag) {
        self.frequency += 1;
        self.positions.push(position);
        self.sources.push(source);
    }

    pub fn has_source(&self, tag: FieldTag) -> bool {
        self.sources.contains(&tag)
    }
}

/// All postings of one word across documents, stored column-wise the way a
/// barrel line lays them out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvertedRecord {
    pub word_id: WordId,
    pub doc_ids: Vec<DocId>,
    pub frequencies: Vec<u32>,
    pub positions: Vec<Vec<u32>>,
    pub sources: Vec<Vec<FieldTag>>,
}

impl InvertedRecord {
    pub fn new(word_id: WordId) -> Self {
        Self { word_id, ..Self::default() }
    }

    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Adds a document's posting, replacing the existing entry if the document
    /// is already present.
    pub fn upsert(&mut self, doc_id: DocId, posting: Posting) {
        match self.doc_ids.iter().position(|&d| d == doc_id) {
            Some(i) => {
                self.frequencies[i] = posting.frequency;
                self.positions[i] = posting.positions;
                self.sources[i] = posting.sources;
            }
            None => {
                self.doc_ids.push(doc_id);
                self.frequencies.push(posting.frequency);
                self.positions.push(posting.positions);
                self.sources.push(posting.sources);
            }
        }
    }

    pub fn posting(&self, i: usize) -> Posting {
        Posting {
            frequency: self.frequencies[i],
            positions: self.positions[i].clone(),
            sources: self.sources[i].clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_existing_doc() {
        let mut rec = InvertedRecord::new(7);
        let mut p = Posting::default();
        p.record(0, FieldTag::Title);
        rec.upsert(3, p.clone());
        p.record(4, FieldTag::Body);
        rec.upsert(3, p);
        assert_eq!(rec.doc_ids, vec![3]);
        assert_eq!(rec.frequencies, vec![2]);
        assert_eq!(rec.sources[0], vec![FieldTag::Title, FieldTag::Body]);
    }
}
