//! BM25 scoring with multiplicative field and query boosts.

use crate::{DocId, FieldTag, InvertedRecord, WordId};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Lower bound for IDF. The raw value goes negative once a term occurs in more
/// than half of the collection, which would turn every boost into a penalty.
pub const MIN_IDF: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    /// Constant multiplier applied to every term score.
    pub scale: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75, scale: 100.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Boosts {
    /// Document contains every original query term.
    pub intersection: f64,
    /// Term came from the query itself rather than expansion.
    pub original_term: f64,
    pub title: f64,
    pub author: f64,
    pub tag: f64,
}

impl Default for Boosts {
    fn default() -> Self {
        Self { intersection: 10.0, original_term: 3.0, title: 10.0, author: 12.0, tag: 8.0 }
    }
}

impl Boosts {
    /// Product of the field boosts for every distinct field the term occurs in.
    pub fn field_factor(&self, sources: &[FieldTag]) -> f64 {
        let mut factor = 1.0;
        if sources.contains(&FieldTag::Title) {
            factor *= self.title;
        }
        if sources.contains(&FieldTag::Author) {
            factor *= self.author;
        }
        if sources.contains(&FieldTag::Tag) {
            factor *= self.tag;
        }
        factor
    }
}

/// `log10((N - n + 0.5) / (n + 0.5))`, floored at [`MIN_IDF`].
pub fn idf(docs_with_term: usize, total_docs: usize) -> f64 {
    let n = docs_with_term as f64;
    let total = total_docs as f64;
    ((total - n + 0.5) / (n + 0.5)).log10().max(MIN_IDF)
}

/// Saturating, length-normalized term frequency.
pub fn term_frequency(frequency: u32, length: u32, avgdl: f64, params: &Bm25Params) -> f64 {
    let f = frequency as f64;
    let relative_length = if avgdl > 0.0 { length as f64 / avgdl } else { 1.0 };
    f / (f + params.k1 * (1.0 - params.b + params.b * relative_length))
}

pub struct ScoringContext<'a> {
    pub params: Bm25Params,
    pub boosts: Boosts,
    pub total_docs: usize,
    pub avgdl: f64,
    pub lengths: &'a HashMap<DocId, u32>,
    pub intersection: &'a HashSet<DocId>,
}

impl ScoringContext<'_> {
    /// Scores every posting of one term. Postings of documents without a
    /// recorded length are not committed yet and are skipped.
    pub fn score_record(&self, record: &InvertedRecord, original_term: bool) -> Vec<(f64, DocId)> {
        let idf = idf(record.len(), self.total_docs);
        let mut scored = Vec::with_capacity(record.len());
        for (i, &doc_id) in record.doc_ids.iter().enumerate() {
            let Some(&length) = self.lengths.get(&doc_id) else {
                tracing::debug!(doc_id, word_id = record.word_id, "no length for document, skipping posting");
                continue;
            };
            let tf = term_frequency(record.frequencies[i], length, self.avgdl, &self.params);
            let mut score = tf * idf * self.params.scale;
            if self.intersection.contains(&doc_id) {
                score *= self.boosts.intersection;
            }
            if original_term {
                score *= self.boosts.original_term;
            }
            score *= self.boosts.field_factor(&record.sources[i]);
            scored.push((score, doc_id));
        }
        scored
    }
}

/// Documents containing every one of `word_ids`; empty if any has no record.
pub fn exact_intersection(records: &HashMap<WordId, InvertedRecord>, word_ids: &[WordId]) -> HashSet<DocId> {
    let mut iter = word_ids.iter();
    let Some(first) = iter.next() else {
        return HashSet::new();
    };
    let Some(first) = records.get(first) else {
        return HashSet::new();
    };
    let mut docs: HashSet<DocId> = first.doc_ids.iter().copied().collect();
    for word_id in iter {
        match records.get(word_id) {
            Some(rec) => {
                let other: HashSet<DocId> = rec.doc_ids.iter().copied().collect();
                docs.retain(|d| other.contains(d));
            }
            None => return HashSet::new(),
        }
    }
    docs
}

/// The `k` highest-scoring pairs, best first, via a bounded min-heap.
pub fn top_k<I>(scored: I, k: usize) -> Vec<(f64, DocId)>
where
    I: IntoIterator<Item = (f64, DocId)>,
{
    let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, DocId)>> = BinaryHeap::with_capacity(k + 1);
    for (score, doc_id) in scored {
        heap.push(Reverse((OrderedFloat(score), doc_id)));
        if heap.len() > k {
            heap.pop();
        }
    }
    heap.into_sorted_vec().into_iter().map(|Reverse((s, d))| (s.0, d)).collect()
}

/// Walks best-first results keeping only the first (best) occurrence of each document.
pub fn unique_docs(ranked: &[(f64, DocId)]) -> impl Iterator<Item = (f64, DocId)> + '_ {
    let mut seen = HashSet::new();
    ranked.iter().copied().filter(move |(_, doc_id)| seen.insert(*doc_id))
}
