use crate::barrel::read_record;
use crate::docstore::{DocumentStore, ScrapedStore};
use crate::engine::SearchEngine;
use crate::lexicon::Lexicon;
use crate::persist::IndexPaths;
use crate::ranking::{exact_intersection, top_k, unique_docs, ScoringContext};
use crate::tokenizer::{Analyzer, QueryExpander};
use crate::{DocId, InvertedRecord, WordId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: DocId,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    pub url: String,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub date: String,
    pub member_status: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ResultRecord>,
    pub count: usize,
    pub elapsed: Duration,
    /// Postings fetched across all query terms.
    pub total_postings: usize,
}

impl SearchResponse {
    fn empty(elapsed: Duration) -> Self {
        Self { results: Vec::new(), count: 0, elapsed, total_postings: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryPhase {
    Tokenizing,
    FetchingPostings,
    Scoring,
    Ranked,
}

/// A query word resolved against the lexicon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    pub word: String,
    pub word_id: WordId,
    /// False for words added by query expansion.
    pub original: bool,
}

/// Normalizes and de-duplicates the query, keeps words the lexicon knows, adds
/// expansions after the original words, and caps the total.
pub fn prepare_terms(
    analyzer: &dyn Analyzer,
    lexicon: &Lexicon,
    expander: Option<&dyn QueryExpander>,
    query: &str,
    max_terms: usize,
) -> Vec<QueryTerm> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for word in analyzer.analyze(query) {
        if !seen.insert(word.clone()) {
            continue;
        }
        match lexicon.lookup(&word) {
            Some(word_id) => terms.push(QueryTerm { word, word_id, original: true }),
            None => tracing::debug!(word = %word, "query word not in lexicon"),
        }
    }
    if let Some(expander) = expander {
        let originals: Vec<String> = terms.iter().map(|t| t.word.clone()).collect();
        for word in expander.expand(&originals) {
            if !seen.insert(word.clone()) {
                continue;
            }
            if let Some(word_id) = lexicon.lookup(&word) {
                terms.push(QueryTerm { word, word_id, original: false });
            }
        }
    }
    terms.truncate(max_terms);
    terms
}

/// Fetches every term's record in parallel and returns once all have finished.
/// Terms without a readable record are logged and left out.
pub fn fetch_postings(paths: &IndexPaths, barrel_size: u32, terms: &[QueryTerm]) -> HashMap<WordId, InvertedRecord> {
    terms
        .par_iter()
        .filter_map(|term| match read_record(paths, barrel_size, term.word_id) {
            Ok(Some(rec)) => Some((term.word_id, rec)),
            Ok(None) => {
                tracing::warn!(word = %term.word, word_id = term.word_id, "no inverted record for term");
                None
            }
            Err(e) => {
                tracing::warn!(word = %term.word, word_id = term.word_id, error = %e, "skipping term");
                None
            }
        })
        .collect()
}

/// Hydrates best-first results, dropping repeated documents and documents
/// with unknown paywall status, until `limit` results are collected.
pub fn make_results(
    ranked: &[(f64, DocId)],
    documents: &DocumentStore,
    scraped: &ScrapedStore,
    limit: usize,
) -> Vec<ResultRecord> {
    let mut results = Vec::with_capacity(limit.min(ranked.len()));
    for (score, doc_id) in unique_docs(ranked) {
        let Some(meta) = documents.get(doc_id) else {
            tracing::warn!(doc_id, "ranked document has no metadata");
            continue;
        };
        let extra = scraped.get(doc_id);
        if extra.is_some_and(|s| s.is_unknown_member()) {
            continue;
        }
        results.push(ResultRecord {
            id: doc_id,
            title: meta.title.clone(),
            description: extra.map(|s| s.description.clone()).unwrap_or_default(),
            thumbnail: extra.map(|s| s.thumbnail.clone()).unwrap_or_default(),
            url: meta.url.clone(),
            tags: meta.tags.clone(),
            authors: meta.authors.clone(),
            date: meta.timestamp.clone(),
            member_status: extra.map(|s| s.member.clone()).unwrap_or_else(|| "No".to_string()),
            score,
        });
        if results.len() >= limit {
            break;
        }
    }
    results
}

impl SearchEngine {
    /// Ranked keyword search. The query cache is marked busy for the duration
    /// and holds the outcome afterwards.
    pub fn search(&self, query: &str) -> SearchResponse {
        let start = Instant::now();
        let query_id = self.cache.set_processing(query);
        let response = self.run_query(query, start);
        self.cache.update(query_id, query, &response.results);
        response
    }

    fn run_query(&self, query: &str, start: Instant) -> SearchResponse {
        let config = &self.config;
        tracing::debug!(phase = ?QueryPhase::Tokenizing, query);
        let terms = {
            let lexicon = self.lexicon.read();
            prepare_terms(self.analyzer.as_ref(), &lexicon, self.expander.as_deref(), query, config.max_query_terms)
        };
        if terms.is_empty() {
            tracing::info!(query, "no recognized terms");
            return SearchResponse::empty(start.elapsed());
        }

        tracing::debug!(phase = ?QueryPhase::FetchingPostings, terms = terms.len());
        let records = fetch_postings(&self.paths, config.barrel_size, &terms);
        let total_postings = records.values().map(InvertedRecord::len).sum();
        let original_ids: Vec<WordId> = terms.iter().filter(|t| t.original).map(|t| t.word_id).collect();
        let intersection = exact_intersection(&records, &original_ids);

        tracing::debug!(phase = ?QueryPhase::Scoring, records = records.len(), intersection = intersection.len());
        let documents = self.documents.read();
        let ctx = ScoringContext {
            params: config.bm25,
            boosts: config.boosts,
            total_docs: documents.len(),
            avgdl: documents.avgdl(),
            lengths: documents.lengths(),
            intersection: &intersection,
        };
        let per_term: Vec<Vec<(f64, DocId)>> = terms
            .par_iter()
            .filter_map(|t| records.get(&t.word_id).map(|rec| ctx.score_record(rec, t.original)))
            .collect();
        let ranked = top_k(per_term.into_iter().flatten(), config.candidate_pool);

        tracing::debug!(phase = ?QueryPhase::Ranked, candidates = ranked.len());
        let scraped = self.scraped.read();
        let results = make_results(&ranked, &documents, &scraped, config.display_limit);
        let elapsed = start.elapsed();
        tracing::info!(query, results = results.len(), total_postings, elapsed_ms = elapsed.as_millis() as u64, "search complete");
        SearchResponse { count: results.len(), results, elapsed, total_postings }
    }
}
