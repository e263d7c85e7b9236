use crate::error::{Error, Result};
use crate::persist::{
    append_rows, json_cell, load_counter, parse_cell, parse_id, read_rows, save_counter, IndexPaths,
};
use crate::DocId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

const DOC_HEADER: &[&str] = &["ID", "Title", "URL", "Authors", "Timestamp", "Tags"];
const LENGTH_HEADER: &[&str] = &["ID", "Length"];
const SCRAPED_HEADER: &[&str] = &["ID", "Description", "Thumbnail", "Member"];

/// A document as submitted for indexing. `authors` and `tags` arrive either
/// as JSON arrays or as strings holding a list literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    pub title: String,
    pub text: String,
    pub url: String,
    pub authors: Value,
    pub timestamp: String,
    pub tags: Value,
}

impl RawDocument {
    /// Parses a JSON object, rejecting payloads that miss any required key.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidDocument(e.to_string()))
    }
}

/// A validated document ready for tokenization.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub title: String,
    pub text: String,
    pub url: String,
    pub authors: Vec<String>,
    pub timestamp: String,
    pub tags: Vec<String>,
}

impl Document {
    /// Rejects documents whose authors or tags are not lists.
    pub fn strict(raw: RawDocument) -> Result<Self> {
        let authors = parse_list(&raw.authors).map_err(|e| Error::InvalidDocument(format!("authors: {e}")))?;
        let tags = parse_list(&raw.tags).map_err(|e| Error::InvalidDocument(format!("tags: {e}")))?;
        Ok(Self { title: raw.title, text: raw.text, url: raw.url, authors, timestamp: raw.timestamp, tags })
    }

    /// Keeps the document even when authors or tags cannot be parsed; both are
    /// then treated as empty.
    pub fn lenient(raw: RawDocument) -> Self {
        let (authors, tags) = match (parse_list(&raw.authors), parse_list(&raw.tags)) {
            (Ok(a), Ok(t)) => (a, t),
            (a, t) => {
                tracing::warn!(
                    title = %raw.title,
                    authors_error = %a.err().unwrap_or_default(),
                    tags_error = %t.err().unwrap_or_default(),
                    "unparseable tags/authors, indexing title and body only"
                );
                (Vec::new(), Vec::new())
            }
        };
        Self { title: raw.title, text: raw.text, url: raw.url, authors, timestamp: raw.timestamp, tags }
    }

    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta {
            title: self.title.clone(),
            url: self.url.clone(),
            authors: self.authors.clone(),
            timestamp: self.timestamp.clone(),
            tags: self.tags.clone(),
        }
    }
}

fn parse_list(value: &Value) -> std::result::Result<Vec<String>, String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(|| format!("non-string item {v}")))
            .collect(),
        Value::String(s) => serde_json::from_str::<Vec<String>>(s)
            .or_else(|_| serde_json::from_str::<Vec<String>>(&s.replace('\'', "\"")))
            .map_err(|e| format!("not a list literal: {e}")),
        other => Err(format!("expected a list, got {other}")),
    }
}

/// Stored metadata for one document. Also serves as the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub title: String,
    pub url: String,
    pub authors: Vec<String>,
    pub timestamp: String,
    pub tags: Vec<String>,
}

/// Append-only document metadata plus the per-document token counts used by BM25.
#[derive(Debug)]
pub struct DocumentStore {
    docs: HashMap<DocId, DocumentMeta>,
    lengths: HashMap<DocId, u32>,
    processed: HashSet<DocumentMeta>,
    latest_doc_id: DocId,
    total_length: u64,
    pending_docs: Vec<(DocId, DocumentMeta)>,
    pending_lengths: Vec<(DocId, u32)>,
    docs_path: PathBuf,
    lengths_path: PathBuf,
    counter_path: PathBuf,
}

impl DocumentStore {
    pub fn load(paths: &IndexPaths) -> Result<Self> {
        let docs_path = paths.documents();
        let lengths_path = paths.lengths();
        let counter_path = paths.latest_doc_id();

        let mut docs = HashMap::new();
        for row in read_rows(&docs_path, DOC_HEADER.len())? {
            match parse_doc_row(&row.cells, row.line) {
                Ok((id, meta)) => {
                    docs.insert(id, meta);
                }
                Err(e) => tracing::warn!(error = %e, "skipping document row"),
            }
        }
        let processed = docs.values().cloned().collect();

        let mut lengths = HashMap::new();
        for row in read_rows(&lengths_path, LENGTH_HEADER.len())? {
            let loc = || format!("lengths line {}", row.line);
            match (parse_id(&row.cells[0], loc), parse_id(&row.cells[1], loc)) {
                (Ok(id), Ok(len)) => {
                    lengths.insert(id, len);
                }
                (Err(e), _) | (_, Err(e)) => tracing::warn!(error = %e, "skipping length row"),
            }
        }
        let total_length = lengths.values().map(|&l| l as u64).sum();
        let max_seen = docs.keys().copied().max().unwrap_or(0);
        let latest_doc_id = load_counter(&counter_path)?.max(max_seen);
        tracing::info!(documents = docs.len(), latest_doc_id, "document store loaded");

        Ok(Self {
            docs,
            lengths,
            processed,
            latest_doc_id,
            total_length,
            pending_docs: Vec::new(),
            pending_lengths: Vec::new(),
            docs_path,
            lengths_path,
            counter_path,
        })
    }

    pub fn is_duplicate(&self, meta: &DocumentMeta) -> bool {
        self.processed.contains(meta)
    }

    /// The id the next appended document will receive.
    pub fn next_doc_id(&self) -> DocId {
        self.latest_doc_id + 1
    }

    /// Assigns the next doc id and stages the record until [`DocumentStore::flush`].
    pub fn append_document(&mut self, meta: DocumentMeta) -> DocId {
        self.latest_doc_id += 1;
        let id = self.latest_doc_id;
        self.stage_document(id, meta);
        id
    }

    /// Takes the next doc id and persists the counter immediately, so the id
    /// is never handed out again even if the caller fails before committing.
    pub fn reserve_doc_id(&mut self) -> Result<DocId> {
        self.latest_doc_id += 1;
        save_counter(&self.counter_path, self.latest_doc_id)?;
        Ok(self.latest_doc_id)
    }

    /// Stages the record of an id obtained from [`DocumentStore::reserve_doc_id`].
    pub fn commit_reserved(&mut self, doc_id: DocId, meta: DocumentMeta) {
        self.stage_document(doc_id, meta);
    }

    fn stage_document(&mut self, id: DocId, meta: DocumentMeta) {
        self.processed.insert(meta.clone());
        self.docs.insert(id, meta.clone());
        self.pending_docs.push((id, meta));
    }

    pub fn append_length(&mut self, doc_id: DocId, length: u32) {
        if let Some(old) = self.lengths.insert(doc_id, length) {
            self.total_length -= old as u64;
        }
        self.total_length += length as u64;
        self.pending_lengths.push((doc_id, length));
    }

    /// Persists staged documents, their lengths, and the doc id counter.
    pub fn flush(&mut self) -> Result<usize> {
        if self.pending_docs.is_empty() && self.pending_lengths.is_empty() {
            return Ok(0);
        }
        let mut rows = Vec::with_capacity(self.pending_docs.len());
        for (id, m) in &self.pending_docs {
            rows.push(vec![
                id.to_string(),
                json_cell(&m.title)?,
                json_cell(&m.url)?,
                json_cell(&m.authors)?,
                json_cell(&m.timestamp)?,
                json_cell(&m.tags)?,
            ]);
        }
        let written = append_rows(&self.docs_path, DOC_HEADER, rows)?;
        append_rows(
            &self.lengths_path,
            LENGTH_HEADER,
            self.pending_lengths.iter().map(|(id, len)| vec![id.to_string(), len.to_string()]),
        )?;
        save_counter(&self.counter_path, self.latest_doc_id)?;
        self.pending_docs.clear();
        self.pending_lengths.clear();
        Ok(written)
    }

    pub fn get(&self, doc_id: DocId) -> Option<&DocumentMeta> {
        self.docs.get(&doc_id)
    }

    pub fn length(&self, doc_id: DocId) -> Option<u32> {
        self.lengths.get(&doc_id).copied()
    }

    pub fn lengths(&self) -> &HashMap<DocId, u32> {
        &self.lengths
    }

    /// Number of documents with a recorded length, i.e. `N` for BM25.
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn avgdl(&self) -> f64 {
        if self.lengths.is_empty() {
            0.0
        } else {
            self.total_length as f64 / self.lengths.len() as f64
        }
    }
}

fn parse_doc_row(cells: &[String], line: usize) -> Result<(DocId, DocumentMeta)> {
    let loc = || format!("documents line {line}");
    let id = parse_id(&cells[0], loc)?;
    let meta = DocumentMeta {
        title: parse_cell(&cells[1], loc)?,
        url: parse_cell(&cells[2], loc)?,
        authors: parse_cell(&cells[3], loc)?,
        timestamp: parse_cell(&cells[4], loc)?,
        tags: parse_cell(&cells[5], loc)?,
    };
    Ok((id, meta))
}

/// Per-document data gathered by the scraping side: description, thumbnail and
/// paywall status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedMeta {
    pub description: String,
    pub thumbnail: String,
    pub member: String,
}

impl ScrapedMeta {
    pub const UNKNOWN_MEMBER: &'static str = "Unknown";

    pub fn is_unknown_member(&self) -> bool {
        self.member == Self::UNKNOWN_MEMBER
    }
}

#[derive(Debug, Default)]
pub struct ScrapedStore {
    entries: HashMap<DocId, ScrapedMeta>,
}

impl ScrapedStore {
    pub fn load(paths: &IndexPaths) -> Result<Self> {
        let mut entries = HashMap::new();
        for row in read_rows(&paths.scraped(), SCRAPED_HEADER.len())? {
            let parsed = parse_scraped_row(&row.cells, row.line);
            match parsed {
                Ok((id, meta)) => {
                    entries.insert(id, meta);
                }
                Err(e) => tracing::warn!(error = %e, "skipping scraped row"),
            }
        }
        Ok(Self { entries })
    }

    pub fn append(&mut self, paths: &IndexPaths, doc_id: DocId, meta: ScrapedMeta) -> Result<()> {
        let row = vec![
            doc_id.to_string(),
            json_cell(&meta.description)?,
            json_cell(&meta.thumbnail)?,
            json_cell(&meta.member)?,
        ];
        append_rows(&paths.scraped(), SCRAPED_HEADER, std::iter::once(row))?;
        self.entries.insert(doc_id, meta);
        Ok(())
    }

    pub fn get(&self, doc_id: DocId) -> Option<&ScrapedMeta> {
        self.entries.get(&doc_id)
    }
}

fn parse_scraped_row(cells: &[String], line: usize) -> Result<(DocId, ScrapedMeta)> {
    let loc = || format!("scraped line {line}");
    let meta = ScrapedMeta {
        description: parse_cell(&cells[1], loc)?,
        thumbnail: parse_cell(&cells[2], loc)?,
        member: parse_cell(&cells[3], loc)?,
    };
    Ok((parse_id(&cells[0], loc)?, meta))
}
