use crate::barrel::barrel_of;
use crate::docstore::Document;
use crate::error::{Error, Result};
use crate::lexicon::Lexicon;
use crate::persist::{append_rows, json_cell, parse_cell, parse_id, read_rows, IndexPaths};
use crate::tokenizer::Analyzer;
use crate::{DocId, FieldTag, Posting, WordId};
use std::collections::BTreeMap;

const HEADER: &[&str] = &["DocID", "WordIDs", "Frequencies", "Positions", "Sources"];

/// Analyzes title, body paragraphs, tags and authors in that order and tags
/// every kept token with its field.
pub fn tokenize_document(analyzer: &dyn Analyzer, doc: &Document) -> Vec<(String, FieldTag)> {
    let mut tokens = Vec::new();
    let mut push = |text: &str, tag: FieldTag| {
        tokens.extend(analyzer.analyze(text).into_iter().map(|t| (t, tag)));
    };
    push(&doc.title, FieldTag::Title);
    for paragraph in paragraphs(&doc.text) {
        push(paragraph, FieldTag::Body);
    }
    for tag in &doc.tags {
        push(tag, FieldTag::Tag);
    }
    for author in &doc.authors {
        push(author, FieldTag::Author);
    }
    tokens
}

// Scraped exports carry escaped "\n" sequences as well as real newlines.
fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').flat_map(|p| p.split("\\n"))
}

/// Every posting derived from one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPostings {
    pub doc_id: DocId,
    /// Kept tokens across all fields.
    pub length: u32,
    pub words: BTreeMap<WordId, Posting>,
}

impl DocumentPostings {
    /// Postings grouped by the barrel their word id falls in.
    pub fn by_barrel(&self, barrel_size: u32) -> BTreeMap<u32, BTreeMap<WordId, Posting>> {
        let mut out: BTreeMap<u32, BTreeMap<WordId, Posting>> = BTreeMap::new();
        for (&word_id, posting) in &self.words {
            out.entry(barrel_of(word_id, barrel_size)).or_default().insert(word_id, posting.clone());
        }
        out
    }
}

/// Resolves or assigns a word id per token and accumulates postings.
/// Positions run across the whole concatenation, not per field.
pub fn index_document(lexicon: &mut Lexicon, doc_id: DocId, tokens: &[(String, FieldTag)]) -> DocumentPostings {
    let mut words: BTreeMap<WordId, Posting> = BTreeMap::new();
    for (position, (token, source)) in tokens.iter().enumerate() {
        let word_id = lexicon.get_or_assign(token);
        words.entry(word_id).or_default().record(position as u32, *source);
    }
    DocumentPostings { doc_id, length: tokens.len() as u32, words }
}

/// Buffers forward postings per barrel until flushed to the forward files.
#[derive(Debug)]
pub struct ForwardIndexBuilder {
    barrel_size: u32,
    pending: BTreeMap<u32, BTreeMap<DocId, BTreeMap<WordId, Posting>>>,
    pending_docs: usize,
}

impl ForwardIndexBuilder {
    pub fn new(barrel_size: u32) -> Self {
        Self { barrel_size, pending: BTreeMap::new(), pending_docs: 0 }
    }

    pub fn add(&mut self, postings: &DocumentPostings) {
        for (barrel, words) in postings.by_barrel(self.barrel_size) {
            self.pending.entry(barrel).or_default().insert(postings.doc_id, words);
        }
        self.pending_docs += 1;
    }

    pub fn pending_docs(&self) -> usize {
        self.pending_docs
    }

    /// Appends one row per (barrel, document) and returns the barrels touched.
    pub fn flush(&mut self, paths: &IndexPaths) -> Result<Vec<u32>> {
        let mut touched = Vec::with_capacity(self.pending.len());
        for (barrel, docs) in std::mem::take(&mut self.pending) {
            let mut rows = Vec::with_capacity(docs.len());
            for (doc_id, words) in &docs {
                rows.push(format_row(*doc_id, words)?);
            }
            append_rows(&paths.forward_barrel(barrel), HEADER, rows)?;
            touched.push(barrel);
        }
        tracing::info!(documents = self.pending_docs, barrels = touched.len(), "forward batch flushed");
        self.pending_docs = 0;
        Ok(touched)
    }
}

fn format_row(doc_id: DocId, words: &BTreeMap<WordId, Posting>) -> Result<Vec<String>> {
    let word_ids: Vec<WordId> = words.keys().copied().collect();
    let frequencies: Vec<u32> = words.values().map(|p| p.frequency).collect();
    let positions: Vec<&Vec<u32>> = words.values().map(|p| &p.positions).collect();
    let sources: Vec<&Vec<FieldTag>> = words.values().map(|p| &p.sources).collect();
    Ok(vec![
        doc_id.to_string(),
        json_cell(&word_ids)?,
        json_cell(&frequencies)?,
        json_cell(&positions)?,
        json_cell(&sources)?,
    ])
}

/// One document's postings within a forward barrel.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardRow {
    pub doc_id: DocId,
    pub words: BTreeMap<WordId, Posting>,
}

fn parse_row(cells: &[String], location: &str) -> Result<ForwardRow> {
    let loc = || location.to_string();
    let doc_id = parse_id(&cells[0], loc)?;
    let word_ids: Vec<WordId> = parse_cell(&cells[1], loc)?;
    let frequencies: Vec<u32> = parse_cell(&cells[2], loc)?;
    let positions: Vec<Vec<u32>> = parse_cell(&cells[3], loc)?;
    let sources: Vec<Vec<FieldTag>> = parse_cell(&cells[4], loc)?;
    let n = word_ids.len();
    if frequencies.len() != n || positions.len() != n || sources.len() != n {
        return Err(Error::malformed(location, "column lengths differ"));
    }
    let mut words = BTreeMap::new();
    for (((word_id, frequency), positions), sources) in word_ids.into_iter().zip(frequencies).zip(positions).zip(sources) {
        if positions.len() != frequency as usize || sources.len() != frequency as usize {
            return Err(Error::malformed(location, format!("word {word_id} frequency does not match positions")));
        }
        words.insert(word_id, Posting { frequency, positions, sources });
    }
    Ok(ForwardRow { doc_id, words })
}

/// Loads every well-formed row of a forward barrel; `None` if the barrel was
/// never written.
pub fn read_forward_barrel(paths: &IndexPaths, barrel: u32) -> Result<Option<Vec<ForwardRow>>> {
    let path = paths.forward_barrel(barrel);
    if !path.is_file() {
        return Ok(None);
    }
    let mut rows = Vec::new();
    for row in read_rows(&path, HEADER.len())? {
        let location = format!("forward_{barrel} line {}", row.line);
        match parse_row(&row.cells, &location) {
            Ok(r) => rows.push(r),
            Err(e) => tracing::warn!(error = %e, "skipping forward row"),
        }
    }
    Ok(Some(rows))
}
