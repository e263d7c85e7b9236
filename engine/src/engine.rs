use crate::barrel::repair_offsets;
use crate::cache::QueryCache;
use crate::config::EngineConfig;
use crate::docstore::{Document, DocumentStore, RawDocument, ScrapedMeta, ScrapedStore};
use crate::error::{Error, Result};
use crate::forward::{index_document, tokenize_document, ForwardIndexBuilder};
use crate::inverted::build_all;
use crate::lexicon::Lexicon;
use crate::persist::{load_meta, save_meta, IndexPaths, MetaFile, FORMAT_VERSION};
use crate::tokenizer::{Analyzer, EnglishAnalyzer, QueryExpander};
use crate::updater::apply_document;
use crate::DocId;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Indexed { doc_id: DocId, new_words: usize },
    Duplicate,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub documents_indexed: usize,
    pub duplicates_skipped: usize,
    pub barrels_built: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub is_processing: bool,
    pub is_updating: bool,
    pub last_query: Option<String>,
    pub last_result_count: usize,
    pub documents: usize,
    pub words: usize,
}

/// Held for the duration of a build or ingest.
pub struct UpdateGuard<'a> {
    _lock: MutexGuard<'a, ()>,
}

/// The index and everything needed to query or extend it. Share it behind an
/// `Arc`; every method takes `&self`.
pub struct SearchEngine {
    pub(crate) config: EngineConfig,
    pub(crate) paths: IndexPaths,
    pub(crate) analyzer: Arc<dyn Analyzer>,
    pub(crate) expander: Option<Box<dyn QueryExpander>>,
    pub(crate) lexicon: RwLock<Lexicon>,
    pub(crate) documents: RwLock<DocumentStore>,
    pub(crate) scraped: RwLock<ScrapedStore>,
    pub(crate) cache: QueryCache,
    update_lock: Mutex<()>,
}

impl SearchEngine {
    /// Opens (or initializes) the index under `config.index_dir`.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let paths = IndexPaths::new(&config.index_dir);
        paths.create_dirs()?;
        match load_meta(&paths)? {
            Some(meta) if meta.barrel_size != config.barrel_size => {
                return Err(Error::Config(format!(
                    "index was built with barrel_size {} but {} is configured",
                    meta.barrel_size, config.barrel_size
                )));
            }
            Some(meta) if meta.version != FORMAT_VERSION => {
                return Err(Error::Config(format!("unsupported index format version {}", meta.version)));
            }
            Some(_) => {}
            None => {
                let meta = MetaFile {
                    version: FORMAT_VERSION,
                    created_at: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
                    barrel_size: config.barrel_size,
                };
                save_meta(&paths, &meta)?;
            }
        }

        let mut barrel = 0;
        while paths.inverted_barrel(barrel).is_file() {
            repair_offsets(&paths, barrel)?;
            barrel += 1;
        }

        let lexicon = Lexicon::load(&paths)?;
        let documents = DocumentStore::load(&paths)?;
        let scraped = ScrapedStore::load(&paths)?;
        tracing::info!(index = %paths.root.display(), documents = documents.len(), words = lexicon.len(), "index opened");
        Ok(Self {
            cache: QueryCache::new(config.cache_results),
            config,
            paths,
            analyzer: Arc::new(EnglishAnalyzer),
            expander: None,
            lexicon: RwLock::new(lexicon),
            documents: RwLock::new(documents),
            scraped: RwLock::new(scraped),
            update_lock: Mutex::new(()),
        })
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_expander(mut self, expander: Box<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Claims the single update slot without waiting.
    pub fn try_begin_update(&self) -> Result<UpdateGuard<'_>> {
        match self.update_lock.try_lock() {
            Some(lock) => Ok(UpdateGuard { _lock: lock }),
            None => Err(Error::ConcurrencyConflict),
        }
    }

    /// Adds one document to the live index without a rebuild.
    pub fn ingest(&self, raw: RawDocument) -> Result<IngestOutcome> {
        let _guard = self.try_begin_update()?;
        let doc = Document::strict(raw)?;
        let meta = doc.meta();
        if self.documents.read().is_duplicate(&meta) {
            tracing::info!(title = %doc.title, "duplicate document, skipping");
            return Ok(IngestOutcome::Duplicate);
        }

        let doc_id = self.documents.write().reserve_doc_id()?;
        let tokens = tokenize_document(self.analyzer.as_ref(), &doc);
        let (postings, new_words) = {
            let mut lexicon = self.lexicon.write();
            let postings = index_document(&mut lexicon, doc_id, &tokens);
            let new_words = lexicon.flush_new()?;
            (postings, new_words)
        };

        let mut forward = ForwardIndexBuilder::new(self.config.barrel_size);
        forward.add(&postings);
        forward.flush(&self.paths)?;
        apply_document(&self.paths, self.config.barrel_size, &postings)?;

        let mut documents = self.documents.write();
        documents.commit_reserved(doc_id, meta);
        documents.append_length(doc_id, postings.length);
        documents.flush()?;
        tracing::info!(doc_id, new_words, length = postings.length, "document ingested");
        Ok(IngestOutcome::Indexed { doc_id, new_words })
    }

    /// Indexes a batch of documents through the forward index, then rebuilds
    /// every inverted barrel.
    pub fn build<I>(&self, docs: I) -> Result<BuildSummary>
    where
        I: IntoIterator<Item = RawDocument>,
    {
        let _guard = self.try_begin_update()?;
        let mut summary = BuildSummary::default();
        let mut forward = ForwardIndexBuilder::new(self.config.barrel_size);
        let mut docs = docs.into_iter().peekable();

        // Write locks are held for one batch at a time.
        while docs.peek().is_some() {
            let mut lexicon = self.lexicon.write();
            let mut documents = self.documents.write();
            for raw in docs.by_ref() {
                let doc = Document::lenient(raw);
                let meta = doc.meta();
                if documents.is_duplicate(&meta) {
                    summary.duplicates_skipped += 1;
                    continue;
                }
                let tokens = tokenize_document(self.analyzer.as_ref(), &doc);
                let doc_id = documents.append_document(meta);
                let postings = index_document(&mut lexicon, doc_id, &tokens);
                documents.append_length(doc_id, postings.length);
                forward.add(&postings);
                summary.documents_indexed += 1;
                if forward.pending_docs() >= self.config.batch_size {
                    break;
                }
            }
            flush_batch(&self.paths, &mut lexicon, &mut forward, &mut documents)?;
        }

        summary.barrels_built = build_all(&self.paths, self.config.barrel_size)?;
        tracing::info!(
            indexed = summary.documents_indexed,
            duplicates = summary.duplicates_skipped,
            barrels = summary.barrels_built,
            "build complete"
        );
        Ok(summary)
    }

    /// Regenerates every inverted barrel and offset table from the forward index.
    pub fn rebuild_inverted(&self) -> Result<u32> {
        let _guard = self.try_begin_update()?;
        build_all(&self.paths, self.config.barrel_size)
    }

    /// Records description, thumbnail and paywall status for an indexed document.
    pub fn attach_scraped(&self, doc_id: DocId, meta: ScrapedMeta) -> Result<()> {
        if self.documents.read().get(doc_id).is_none() {
            return Err(Error::NotFound(format!("document {doc_id}")));
        }
        self.scraped.write().append(&self.paths, doc_id, meta)
    }

    pub fn index_status(&self) -> IndexStatus {
        let cache = self.cache.status();
        IndexStatus {
            is_processing: cache.is_processing,
            is_updating: self.update_lock.is_locked(),
            last_query: cache.query,
            last_result_count: cache.result_count,
            documents: self.documents.read().len(),
            words: self.lexicon.read().len(),
        }
    }
}

/// Lexicon first so every id is durable before postings use it; documents
/// last so they count as processed only once their postings are on disk.
fn flush_batch(
    paths: &IndexPaths,
    lexicon: &mut Lexicon,
    forward: &mut ForwardIndexBuilder,
    documents: &mut DocumentStore,
) -> Result<()> {
    if forward.pending_docs() == 0 {
        return Ok(());
    }
    lexicon.flush_new()?;
    forward.flush(paths)?;
    documents.flush()?;
    Ok(())
}
