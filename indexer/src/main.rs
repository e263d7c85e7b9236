use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::docstore::{RawDocument, ScrapedMeta};
use engine::{DocId, EngineConfig, Error as EngineError, IngestOutcome, SearchEngine};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build, update and query a barrel-partitioned BM25 index", long_about = None)]
struct Cli {
    /// Index directory
    #[arg(long, global = true, default_value = "index")]
    index: PathBuf,
    /// JSON config file; its index_dir is replaced by --index
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every document in a JSON/JSONL file or a directory of them, then rebuild the inverted barrels
    Build {
        #[arg(long)]
        input: PathBuf,
    },
    /// Add the documents of one JSON/JSONL file to the live index, one at a time
    Ingest {
        #[arg(long)]
        input: PathBuf,
    },
    /// Attach description, thumbnail and membership rows from a JSONL file
    Attach {
        #[arg(long)]
        input: PathBuf,
    },
    /// Run a ranked query
    Search {
        query: String,
        /// Print at most this many results
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Regenerate the inverted barrels and offset tables from the forward index
    Rebuild,
    /// Print document and vocabulary counts
    Status,
}

#[derive(Debug, Deserialize)]
struct ScrapedRow {
    doc_id: DocId,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnail: String,
    #[serde(default = "default_member")]
    member: String,
}

fn default_member() -> String {
    "No".to_string()
}

#[derive(Debug, Default, Serialize)]
struct IngestReport {
    indexed: usize,
    duplicates: usize,
    rejected: usize,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let engine = open_engine(&cli.index, cli.config.as_deref())?;

    match cli.command {
        Commands::Build { input } => {
            let docs = read_documents(&input)?;
            let summary = engine.build(docs)?;
            print_json(&summary)
        }
        Commands::Ingest { input } => {
            let mut report = IngestReport::default();
            for doc in read_documents(&input)? {
                match engine.ingest(doc) {
                    Ok(IngestOutcome::Indexed { .. }) => report.indexed += 1,
                    Ok(IngestOutcome::Duplicate) => report.duplicates += 1,
                    Err(e @ EngineError::InvalidDocument(_)) => {
                        tracing::warn!(error = %e, "document rejected");
                        report.rejected += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            print_json(&report)
        }
        Commands::Attach { input } => {
            let mut attached = 0usize;
            for line in BufReader::new(File::open(&input)?).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let row: ScrapedRow = serde_json::from_str(&line)?;
                let meta = ScrapedMeta { description: row.description, thumbnail: row.thumbnail, member: row.member };
                match engine.attach_scraped(row.doc_id, meta) {
                    Ok(()) => attached += 1,
                    Err(e @ EngineError::NotFound(_)) => tracing::warn!(error = %e, "skipping scraped row"),
                    Err(e) => return Err(e.into()),
                }
            }
            print_json(&serde_json::json!({ "attached": attached }))
        }
        Commands::Search { query, limit } => {
            let mut response = engine.search(&query);
            if let Some(limit) = limit {
                response.results.truncate(limit);
            }
            print_json(&response)
        }
        Commands::Rebuild => {
            let barrels = engine.rebuild_inverted()?;
            print_json(&serde_json::json!({ "barrels_built": barrels }))
        }
        Commands::Status => print_json(&engine.index_status()),
    }
}

fn open_engine(index: &Path, config: Option<&Path>) -> Result<SearchEngine> {
    let mut cfg = match config {
        Some(path) => EngineConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    cfg.index_dir = index.to_path_buf();
    SearchEngine::open(cfg).with_context(|| format!("opening index {}", index.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Collects `.json` and `.jsonl` files under `input`, in path order.
fn input_files(input: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        bail!("input {} does not exist", input.display());
    }
    Ok(files)
}

fn read_documents(input: &Path) -> Result<Vec<RawDocument>> {
    let mut docs = Vec::new();
    for file in input_files(input)? {
        let before = docs.len();
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file, &mut docs)?;
        } else {
            read_json(&file, &mut docs)?;
        }
        tracing::info!(file = %file.display(), documents = docs.len() - before, "read input file");
    }
    Ok(docs)
}

fn read_jsonl(file: &Path, docs: &mut Vec<RawDocument>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match RawDocument::from_json(&line) {
            Ok(doc) => docs.push(doc),
            Err(e) => tracing::warn!(file = %file.display(), line = idx + 1, error = %e, "skipping unreadable document"),
        }
    }
    Ok(())
}

fn read_json(file: &Path, docs: &mut Vec<RawDocument>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    match json {
        serde_json::Value::Array(arr) => {
            for v in arr {
                match serde_json::from_value::<RawDocument>(v) {
                    Ok(doc) => docs.push(doc),
                    Err(e) => tracing::warn!(file = %file.display(), error = %e, "skipping unreadable document"),
                }
            }
        }
        serde_json::Value::Object(_) => docs.push(serde_json::from_value(json)?),
        _ => bail!("{} holds neither a document nor an array of documents", file.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_json_and_jsonl_inputs() {
        let dir = tempdir().unwrap();
        let doc = r#"{"title":"Rust","text":"memory safety","url":"u1","authors":["A"],"timestamp":"t","tags":["x"]}"#;
        std::fs::write(dir.path().join("a.jsonl"), format!("{doc}\n\nnot json\n")).unwrap();
        std::fs::write(dir.path().join("b.json"), format!("[{doc},{doc}]")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(input_files(dir.path()).unwrap().len(), 2);
        let docs = read_documents(dir.path()).unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].title, "Rust");
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(input_files(&dir.path().join("nope")).is_err());
    }
}
