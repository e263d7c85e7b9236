use engine::barrel::{load_offsets, read_record};
use engine::docstore::RawDocument;
use engine::inverted::build_all;
use engine::persist::IndexPaths;
use engine::{EngineConfig, FieldTag, IngestOutcome, SearchEngine};
use serde_json::json;
use std::collections::BTreeMap;
use tempfile::tempdir;

const WORDS: &[&str] = &[
    "river", "castle", "lantern", "harbor", "meadow", "pepper", "violin", "glacier", "orchard", "compass",
    "thunder", "marble", "falcon", "velvet", "canyon", "pebble", "saddle", "timber", "whistle", "copper",
];

fn doc(i: usize) -> RawDocument {
    let title = format!("{} {}", WORDS[i % WORDS.len()], WORDS[(i * 3 + 1) % WORDS.len()]);
    let text = format!(
        "{} {}\n{} {}",
        WORDS[(i + 2) % WORDS.len()],
        WORDS[(i * 7) % WORDS.len()],
        WORDS[(i + 5) % WORDS.len()],
        WORDS[i % WORDS.len()]
    );
    RawDocument {
        title,
        text,
        url: format!("https://example.com/{i}"),
        authors: json!([format!("Author {}", WORDS[(i + 9) % WORDS.len()])]),
        timestamp: format!("2024-01-{:02}", i % 28 + 1),
        tags: json!([WORDS[(i + 11) % WORDS.len()]]),
    }
}

fn config(dir: &std::path::Path) -> EngineConfig {
    EngineConfig { barrel_size: 7, batch_size: 4, ..EngineConfig::new(dir) }
}

fn snapshot_barrels(paths: &IndexPaths) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    for entry in std::fs::read_dir(paths.inverted_dir()).unwrap() {
        let path = entry.unwrap().path();
        out.insert(path.file_name().unwrap().to_string_lossy().to_string(), std::fs::read(&path).unwrap());
    }
    out
}

#[test]
fn every_record_reads_back_through_offsets() {
    let dir = tempdir().unwrap();
    let engine = SearchEngine::open(config(dir.path())).unwrap();
    let summary = engine.build((0..12).map(doc)).unwrap();
    assert_eq!(summary.documents_indexed, 12);
    assert!(summary.barrels_built >= 3);

    let paths = engine.paths();
    let status = engine.index_status();
    let words = status.words as u32;
    assert!(words >= WORDS.len() as u32);

    for barrel in 0..summary.barrels_built {
        let offsets = load_offsets(&paths.inverted_offsets(barrel)).unwrap();
        let text = std::fs::read_to_string(paths.inverted_barrel(barrel)).unwrap();
        assert_eq!(offsets.len(), text.lines().count() + 1);
        assert_eq!(*offsets.last().unwrap(), text.len() as u64);
    }
    for word_id in 1..=words {
        let rec = read_record(paths, 7, word_id).unwrap().expect("every assigned word has postings");
        assert_eq!(rec.word_id, word_id);
        assert!(rec.doc_ids.windows(2).all(|w| w[0] < w[1]));
        for i in 0..rec.len() {
            assert_eq!(rec.positions[i].len(), rec.frequencies[i] as usize);
            assert_eq!(rec.sources[i].len(), rec.frequencies[i] as usize);
        }
    }
}

#[test]
fn rebuild_is_byte_identical() {
    let dir = tempdir().unwrap();
    let engine = SearchEngine::open(config(dir.path())).unwrap();
    engine.build((0..10).map(doc)).unwrap();
    let first = snapshot_barrels(engine.paths());
    assert_eq!(engine.rebuild_inverted().unwrap(), build_all(engine.paths(), 7).unwrap());
    assert_eq!(first, snapshot_barrels(engine.paths()));
}

#[test]
fn rerunning_build_skips_processed_documents() {
    let dir = tempdir().unwrap();
    {
        let engine = SearchEngine::open(config(dir.path())).unwrap();
        engine.build((0..6).map(doc)).unwrap();
    }
    let engine = SearchEngine::open(config(dir.path())).unwrap();
    let summary = engine.build((0..9).map(doc)).unwrap();
    assert_eq!(summary.duplicates_skipped, 6);
    assert_eq!(summary.documents_indexed, 3);
    assert_eq!(engine.index_status().documents, 9);
}

#[test]
fn incremental_ingest_matches_full_rebuild() {
    let dir = tempdir().unwrap();
    let engine = SearchEngine::open(config(dir.path())).unwrap();
    engine.build((0..8).map(doc)).unwrap();

    let mut fresh = doc(40);
    fresh.title = "Nebula lantern".into();
    fresh.text = "brand new vocabulary appears: quasar nebula\nriver".into();
    let outcome = engine.ingest(fresh).unwrap();
    let IngestOutcome::Indexed { doc_id, new_words } = outcome else {
        panic!("expected the document to be indexed");
    };
    assert_eq!(doc_id, 9);
    assert!(new_words > 0);

    let incremental = snapshot_barrels(engine.paths());
    engine.rebuild_inverted().unwrap();
    let rebuilt = snapshot_barrels(engine.paths());
    assert_eq!(incremental, rebuilt);
}

#[test]
fn ingest_reports_duplicates_and_survives_reopen() {
    let dir = tempdir().unwrap();
    let engine = SearchEngine::open(config(dir.path())).unwrap();
    assert!(matches!(engine.ingest(doc(1)).unwrap(), IngestOutcome::Indexed { doc_id: 1, .. }));
    assert_eq!(engine.ingest(doc(1)).unwrap(), IngestOutcome::Duplicate);
    drop(engine);

    let engine = SearchEngine::open(config(dir.path())).unwrap();
    assert_eq!(engine.ingest(doc(1)).unwrap(), IngestOutcome::Duplicate);
    assert!(matches!(engine.ingest(doc(2)).unwrap(), IngestOutcome::Indexed { doc_id: 2, .. }));
}

#[test]
fn malformed_tags_are_indexed_without_tag_tokens() {
    let dir = tempdir().unwrap();
    let engine = SearchEngine::open(config(dir.path())).unwrap();
    let mut bad = doc(3);
    bad.tags = json!("not a list");
    let summary = engine.build(vec![bad]).unwrap();
    assert_eq!(summary.documents_indexed, 1);

    for word_id in 1..=engine.index_status().words as u32 {
        let rec = read_record(engine.paths(), 7, word_id).unwrap().unwrap();
        for sources in &rec.sources {
            assert!(sources.iter().all(|s| matches!(s, FieldTag::Title | FieldTag::Body)));
        }
    }
}

#[test]
fn reopening_with_other_barrel_size_fails() {
    let dir = tempdir().unwrap();
    drop(SearchEngine::open(config(dir.path())).unwrap());
    let other = EngineConfig { barrel_size: 9, ..EngineConfig::new(dir.path()) };
    assert!(matches!(SearchEngine::open(other), Err(engine::Error::Config(_))));
}

#[test]
fn open_skips_lexicon_rows_that_are_not_utf8() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    std::fs::write(paths.lexicon(), b"ID\tWord\n1\triver\n2\t\xff\xfe\n3\tcastl\n").unwrap();
    let engine = SearchEngine::open(config(dir.path())).unwrap();
    assert_eq!(engine.index_status().words, 2);
}
