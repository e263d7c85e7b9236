use criterion::{criterion_group, criterion_main, Criterion};
use engine::ranking::{top_k, ScoringContext};
use engine::tokenizer::{Analyzer, EnglishAnalyzer};
use engine::{EngineConfig, InvertedRecord};
use std::collections::{HashMap, HashSet};

const TEXT: &str = "Rust is a multi-paradigm, general-purpose programming language that emphasizes \
performance, type safety, and concurrency. It enforces memory safety, meaning that all references \
point to valid memory, without a garbage collector. To simultaneously enforce memory safety and \
prevent data races, its ownership system tracks the object lifetime of all references in a program \
during compilation. Running runners run; the café's menu changes daily.";

fn bench_analyze(c: &mut Criterion) {
    c.bench_function("analyze_paragraph", |b| b.iter(|| EnglishAnalyzer.analyze(TEXT)));
}

fn bench_score(c: &mut Criterion) {
    let config = EngineConfig::new("unused");
    let mut record = InvertedRecord::new(1);
    let mut lengths = HashMap::new();
    for doc_id in 1..=5_000u32 {
        record.doc_ids.push(doc_id);
        record.frequencies.push(doc_id % 4 + 1);
        record.positions.push((0..doc_id % 4 + 1).collect());
        record.sources.push(vec![engine::FieldTag::Body; (doc_id % 4 + 1) as usize]);
        lengths.insert(doc_id, 50 + doc_id % 200);
    }
    let intersection: HashSet<u32> = (1..=5_000).step_by(3).collect();
    let ctx = ScoringContext {
        params: config.bm25,
        boosts: config.boosts,
        total_docs: 20_000,
        avgdl: 150.0,
        lengths: &lengths,
        intersection: &intersection,
    };
    c.bench_function("score_and_rank_5k_postings", |b| {
        b.iter(|| top_k(ctx.score_record(&record, true), config.candidate_pool))
    });
}

criterion_group!(benches, bench_analyze, bench_score);
criterion_main!(benches);
