use crate::barrel::write_barrel;
use crate::error::Result;
use crate::forward::{read_forward_barrel, ForwardRow};
use crate::persist::IndexPaths;
use crate::{DocId, InvertedRecord, Posting, WordId};
use std::collections::BTreeMap;

/// Regroups forward rows by word id. Doc ids come out ascending; a document
/// repeated in the forward file keeps its last row.
pub fn transpose(rows: Vec<ForwardRow>) -> BTreeMap<WordId, InvertedRecord> {
    let mut grouped: BTreeMap<WordId, BTreeMap<DocId, Posting>> = BTreeMap::new();
    for row in rows {
        for (word_id, posting) in row.words {
            grouped.entry(word_id).or_default().insert(row.doc_id, posting);
        }
    }
    grouped
        .into_iter()
        .map(|(word_id, docs)| {
            let mut rec = InvertedRecord::new(word_id);
            for (doc_id, posting) in docs {
                rec.upsert(doc_id, posting);
            }
            (word_id, rec)
        })
        .collect()
}

/// Rebuilds one inverted barrel and its offsets from the forward barrel.
/// Returns `false` when the forward barrel does not exist.
pub fn build_barrel(paths: &IndexPaths, barrel: u32, barrel_size: u32) -> Result<bool> {
    let Some(rows) = read_forward_barrel(paths, barrel)? else {
        return Ok(false);
    };
    let records = transpose(rows);
    let lines = write_barrel(paths, barrel, barrel_size, &records)?;
    tracing::info!(barrel, words = records.len(), lines, "inverted barrel built");
    Ok(true)
}

/// Rebuilds barrels 0, 1, 2, ... until the first missing forward barrel.
pub fn build_all(paths: &IndexPaths, barrel_size: u32) -> Result<u32> {
    let mut barrel = 0;
    while build_barrel(paths, barrel, barrel_size)? {
        barrel += 1;
    }
    Ok(barrel)
}
