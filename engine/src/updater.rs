use crate::barrel::{build_offsets, first_word_id, format_record, line_word_id, read_record, HEADER};
use crate::error::{Error, Result};
use crate::forward::DocumentPostings;
use crate::persist::{temp_sibling, IndexPaths};
use crate::{InvertedRecord, WordId};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub barrels: usize,
    pub words_updated: usize,
    pub words_created: usize,
}

/// Merges one document's postings into the existing inverted barrels, one
/// read-modify-write per affected barrel.
pub fn apply_document(paths: &IndexPaths, barrel_size: u32, postings: &DocumentPostings) -> Result<UpdateSummary> {
    let mut summary = UpdateSummary::default();
    for (barrel, words) in postings.by_barrel(barrel_size) {
        let mut updates = BTreeMap::new();
        for (word_id, posting) in words {
            let mut rec = match read_record(paths, barrel_size, word_id) {
                Ok(Some(rec)) => {
                    summary.words_updated += 1;
                    rec
                }
                Ok(None) => {
                    summary.words_created += 1;
                    InvertedRecord::new(word_id)
                }
                Err(e @ Error::MalformedRecord { .. }) => {
                    tracing::warn!(error = %e, word_id, "replacing unreadable record");
                    summary.words_created += 1;
                    InvertedRecord::new(word_id)
                }
                Err(e) => return Err(e),
            };
            rec.upsert(postings.doc_id, posting);
            updates.insert(word_id, rec);
        }
        rewrite_barrel(paths, barrel, barrel_size, updates)?;
        build_offsets(paths, barrel)?;
        summary.barrels += 1;
    }
    tracing::info!(
        doc_id = postings.doc_id,
        barrels = summary.barrels,
        updated = summary.words_updated,
        created = summary.words_created,
        "document merged into inverted index"
    );
    Ok(summary)
}

/// Streams the barrel into a sibling temp file, replacing the lines of
/// updated words and appending new ones (with empty filler lines to keep ids
/// dense), then renames it over the original.
fn rewrite_barrel(
    paths: &IndexPaths,
    barrel: u32,
    barrel_size: u32,
    mut updates: BTreeMap<WordId, InvertedRecord>,
) -> Result<()> {
    let target = paths.inverted_barrel(barrel);
    let mut w = BufWriter::new(temp_sibling(&target)?);
    writeln!(w, "{}", HEADER.join("\t"))?;
    let mut next_id = first_word_id(barrel, barrel_size);

    match File::open(&target) {
        Ok(f) => {
            let mut reader = BufReader::new(f);
            let mut buf = Vec::new();
            let mut idx = 0usize;
            loop {
                buf.clear();
                if reader.read_until(b'\n', &mut buf)? == 0 {
                    break;
                }
                idx += 1;
                if idx == 1 {
                    continue;
                }
                let raw = buf.strip_suffix(b"\n").unwrap_or(&buf);
                let Some(word_id) = std::str::from_utf8(raw).ok().and_then(line_word_id) else {
                    tracing::warn!(barrel, line = idx, "keeping line with unreadable word id");
                    w.write_all(raw)?;
                    w.write_all(b"\n")?;
                    next_id += 1;
                    continue;
                };
                match updates.remove(&word_id) {
                    Some(rec) => writeln!(w, "{}", format_record(&rec)?)?,
                    None => {
                        w.write_all(raw)?;
                        w.write_all(b"\n")?;
                    }
                }
                next_id = next_id.max(word_id + 1);
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    for (word_id, rec) in updates {
        if word_id < next_id {
            tracing::warn!(barrel, word_id, "barrel is not dense, appending out of order");
        }
        while next_id < word_id {
            writeln!(w, "{}", format_record(&InvertedRecord::new(next_id))?)?;
            next_id += 1;
        }
        writeln!(w, "{}", format_record(&rec)?)?;
        next_id = next_id.max(word_id + 1);
    }

    let tmp = w.into_inner().map_err(|e| e.into_error())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrel::{load_offsets, write_barrel};
    use crate::{FieldTag, Posting};

    fn posting(pos: u32) -> Posting {
        let mut p = Posting::default();
        p.record(pos, FieldTag::Body);
        p
    }

    fn doc_postings(doc_id: u32, words: &[WordId]) -> DocumentPostings {
        let words = words.iter().enumerate().map(|(i, &w)| (w, posting(i as u32))).collect();
        DocumentPostings { doc_id, length: 2, words }
    }

    #[test]
    fn updates_existing_and_appends_new_words() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        paths.create_dirs().unwrap();
        let mut records = BTreeMap::new();
        let mut rec = InvertedRecord::new(1);
        rec.upsert(9, posting(0));
        records.insert(1, rec);
        write_barrel(&paths, 0, 10, &records).unwrap();

        let summary = apply_document(&paths, 10, &doc_postings(10, &[1, 4])).unwrap();
        assert_eq!(summary, UpdateSummary { barrels: 1, words_updated: 1, words_created: 1 });
        assert_eq!(read_record(&paths, 10, 1).unwrap().unwrap().doc_ids, vec![9, 10]);
        assert_eq!(read_record(&paths, 10, 4).unwrap().unwrap().doc_ids, vec![10]);
        assert_eq!(read_record(&paths, 10, 3).unwrap(), None);
    }

    #[test]
    fn unreadable_record_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        paths.create_dirs().unwrap();
        let mut records = BTreeMap::new();
        for word_id in 1..=3 {
            let mut rec = InvertedRecord::new(word_id);
            rec.upsert(9, posting(0));
            records.insert(word_id, rec);
        }
        write_barrel(&paths, 0, 10, &records).unwrap();

        // Garble everything after the word id of word 2, keeping the line length.
        let offsets = load_offsets(&paths.inverted_offsets(0)).unwrap();
        let mut bytes = std::fs::read(paths.inverted_barrel(0)).unwrap();
        let (start, end) = (offsets[2] as usize, offsets[3] as usize - 1);
        for b in &mut bytes[start + 2..end] {
            *b = b'x';
        }
        std::fs::write(paths.inverted_barrel(0), &bytes).unwrap();
        assert!(matches!(read_record(&paths, 10, 2), Err(Error::MalformedRecord { .. })));

        let summary = apply_document(&paths, 10, &doc_postings(10, &[2, 3])).unwrap();
        assert_eq!(summary.words_created, 1);
        assert_eq!(summary.words_updated, 1);
        assert_eq!(read_record(&paths, 10, 2).unwrap().unwrap().doc_ids, vec![10]);
        assert_eq!(read_record(&paths, 10, 3).unwrap().unwrap().doc_ids, vec![9, 10]);
        assert_eq!(read_record(&paths, 10, 1).unwrap().unwrap().doc_ids, vec![9]);
    }
}
