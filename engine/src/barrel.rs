//! On-disk barrel format.
//!
//! A barrel holds the inverted records of a contiguous word id range. The data
//! file is a header line followed by one tab-separated record per word id,
//! dense and ascending from the barrel's first id. The offsets file is a flat
//! array of little-endian `u64` line start offsets, header included, plus an
//! end-of-file sentinel, so the byte range of any record is
//! `[offsets[i], offsets[i + 1])`.

use crate::error::{Error, Result};
use crate::persist::{parse_cell, parse_id, temp_sibling, write_atomic, IndexPaths};
use crate::{DocId, FieldTag, InvertedRecord, WordId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const HEADER: &[&str] = &["WordID", "DocIDs", "Frequencies", "Positions", "Sources"];
const OFFSET_WIDTH: u64 = 8;

pub fn barrel_of(word_id: WordId, barrel_size: u32) -> u32 {
    word_id / barrel_size
}

/// Lowest word id stored in `barrel`. Id 0 is never assigned, so barrel 0
/// starts at 1.
pub fn first_word_id(barrel: u32, barrel_size: u32) -> WordId {
    (barrel * barrel_size).max(1)
}

/// Index into the offsets table for `word_id`. Entry 0 is the header line.
pub fn offset_index(word_id: WordId, barrel_size: u32) -> u64 {
    let first = first_word_id(barrel_of(word_id, barrel_size), barrel_size);
    (word_id - first) as u64 + 1
}

pub fn format_record(rec: &InvertedRecord) -> Result<String> {
    Ok(format!(
        "{}\t{}\t{}\t{}\t{}",
        rec.word_id,
        serde_json::to_string(&rec.doc_ids)?,
        serde_json::to_string(&rec.frequencies)?,
        serde_json::to_string(&rec.positions)?,
        serde_json::to_string(&rec.sources)?,
    ))
}

/// Reads the word id column without decoding the rest of the line.
pub fn line_word_id(line: &str) -> Option<WordId> {
    line.split('\t').next()?.trim().parse().ok()
}

/// Decodes and schema-checks one record line.
pub fn parse_record(line: &str, location: &str) -> Result<InvertedRecord> {
    let cells: Vec<&str> = line.trim_end_matches(['\n', '\r']).split('\t').collect();
    if cells.len() != HEADER.len() {
        return Err(Error::malformed(location, format!("expected {} columns, found {}", HEADER.len(), cells.len())));
    }
    let loc = || location.to_string();
    let rec = InvertedRecord {
        word_id: parse_id(cells[0], loc)?,
        doc_ids: parse_cell::<Vec<DocId>>(cells[1], loc)?,
        frequencies: parse_cell::<Vec<u32>>(cells[2], loc)?,
        positions: parse_cell::<Vec<Vec<u32>>>(cells[3], loc)?,
        sources: parse_cell::<Vec<Vec<FieldTag>>>(cells[4], loc)?,
    };
    validate(&rec).map_err(|reason| Error::malformed(location, reason))?;
    Ok(rec)
}

fn validate(rec: &InvertedRecord) -> std::result::Result<(), String> {
    let n = rec.doc_ids.len();
    if rec.frequencies.len() != n || rec.positions.len() != n || rec.sources.len() != n {
        return Err("column lengths differ".into());
    }
    for i in 0..n {
        let freq = rec.frequencies[i] as usize;
        if rec.positions[i].len() != freq || rec.sources[i].len() != freq {
            return Err(format!("doc {} has frequency {freq} but {} positions and {} sources",
                rec.doc_ids[i], rec.positions[i].len(), rec.sources[i].len()));
        }
    }
    let unique: HashSet<&DocId> = rec.doc_ids.iter().collect();
    if unique.len() != n {
        return Err("repeated doc id".into());
    }
    Ok(())
}

/// Writes a whole barrel from `records`, filling every id between the barrel's
/// first id and the largest present one, then rebuilds its offsets.
pub fn write_barrel(
    paths: &IndexPaths,
    barrel: u32,
    barrel_size: u32,
    records: &BTreeMap<WordId, InvertedRecord>,
) -> Result<usize> {
    let target = paths.inverted_barrel(barrel);
    let tmp = temp_sibling(&target)?;
    let mut w = BufWriter::new(tmp);
    writeln!(w, "{}", HEADER.join("\t"))?;
    let mut lines = 0;
    if let Some((&last, _)) = records.last_key_value() {
        for word_id in first_word_id(barrel, barrel_size)..=last {
            let line = match records.get(&word_id) {
                Some(rec) => format_record(rec)?,
                None => format_record(&InvertedRecord::new(word_id))?,
            };
            writeln!(w, "{line}")?;
            lines += 1;
        }
    }
    let tmp = w.into_inner().map_err(|e| e.into_error())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&target)?;
    build_offsets(paths, barrel)?;
    Ok(lines)
}

/// Scans a barrel data file once and persists the start offset of every line
/// plus the end-of-file sentinel. Returns the number of offsets written.
pub fn build_offsets(paths: &IndexPaths, barrel: u32) -> Result<usize> {
    let mut reader = BufReader::new(File::open(paths.inverted_barrel(barrel))?);
    let mut offsets: Vec<u64> = Vec::new();
    let mut pos = 0u64;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        offsets.push(pos);
        pos += read as u64;
    }
    offsets.push(pos);

    let mut bytes = Vec::with_capacity(offsets.len() * OFFSET_WIDTH as usize);
    for off in &offsets {
        bytes.write_u64::<LittleEndian>(*off)?;
    }
    write_atomic(&paths.inverted_offsets(barrel), &bytes)?;
    tracing::debug!(barrel, entries = offsets.len(), "offsets written");
    Ok(offsets.len())
}

pub fn load_offsets(path: &Path) -> Result<Vec<u64>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut offsets = Vec::new();
    loop {
        match reader.read_u64::<LittleEndian>() {
            Ok(v) => offsets.push(v),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(offsets)
}

/// Rebuilds the offsets of `barrel` when they are missing or their sentinel
/// does not match the data file length, e.g. after a crash between the data
/// swap and the offsets rewrite. Returns whether a rebuild happened.
pub fn repair_offsets(paths: &IndexPaths, barrel: u32) -> Result<bool> {
    let data_len = std::fs::metadata(paths.inverted_barrel(barrel))?.len();
    let consistent = match load_offsets(&paths.inverted_offsets(barrel)) {
        Ok(offsets) => offsets.last() == Some(&data_len),
        Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };
    if consistent {
        return Ok(false);
    }
    tracing::warn!(barrel, "offsets out of date, rebuilding");
    build_offsets(paths, barrel)?;
    Ok(true)
}

/// Fetches the record of `word_id` with two seeks: one into the offsets table,
/// one into the data file. `Ok(None)` when the barrel does not exist, the id
/// lies beyond its last line, or the record has no postings.
pub fn read_record(paths: &IndexPaths, barrel_size: u32, word_id: WordId) -> Result<Option<InvertedRecord>> {
    let barrel = barrel_of(word_id, barrel_size);
    let index = offset_index(word_id, barrel_size);

    let mut offsets = match File::open(paths.inverted_offsets(barrel)) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    offsets.seek(SeekFrom::Start(OFFSET_WIDTH * index))?;
    let mut pair = [0u64; 2];
    match offsets.read_u64_into::<LittleEndian>(&mut pair) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let [start, end] = pair;
    let location = format!("inverted_{barrel} word {word_id}");
    if end < start {
        return Err(Error::malformed(location, format!("offsets out of order: {start}..{end}")));
    }

    let mut data = match File::open(paths.inverted_barrel(barrel)) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    data.seek(SeekFrom::Start(start))?;
    let mut bytes = vec![0u8; (end - start) as usize];
    data.read_exact(&mut bytes)?;
    let line = String::from_utf8(bytes).map_err(|e| Error::malformed(location.as_str(), e.to_string()))?;

    let rec = parse_record(&line, &location)?;
    if rec.word_id != word_id {
        return Err(Error::malformed(location, format!("offset points at word {}", rec.word_id)));
    }
    Ok(if rec.is_empty() { None } else { Some(rec) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Posting;
    use tempfile::tempdir;

    fn posting(positions: &[u32], tag: FieldTag) -> Posting {
        let mut p = Posting::default();
        for &pos in positions {
            p.record(pos, tag);
        }
        p
    }

    #[test]
    fn addressing_reserves_header_slot() {
        assert_eq!(offset_index(1, 1001), 1);
        assert_eq!(offset_index(1000, 1001), 1000);
        assert_eq!(offset_index(1001, 1001), 1);
        assert_eq!(offset_index(2003, 1001), 2);
        assert_eq!(barrel_of(2003, 1001), 2);
    }

    #[test]
    fn rejects_inconsistent_records() {
        let line = "4\t[1,2]\t[1]\t[[0],[1]]\t[[\"T\"],[\"Te\"]]";
        assert!(matches!(parse_record(line, "t"), Err(Error::MalformedRecord { .. })));
        let line = "4\t[1,1]\t[1,1]\t[[0],[1]]\t[[\"T\"],[\"Te\"]]";
        assert!(parse_record(line, "t").is_err());
        let line = "4\t[1]\t[2]\t[[0]]\t[[\"T\"]]";
        assert!(parse_record(line, "t").is_err());
        let line = "4\t[1]\t[1]\t[[0]]\t[[\"X\"]]";
        assert!(parse_record(line, "t").is_err());
    }

    #[test]
    fn sparse_ids_are_written_densely() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        paths.create_dirs().unwrap();
        let mut records = BTreeMap::new();
        for word_id in [2u32, 5] {
            let mut rec = InvertedRecord::new(word_id);
            rec.upsert(9, posting(&[0, 3], FieldTag::Body));
            records.insert(word_id, rec);
        }
        assert_eq!(write_barrel(&paths, 0, 10, &records).unwrap(), 5);

        let offsets = load_offsets(&paths.inverted_offsets(0)).unwrap();
        let data_len = std::fs::metadata(paths.inverted_barrel(0)).unwrap().len();
        assert_eq!(offsets.len(), 1 + 5 + 1);
        assert_eq!(*offsets.last().unwrap(), data_len);

        assert_eq!(read_record(&paths, 10, 5).unwrap(), records.get(&5).cloned());
        assert_eq!(read_record(&paths, 10, 3).unwrap(), None);
        assert_eq!(read_record(&paths, 10, 7).unwrap(), None);
        assert_eq!(read_record(&paths, 10, 12).unwrap(), None);

        assert!(!repair_offsets(&paths, 0).unwrap());
        std::fs::remove_file(paths.inverted_offsets(0)).unwrap();
        assert!(repair_offsets(&paths, 0).unwrap());
        assert_eq!(read_record(&paths, 10, 2).unwrap(), records.get(&2).cloned());
    }
}
