use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u32,
    pub created_at: String,
    pub barrel_size: u32,
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn lexicon(&self) -> PathBuf { self.root.join("lexicon.tsv") }
    pub fn latest_word_id(&self) -> PathBuf { self.root.join("latest_id.txt") }
    pub fn documents(&self) -> PathBuf { self.root.join("documents.tsv") }
    pub fn latest_doc_id(&self) -> PathBuf { self.root.join("latest_doc_id.txt") }
    pub fn lengths(&self) -> PathBuf { self.root.join("lengths.tsv") }
    pub fn scraped(&self) -> PathBuf { self.root.join("scraped.tsv") }
    pub fn forward_dir(&self) -> PathBuf { self.root.join("forward") }
    pub fn inverted_dir(&self) -> PathBuf { self.root.join("inverted") }
    pub fn forward_barrel(&self, barrel: u32) -> PathBuf {
        self.forward_dir().join(format!("forward_{barrel}.tsv"))
    }
    pub fn inverted_barrel(&self, barrel: u32) -> PathBuf {
        self.inverted_dir().join(format!("inverted_{barrel}.tsv"))
    }
    pub fn inverted_offsets(&self, barrel: u32) -> PathBuf {
        self.inverted_dir().join(format!("inverted_{barrel}.bin"))
    }

    pub fn create_dirs(&self) -> Result<()> {
        create_dir_all(self.forward_dir())?;
        create_dir_all(self.inverted_dir())?;
        Ok(())
    }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let json = serde_json::to_string_pretty(meta)?;
    write_atomic(&paths.meta(), json.as_bytes())
}

pub fn load_meta(paths: &IndexPaths) -> Result<Option<MetaFile>> {
    let mut f = match File::open(paths.meta()) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    Ok(Some(serde_json::from_str(&buf)?))
}

/// Reads a persisted id counter; a missing file means nothing was assigned yet.
pub fn load_counter(path: &Path) -> Result<u32> {
    match std::fs::read_to_string(path) {
        Ok(s) => s
            .trim()
            .parse()
            .map_err(|e| Error::malformed(path.display().to_string(), format!("bad counter: {e}"))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

pub fn save_counter(path: &Path, value: u32) -> Result<()> {
    write_atomic(path, value.to_string().as_bytes())
}

/// Replaces `target` with `bytes` through a sibling temp file, so readers see
/// either the old or the new contents.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = temp_sibling(target)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target)?;
    Ok(())
}

/// A temp file in the same directory as `target`; deleted on drop unless persisted.
pub fn temp_sibling(target: &Path) -> Result<NamedTempFile> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    create_dir_all(dir)?;
    Ok(NamedTempFile::new_in(dir)?)
}

/// Appends tab-separated rows, writing `header` first when the file is new or empty.
pub fn append_rows<I>(path: &Path, header: &[&str], rows: I) -> Result<usize>
where
    I: IntoIterator<Item = Vec<String>>,
{
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let empty = file.metadata()?.len() == 0;
    let mut w = BufWriter::new(file);
    if empty {
        writeln!(w, "{}", header.join("\t"))?;
    }
    let mut written = 0;
    for row in rows {
        writeln!(w, "{}", row.join("\t"))?;
        written += 1;
    }
    w.flush()?;
    w.get_ref().sync_data()?;
    Ok(written)
}

/// One data row of a table file, with its 1-based line number for diagnostics.
#[derive(Debug)]
pub struct Row {
    pub line: usize,
    pub cells: Vec<String>,
}

/// Reads every data row of a table file. Rows with the wrong number of cells
/// are logged and skipped. A missing file yields no rows.
pub fn read_rows(path: &Path, columns: usize) -> Result<Vec<Row>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    let mut rows = Vec::new();
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
        let line = match std::str::from_utf8(&buf) {
            Ok(text) => text.trim_end_matches(['\n', '\r']),
            Err(e) => {
                tracing::warn!(file = %path.display(), line = idx, error = %e, "skipping row that is not UTF-8");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let cells: Vec<String> = line.split('\t').map(str::to_string).collect();
        if cells.len() != columns {
            tracing::warn!(file = %path.display(), line = idx, found = cells.len(), expected = columns, "skipping malformed row");
            continue;
        }
        rows.push(Row { line: idx, cells });
    }
    Ok(rows)
}

pub fn json_cell<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn parse_cell<T: DeserializeOwned>(cell: &str, location: impl FnOnce() -> String) -> Result<T> {
    serde_json::from_str(cell).map_err(|e| Error::malformed(location(), e.to_string()))
}

pub fn parse_id(cell: &str, location: impl FnOnce() -> String) -> Result<u32> {
    cell.trim()
        .parse()
        .map_err(|e| Error::malformed(location(), format!("bad id {cell:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_writes_header_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tsv");
        append_rows(&path, &["ID", "Word"], vec![vec!["1".into(), "apple".into()]]).unwrap();
        append_rows(&path, &["ID", "Word"], vec![vec!["2".into(), "pear".into()]]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "ID\tWord\n1\tapple\n2\tpear\n");
        let rows = read_rows(&path, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].line, 3);
    }

    #[test]
    fn read_rows_skips_wrong_width() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tsv");
        std::fs::write(&path, "ID\tWord\n1\tapple\nbroken\n3\tfig\n").unwrap();
        let rows = read_rows(&path, 2).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.cells[0].as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn read_rows_skips_invalid_utf8() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tsv");
        std::fs::write(&path, b"ID\tWord\n1\tapple\n2\t\xff\xfe\n3\tfig\n").unwrap();
        let rows = read_rows(&path, 2).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.cells[0].as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(rows[1].line, 4);
    }

    #[test]
    fn counter_defaults_to_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latest_id.txt");
        assert_eq!(load_counter(&path).unwrap(), 0);
        save_counter(&path, 42).unwrap();
        assert_eq!(load_counter(&path).unwrap(), 42);
    }
}
