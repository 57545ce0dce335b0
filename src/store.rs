//! Built-in JSON-lines index back end.
//!
//! Stands in for a vector store: every accepted record is appended to
//! `{persist_dir}/records.jsonl`, and the settings of the latest run are
//! written to `{persist_dir}/index.json`. Records whose id and text hash
//! are already stored are skipped, so re-submitting an unchanged corpus
//! adds nothing.
//!
//! A run killed mid-append can leave a partial last line. Readers skip it
//! with a warning and [`JsonlStore::open`] truncates it, so the next run
//! resumes from the last complete record.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::index::{IndexBackend, IndexSettings};
use crate::models::{Metadata, Record};

pub const RECORDS_FILE: &str = "records.jsonl";
pub const MANIFEST_FILE: &str = "index.json";

/// One persisted line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Option<String>,
    pub text_sha256: String,
    pub text: String,
    pub metadata: Metadata,
}

impl StoredRecord {
    fn from_record(record: &Record) -> Self {
        Self {
            id: record.id().map(str::to_string),
            text_sha256: text_hash(record.text()),
            text: record.text().to_string(),
            metadata: record.metadata().clone(),
        }
    }

    fn key(&self) -> (String, String) {
        (self.id.clone().unwrap_or_default(), self.text_sha256.clone())
    }

    pub fn file_path(&self) -> Option<&str> {
        self.metadata.get(crate::models::FILE_PATH_KEY).map(String::as_str)
    }
}

fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct JsonlStore {
    dir: PathBuf,
    seen: HashSet<(String, String)>,
    appended: usize,
    manifest_written: bool,
}

impl JsonlStore {
    /// Open (creating if needed) the store under `dir` and index what is
    /// already persisted.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create persist dir: {}", dir.display()))?;
        let path = dir.join(RECORDS_FILE);
        let scan = scan_records(&path)?;
        if scan.torn_tail || scan.unterminated {
            repair_tail(&path, &scan)?;
        }
        let seen = scan.records.iter().map(StoredRecord::key).collect();
        Ok(Self {
            dir: dir.to_path_buf(),
            seen,
            appended: 0,
            manifest_written: false,
        })
    }

    /// Number of distinct records stored.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Records appended since the store was opened.
    pub fn appended(&self) -> usize {
        self.appended
    }

    fn write_manifest(&self, settings: &IndexSettings) -> Result<()> {
        let path = self.dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

impl IndexBackend for JsonlStore {
    fn submit(&mut self, batch: &[Record], settings: &IndexSettings) -> Result<()> {
        if !self.manifest_written {
            self.write_manifest(settings)?;
            self.manifest_written = true;
        }

        let path = self.dir.join(RECORDS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        let mut fresh = Vec::new();
        for record in batch {
            let stored = StoredRecord::from_record(record);
            let key = stored.key();
            if self.seen.contains(&key) {
                continue;
            }
            serde_json::to_writer(&mut writer, &stored)?;
            writer.write_all(b"\n")?;
            fresh.push(key);
        }
        writer.flush()?;
        writer
            .get_ref()
            .sync_data()
            .with_context(|| format!("Failed to sync {}", path.display()))?;

        self.appended += fresh.len();
        self.seen.extend(fresh);
        Ok(())
    }
}

/// Every record stored under `dir`, in insertion order. A missing store
/// reads as empty and a partial last line is skipped.
pub fn load_records(dir: &Path) -> Result<Vec<StoredRecord>> {
    Ok(scan_records(&dir.join(RECORDS_FILE))?.records)
}

#[derive(Debug, Default)]
struct Scan {
    records: Vec<StoredRecord>,
    /// Bytes up to and including the last complete record.
    valid_len: u64,
    /// The last line did not parse and was left out.
    torn_tail: bool,
    /// The last record parsed but has no trailing newline.
    unterminated: bool,
}

fn scan_records(path: &Path) -> Result<Scan> {
    let mut scan = Scan::default();
    if !path.exists() {
        return Ok(scan);
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut line = Vec::new();
    let mut n = 0;
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        n += 1;
        let terminated = line.ends_with(b"\n");
        let parsed = std::str::from_utf8(&line)
            .map_err(anyhow::Error::from)
            .and_then(|text| {
                if text.trim().is_empty() {
                    Ok(None)
                } else {
                    serde_json::from_str::<StoredRecord>(text).map(Some).map_err(Into::into)
                }
            });
        match parsed {
            Ok(record) => {
                scan.records.extend(record);
                scan.valid_len += read as u64;
                scan.unterminated = !terminated;
            }
            Err(e) => {
                let at_end = reader.fill_buf().map(|rest| rest.is_empty()).unwrap_or(false);
                if !at_end {
                    return Err(e.context(format!("{}:{}: malformed record", path.display(), n)));
                }
                tracing::warn!(
                    path = %path.display(),
                    line = n,
                    error = %e,
                    "ignoring partial last record"
                );
                scan.torn_tail = true;
                scan.unterminated = false;
            }
        }
    }
    Ok(scan)
}

/// Cut a partial last line and terminate the last complete record.
fn repair_tail(path: &Path, scan: &Scan) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.set_len(scan.valid_len)
        .with_context(|| format!("Failed to truncate {}", path.display()))?;
    if scan.unterminated {
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(b"\n")?;
    }
    tracing::info!(path = %path.display(), records = scan.records.len(), "store tail repaired");
    Ok(())
}
