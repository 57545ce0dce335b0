//! `cprep inspect`: list what the built-in store holds, optionally
//! exporting every matching record to CSV.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::store::{load_records, StoredRecord};

const PREVIEW_CHARS: usize = 160;

/// Records listed when the caller gives no limit on the command line.
pub const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct InspectOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    /// Substring matched against the record source, ignoring case.
    pub source_filter: Option<String>,
    pub group_by_file: bool,
    /// Write every filtered record (before paging) to this CSV file.
    pub export_csv: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    source: &'a str,
    text: &'a str,
}

/// Where a stored record came from: its file path, else its file name,
/// else its id.
fn source_of(record: &StoredRecord) -> &str {
    record
        .file_path()
        .or_else(|| record.metadata.get("file_name").map(String::as_str))
        .or(record.id.as_deref())
        .unwrap_or("")
}

/// Single-line preview: whitespace runs collapse to one space and the
/// result is cut at 160 characters.
pub fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{}…", cut.trim_end())
}

fn filtered<'a>(records: &'a [StoredRecord], opts: &InspectOptions) -> Vec<&'a StoredRecord> {
    let needle = opts.source_filter.as_ref().map(|n| n.to_lowercase());
    records
        .iter()
        .filter(|r| match &needle {
            Some(needle) => source_of(r).to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .collect()
}

fn paged<'a>(matching: &[&'a StoredRecord], opts: &InspectOptions) -> Vec<&'a StoredRecord> {
    let rest = matching.iter().skip(opts.offset).copied();
    match opts.limit {
        Some(limit) => rest.take(limit).collect(),
        None => rest.collect(),
    }
}

/// Write `records` as CSV with an `id,source,text` header. Returns the
/// number of rows written.
pub fn export_csv(records: &[&StoredRecord], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for record in records {
        writer.serialize(CsvRow {
            id: record.id.as_deref().unwrap_or(""),
            source: source_of(record),
            text: &record.text,
        })?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(records.len())
}

/// Write the listing for the store under `persist_dir` to `out`.
pub fn write_inspection<W: Write>(
    persist_dir: &Path,
    opts: &InspectOptions,
    out: &mut W,
) -> Result<()> {
    let records = load_records(persist_dir)?;
    let matching = filtered(&records, opts);
    let shown = paged(&matching, opts);

    if opts.group_by_file {
        let mut groups: IndexMap<&str, usize> = IndexMap::new();
        for record in &shown {
            *groups.entry(record.file_path().unwrap_or("-")).or_insert(0) += 1;
        }
        for (file, count) in &groups {
            writeln!(out, "{:>6}  {}", count, file)?;
        }
        writeln!(out, "{} files, {} records", groups.len(), shown.len())?;
    } else {
        for record in &shown {
            let id = record.id.as_deref().unwrap_or("-");
            let short_id: String = id.chars().take(12).collect();
            writeln!(
                out,
                "{}  {}  {}",
                short_id,
                record.file_path().unwrap_or("-"),
                preview(&record.text)
            )?;
        }
        writeln!(out, "{} of {} records", shown.len(), records.len())?;
    }

    if let Some(path) = &opts.export_csv {
        let rows = export_csv(&matching, path)?;
        writeln!(out, "exported {} rows to {}", rows, path.display())?;
    }
    Ok(())
}

pub fn run_inspect(persist_dir: &Path, opts: &InspectOptions) -> Result<()> {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    write_inspection(persist_dir, opts, &mut lock)
}
