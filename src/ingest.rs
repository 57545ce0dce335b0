//! Ingestion driver.
//!
//! Turns a data directory into a single ordered record stream:
//!
//! ```text
//! discover ─┬─ *.json ─▶ extract ─▶ canonicalize ─▶ normalize ─┐
//!           └─ other  ─▶ DocumentReader ──────────▶ normalize ─┴─▶ records
//! ```
//!
//! Files are processed in discovery order and, inside a JSON file, in
//! address order. Every data-quality failure, including an entry the walk
//! could not read, becomes a [`Skipped`] entry in the [`RunSummary`]; only
//! structural problems (missing or unreadable data directory, bad exclude
//! glob) abort the run.

use indexmap::IndexMap;
use std::fmt;
use std::path::Path;

use crate::canon::{canonicalize, MappingRule};
use crate::config::DiscoveryConfig;
use crate::discovery::{discover, is_json};
use crate::error::{Result, SkipReason};
use crate::json_extract::extract_file;
use crate::models::{record_id, Record};
use crate::normalize::AbbreviationResources;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::reader::DocumentReader;

/// A file or record left out of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    /// File path, with the JSON path appended for element-level skips.
    pub unit: String,
    pub reason: SkipReason,
}

/// Counters and skips for one ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub json_files: usize,
    pub other_files: usize,
    pub records: usize,
    pub canonicalized: usize,
    pub skipped: Vec<Skipped>,
}

impl RunSummary {
    /// Skip counts keyed by [`SkipReason::kind`], in first-seen order.
    pub fn skip_counts(&self) -> IndexMap<&'static str, usize> {
        let mut counts = IndexMap::new();
        for skip in &self.skipped {
            *counts.entry(skip.reason.kind()).or_insert(0) += 1;
        }
        counts
    }

    fn skip(&mut self, unit: String, reason: SkipReason) {
        tracing::warn!(unit = %unit, reason = %reason, "skipped");
        self.skipped.push(Skipped { unit, reason });
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  json files: {}", self.json_files)?;
        writeln!(f, "  other files: {}", self.other_files)?;
        writeln!(f, "  records: {}", self.records)?;
        writeln!(f, "  canonicalized: {}", self.canonicalized)?;
        write!(f, "  skipped: {}", self.skipped.len())?;
        for (kind, count) in self.skip_counts() {
            write!(f, "\n    {}: {}", kind, count)?;
        }
        Ok(())
    }
}

/// Records produced by [`ingest`], plus what was left out.
#[derive(Debug, Default)]
pub struct Ingested {
    pub records: Vec<Record>,
    pub summary: RunSummary,
}

/// Collaborators shared by every file of a run.
pub struct Pipeline<'a> {
    pub resources: &'a AbbreviationResources,
    pub rules: &'a [MappingRule],
    pub reader: &'a dyn DocumentReader,
}

impl<'a> Pipeline<'a> {
    /// Records of one JSON file: extracted, canonicalized when rules
    /// exist, then normalized once.
    ///
    /// `Err` means the whole file was skipped. Element-level skips are
    /// pushed onto `summary`.
    pub fn process_json(
        &self,
        path: &Path,
        summary: &mut RunSummary,
    ) -> std::result::Result<Vec<Record>, SkipReason> {
        let extraction = extract_file(path)?;
        for (json_path, reason) in extraction.skipped {
            summary.skip(format!("{}#{}", path.display(), json_path), reason);
        }

        let mut records = Vec::with_capacity(extraction.records.len());
        for record in extraction.records {
            let record = if self.rules.is_empty() {
                record
            } else {
                let mapped = canonicalize(&record, self.rules);
                if mapped.text() != record.text() {
                    summary.canonicalized += 1;
                }
                mapped
            };
            match self.normalize(&record) {
                Some(record) => records.push(record),
                None => summary.skip(unit_name(path, record.json_path()), SkipReason::EmptyText),
            }
        }
        Ok(records)
    }

    /// Records of one non-JSON file, one per unit returned by the reader.
    pub fn process_document(
        &self,
        path: &Path,
        summary: &mut RunSummary,
    ) -> std::result::Result<Vec<Record>, SkipReason> {
        let units = self.reader.read(path)?;
        let mut records = Vec::with_capacity(units.len());
        for (index, unit) in units.into_iter().enumerate() {
            let address = format!("#{}", index);
            let record = Record::new(unit.text, unit.metadata).identified(record_id(path, &address));
            match self.normalize(&record) {
                Some(record) => records.push(record),
                None => summary.skip(unit_name(path, Some(&address)), SkipReason::EmptyText),
            }
        }
        Ok(records)
    }

    fn normalize(&self, record: &Record) -> Option<Record> {
        let text = self.resources.expand_abbreviations(record.text());
        if text.trim().is_empty() {
            None
        } else {
            Some(record.with_text(text))
        }
    }
}

fn unit_name(path: &Path, address: Option<&str>) -> String {
    match address {
        Some(address) => format!("{}#{}", path.display(), address),
        None => path.display().to_string(),
    }
}

/// Walk `data_dir` and build the record stream in discovery order.
pub fn ingest(
    data_dir: &Path,
    discovery: &DiscoveryConfig,
    pipeline: &Pipeline<'_>,
    progress: &dyn ProgressReporter,
) -> Result<Ingested> {
    progress.report(ProgressEvent::Discovering {
        data_dir: data_dir.display().to_string(),
    });
    let files = discover(data_dir, discovery)?;

    let mut out = Ingested::default();
    out.summary.json_files = files.json_count();
    out.summary.other_files = files.other_count();
    for (path, message) in files.unreadable {
        out.summary
            .skip(path.display().to_string(), SkipReason::Unreadable(message));
    }

    for path in &files.files {
        let processed = if is_json(path) {
            pipeline.process_json(path, &mut out.summary)
        } else {
            pipeline.process_document(path, &mut out.summary)
        };
        match processed {
            Ok(records) => {
                tracing::debug!(file = %path.display(), records = records.len(), "file done");
                out.records.extend(records);
            }
            Err(reason) => out.summary.skip(path.display().to_string(), reason),
        }
    }

    out.summary.records = out.records.len();
    tracing::info!(
        records = out.summary.records,
        skipped = out.summary.skipped.len(),
        "ingest finished"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, SourceUnit};
    use crate::progress::NoProgress;
    use crate::reader::FileReader;
    use std::fs;
    use tempfile::TempDir;

    struct EmptyReader;

    impl DocumentReader for EmptyReader {
        fn read(&self, _path: &Path) -> std::result::Result<Vec<SourceUnit>, SkipReason> {
            Ok(vec![SourceUnit {
                text: "   ".into(),
                metadata: Metadata::new(),
            }])
        }
    }

    fn resources() -> AbbreviationResources {
        let mut dict = IndexMap::new();
        dict.insert("RES".to_string(), "Réservoir".to_string());
        AbbreviationResources::new(dict, Vec::new())
    }

    #[test]
    fn json_and_text_records_are_normalized() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.json"), r#"[{"note": "RES plein"}]"#).unwrap();
        fs::write(tmp.path().join("b.txt"), "le RES déborde").unwrap();

        let res = resources();
        let reader = FileReader::default();
        let pipeline = Pipeline {
            resources: &res,
            rules: &[],
            reader: &reader,
        };
        let out = ingest(tmp.path(), &DiscoveryConfig::default(), &pipeline, &NoProgress).unwrap();
        assert_eq!(out.records.len(), 2);
        assert!(out.records[0].text().contains("note: Réservoir (RES) plein"));
        assert_eq!(out.records[0].json_path(), Some("$[0]"));
        assert_eq!(out.records[1].text(), "le Réservoir (RES) déborde");
        assert!(out.records.iter().all(|r| r.id().is_some()));
    }

    #[test]
    fn records_follow_walk_order_across_formats() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "premier").unwrap();
        fs::write(tmp.path().join("b.json"), r#"[{"n": "deux"}, {"n": "trois"}]"#).unwrap();
        fs::write(tmp.path().join("c.txt"), "quatre").unwrap();

        let res = resources();
        let reader = FileReader::default();
        let pipeline = Pipeline {
            resources: &res,
            rules: &[],
            reader: &reader,
        };
        let out = ingest(tmp.path(), &DiscoveryConfig::default(), &pipeline, &NoProgress).unwrap();
        let files: Vec<String> = out
            .records
            .iter()
            .map(|r| {
                Path::new(r.file_path().unwrap())
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(files, vec!["a.txt", "b.json", "b.json", "c.txt"]);
        assert_eq!(out.summary.json_files, 1);
        assert_eq!(out.summary.other_files, 2);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_entry_is_skipped_and_run_continues() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "le RES").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("gone"), tmp.path().join("b-link")).unwrap();

        let res = resources();
        let reader = FileReader::default();
        let pipeline = Pipeline {
            resources: &res,
            rules: &[],
            reader: &reader,
        };
        let discovery = DiscoveryConfig {
            follow_symlinks: true,
            ..DiscoveryConfig::default()
        };
        let out = ingest(tmp.path(), &discovery, &pipeline, &NoProgress).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.summary.skip_counts()["unreadable"], 1);
    }

    #[test]
    fn unsupported_and_blank_units_are_tallied() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("blob.bin"), [0u8, 1, 2]).unwrap();
        fs::write(tmp.path().join("bad.json"), "{").unwrap();

        let res = resources();
        let reader = FileReader::default();
        let pipeline = Pipeline {
            resources: &res,
            rules: &[],
            reader: &reader,
        };
        let out = ingest(tmp.path(), &DiscoveryConfig::default(), &pipeline, &NoProgress).unwrap();
        assert!(out.records.is_empty());
        let counts = out.summary.skip_counts();
        assert_eq!(counts["invalid_json"], 1);
        assert_eq!(counts["unsupported_format"], 1);

        let blank = EmptyReader;
        let pipeline = Pipeline {
            resources: &res,
            rules: &[],
            reader: &blank,
        };
        let mut summary = RunSummary::default();
        let records = pipeline
            .process_document(&tmp.path().join("x.txt"), &mut summary)
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(summary.skipped[0].reason, SkipReason::EmptyText);
    }

    #[test]
    fn summary_display_lists_skip_kinds() {
        let mut summary = RunSummary {
            records: 3,
            ..RunSummary::default()
        };
        summary.skip("a.json".into(), SkipReason::InvalidJson("eof".into()));
        let shown = summary.to_string();
        assert!(shown.contains("records: 3"));
        assert!(shown.contains("invalid_json: 1"));
    }
}
