//! Side-channel JSON-lines export of the record stream.
//!
//! Each line is `{"id": …, "text": …, "metadata": {…}}`. The export is
//! for audit and debugging and never affects indexing. Write failures
//! surface as [`IngestError::Export`] so callers can tell them apart
//! from back-end failures.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::chunk::chunk_record;
use crate::error::{IngestError, Result};
use crate::models::{Metadata, Record};

#[derive(Serialize)]
struct ExportLine<'a> {
    id: Option<&'a str>,
    text: &'a str,
    metadata: &'a Metadata,
}

/// What gets written: whole records, or their chunks.
#[derive(Debug, Clone, Copy)]
pub enum ExportShape {
    Records,
    Chunks {
        chunk_size: usize,
        chunk_overlap: usize,
    },
}

/// Serialize `records` to `writer`, one JSON object per line. Returns
/// the number of lines written.
pub fn write_jsonl<W: Write>(
    records: &[Record],
    shape: ExportShape,
    writer: &mut W,
) -> std::io::Result<usize> {
    let mut lines = 0;
    for record in records {
        match shape {
            ExportShape::Records => {
                write_line(record, writer)?;
                lines += 1;
            }
            ExportShape::Chunks {
                chunk_size,
                chunk_overlap,
            } => {
                for chunk in chunk_record(record, chunk_size, chunk_overlap) {
                    write_line(&chunk, writer)?;
                    lines += 1;
                }
            }
        }
    }
    writer.flush()?;
    Ok(lines)
}

fn write_line<W: Write>(record: &Record, writer: &mut W) -> std::io::Result<()> {
    let line = ExportLine {
        id: record.id(),
        text: record.text(),
        metadata: record.metadata(),
    };
    serde_json::to_writer(&mut *writer, &line)?;
    writer.write_all(b"\n")
}

/// Export to `path`, or to stdout when `path` is `-`.
pub fn export_records(records: &[Record], shape: ExportShape, path: &Path) -> Result<usize> {
    let to_err = |source: std::io::Error| IngestError::Export {
        path: path.to_path_buf(),
        source,
    };

    let lines = if path == Path::new("-") {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        write_jsonl(records, shape, &mut lock).map_err(to_err)?
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(to_err)?;
        }
        let file = std::fs::File::create(path).map_err(to_err)?;
        let mut writer = BufWriter::new(file);
        write_jsonl(records, shape, &mut writer).map_err(to_err)?
    };

    tracing::info!(path = %path.display(), lines, "export written");
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Record> {
        let mut meta = Metadata::new();
        meta.insert("file_path".into(), "a.json".into());
        meta.insert("json_path".into(), "$[0]".into());
        vec![Record::new("Alpha\n\nBeta", meta).identified("r1")]
    }

    #[test]
    fn writes_one_line_per_record() {
        let mut buf = Vec::new();
        let n = write_jsonl(&sample(), ExportShape::Records, &mut buf).unwrap();
        assert_eq!(n, 1);
        let text = String::from_utf8(buf).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["id"], "r1");
        assert_eq!(value["metadata"]["json_path"], "$[0]");
        let keys: Vec<&String> = value["metadata"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["file_path", "json_path"]);
    }

    #[test]
    fn chunk_shape_writes_chunks() {
        let mut buf = Vec::new();
        let shape = ExportShape::Chunks {
            chunk_size: 6,
            chunk_overlap: 0,
        };
        let n = write_jsonl(&sample(), shape, &mut buf).unwrap();
        assert_eq!(n, 2);
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"id\":\"r1:1\""));
    }

    #[test]
    fn unwritable_path_is_export_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let err = export_records(&sample(), ExportShape::Records, &blocker.join("out.jsonl"))
            .unwrap_err();
        assert!(matches!(err, IngestError::Export { .. }));
    }
}
