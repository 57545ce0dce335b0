//! Reading non-JSON files into raw text units.
//!
//! The pipeline only depends on the [`DocumentReader`] trait; any reader
//! that turns a path into [`SourceUnit`]s can be injected. [`FileReader`]
//! is the built-in one:
//!
//! | Extension | Handling |
//! |-----------|----------|
//! | `txt`, `md`, `csv`, `tsv`, `log`, `html`, `htm`, `xml`, `yaml`, `yml`, `ini`, `rst` | UTF-8 (lossy) |
//! | `pdf` | `pdf-extract` |
//! | `docx` | `word/document.xml` text runs, one line per paragraph |
//! | `pptx` | slide text runs, slides in numeric order |
//! | `xlsx` | cell values, one line per row |
//!
//! Anything else is reported as [`SkipReason::UnsupportedFormat`].

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

use crate::error::SkipReason;
use crate::models::{Metadata, SourceUnit, FILE_PATH_KEY};

/// Maximum decompressed bytes read from one archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Worksheets past this count are ignored.
const XLSX_MAX_SHEETS: usize = 100;

/// Turns a file into zero or more raw text units.
pub trait DocumentReader {
    fn read(&self, path: &Path) -> Result<Vec<SourceUnit>, SkipReason>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
}

impl Format {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" | "csv" | "tsv" | "log" | "html" | "htm" | "xml" | "yaml" | "yml"
            | "ini" | "rst" => Some(Format::Text),
            "pdf" => Some(Format::Pdf),
            "docx" => Some(Format::Docx),
            "pptx" => Some(Format::Pptx),
            "xlsx" => Some(Format::Xlsx),
            _ => None,
        }
    }

    fn mime(self, path: &Path) -> &'static str {
        match self {
            Format::Pdf => "application/pdf",
            Format::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Format::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            Format::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Format::Text => match path.extension().and_then(|e| e.to_str()) {
                Some("md") => "text/markdown",
                Some("csv") => "text/csv",
                Some("html") | Some("htm") => "text/html",
                _ => "text/plain",
            },
        }
    }
}

/// Built-in reader for plain text, PDF and Office Open XML files.
#[derive(Debug, Clone)]
pub struct FileReader {
    max_bytes: u64,
}

impl FileReader {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

impl Default for FileReader {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_EXTRACT_BYTES)
    }
}

impl DocumentReader for FileReader {
    fn read(&self, path: &Path) -> Result<Vec<SourceUnit>, SkipReason> {
        let format = Format::from_path(path).ok_or_else(|| {
            SkipReason::UnsupportedFormat(
                path.extension()
                    .map(|e| e.to_string_lossy().to_string())
                    .unwrap_or_else(|| "no extension".to_string()),
            )
        })?;

        let meta = std::fs::metadata(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
        if meta.len() > self.max_bytes {
            return Err(SkipReason::Unreadable(format!(
                "{} bytes exceeds limit of {}",
                meta.len(),
                self.max_bytes
            )));
        }
        let bytes = std::fs::read(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;

        let text = match format {
            Format::Text => String::from_utf8_lossy(&bytes).into_owned(),
            Format::Pdf => pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| SkipReason::Unreadable(format!("PDF: {}", e)))?,
            Format::Docx => docx_text(&bytes).map_err(office_error)?,
            Format::Pptx => pptx_text(&bytes).map_err(office_error)?,
            Format::Xlsx => xlsx_text(&bytes).map_err(office_error)?,
        };

        let mut metadata = Metadata::new();
        metadata.insert(FILE_PATH_KEY.to_string(), path.display().to_string());
        metadata.insert(
            "file_name".to_string(),
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        );
        metadata.insert("file_type".to_string(), format.mime(path).to_string());
        metadata.insert("file_size".to_string(), meta.len().to_string());
        if let Ok(modified) = meta.modified() {
            let modified: DateTime<Utc> = modified.into();
            metadata.insert(
                "last_modified_date".to_string(),
                modified.format("%Y-%m-%d").to_string(),
            );
        }

        Ok(vec![SourceUnit { text, metadata }])
    }
}

fn office_error(message: String) -> SkipReason {
    SkipReason::Unreadable(format!("OOXML: {}", message))
}

fn open_archive(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>, String> {
    ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| format!("{}: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!("{} exceeds {} bytes", name, MAX_XML_ENTRY_BYTES));
    }
    Ok(out)
}

/// Entry names under `prefix` ending in `.xml`, sorted by their numeric part.
fn numbered_entries(archive: &ZipArchive<Cursor<&[u8]>>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|n| {
        n[prefix.len()..]
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    runs_text(&xml, b"p")
}

fn pptx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_entry(&mut archive, &name)?;
        let text = runs_text(&xml, b"p")?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

/// Concatenated text of every `t` element; a line break closes each
/// `line_tag` element.
fn runs_text(xml: &[u8], line_tag: &[u8]) -> Result<String, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_run = true,
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_run = false;
                } else if name.as_ref() == line_tag && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Text(te)) if in_run => {
                out.push_str(&te.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn xlsx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let has_shared = archive
        .file_names()
        .any(|n| n == "xl/sharedStrings.xml");
    let shared = if has_shared {
        shared_strings(&read_entry(&mut archive, "xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };
    let mut sheets = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry(&mut archive, &name)?;
        let text = sheet_text(&xml, &shared)?;
        if !text.is_empty() {
            sheets.push(text);
        }
    }
    Ok(sheets.join("\n\n"))
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_run = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_run = false,
                _ => {}
            },
            Ok(Event::Text(te)) if in_run => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(|e| e.to_string())?);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn sheet_text(xml: &[u8], shared: &[String]) -> Result<String, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" => {
                    if !cells.is_empty() {
                        rows.push(cells.join(" | "));
                        cells.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().map_err(|e| e.to_string())?;
                let value = raw.trim();
                if value.is_empty() {
                    // nothing to record
                } else if shared_cell {
                    if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                        cells.push(s.clone());
                    }
                } else {
                    cells.push(value.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    if !cells.is_empty() {
        rows.push(cells.join(" | "));
    }
    Ok(rows.join("\n"))
}
