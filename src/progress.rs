//! Run progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts
//! (`cprep extract` output, `--export -`).

use std::io::Write;

/// A single progress event for an ingest run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Walking the data directory. Total unknown.
    Discovering { data_dir: String },
    /// A batch was accepted by the index back end.
    Indexing { processed: u64, total: u64 },
}

impl ProgressEvent {
    /// Completion percentage, `processed * 100 / total`. `None` while
    /// discovering.
    pub fn percent(&self) -> Option<u64> {
        match self {
            ProgressEvent::Discovering { .. } => None,
            ProgressEvent::Indexing { processed, total } => {
                if *total == 0 {
                    Some(100)
                } else {
                    Some(processed * 100 / total)
                }
            }
        }
    }
}

/// Receives progress events from the ingest driver.
pub trait ProgressReporter {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: `[ 42%] indexing 100 / 237 records`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { data_dir } => {
                format!("scanning {} ...\n", data_dir)
            }
            ProgressEvent::Indexing { processed, total } => format!(
                "[{:>3}%] indexing {} / {} records\n",
                event.percent().unwrap_or(0),
                format_number(*processed),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Discovering { data_dir } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "data_dir": data_dir
            }),
            ProgressEvent::Indexing { processed, total } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "processed": processed,
                "total": total,
                "percent": event.percent()
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
