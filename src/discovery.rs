//! Data directory discovery.
//!
//! Walks the data directory recursively and drops excluded paths. Output
//! order is the walk order with entries sorted by file name, which is
//! stable for a given filesystem state. Entries below the root that cannot
//! be read are collected rather than ending the walk.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::DiscoveryConfig;
use crate::error::{IngestError, Result};

/// Files found under the data directory, in walk order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub files: Vec<PathBuf>,
    /// Entries the walk could not read, with the error message.
    pub unreadable: Vec<(PathBuf, String)>,
}

impl Discovered {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn json_count(&self) -> usize {
        self.files.iter().filter(|p| is_json(p)).count()
    }

    pub fn other_count(&self) -> usize {
        self.len() - self.json_count()
    }
}

pub fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

pub fn discover(data_dir: &Path, config: &DiscoveryConfig) -> Result<Discovered> {
    if !data_dir.is_dir() {
        return Err(IngestError::MissingDataDir(data_dir.to_path_buf()));
    }

    let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut found = Discovered::default();
    let walker = WalkDir::new(data_dir)
        .follow_links(config.follow_symlinks)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(IngestError::Discovery {
                    path: data_dir.to_path_buf(),
                    message: e.to_string(),
                });
            }
            Err(e) => {
                let path = e.path().unwrap_or(data_dir).to_path_buf();
                tracing::warn!(path = %path.display(), error = %e, "cannot read entry");
                found.unreadable.push((path, e.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(data_dir).unwrap_or(path);
        if exclude_set.is_match(relative) {
            tracing::debug!(path = %relative.display(), "excluded");
            continue;
        }

        found.files.push(path.to_path_buf());
    }

    tracing::info!(
        data_dir = %data_dir.display(),
        files = found.len(),
        json = found.json_count(),
        unreadable = found.unreadable.len(),
        "discovery finished"
    );
    Ok(found)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| IngestError::Glob {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| IngestError::Glob {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}
