//! Batched submission to the index back end.
//!
//! The vector store and embedding runtime live behind [`IndexBackend`].
//! [`submit_batches`] moves the record stream into fixed-size batches,
//! hands each one over synchronously and reports cumulative progress
//! after every accepted batch.

use serde::Serialize;
use std::path::PathBuf;

use crate::config::{BatchingConfig, Config};
use crate::error::{IngestError, Result};
use crate::models::Record;
use crate::progress::{ProgressEvent, ProgressReporter};

/// Parameters forwarded to the back end with every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSettings {
    pub persist_dir: PathBuf,
    pub llm_name: String,
    pub embedding_name: String,
    pub llm_num_ctx: u32,
    pub embedding_num_gpu: Option<u32>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl IndexSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            persist_dir: config.paths.persist_dir.clone(),
            llm_name: config.model.llm_name.clone(),
            embedding_name: config.model.embedding_name.clone(),
            llm_num_ctx: config.model.llm_num_ctx,
            embedding_num_gpu: config.model.embedding_num_gpu,
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
        }
    }
}

/// An index builder that accepts records batch by batch.
///
/// Implementations must be idempotent under re-submission of the same
/// logical corpus. A batch that returns `Ok` is treated as durably
/// persisted; nothing is rolled back if a later batch fails.
pub trait IndexBackend {
    fn submit(&mut self, batch: &[Record], settings: &IndexSettings) -> anyhow::Result<()>;
}

/// `ceil(total / target_batches)`, clamped to `1..=max_batch_size`.
pub fn batch_size_for(total: usize, target_batches: usize, max_batch_size: usize) -> usize {
    let target = target_batches.max(1);
    total.div_ceil(target).min(max_batch_size).max(1)
}

/// Outcome of a completed submission phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub batch_size: usize,
    pub batches: usize,
    pub submitted: usize,
}

/// Submit `records` in batches, in order.
///
/// Records are moved into each batch and dropped once the back end has
/// accepted it. On failure the error names the batch offset and size so
/// that exactly that batch can be retried.
pub fn submit_batches(
    records: Vec<Record>,
    backend: &mut dyn IndexBackend,
    settings: &IndexSettings,
    batching: &BatchingConfig,
    progress: &dyn ProgressReporter,
) -> Result<SubmitReport> {
    let total = records.len();
    let batch_size = batch_size_for(total, batching.target_batches, batching.max_batch_size);
    let mut report = SubmitReport {
        batch_size,
        ..SubmitReport::default()
    };
    tracing::info!(total, batch_size, "submitting records");

    let mut remaining = records.into_iter();
    loop {
        let batch: Vec<Record> = remaining.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            break;
        }
        let offset = report.submitted;
        let size = batch.len();

        backend
            .submit(&batch, settings)
            .map_err(|source| IngestError::Submission {
                offset,
                size,
                source,
            })?;

        report.batches += 1;
        report.submitted += size;
        tracing::debug!(batch = report.batches, offset, size, "batch accepted");
        progress.report(ProgressEvent::Indexing {
            processed: report.submitted as u64,
            total: total as u64,
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use crate::progress::NoProgress;

    #[derive(Default)]
    struct Collecting {
        batches: Vec<usize>,
    }

    impl IndexBackend for Collecting {
        fn submit(&mut self, batch: &[Record], _settings: &IndexSettings) -> anyhow::Result<()> {
            self.batches.push(batch.len());
            Ok(())
        }
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("r{}", i), Metadata::new()))
            .collect()
    }

    #[test]
    fn batch_size_bounds() {
        assert_eq!(batch_size_for(0, 10, 64), 1);
        assert_eq!(batch_size_for(5, 10, 64), 1);
        assert_eq!(batch_size_for(237, 10, 64), 24);
        assert_eq!(batch_size_for(10_000, 10, 64), 64);
        assert_eq!(batch_size_for(100, 0, 64), 64);
    }

    #[test]
    fn submits_every_record_once() {
        let mut backend = Collecting::default();
        let settings = IndexSettings::from_config(&Config::default());
        let report = submit_batches(
            records(237),
            &mut backend,
            &settings,
            &BatchingConfig::default(),
            &NoProgress,
        )
        .unwrap();
        assert_eq!(report.batches, 10);
        assert_eq!(report.submitted, 237);
        assert_eq!(backend.batches.iter().sum::<usize>(), 237);
        assert_eq!(backend.batches[9], 21);
    }

    #[test]
    fn empty_stream_submits_nothing() {
        let mut backend = Collecting::default();
        let settings = IndexSettings::from_config(&Config::default());
        let report = submit_batches(
            Vec::new(),
            &mut backend,
            &settings,
            &BatchingConfig::default(),
            &NoProgress,
        )
        .unwrap();
        assert_eq!(report.batches, 0);
        assert!(backend.batches.is_empty());
    }
}
