//! # corpus-prep CLI (`cprep`)
//!
//! ## Usage
//!
//! ```bash
//! cprep --config ./config/cprep.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cprep ingest` | Build records from the data directory and index them |
//! | `cprep normalize "<text>"` | Print the abbreviation-expanded text |
//! | `cprep extract <file.json>` | Print the records of one JSON file |
//! | `cprep inspect` | List records held by the built-in store |
//!
//! ## Examples
//!
//! ```bash
//! # Full run with the defaults from ./config/cprep.toml
//! cprep ingest
//!
//! # Audit what would be indexed, chunked, without touching the store
//! cprep ingest --dry-run --export records.jsonl --export-chunks
//!
//! # Fail the run when nothing was produced
//! cprep ingest --require-records --data-dir ./incoming
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use corpus_prep::canon::load_schema_rules;
use corpus_prep::config::{self, Config};
use corpus_prep::error::IngestError;
use corpus_prep::export::{export_records, write_jsonl, ExportShape};
use corpus_prep::index::{batch_size_for, submit_batches, IndexSettings};
use corpus_prep::ingest::{ingest, Pipeline, RunSummary};
use corpus_prep::inspect::{run_inspect, InspectOptions, DEFAULT_LIMIT};
use corpus_prep::normalize::ResourceLoader;
use corpus_prep::progress::ProgressMode;
use corpus_prep::reader::FileReader;
use corpus_prep::store::JsonlStore;

/// corpus-prep: normalize heterogeneous files into records for vector
/// indexing.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "cprep",
    about = "Normalize JSON, text and office files into metadata-enriched records for vector indexing",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cprep.toml")]
    config: PathBuf,

    /// Debug logging. `RUST_LOG` takes precedence.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the data directory and submit the records to the index.
    ///
    /// JSON files are decomposed per element, canonicalized and normalized;
    /// other files go through the document reader and the normalizer.
    /// Records are submitted in batches to the store under
    /// `paths.persist_dir`.
    Ingest {
        /// Override `paths.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Also write every record as JSON lines to this path (`-` for stdout).
        #[arg(long)]
        export: Option<PathBuf>,

        /// Export chunks instead of whole records.
        #[arg(long, requires = "export")]
        export_chunks: bool,

        /// Build records and report counts without indexing anything.
        #[arg(long)]
        dry_run: bool,

        /// Fail when the run produces zero records.
        #[arg(long)]
        require_records: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Expand abbreviations in a piece of text and print the result.
    Normalize {
        text: String,
    },

    /// Print the records derived from one JSON file as JSON lines.
    Extract {
        file: PathBuf,
    },

    /// List records held by the built-in store.
    Inspect {
        /// Maximum number of records to list.
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Number of matching records to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Only records whose source contains this substring, ignoring case.
        #[arg(long)]
        source_filter: Option<String>,

        /// Print one count per source file instead of records.
        #[arg(long)]
        group_by_file: bool,

        /// Also write every matching record (id, source, text) to this CSV file.
        #[arg(long)]
        export_csv: Option<PathBuf>,
    },
}

fn init_tracing(cfg: &Config, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else {
        cfg.logging.level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resource_loader(cfg: &Config) -> ResourceLoader {
    ResourceLoader::new(&cfg.paths.abbreviations, &cfg.paths.abbreviation_rules)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg, cli.verbose);

    match cli.command {
        Commands::Ingest {
            data_dir,
            export,
            export_chunks,
            dry_run,
            require_records,
            progress,
        } => {
            let data_dir = data_dir.unwrap_or_else(|| cfg.paths.data_dir.clone());
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let opts = IngestRun {
                data_dir: &data_dir,
                export: export.as_deref(),
                export_chunks,
                dry_run,
                require_records,
                progress,
            };
            run_ingest(&cfg, &opts)?;
        }
        Commands::Normalize { text } => {
            let resources = resource_loader(&cfg).resources();
            println!("{}", resources.expand_abbreviations(&text));
        }
        Commands::Extract { file } => {
            run_extract(&cfg, &file)?;
        }
        Commands::Inspect {
            limit,
            offset,
            source_filter,
            group_by_file,
            export_csv,
        } => {
            let opts = InspectOptions {
                limit: Some(limit),
                offset,
                source_filter,
                group_by_file,
                export_csv,
            };
            run_inspect(&cfg.paths.persist_dir, &opts)?;
        }
    }

    Ok(())
}

struct IngestRun<'a> {
    data_dir: &'a Path,
    export: Option<&'a Path>,
    export_chunks: bool,
    dry_run: bool,
    require_records: bool,
    progress: ProgressMode,
}

fn run_ingest(cfg: &Config, run: &IngestRun<'_>) -> Result<()> {
    let resources = resource_loader(cfg).resources();
    let rules = load_schema_rules(&cfg.paths.schema, &cfg.canon.schemas);
    let reader = FileReader::new(cfg.discovery.max_extract_bytes);
    let pipeline = Pipeline {
        resources: &resources,
        rules: &rules,
        reader: &reader,
    };
    let reporter = run.progress.reporter();

    // Keep stdout clean when the export itself goes there.
    let export_to_stdout = run.export == Some(Path::new("-"));
    let mut out: Box<dyn Write> = if export_to_stdout {
        Box::new(std::io::stderr())
    } else {
        Box::new(std::io::stdout())
    };

    let ingested = ingest(run.data_dir, &cfg.discovery, &pipeline, reporter.as_ref())?;
    if run.dry_run {
        writeln!(out, "ingest {} (dry-run)", run.data_dir.display())?;
    } else {
        writeln!(out, "ingest {}", run.data_dir.display())?;
    }
    writeln!(out, "{}", ingested.summary)?;

    if let Some(path) = run.export {
        let shape = if run.export_chunks {
            ExportShape::Chunks {
                chunk_size: cfg.chunking.chunk_size,
                chunk_overlap: cfg.chunking.chunk_overlap,
            }
        } else {
            ExportShape::Records
        };
        let lines = export_records(&ingested.records, shape, path)?;
        writeln!(out, "  exported: {} lines to {}", lines, path.display())?;
    }

    if ingested.records.is_empty() {
        if run.require_records {
            return Err(IngestError::NoRecords(run.data_dir.to_path_buf()).into());
        }
        writeln!(
            out,
            "no records produced from {}; nothing to index",
            run.data_dir.display()
        )?;
        return Ok(());
    }
    if run.dry_run {
        let batch_size = batch_size_for(
            ingested.records.len(),
            cfg.batching.target_batches,
            cfg.batching.max_batch_size,
        );
        writeln!(out, "  batch size: {}", batch_size)?;
        writeln!(out, "ok (dry-run)")?;
        return Ok(());
    }

    let settings = IndexSettings::from_config(cfg);
    let mut store = JsonlStore::open(&settings.persist_dir)?;
    let report = submit_batches(
        ingested.records,
        &mut store,
        &settings,
        &cfg.batching,
        reporter.as_ref(),
    )?;

    writeln!(out, "  batches: {} x {}", report.batches, report.batch_size)?;
    writeln!(out, "  submitted: {}", report.submitted)?;
    writeln!(out, "  new in store: {}", store.appended())?;
    writeln!(out, "ok - records: {}", store.len())?;
    Ok(())
}

fn run_extract(cfg: &Config, file: &Path) -> Result<()> {
    let resources = resource_loader(cfg).resources();
    let rules = load_schema_rules(&cfg.paths.schema, &cfg.canon.schemas);
    let reader = FileReader::new(cfg.discovery.max_extract_bytes);
    let pipeline = Pipeline {
        resources: &resources,
        rules: &rules,
        reader: &reader,
    };

    let mut summary = RunSummary::default();
    let records = match pipeline.process_json(file, &mut summary) {
        Ok(records) => records,
        Err(reason) => bail!("cannot extract {}: {}", file.display(), reason),
    };

    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    write_jsonl(&records, ExportShape::Records, &mut lock)?;
    if !summary.skipped.is_empty() {
        eprintln!("{} elements skipped", summary.skipped.len());
    }
    Ok(())
}
