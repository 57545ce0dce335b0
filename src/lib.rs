//! # corpus-prep
//!
//! Turns a directory of heterogeneous files into normalized,
//! metadata-enriched text records ready for vector indexing.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────┐   ┌─────────────┐   ┌────────────┐
//! │ discovery │──▶│ json_extract  │──▶│    canon    │──▶│ normalize  │──┐
//! │  (walk)   │   │ reader (docs) │──────────────────▶│ (abbrevs)  │  │
//! └───────────┘   └───────────────┘   └─────────────┘   └────────────┘  │
//!                                                                       ▼
//!                                     ┌─────────────┐   ┌────────────────┐
//!                                     │ export (-)  │◀──│ index: batches │──▶ IndexBackend
//!                                     └─────────────┘   └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cprep ingest                          # index ./data into ./vectorstore
//! cprep ingest --dry-run --export -     # print records, index nothing
//! cprep normalize "Le RES est plein"    # try the abbreviation rules
//! cprep inspect --group-by-file         # what the store holds
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and env overrides |
//! | [`models`] | `Record`, metadata keys, record ids |
//! | [`error`] | `IngestError` and `SkipReason` |
//! | [`normalize`] | Abbreviation dictionary and regex rules |
//! | [`json_extract`] | JSON decomposition into addressed records |
//! | [`canon`] | Schema-driven canonical fields |
//! | [`reader`] | Non-JSON document reading |
//! | [`discovery`] | Data directory walk |
//! | [`ingest`] | The ingestion driver and run summary |
//! | [`index`] | Back-end seam and batched submission |
//! | [`store`] | Built-in JSON-lines back end |
//! | [`chunk`] | Paragraph-boundary chunking |
//! | [`export`] | JSON-lines audit export |
//! | [`inspect`] | Store listing |
//! | [`progress`] | Progress reporting |

pub mod canon;
pub mod chunk;
pub mod config;
pub mod discovery;
pub mod error;
pub mod export;
pub mod index;
pub mod ingest;
pub mod inspect;
pub mod json_extract;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod reader;
pub mod store;
