use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use corpus_prep::canon::load_schema_rules;
use corpus_prep::config::{BatchingConfig, Config, DiscoveryConfig};
use corpus_prep::error::IngestError;
use corpus_prep::index::{submit_batches, IndexBackend, IndexSettings};
use corpus_prep::ingest::{ingest, Ingested, Pipeline};
use corpus_prep::models::Record;
use corpus_prep::normalize::{AbbreviationResources, ResourceLoader};
use corpus_prep::progress::{NoProgress, ProgressEvent, ProgressReporter};
use corpus_prep::reader::FileReader;
use corpus_prep::store::{load_records, JsonlStore};

fn plain_resources() -> AbbreviationResources {
    AbbreviationResources::new(IndexMap::new(), Vec::new())
}

fn run(data_dir: &Path, resources: &AbbreviationResources, rules_path: Option<&Path>) -> Ingested {
    let rules = match rules_path {
        Some(path) => load_schema_rules(path, &["generic_record".to_string()]),
        None => Vec::new(),
    };
    let reader = FileReader::default();
    let pipeline = Pipeline {
        resources,
        rules: &rules,
        reader: &reader,
    };
    ingest(data_dir, &DiscoveryConfig::default(), &pipeline, &NoProgress).unwrap()
}

fn write_array(path: &Path, n: usize) {
    let items: Vec<serde_json::Value> = (0..n)
        .map(|i| serde_json::json!({"nom": format!("Station {}", i), "debit": i}))
        .collect();
    fs::write(path, serde_json::to_string(&items).unwrap()).unwrap();
}

#[derive(Default)]
struct RecordingBackend {
    batches: Vec<Vec<String>>,
    fail_on_batch: Option<usize>,
}

impl IndexBackend for RecordingBackend {
    fn submit(&mut self, batch: &[Record], _settings: &IndexSettings) -> anyhow::Result<()> {
        if self.fail_on_batch == Some(self.batches.len()) {
            anyhow::bail!("embedding service unavailable");
        }
        self.batches
            .push(batch.iter().map(|r| r.id().unwrap_or_default().to_string()).collect());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingProgress {
    percents: RefCell<Vec<u64>>,
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        if let Some(p) = event.percent() {
            self.percents.borrow_mut().push(p);
        }
    }
}

#[test]
fn malformed_json_file_is_skipped_not_fatal() {
    let tmp = TempDir::new().unwrap();
    write_array(&tmp.path().join("a.json"), 2);
    fs::write(tmp.path().join("b.json"), "[{\"nom\": \"cassé\"").unwrap();
    write_array(&tmp.path().join("c.json"), 3);

    let out = run(tmp.path(), &plain_resources(), None);
    assert_eq!(out.records.len(), 5);
    assert!(out
        .records
        .iter()
        .all(|r| !r.file_path().unwrap().ends_with("b.json")));
    assert_eq!(out.summary.skip_counts()["invalid_json"], 1);
    assert_eq!(out.summary.json_files, 3);
}

#[test]
fn batching_237_records_covers_each_once() {
    let tmp = TempDir::new().unwrap();
    write_array(&tmp.path().join("big.json"), 237);
    let out = run(tmp.path(), &plain_resources(), None);
    assert_eq!(out.records.len(), 237);

    let mut backend = RecordingBackend::default();
    let progress = RecordingProgress::default();
    let settings = IndexSettings::from_config(&Config::default());
    let report = submit_batches(
        out.records,
        &mut backend,
        &settings,
        &BatchingConfig::default(),
        &progress,
    )
    .unwrap();

    assert_eq!(report.batch_size, 24);
    assert_eq!(report.batches, 10);
    assert!(backend.batches.iter().all(|b| !b.is_empty() && b.len() <= 64));

    let all: Vec<&String> = backend.batches.iter().flatten().collect();
    assert_eq!(all.len(), 237);
    let unique: HashSet<&String> = all.iter().copied().collect();
    assert_eq!(unique.len(), 237);

    let percents = progress.percents.into_inner();
    assert_eq!(percents.len(), 10);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));
}

#[test]
fn submission_failure_names_the_batch() {
    let records: Vec<Record> = (0..100)
        .map(|i| Record::new(format!("r{}", i), Default::default()).identified(format!("{}", i)))
        .collect();
    let mut backend = RecordingBackend {
        fail_on_batch: Some(2),
        ..RecordingBackend::default()
    };
    let settings = IndexSettings::from_config(&Config::default());
    let err = submit_batches(
        records,
        &mut backend,
        &settings,
        &BatchingConfig::default(),
        &NoProgress,
    )
    .unwrap_err();

    match err {
        IngestError::Submission { offset, size, .. } => {
            assert_eq!(offset, 20);
            assert_eq!(size, 10);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(backend.batches.len(), 2);
}

#[test]
fn empty_data_dir_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let out = run(tmp.path(), &plain_resources(), None);
    assert!(out.records.is_empty());
    assert!(out.summary.skipped.is_empty());
}

#[test]
fn missing_data_dir_is_reported() {
    let tmp = TempDir::new().unwrap();
    let reader = FileReader::default();
    let resources = plain_resources();
    let pipeline = Pipeline {
        resources: &resources,
        rules: &[],
        reader: &reader,
    };
    let err = ingest(
        &tmp.path().join("absent"),
        &DiscoveryConfig::default(),
        &pipeline,
        &NoProgress,
    )
    .unwrap_err();
    assert!(matches!(err, IngestError::MissingDataDir(_)));
}

#[test]
fn canonical_line_is_prepended() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(
        data.join("ppv.json"),
        r#"[{"CodePPV": "12345", "Commune_nom": "Lyon"}, {"autre": "x"}]"#,
    )
    .unwrap();
    let schema = tmp.path().join("schemas.toml");
    fs::write(
        &schema,
        r#"
[[schemas.generic_record.mappings]]
source = "CodePPV"
target = "code_ppv"
label = "Code PPV"

[[schemas.generic_record.mappings]]
source = "(?i)^commune"
target = "commune"
label = "Commune"
regex = true
"#,
    )
    .unwrap();

    let out = run(&data, &plain_resources(), Some(&schema));
    assert_eq!(out.records.len(), 2);
    let first = &out.records[0];
    assert!(first
        .text()
        .starts_with("canon line: Code PPV: 12345 | Commune: Lyon\n[Source: ppv.json | JSON path: $[0]]"));
    assert_eq!(first.metadata()["canon_code_ppv"], "12345");
    assert_eq!(first.metadata()["canon_line"], "Code PPV: 12345 | Commune: Lyon");
    assert!(!out.records[1].metadata().contains_key("canon_line"));
    assert_eq!(out.summary.canonicalized, 1);
}

#[test]
fn rerun_yields_identical_addresses_and_ids() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("doc.json"),
        r#"{"stations": [{"nom": "A"}, {"nom": "B"}], "version": "2"}"#,
    )
    .unwrap();
    let first = run(tmp.path(), &plain_resources(), None);
    let second = run(tmp.path(), &plain_resources(), None);

    let addr = |out: &Ingested| -> Vec<(String, String)> {
        out.records
            .iter()
            .map(|r| {
                (
                    r.id().unwrap().to_string(),
                    r.json_path().unwrap().to_string(),
                )
            })
            .collect()
    };
    assert_eq!(addr(&first), addr(&second));
    let paths: Vec<String> = addr(&first).into_iter().map(|(_, p)| p).collect();
    assert_eq!(paths, vec!["$.stations[0]", "$.stations[1]", "$.version"]);
}

#[test]
fn normalization_uses_resource_files() {
    let tmp = TempDir::new().unwrap();
    let dict = tmp.path().join("abreviations.json");
    let rules = tmp.path().join("abreviations_regex.json");
    fs::write(
        &dict,
        r#"{"RES": "Réservoir", "STEP": "Station d'épuration"}"#,
    )
    .unwrap();
    fs::write(
        &rules,
        r#"[
  {"pattern": "\\bSaaS\\b", "replacement": "Software as a Service (SaaS)", "flags": ["I"]},
  {"pattern": "(?<!\\()\\bR\\b", "replacement": "Poste de relevage (R)", "flags": ["I"]}
]"#,
    )
    .unwrap();

    let loader = ResourceLoader::new(&dict, &rules);
    let resources = loader.resources();
    assert_eq!(resources.rules().len(), 2);

    let out = resources.expand_abbreviations("Le RES est plein, la STEP fonctionne.");
    assert!(out.contains("Réservoir (RES)"));
    assert!(out.contains("Station d'épuration (STEP)"));
    let saas = resources.expand_abbreviations("Solution en SaaS pour la supervision");
    assert!(saas.contains("Software as a Service (SaaS)"));
    let relevage = resources.expand_abbreviations("Pompe (R) et R nord");
    assert_eq!(relevage, "Pompe (R) et Poste de relevage (R) nord");
}

#[test]
fn store_run_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    write_array(&data.join("a.json"), 30);
    fs::write(data.join("notes.txt"), "Relevé du RES nord").unwrap();

    let mut config = Config::default();
    config.paths.persist_dir = tmp.path().join("store");
    let settings = IndexSettings::from_config(&config);

    for _ in 0..2 {
        let out = run(&data, &plain_resources(), None);
        let mut store = JsonlStore::open(&settings.persist_dir).unwrap();
        submit_batches(
            out.records,
            &mut store,
            &settings,
            &config.batching,
            &NoProgress,
        )
        .unwrap();
        assert_eq!(store.len(), 31);
    }
    assert_eq!(load_records(&settings.persist_dir).unwrap().len(), 31);
}
