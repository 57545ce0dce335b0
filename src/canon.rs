//! Schema-driven canonicalization of source fields.
//!
//! A [`MappingRule`] names one canonical target and says which source key
//! feeds it, either by exact name or by the first key whose name matches a
//! regex. Rules are plain data loaded from a TOML schema file:
//!
//! ```toml
//! [[schemas.generic_record.mappings]]
//! source = "CodePPV"
//! target = "code_ppv"
//! label = "Code PPV"
//! regex = false
//! ```
//!
//! Applying the rules yields `canon_{target}` metadata and a
//! `"{label}: {value}"` fragment per hit; [`canonicalize`] joins the
//! fragments into the `canon line` prepended to a record's text.

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

use crate::json_extract::render_value;
use crate::models::{Metadata, Record, CANON_LINE_KEY, CANON_PREFIX};

/// How a rule finds its source key.
#[derive(Debug, Clone)]
pub enum KeyMatcher {
    Exact(String),
    Pattern(Regex),
}

impl KeyMatcher {
    fn find<'a>(&self, fields: &'a Map<String, Value>) -> Option<&'a Value> {
        match self {
            KeyMatcher::Exact(key) => fields.get(key),
            KeyMatcher::Pattern(re) => fields
                .iter()
                .find(|(key, _)| re.is_match(key))
                .map(|(_, value)| value),
        }
    }
}

/// One compiled field-mapping rule.
#[derive(Debug, Clone)]
pub struct MappingRule {
    matcher: KeyMatcher,
    target: String,
    label: String,
}

impl MappingRule {
    pub fn exact(source: &str, target: &str, label: &str) -> Self {
        Self {
            matcher: KeyMatcher::Exact(source.to_string()),
            target: target.to_string(),
            label: label.to_string(),
        }
    }

    pub fn pattern(source: &str, target: &str, label: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            matcher: KeyMatcher::Pattern(Regex::new(source)?),
            target: target.to_string(),
            label: label.to_string(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Rule as written in the schema file.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingRuleDef {
    pub source: Option<String>,
    pub target: Option<String>,
    pub label: Option<String>,
    #[serde(default)]
    pub regex: bool,
}

impl MappingRuleDef {
    /// Compile the rule. Rules without a source or target, or with a
    /// source pattern that does not compile, are dropped with a warning.
    pub fn compile(&self) -> Option<MappingRule> {
        let (Some(source), Some(target)) = (
            self.source.as_deref().filter(|s| !s.is_empty()),
            self.target.as_deref().filter(|t| !t.is_empty()),
        ) else {
            tracing::warn!(rule = ?self, "mapping rule needs both source and target");
            return None;
        };
        let label = self.label.as_deref().unwrap_or(target);

        if !self.regex {
            return Some(MappingRule::exact(source, target, label));
        }
        match MappingRule::pattern(source, target, label) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!(source, error = %e, "mapping rule pattern does not compile");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct SchemaFile {
    #[serde(default)]
    schemas: IndexMap<String, SchemaDef>,
}

#[derive(Debug, Deserialize, Default)]
struct SchemaDef {
    #[serde(default)]
    mappings: Vec<MappingRuleDef>,
}

/// Load the rules of the named schemas, in the order given.
///
/// A missing or malformed schema file yields no rules, which turns
/// canonicalization into a no-op.
pub fn load_schema_rules(path: &Path, schema_names: &[String]) -> Vec<MappingRule> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "schema file not found, canonicalization disabled");
        return Vec::new();
    }
    let parsed: Result<SchemaFile, String> = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|raw| toml::from_str(&raw).map_err(|e| e.to_string()));
    let file = match parsed {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring schema file");
            return Vec::new();
        }
    };

    let rules: Vec<MappingRule> = schema_names
        .iter()
        .filter_map(|name| file.schemas.get(name))
        .flat_map(|schema| schema.mappings.iter().filter_map(MappingRuleDef::compile))
        .collect();
    tracing::info!(path = %path.display(), rules = rules.len(), "mapping rules loaded");
    rules
}

/// Output of [`apply_mappings`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CanonicalMapping {
    /// `canon_{target}` → rendered value.
    pub metadata: Metadata,
    /// `"{label}: {value}"`, in rule order.
    pub fragments: Vec<String>,
}

impl CanonicalMapping {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragments joined with `" | "`, or `None` when no rule matched.
    pub fn joined(&self) -> Option<String> {
        if self.fragments.is_empty() {
            None
        } else {
            Some(self.fragments.join(" | "))
        }
    }
}

/// Evaluate every rule against `fields`.
///
/// A key that is present with a falsy value (`""`, `0`, `false`) still
/// maps; a missing key or a JSON `null` leaves the target out.
pub fn apply_mappings(fields: &Map<String, Value>, rules: &[MappingRule]) -> CanonicalMapping {
    let mut mapping = CanonicalMapping::default();
    for rule in rules {
        let Some(value) = rule.matcher.find(fields).filter(|v| !v.is_null()) else {
            continue;
        };
        let rendered = render_value(value);
        mapping
            .metadata
            .insert(format!("{}{}", CANON_PREFIX, rule.target), rendered.clone());
        mapping.fragments.push(format!("{}: {}", rule.label, rendered));
    }
    mapping
}

/// A new record with canonical metadata added and, when at least one rule
/// matched, a `canon line: …` summary prepended to its text.
///
/// Source fields are the record's non-reserved metadata, so canonical keys
/// never feed back into the mapping.
pub fn canonicalize(record: &Record, rules: &[MappingRule]) -> Record {
    if rules.is_empty() {
        return record.clone();
    }
    let mapping = apply_mappings(&record.source_fields(), rules);
    let Some(line) = mapping.joined() else {
        return record.clone();
    };

    let mut metadata = record.metadata().clone();
    metadata.extend(mapping.metadata);
    metadata.insert(CANON_LINE_KEY.to_string(), line.clone());
    let text = format!("canon line: {}\n{}", line, record.text());
    record.with_metadata(text, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn exact_rule_maps_value_and_fragment() {
        let rules = vec![MappingRule::exact("CodePPV", "code_ppv", "Code PPV")];
        let out = apply_mappings(&fields(json!({"CodePPV": "12345"})), &rules);
        assert_eq!(out.metadata["canon_code_ppv"], "12345");
        assert_eq!(out.fragments, vec!["Code PPV: 12345"]);
    }

    #[test]
    fn false_value_still_maps() {
        let rules = vec![MappingRule::exact("actif", "actif", "Actif")];
        let out = apply_mappings(&fields(json!({"actif": false})), &rules);
        assert_eq!(out.metadata["canon_actif"], "False");
        assert_eq!(out.fragments, vec!["Actif: False"]);
    }

    #[test]
    fn regex_rule_takes_first_matching_key() {
        let rules = vec![MappingRule::pattern("(?i)^commune", "commune", "Commune").unwrap()];
        let out = apply_mappings(
            &fields(json!({"id": 1, "Commune_INSEE": "69123", "commune_nom": "Lyon"})),
            &rules,
        );
        assert_eq!(out.metadata["canon_commune"], "69123");
    }

    #[test]
    fn missing_and_null_values_are_absent() {
        let rules = vec![
            MappingRule::exact("a", "a", "A"),
            MappingRule::exact("b", "b", "B"),
            MappingRule::exact("c", "c", "C"),
        ];
        let out = apply_mappings(&fields(json!({"b": null, "c": ""})), &rules);
        assert!(!out.metadata.contains_key("canon_a"));
        assert!(!out.metadata.contains_key("canon_b"));
        assert_eq!(out.metadata["canon_c"], "");
        assert_eq!(out.fragments, vec!["C: "]);
    }

    #[test]
    fn fragments_follow_rule_order() {
        let rules = vec![
            MappingRule::exact("z", "z", "Zed"),
            MappingRule::exact("a", "a", "Ay"),
        ];
        let out = apply_mappings(&fields(json!({"a": 1, "z": [1, 2]})), &rules);
        assert_eq!(out.joined().as_deref(), Some("Zed: 1, 2 | Ay: 1"));
    }

    #[test]
    fn canonicalize_prepends_line_and_ignores_reserved_keys() {
        let mut meta = Metadata::new();
        meta.insert("file_path".into(), "f.json".into());
        meta.insert("canon_code_ppv".into(), "stale".into());
        meta.insert("CodePPV".into(), "12345".into());
        let record = Record::new("CodePPV: 12345", meta);
        let rules = vec![
            MappingRule::exact("CodePPV", "code_ppv", "Code PPV"),
            MappingRule::pattern("^canon_", "loop", "Loop").unwrap(),
        ];
        let out = canonicalize(&record, &rules);
        assert_eq!(out.text(), "canon line: Code PPV: 12345\nCodePPV: 12345");
        assert_eq!(out.metadata()["canon_code_ppv"], "12345");
        assert_eq!(out.metadata()["canon_line"], "Code PPV: 12345");
        assert!(!out.metadata().contains_key("canon_loop"));
        assert_eq!(record.text(), "CodePPV: 12345");
    }

    #[test]
    fn no_match_leaves_record_unchanged() {
        let record = Record::new("x", Metadata::new());
        let rules = vec![MappingRule::exact("CodePPV", "code_ppv", "Code PPV")];
        assert_eq!(canonicalize(&record, &rules), record);
    }

    #[test]
    fn schema_file_selects_named_schemas() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("schemas.toml");
        std::fs::write(
            &path,
            r#"
[[schemas.generic_record.mappings]]
source = "CodePPV"
target = "code_ppv"
label = "Code PPV"

[[schemas.generic_record.mappings]]
source = "^(?i)nom"
target = "nom"
regex = true

[[schemas.generic_record.mappings]]
source = "("
target = "broken"
regex = true

[[schemas.generic_record.mappings]]
target = "no_source"

[[schemas.other.mappings]]
source = "X"
target = "x"
"#,
        )
        .unwrap();
        let rules = load_schema_rules(&path, &["generic_record".to_string()]);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].label(), "Code PPV");
        assert_eq!(rules[1].label(), "nom");
        assert!(load_schema_rules(&dir.path().join("absent.toml"), &["generic_record".into()])
            .is_empty());
    }
}
