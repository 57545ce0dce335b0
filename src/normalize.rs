//! Abbreviation expansion.
//!
//! Two passes run over every text:
//!
//! 1. **Dictionary**: each abbreviation (longest first) is matched as a
//!    whole word, case-insensitively, and rendered as
//!    `"{expansion} ({token as written})"`.
//! 2. **Regex rules**: an ordered list of `(pattern, replacement)` pairs
//!    applied after the dictionary. A rule marked `skip_parenthesized`
//!    leaves matches that sit directly inside `( … )` alone.
//!
//! Resources come from two JSON files and are loaded once by a
//! [`ResourceLoader`]. Load problems never fail a run: they degrade to an
//! empty dictionary and the built-in [`fallback_rules`]. A loader keeps
//! serving its first snapshot until [`ResourceLoader::reload`] is called.

use indexmap::IndexMap;
use regex::{Captures, Regex, RegexBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Characters inspected on each side of a dictionary match when looking
/// for an existing `(ABBR)` expansion.
const GUARD_RADIUS: usize = 5;

/// One compiled regex rule.
#[derive(Debug, Clone)]
pub struct RegexRule {
    pattern: Regex,
    replacement: String,
    skip_parenthesized: bool,
}

impl RegexRule {
    /// Compile a rule. `flags` accepts `"I"` (case-insensitive) and `"M"`
    /// (multi-line), in any case. `replacement` uses the regex crate's
    /// `${1}` syntax.
    ///
    /// A pattern wrapped in the guard `(?<!\()…(?!\))` has the guard
    /// stripped and compiles as a parenthesis-skipping rule; any other
    /// look-around is rejected by the regex engine.
    pub fn compile(
        pattern: &str,
        replacement: &str,
        flags: &[String],
    ) -> Result<Self, regex::Error> {
        let pattern = restore_word_boundaries(pattern);
        let (pattern, guarded) = strip_parenthesis_guard(&pattern);
        let mut builder = RegexBuilder::new(pattern);
        for flag in flags {
            match flag.to_ascii_uppercase().as_str() {
                "I" => {
                    builder.case_insensitive(true);
                }
                "M" => {
                    builder.multi_line(true);
                }
                _ => {}
            }
        }
        Ok(Self {
            pattern: builder.build()?,
            replacement: replacement.to_string(),
            skip_parenthesized: guarded,
        })
    }

    /// Leave matches preceded by `(` or followed by `)` untouched.
    pub fn skipping_parenthesized(mut self) -> Self {
        self.skip_parenthesized = true;
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &Captures<'_>| {
                let Some(m) = caps.get(0) else {
                    return String::new();
                };
                if self.skip_parenthesized && touches_parentheses(text, m.start(), m.end()) {
                    return m.as_str().to_string();
                }
                let mut dst = String::new();
                caps.expand(&self.replacement, &mut dst);
                dst
            })
            .into_owned()
    }
}

/// Built-in rules used when no rule file is available or none of its rules
/// compile.
pub fn fallback_rules() -> Vec<RegexRule> {
    let defs: [(&str, &str, &[&str], bool); 5] = [
        (r"\bSaaS\b", "Software as a Service (SaaS)", &["I"], false),
        (r"\bSt\.?\b", "Saint", &["I"], false),
        (r"\bSte\.?\b", "Sainte", &["I"], false),
        (
            r"^(\s*(?:[-\x{2022}]\s*)?)R(\s*(?:[:\-\x{2013}\x{2014}]\s+))",
            "${1}Poste de relevage (R)${2}",
            &["M"],
            false,
        ),
        (r"\bR\b", "Poste de relevage (R)", &["I"], true),
    ];
    defs.iter()
        .filter_map(|(pattern, replacement, flags, guarded)| {
            let flags: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
            let rule = RegexRule::compile(pattern, replacement, &flags).ok()?;
            Some(if *guarded { rule.skipping_parenthesized() } else { rule })
        })
        .collect()
}

struct DictEntry {
    expansion: String,
    pattern: Regex,
}

/// An immutable snapshot of the abbreviation dictionary and regex rules.
pub struct AbbreviationResources {
    entries: Vec<DictEntry>,
    rules: Vec<RegexRule>,
}

impl AbbreviationResources {
    /// Build resources from a dictionary (abbreviation → expansion) and an
    /// ordered rule list. Dictionary entries are tried longest first; ties
    /// keep their original order.
    pub fn new(dictionary: IndexMap<String, String>, rules: Vec<RegexRule>) -> Self {
        let mut pairs: Vec<(String, String)> = dictionary
            .into_iter()
            .filter(|(abbr, _)| !abbr.trim().is_empty())
            .collect();
        pairs.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));

        let entries = pairs
            .into_iter()
            .filter_map(|(abbr, expansion)| {
                let pattern = RegexBuilder::new(&format!(r"\b{}\b", regex::escape(&abbr)))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| tracing::warn!(abbreviation = %abbr, error = %e, "skipping abbreviation"))
                    .ok()?;
                Some(DictEntry { expansion, pattern })
            })
            .collect();

        Self { entries, rules }
    }

    /// Empty dictionary plus the built-in fallback rules.
    pub fn fallback() -> Self {
        Self::new(IndexMap::new(), fallback_rules())
    }

    pub fn dictionary_len(&self) -> usize {
        self.entries.len()
    }

    pub fn rules(&self) -> &[RegexRule] {
        &self.rules
    }

    /// Expand abbreviations in `text`. Empty input is returned unchanged.
    ///
    /// A dictionary match is left alone when a parenthesised copy of the
    /// same token already sits within a few characters of it, so
    /// `"Réservoir (RES)"` is not expanded a second time. The check only
    /// looks at a small window; overlapping abbreviations can still
    /// re-wrap, and running the function twice is not idempotent.
    pub fn expand_abbreviations(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut out = text.to_string();
        for entry in &self.entries {
            out = entry
                .pattern
                .replace_all(&out, |caps: &Captures<'_>| {
                    let Some(m) = caps.get(0) else {
                        return String::new();
                    };
                    let seen = m.as_str();
                    let around = window(&out, m.start(), m.end(), GUARD_RADIUS);
                    if contains_parenthesized(around, seen) {
                        return seen.to_string();
                    }
                    format!("{} ({})", entry.expansion, seen)
                })
                .into_owned();
        }

        for rule in &self.rules {
            out = rule.apply(&out);
        }
        out
    }
}

impl std::fmt::Debug for AbbreviationResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbbreviationResources")
            .field("dictionary", &self.entries.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Rule object as written in the rule file.
#[derive(Debug, Deserialize)]
struct RuleDef {
    pattern: Option<String>,
    #[serde(default)]
    replacement: String,
    #[serde(default)]
    flags: Option<Vec<String>>,
    #[serde(default)]
    skip_parenthesized: bool,
}

/// Loads abbreviation resources once and hands out shared snapshots.
pub struct ResourceLoader {
    dictionary_path: Option<PathBuf>,
    rules_path: Option<PathBuf>,
    cached: RwLock<Option<Arc<AbbreviationResources>>>,
}

impl ResourceLoader {
    pub fn new(dictionary_path: impl Into<PathBuf>, rules_path: impl Into<PathBuf>) -> Self {
        Self {
            dictionary_path: Some(dictionary_path.into()),
            rules_path: Some(rules_path.into()),
            cached: RwLock::new(None),
        }
    }

    /// A loader pre-seeded with `resources`. `reload` on such a loader
    /// falls back to the built-in defaults since it has no files.
    pub fn preloaded(resources: AbbreviationResources) -> Self {
        Self {
            dictionary_path: None,
            rules_path: None,
            cached: RwLock::new(Some(Arc::new(resources))),
        }
    }

    /// The cached snapshot, loading it on first use.
    pub fn resources(&self) -> Arc<AbbreviationResources> {
        if let Some(res) = self
            .cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Arc::clone(res);
        }

        let mut slot = self.cached.write().unwrap_or_else(|e| e.into_inner());
        // Another caller may have loaded while we waited for the write lock.
        if let Some(res) = slot.as_ref() {
            return Arc::clone(res);
        }
        let loaded = Arc::new(self.load());
        *slot = Some(Arc::clone(&loaded));
        loaded
    }

    /// Drop the cached snapshot and read the files again.
    pub fn reload(&self) -> Arc<AbbreviationResources> {
        let loaded = Arc::new(self.load());
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&loaded));
        loaded
    }

    fn load(&self) -> AbbreviationResources {
        let dictionary = self
            .dictionary_path
            .as_deref()
            .map(load_dictionary)
            .unwrap_or_default();
        let mut rules = self
            .rules_path
            .as_deref()
            .map(load_rules)
            .unwrap_or_default();
        if rules.is_empty() {
            tracing::debug!("no usable regex rules, using built-in fallback set");
            rules = fallback_rules();
        }
        tracing::info!(
            abbreviations = dictionary.len(),
            rules = rules.len(),
            "abbreviation resources loaded"
        );
        AbbreviationResources::new(dictionary, rules)
    }
}

fn load_dictionary(path: &Path) -> IndexMap<String, String> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "abbreviation dictionary not found");
        return IndexMap::new();
    }
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()));
    match parsed {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring abbreviation dictionary");
            IndexMap::new()
        }
    }
}

fn load_rules(path: &Path) -> Vec<RegexRule> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "regex rule file not found");
        return Vec::new();
    }
    let parsed: Result<Vec<RuleDef>, String> = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()));
    let defs = match parsed {
        Ok(defs) => defs,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring regex rule file");
            return Vec::new();
        }
    };

    let mut rules = Vec::with_capacity(defs.len());
    for def in defs {
        let Some(pattern) = def.pattern.filter(|p| !p.is_empty()) else {
            continue;
        };
        let replacement = translate_replacement(&def.replacement);
        let flags = def.flags.unwrap_or_default();
        match RegexRule::compile(&pattern, &replacement, &flags) {
            Ok(rule) if def.skip_parenthesized => rules.push(rule.skipping_parenthesized()),
            Ok(rule) => rules.push(rule),
            Err(e) => {
                tracing::warn!(pattern = %pattern.escape_debug(), error = %e, "skipping regex rule")
            }
        }
    }
    rules
}

/// JSON decodes `"\b"` to U+0008; in a pattern it was meant as `\b`.
fn restore_word_boundaries(pattern: &str) -> String {
    pattern.replace('\u{0008}', r"\b")
}

const GUARD_PREFIX: &str = r"(?<!\()";
const GUARD_SUFFIX: &str = r"(?!\))";

/// Split `(?<!\()` / `(?!\))` off a pattern. The flag is set when either
/// side was present.
fn strip_parenthesis_guard(pattern: &str) -> (&str, bool) {
    let mut inner = pattern;
    let mut guarded = false;
    if let Some(rest) = inner.strip_prefix(GUARD_PREFIX) {
        inner = rest;
        guarded = true;
    }
    if let Some(rest) = inner.strip_suffix(GUARD_SUFFIX) {
        inner = rest;
        guarded = true;
    }
    (inner, guarded)
}

/// Rewrite `\1` / `\g<name>` back-references into `${1}` / `${name}` and
/// escape literal `$`.
fn translate_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", group));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|&ch| ch != '>').collect();
                        out.push_str(&format!("${{{}}}", name));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                _ => out.push('\\'),
            },
            _ => out.push(c),
        }
    }
    out
}

/// Slice of `text` spanning `radius` characters on each side of
/// `start..end`.
fn window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let lo = text[..start]
        .char_indices()
        .rev()
        .take(radius)
        .last()
        .map_or(start, |(i, _)| i);
    let hi = text[end..]
        .char_indices()
        .nth(radius)
        .map_or(text.len(), |(i, _)| end + i);
    &text[lo..hi]
}

/// True if `haystack` contains `(token)`, allowing whitespace inside the
/// parentheses.
fn contains_parenthesized(haystack: &str, token: &str) -> bool {
    haystack.match_indices('(').any(|(i, _)| {
        let rest = haystack[i + 1..].trim_start();
        rest.strip_prefix(token)
            .map(|after| after.trim_start().starts_with(')'))
            .unwrap_or(false)
    })
}

/// True if the match is immediately preceded by `(` or followed by `)`.
fn touches_parentheses(text: &str, start: usize, end: usize) -> bool {
    text[..start].ends_with('(') || text[end..].starts_with(')')
}
