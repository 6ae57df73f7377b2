//! Structured-data merge strategy (key-ordered JSON and YAML documents).
//!
//! A recursive key-wise merge with a documented bias: the generated spec is
//! the source of truth for *structure*, the user is the source of truth for
//! *values they customized*. Concretely:
//!
//! - keys present in base and candidate whose value the user changed keep
//!   the user's value (recursing when every side is a map);
//! - keys newly introduced by the candidate are always added;
//! - keys the candidate removed relative to the base are removed even if
//!   customized — structural removal reflects an upstream source-of-truth
//!   change;
//! - keys only the user added are retained, appended after candidate keys.
//!
//! Output follows the candidate's key order. JSON is re-emitted at the
//! indentation width detected from the working copy; YAML uses the
//! serializer's standard two-space indent. Documents that fail to parse
//! downgrade to the free-text strategy.

use std::path::Path;

use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use serde_yaml::{Mapping as YamlMapping, Value as YamlValue};
use tracing::debug;

use super::{text, MergeOutcome};

/// Concrete syntax of a structured-data document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataFormat {
    Json,
    Yaml,
}

impl DataFormat {
    fn from_path(rel_path: &str) -> Option<Self> {
        match Path::new(rel_path).extension()?.to_str()? {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Three-way merge of a key-ordered document.
pub fn merge(rel_path: &str, base: &str, working: &str, candidate: &str) -> MergeOutcome {
    let format = match DataFormat::from_path(rel_path) {
        Some(format) => format,
        None => return text::merge(base, working, candidate),
    };

    match format {
        DataFormat::Json => merge_json_docs(rel_path, base, working, candidate),
        DataFormat::Yaml => merge_yaml_docs(rel_path, base, working, candidate),
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn merge_json_docs(rel_path: &str, base: &str, working: &str, candidate: &str) -> MergeOutcome {
    let parsed: Option<(JsonValue, JsonValue, JsonValue)> = (|| {
        Some((
            serde_json::from_str(base).ok()?,
            serde_json::from_str(working).ok()?,
            serde_json::from_str(candidate).ok()?,
        ))
    })();

    let (base_val, work_val, cand_val) = match parsed {
        Some(values) => values,
        None => {
            debug!(path = rel_path, "structured document failed to parse, using free-text merge");
            return text::merge(base, working, candidate);
        }
    };

    let merged = merge_json(&base_val, &work_val, &cand_val);
    match to_json_string(&merged, detect_indent_width(working)) {
        Some(content) => MergeOutcome::clean(content),
        None => text::merge(base, working, candidate),
    }
}

fn merge_json(base: &JsonValue, working: &JsonValue, candidate: &JsonValue) -> JsonValue {
    match (base, working, candidate) {
        (JsonValue::Object(b), JsonValue::Object(w), JsonValue::Object(c)) => {
            let mut out = JsonMap::new();
            for (key, cand_val) in c {
                let merged = match (b.get(key), w.get(key)) {
                    (Some(base_val), Some(work_val)) => {
                        if work_val == base_val {
                            cand_val.clone()
                        } else {
                            merge_json(base_val, work_val, cand_val)
                        }
                    }
                    // User deleted the key; the candidate kept it. Deletion
                    // is a customization, so it wins.
                    (Some(_), None) => continue,
                    // Both sides introduced the key.
                    (None, Some(work_val)) => {
                        let empty = JsonValue::Object(JsonMap::new());
                        merge_json(&empty, work_val, cand_val)
                    }
                    // Newly introduced by the candidate.
                    (None, None) => cand_val.clone(),
                };
                out.insert(key.clone(), merged);
            }

            // Manual additions: keys in neither base nor candidate.
            for (key, work_val) in w {
                if !c.contains_key(key) && !b.contains_key(key) {
                    out.insert(key.clone(), work_val.clone());
                }
            }
            JsonValue::Object(out)
        }
        _ => {
            if working == base {
                candidate.clone()
            } else {
                working.clone()
            }
        }
    }
}

/// Serialize with the given indent width, trailing newline included.
fn to_json_string(value: &JsonValue, indent_width: usize) -> Option<String> {
    let indent = " ".repeat(indent_width);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser).ok()?;
    let mut out = String::from_utf8(buf).ok()?;
    out.push('\n');
    Some(out)
}

/// Indentation width of the first indented line, clamped to 1..=8.
///
/// Defaults to 2 for flat or single-line documents.
fn detect_indent_width(text: &str) -> usize {
    for line in text.lines() {
        let trimmed = line.trim_start_matches(' ');
        if !trimmed.is_empty() && trimmed.len() < line.len() {
            return (line.len() - trimmed.len()).clamp(1, 8);
        }
    }
    2
}

// ---------------------------------------------------------------------------
// YAML
// ---------------------------------------------------------------------------

fn merge_yaml_docs(rel_path: &str, base: &str, working: &str, candidate: &str) -> MergeOutcome {
    let parsed: Option<(YamlValue, YamlValue, YamlValue)> = (|| {
        Some((
            serde_yaml::from_str(base).ok()?,
            serde_yaml::from_str(working).ok()?,
            serde_yaml::from_str(candidate).ok()?,
        ))
    })();

    let (base_val, work_val, cand_val) = match parsed {
        Some(values) => values,
        None => {
            debug!(path = rel_path, "structured document failed to parse, using free-text merge");
            return text::merge(base, working, candidate);
        }
    };

    let merged = merge_yaml(&base_val, &work_val, &cand_val);
    match serde_yaml::to_string(&merged) {
        Ok(content) => MergeOutcome::clean(content),
        Err(_) => text::merge(base, working, candidate),
    }
}

fn merge_yaml(base: &YamlValue, working: &YamlValue, candidate: &YamlValue) -> YamlValue {
    match (base, working, candidate) {
        (YamlValue::Mapping(b), YamlValue::Mapping(w), YamlValue::Mapping(c)) => {
            let mut out = YamlMapping::new();
            for (key, cand_val) in c {
                let merged = match (b.get(key), w.get(key)) {
                    (Some(base_val), Some(work_val)) => {
                        if work_val == base_val {
                            cand_val.clone()
                        } else {
                            merge_yaml(base_val, work_val, cand_val)
                        }
                    }
                    (Some(_), None) => continue,
                    (None, Some(work_val)) => {
                        let empty = YamlValue::Mapping(YamlMapping::new());
                        merge_yaml(&empty, work_val, cand_val)
                    }
                    (None, None) => cand_val.clone(),
                };
                out.insert(key.clone(), merged);
            }

            for (key, work_val) in w {
                if !c.contains_key(key) && !b.contains_key(key) {
                    out.insert(key.clone(), work_val.clone());
                }
            }
            YamlValue::Mapping(out)
        }
        _ => {
            if working == base {
                candidate.clone()
            } else {
                working.clone()
            }
        }
    }
}
