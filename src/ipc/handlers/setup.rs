use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{Priority, VocabEntry, Vocabulary};
use crate::repo;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

const DEFAULT_IMPORT_MAX_ROWS: i64 = 5000;

#[derive(Clone, Copy)]
enum SetupSection {
    Vocabulary,
    Import,
    Export,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::Vocabulary, Self::Import, Self::Export];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "vocabulary" => Some(Self::Vocabulary),
            "import" => Some(Self::Import),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Vocabulary => "vocabulary",
            Self::Import => "import",
            Self::Export => "export",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Vocabulary => repo::VOCABULARY_KEY,
            Self::Import => "setup.import",
            Self::Export => "setup.export",
        }
    }
}

fn entries_json(entries: &[VocabEntry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|e| json!({ "value": e.value, "label": e.label }))
            .collect(),
    )
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Vocabulary => {
            let v = Vocabulary::default();
            json!({
                "statuses": entries_json(&v.statuses),
                "priorities": entries_json(&v.priorities),
                "defaultStatus": v.default_status
            })
        }
        SetupSection::Import => json!({
            "createMissingByDefault": false,
            "maxRows": DEFAULT_IMPORT_MAX_ROWS
        }),
        SetupSection::Export => json!({
            "includeHeaderAsterisks": false
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

// [{value, label}] with unique values and unique (case-insensitive) labels.
// A missing label reuses the value.
fn parse_vocab_entries(
    v: &Value,
    key: &str,
    max_entries: usize,
) -> Result<Vec<VocabEntry>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array", key))?;
    if arr.is_empty() || arr.len() > max_entries {
        return Err(format!("{} must have 1..={} entries", key, max_entries));
    }
    let mut values = HashSet::new();
    let mut labels = HashSet::new();
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let value = item
            .get("value")
            .ok_or_else(|| format!("{} entries need a value", key))
            .and_then(|v| parse_string_max(v, "value", 40))?;
        if value.is_empty() {
            return Err(format!("{} values must not be empty", key));
        }
        let label = match item.get("label") {
            Some(l) => parse_string_max(l, "label", 80)?,
            None => value.clone(),
        };
        let label = if label.is_empty() { value.clone() } else { label };
        if !values.insert(value.clone()) {
            return Err(format!("{} has duplicate value {:?}", key, value));
        }
        if !labels.insert(label.to_lowercase()) {
            return Err(format!("{} has duplicate label {:?}", key, label));
        }
        out.push(VocabEntry { value, label });
    }
    Ok(out)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Vocabulary => match k.as_str() {
                "statuses" => {
                    let entries = parse_vocab_entries(v, k, 40)?;
                    obj.insert(k.clone(), entries_json(&entries));
                }
                "priorities" => {
                    let mut entries = parse_vocab_entries(v, k, Priority::ALL.len())?;
                    for e in &mut entries {
                        let p = Priority::parse(&e.value).ok_or_else(|| {
                            "priorities values must be one of: low, medium, high, critical"
                                .to_string()
                        })?;
                        e.value = p.as_str().to_string();
                    }
                    obj.insert(k.clone(), entries_json(&entries));
                }
                "defaultStatus" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 40)?));
                }
                _ => return Err(format!("unknown vocabulary field: {}", k)),
            },
            SetupSection::Import => match k.as_str() {
                "createMissingByDefault" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "maxRows" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50_000)?));
                }
                _ => return Err(format!("unknown import field: {}", k)),
            },
            SetupSection::Export => match k.as_str() {
                "includeHeaderAsterisks" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown export field: {}", k)),
            },
        }
    }

    if let SetupSection::Vocabulary = section {
        let default_status = obj
            .get("defaultStatus")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let known = obj
            .get("statuses")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .any(|e| e.get("value").and_then(|v| v.as_str()) == Some(default_status))
            })
            .unwrap_or(false);
        if !known {
            return Err("defaultStatus must be one of the status values".into());
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults instead of failing.
            let mut merged = current.clone();
            if merge_section_patch(section, &mut merged, saved_obj).is_ok() {
                current = merged;
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy)]
pub struct ImportSettings {
    pub create_missing_by_default: bool,
    pub max_rows: usize,
}

pub fn import_settings(conn: &rusqlite::Connection) -> anyhow::Result<ImportSettings> {
    let v = load_section(conn, SetupSection::Import)?;
    Ok(ImportSettings {
        create_missing_by_default: v["createMissingByDefault"].as_bool().unwrap_or(false),
        max_rows: v["maxRows"]
            .as_i64()
            .unwrap_or(DEFAULT_IMPORT_MAX_ROWS)
            .max(1) as usize,
    })
}

pub fn include_header_asterisks(conn: &rusqlite::Connection) -> anyhow::Result<bool> {
    let v = load_section(conn, SetupSection::Export)?;
    Ok(v["includeHeaderAsterisks"].as_bool().unwrap_or(false))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(
            &req.id,
            "bad_params",
            "unknown section",
            Some(json!({ "section": section_raw })),
        );
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup updated");
    let mut result = json!({ "ok": true });
    result[section.name()] = current;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn vocabulary_patch_keeps_default_status_consistent() {
        let mut current = default_section(SetupSection::Vocabulary);
        let res = merge_section_patch(
            SetupSection::Vocabulary,
            &mut current,
            &patch(json!({ "statuses": [{ "value": "draft", "label": "Draft" }] })),
        );
        assert!(res.is_err());

        let mut current = default_section(SetupSection::Vocabulary);
        merge_section_patch(
            SetupSection::Vocabulary,
            &mut current,
            &patch(json!({
                "statuses": [{ "value": "draft", "label": "Draft" }, { "value": "live" }],
                "defaultStatus": "draft"
            })),
        )
        .expect("valid patch");
        let vocab: Vocabulary = serde_json::from_value(current).expect("vocabulary shape");
        assert_eq!(vocab.default_status, "draft");
        assert_eq!(vocab.status_label("live"), "live");
    }

    #[test]
    fn priorities_must_come_from_the_fixed_set() {
        let mut current = default_section(SetupSection::Vocabulary);
        let res = merge_section_patch(
            SetupSection::Vocabulary,
            &mut current,
            &patch(json!({ "priorities": [{ "value": "urgent", "label": "Urgent" }] })),
        );
        assert!(res.is_err());

        merge_section_patch(
            SetupSection::Vocabulary,
            &mut current,
            &patch(json!({ "priorities": [{ "value": "HIGH", "label": "P1" }] })),
        )
        .expect("valid patch");
        let vocab: Vocabulary = serde_json::from_value(current).expect("vocabulary shape");
        assert_eq!(vocab.priority_label(Priority::High), "P1");
        assert_eq!(vocab.priority_label(Priority::Low), "low");
    }

    #[test]
    fn import_limits_are_validated() {
        let mut current = default_section(SetupSection::Import);
        assert!(merge_section_patch(
            SetupSection::Import,
            &mut current,
            &patch(json!({ "maxRows": 0 }))
        )
        .is_err());
        assert!(merge_section_patch(
            SetupSection::Import,
            &mut current,
            &patch(json!({ "bogus": true }))
        )
        .is_err());
    }
}
