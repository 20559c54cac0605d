use rusqlite::Connection;
use serde_json::Value;

use crate::hierarchy::HierarchyStore;
use crate::ipc::error::HandlerErr;
use crate::model::{parse_date, NodeKey, NodeKind, Vocabulary};
use crate::repo;
use crate::selection::Selection;

pub fn conn(db: &Option<Connection>) -> Result<&Connection, HandlerErr> {
    db.as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Required, trimmed, non-empty string parameter.
pub fn str_param(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Err(HandlerErr::bad_params(format!("missing {key}")));
    };
    let s = v
        .as_str()
        .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be a string")))?
        .trim();
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{key} must not be empty")));
    }
    Ok(s.to_string())
}

/// Optional string parameter. Null and blank read as absent.
pub fn opt_str_param(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(HandlerErr::bad_params(format!("{key} must be a string"))),
    }
}

pub fn opt_bool_param(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{key} must be boolean"))),
    }
}

pub fn opt_date_param(
    params: &Value,
    key: &str,
) -> Result<Option<chrono::NaiveDate>, HandlerErr> {
    match opt_str_param(params, key)? {
        None => Ok(None),
        Some(raw) => parse_date(&raw).map(Some).ok_or_else(|| {
            HandlerErr::bad_params(format!("{key} must be YYYY-MM-DD"))
                .with_details(serde_json::json!({ "field": key, "value": raw }))
        }),
    }
}

/// Array of strings. `None` when the key is absent.
pub fn opt_string_array(params: &Value, key: &str) -> Result<Option<Vec<String>>, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let arr = v
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be an array")))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params(format!("{key} must contain strings")))?;
        out.push(s.to_string());
    }
    Ok(Some(out))
}

pub fn string_array(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    opt_string_array(params, key)?
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {key}")))
}

/// `{kind, id}` node address.
pub fn node_key_param(params: &Value) -> Result<NodeKey, HandlerErr> {
    let kind_raw = str_param(params, "kind")?;
    let kind = NodeKind::parse(&kind_raw).ok_or_else(|| {
        HandlerErr::bad_params("kind must be one of: program, folder, list, course")
            .with_details(serde_json::json!({ "kind": kind_raw }))
    })?;
    Ok(NodeKey::new(kind, str_param(params, "id")?))
}

pub fn load_store(
    conn: &Connection,
    program_id: Option<&str>,
) -> Result<HierarchyStore, HandlerErr> {
    repo::fetch_hierarchy(conn, program_id)
        .map(HierarchyStore::from_snapshot)
        .map_err(|e| HandlerErr::from_repo(e, "db_query_failed"))
}

/// Hierarchy as it stood before a create. Only loaded while something is selected.
pub fn store_before_change(
    selection: &Selection,
    conn: &Connection,
) -> Result<Option<HierarchyStore>, HandlerErr> {
    if selection.is_empty() {
        return Ok(None);
    }
    load_store(conn, None).map(Some)
}

// Created nodes under a fully checked ancestor join the selection.
pub fn include_new_nodes(
    selection: &mut Selection,
    conn: &Connection,
    before: Option<HierarchyStore>,
    created: &[NodeKey],
) -> Result<(), HandlerErr> {
    let Some(before) = before else {
        return Ok(());
    };
    let after = load_store(conn, None)?;
    for key in created {
        *selection = selection.child_added(&before, &after, key);
    }
    Ok(())
}

pub fn load_vocabulary(conn: &Connection) -> Result<Vocabulary, HandlerErr> {
    repo::load_vocabulary(conn).map_err(|e| HandlerErr::from_repo(e, "db_query_failed"))
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}
