use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    conn, include_new_nodes, load_store, load_vocabulary, opt_bool_param, opt_str_param,
    opt_string_array, store_before_change, str_param, to_json,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Course, NodeKey};
use crate::reconcile::{self, Row, COLUMNS};
use crate::repo;
use crate::selection::Selection;
use rusqlite::Connection;
use serde_json::{json, Value};

/// Rows for the requested scope: explicit `courseIds`, the current selection
/// (`useSelection`), or every course (optionally within `programId`).
fn export_rows(
    conn: &Connection,
    selection: &Selection,
    params: &Value,
) -> Result<Vec<Row>, HandlerErr> {
    let program_id = opt_str_param(params, "programId")?;
    let store = load_store(conn, program_id.as_deref())?;
    let vocabulary = load_vocabulary(conn)?;

    let courses: Vec<Course> = match opt_string_array(params, "courseIds")? {
        Some(ids) => {
            let mut out = Vec::with_capacity(ids.len());
            for id in &ids {
                let course = store.course(id).ok_or_else(|| {
                    HandlerErr::new("not_found", "course not found")
                        .with_details(json!({ "courseId": id }))
                })?;
                out.push(course.clone());
            }
            out
        }
        None if opt_bool_param(params, "useSelection")?.unwrap_or(false) => selection
            .prune(&store)
            .selected_courses(&store)
            .iter()
            .filter_map(|id| store.course(id).cloned())
            .collect(),
        None => store.snapshot().courses.clone(),
    };
    Ok(reconcile::to_rows(&courses, &store, &vocabulary))
}

fn handle_export_rows(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let rows = export_rows(conn, &state.selection, &req.params)?;
    Ok(json!({ "columns": COLUMNS, "rows": to_json(&rows)? }))
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let out_path = str_param(&req.params, "outPath")?;
    let rows = export_rows(conn, &state.selection, &req.params)?;
    let mark_required = setup::include_header_asterisks(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let csv = reconcile::rows_to_csv(&rows, mark_required);
    std::fs::write(&out_path, csv).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })?;
    tracing::info!(path = %out_path, rows = rows.len(), "courses exported");
    Ok(json!({ "path": out_path, "rowsExported": rows.len() }))
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Import rows from `inPath` (CSV file), `csvText`, or a `rows` array of objects.
fn import_rows(params: &Value) -> Result<Vec<Row>, HandlerErr> {
    if let Some(path) = opt_str_param(params, "inPath")? {
        let text = std::fs::read_to_string(&path).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": path }))
        })?;
        return Ok(reconcile::rows_from_csv(&text));
    }
    if let Some(text) = opt_str_param(params, "csvText")? {
        return Ok(reconcile::rows_from_csv(&text));
    }
    let Some(arr) = params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("provide one of: inPath, csvText, rows[]"));
    };
    let mut rows = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let obj = item.as_object().ok_or_else(|| {
            HandlerErr::bad_params(format!("row at index {} must be an object", i))
        })?;
        rows.push(obj.iter().map(|(k, v)| (k.clone(), cell_text(v))).collect());
    }
    Ok(rows)
}

fn plan_import(
    conn: &Connection,
    params: &Value,
) -> Result<(reconcile::ImportPlan, setup::ImportSettings), HandlerErr> {
    let settings = setup::import_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = import_rows(params)?;
    if rows.len() > settings.max_rows {
        return Err(HandlerErr::bad_params(format!(
            "import exceeds max rows: {} > {}",
            rows.len(),
            settings.max_rows
        ))
        .with_details(json!({ "rows": rows.len(), "maxRows": settings.max_rows })));
    }
    let store = load_store(conn, None)?;
    let vocabulary = load_vocabulary(conn)?;
    Ok((reconcile::from_rows(&rows, &store, &vocabulary), settings))
}

fn handle_import_preview(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let (plan, _) = plan_import(conn, &req.params)?;
    let mut result = to_json(&plan)?;
    result["resolved"] = json!(plan.resolved_count());
    Ok(result)
}

fn handle_import_apply(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let (plan, settings) = plan_import(conn, &req.params)?;
    let create_missing = opt_bool_param(&req.params, "createMissing")?
        .unwrap_or(settings.create_missing_by_default);
    let vocabulary = load_vocabulary(conn)?;
    let before = store_before_change(&state.selection, conn)?;

    let report = repo::apply_import_plan(conn, &plan, &vocabulary, create_missing);
    let created: Vec<NodeKey> = report
        .created_nodes
        .iter()
        .cloned()
        .chain(report.course_ids.iter().map(|id| NodeKey::course(id.as_str())))
        .collect();
    include_new_nodes(&mut state.selection, conn, before, &created)?;
    for e in plan.errors.iter().chain(report.errors.iter()) {
        tracing::warn!(row = e.row, code = e.code, message = %e.message, "import row rejected");
    }
    tracing::info!(
        rows = plan.rows_total,
        created = report.created,
        rejected = report.rejected + plan.errors.len(),
        skipped = plan.skipped,
        create_missing,
        "import applied"
    );

    let mut errors = plan.errors.clone();
    errors.extend(report.errors.iter().cloned());
    errors.sort_by_key(|e| e.row);
    Ok(json!({
        "rowsTotal": plan.rows_total,
        "skipped": plan.skipped,
        "created": report.created,
        "rejected": errors.len(),
        "courseIds": report.course_ids,
        "createdNodes": to_json(&report.created_nodes)?,
        "errors": to_json(&errors)?,
        "warnings": to_json(&report.warnings)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "export.rows" => handle_export_rows(state, req),
        "export.csv" => handle_export_csv(state, req),
        "import.preview" => handle_import_preview(state, req),
        "import.apply" => handle_import_apply(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
