use crate::bulk::{self, BulkOperationRequest, BulkParams, CourseMutation, ValidationError};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, load_store, load_vocabulary, opt_string_array, str_param, to_json};
use crate::ipc::types::{AppState, Request};
use crate::repo;
use rusqlite::Connection;
use serde_json::{json, Value};

const BULK_MAX_TARGETS: usize = 5000;

fn validation_err(e: ValidationError) -> HandlerErr {
    HandlerErr::new(e.code(), e.to_string())
}

/// Validates the request and returns the mutations it would apply.
///
/// Targets come from `courseIds` when given, else from the current selection.
fn plan(
    conn: &Connection,
    selection: &crate::selection::Selection,
    req: &Request,
) -> Result<(BulkOperationRequest, Vec<CourseMutation>), HandlerErr> {
    let kind = str_param(&req.params, "kind")?;
    let params: BulkParams = match req.params.get("params") {
        None | Some(Value::Null) => BulkParams::default(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::bad_params(format!("invalid params: {e}")))?,
    };

    let store = load_store(conn, None)?;
    let course_ids = match opt_string_array(&req.params, "courseIds")? {
        Some(ids) => ids,
        None => selection.prune(&store).selected_courses(&store),
    };
    if course_ids.len() > BULK_MAX_TARGETS {
        return Err(HandlerErr::bad_params(format!(
            "bulk target count exceeds max: {} > {}",
            course_ids.len(),
            BULK_MAX_TARGETS
        )));
    }

    let request = BulkOperationRequest::new(&kind, course_ids, params).map_err(validation_err)?;
    let vocabulary = load_vocabulary(conn)?;
    let mutations = bulk::execute(&request, &store.snapshot().courses, &vocabulary)
        .map_err(validation_err)?;
    Ok((request, mutations))
}

fn handle_bulk_preview(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let (request, mutations) = plan(conn, &state.selection, req)?;
    Ok(json!({
        "kind": request.kind.as_str(),
        "count": mutations.len(),
        "mutations": to_json(&mutations)?,
    }))
}

fn handle_bulk_execute(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let (request, mutations) = plan(conn, &state.selection, req)?;
    let report = repo::apply_mutations(conn, &mutations);
    for failure in &report.errors {
        tracing::warn!(
            course_id = %failure.course_id,
            code = failure.code,
            message = %failure.message,
            "bulk mutation rejected"
        );
    }
    tracing::info!(
        kind = request.kind.as_str(),
        updated = report.updated,
        rejected = report.rejected,
        "bulk operation applied"
    );
    Ok(json!({
        "kind": request.kind.as_str(),
        "updated": report.updated,
        "rejected": report.rejected,
        "errors": to_json(&report.errors)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "bulk.preview" => handle_bulk_preview(state, req),
        "bulk.execute" => handle_bulk_execute(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
