use crate::hierarchy::HierarchyStore;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, load_store, node_key_param, opt_bool_param, opt_str_param, to_json};
use crate::ipc::types::{AppState, Request};
use crate::selection::{Granularity, Selection, SelectionError};
use serde_json::{json, Value};

fn selection_err(e: SelectionError) -> HandlerErr {
    HandlerErr::new(e.code(), e.to_string())
}

fn summary(selection: &Selection, store: &HierarchyStore) -> Result<Value, HandlerErr> {
    Ok(json!({
        "granularity": to_json(&selection.granularity())?,
        "selected": to_json(selection.selected())?,
        "selectedCourses": selection.selected_courses(store),
    }))
}

fn handle_selection_get(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let store = load_store(conn, None)?;
    state.selection = state.selection.prune(&store);
    let mut result = summary(&state.selection, &store)?;
    result["states"] = to_json(&state.selection.states(&store))?;
    Ok(result)
}

/// Flips one node, or forces it with `selected: true|false`.
fn handle_selection_toggle(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let key = node_key_param(&req.params)?;
    let store = load_store(conn, None)?;
    let current = state.selection.prune(&store);

    let next = match opt_bool_param(&req.params, "selected")? {
        Some(target) => current.set(&store, &key, target),
        None => current.toggle(&store, &key),
    }
    .map_err(selection_err)?;

    let state_now = next.compute_state(&store, &key).map_err(selection_err)?;
    let affected = next.affected_states(&store, &key).map_err(selection_err)?;
    tracing::debug!(node = %key, selected = next.selected().len(), "selection changed");

    let mut result = summary(&next, &store)?;
    result["state"] = to_json(&state_now)?;
    result["affected"] = to_json(&affected)?;
    state.selection = next;
    Ok(result)
}

fn handle_selection_reset(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let granularity = match opt_str_param(&req.params, "granularity")? {
        Some(raw) => Granularity::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("granularity must be one of: course, list"))?,
        None => state.selection.granularity(),
    };
    state.selection = Selection::new(granularity);
    Ok(json!({ "granularity": to_json(&granularity)?, "selected": [] }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "selection.get" => handle_selection_get(state, req),
        "selection.toggle" => handle_selection_toggle(state, req),
        "selection.reset" => handle_selection_reset(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
