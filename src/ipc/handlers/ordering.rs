use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{conn, load_store, str_param, string_array, to_json};
use crate::ipc::types::{AppState, Request};
use crate::model::NodeKey;
use crate::ordering::{self, Direction, OrderingError, ReorderCommand};
use crate::repo;
use rusqlite::Connection;
use serde_json::{json, Value};

fn ordering_err(e: OrderingError) -> HandlerErr {
    HandlerErr::new(e.code(), e.to_string())
}

fn persist(conn: &Connection, command: &ReorderCommand) -> Result<Value, HandlerErr> {
    repo::reorder_siblings(conn, command)
        .map_err(|e| HandlerErr::from_repo(e, "db_update_failed"))?;
    tracing::info!(
        parent = %command.parent,
        order = ?command.ordered_ids(),
        "siblings reordered"
    );
    to_json(&command.entries)
}

/// Swaps a folder or list with its neighbour. Hitting either end is not an
/// error: the response carries `moved: false`.
fn handle_move(state: &mut AppState, req: &Request, key: NodeKey) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let raw = str_param(&req.params, "direction")?;
    let direction = Direction::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("direction must be one of: up, down"))?;

    let store = load_store(conn, None)?;
    let (parent, siblings) = ordering::siblings_of(&store, &key).map_err(ordering_err)?;
    match ordering::move_sibling(&parent, &siblings, &key.id, direction) {
        Ok(command) => {
            let order = persist(conn, &command)?;
            Ok(json!({ "moved": true, "parent": to_json(&parent)?, "order": order }))
        }
        Err(e @ OrderingError::BoundaryReached { .. }) => {
            tracing::debug!(node = %key, direction = direction.as_str(), "move at boundary");
            Ok(json!({ "moved": false, "reason": e.code(), "message": e.to_string() }))
        }
        Err(e) => Err(ordering_err(e)),
    }
}

fn handle_reorder(
    state: &mut AppState,
    req: &Request,
    parent: NodeKey,
    ids_key: &str,
) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let ordered = string_array(&req.params, ids_key)?;
    let store = load_store(conn, None)?;
    let siblings = ordering::children_of(&store, &parent).map_err(ordering_err)?;
    let command = ordering::reorder_to(&parent, &siblings, &ordered).map_err(|e| {
        let code = e.code();
        HandlerErr::new(code, e.to_string()).with_details(json!({ "parent": parent.to_string() }))
    })?;
    let order = persist(conn, &command)?;
    Ok(json!({ "order": order }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "folders.move" => {
            str_param(p, "folderId").and_then(|id| handle_move(state, req, NodeKey::folder(id)))
        }
        "lists.move" => {
            str_param(p, "listId").and_then(|id| handle_move(state, req, NodeKey::list(id)))
        }
        "folders.reorder" => str_param(p, "programId").and_then(|id| {
            handle_reorder(state, req, NodeKey::program(id), "orderedFolderIds")
        }),
        "lists.reorder" => str_param(p, "folderId").and_then(|id| {
            handle_reorder(state, req, NodeKey::folder(id), "orderedListIds")
        }),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
