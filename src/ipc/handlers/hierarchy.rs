use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    conn, include_new_nodes, load_store, load_vocabulary, opt_date_param, opt_str_param,
    opt_string_array, store_before_change, str_param, to_json,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Course, NodeKey, Priority, ProgramStatus, ProgramType, Vocabulary};
use crate::repo;
use serde_json::{json, Value};

fn handle_hierarchy_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let program_id = opt_str_param(&req.params, "programId")?;
    let store = load_store(conn, program_id.as_deref())?;
    if let Some(pid) = program_id.as_deref() {
        if store.program(pid).is_none() {
            return Err(HandlerErr::new("not_found", "program not found"));
        }
    }
    let detached: Vec<&NodeKey> = store.detached().iter().map(|n| store.key(*n)).collect();
    Ok(json!({
        "programs": to_json(&store.snapshot().programs)?,
        "folders": to_json(&store.snapshot().folders)?,
        "lists": to_json(&store.snapshot().lists)?,
        "courses": to_json(&store.snapshot().courses)?,
        "tree": to_json(&store.outline())?,
        "detached": to_json(&detached)?,
        "positionViolations": to_json(&store.position_violations())?,
    }))
}

fn parse_program_type(params: &Value) -> Result<Option<ProgramType>, HandlerErr> {
    opt_str_param(params, "type")?
        .map(|raw| {
            ProgramType::parse(&raw).ok_or_else(|| {
                HandlerErr::bad_params("type must be one of: program, department")
            })
        })
        .transpose()
}

fn parse_program_status(params: &Value) -> Result<Option<ProgramStatus>, HandlerErr> {
    opt_str_param(params, "status")?
        .map(|raw| {
            ProgramStatus::parse(&raw).ok_or_else(|| {
                HandlerErr::bad_params("status must be one of: active, inactive, archived")
            })
        })
        .transpose()
}

fn handle_programs_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let name = str_param(&req.params, "name")?;
    let program_type = parse_program_type(&req.params)?.unwrap_or_default();
    let status = parse_program_status(&req.params)?.unwrap_or_default();
    let description = opt_str_param(&req.params, "description")?;

    let program = repo::create_program(conn, &name, program_type, status, description.as_deref())
        .map_err(|e| HandlerErr::from_repo(e, "db_insert_failed"))?;
    tracing::info!(program_id = %program.id, name = %program.name, "program created");
    Ok(json!({ "program": to_json(&program)? }))
}

fn handle_programs_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let program_id = str_param(&req.params, "programId")?;
    let store = load_store(conn, Some(program_id.as_str()))?;
    let Some(mut program) = store.program(&program_id).cloned() else {
        return Err(HandlerErr::new("not_found", "program not found"));
    };

    if req.params.get("name").is_some() {
        program.name = str_param(&req.params, "name")?;
    }
    if let Some(t) = parse_program_type(&req.params)? {
        program.program_type = t;
    }
    if let Some(s) = parse_program_status(&req.params)? {
        program.status = s;
    }
    if req.params.get("description").is_some() {
        program.description = opt_str_param(&req.params, "description")?;
    }

    repo::update_program(conn, &program)
        .map_err(|e| HandlerErr::from_repo(e, "db_update_failed"))?;
    tracing::info!(program_id = %program.id, "program updated");
    Ok(json!({ "program": to_json(&program)? }))
}

fn delete(state: &mut AppState, key: NodeKey) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let before = store_before_change(&state.selection, conn)?;
    let counts = repo::delete_node(conn, &key)
        .map_err(|e| HandlerErr::from_repo(e, "db_delete_failed"))?;
    tracing::info!(
        node = %key,
        folders = counts.folders,
        lists = counts.lists,
        courses = counts.courses,
        "deleted"
    );
    if let Some(before) = before {
        state.selection = state.selection.prune(&before.without(&key));
    }
    Ok(json!({ "deleted": to_json(&counts)? }))
}

fn handle_folders_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let program_id = str_param(&req.params, "programId")?;
    let name = str_param(&req.params, "name")?;
    let before = store_before_change(&state.selection, conn)?;

    let folder = repo::create_folder(conn, &program_id, &name)
        .map_err(|e| HandlerErr::from_repo(e, "db_insert_failed"))?;
    tracing::info!(folder_id = %folder.id, program_id = %program_id, "folder created");
    include_new_nodes(&mut state.selection, conn, before, &[NodeKey::folder(&folder.id)])?;
    Ok(json!({ "folder": to_json(&folder)? }))
}

fn handle_lists_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let folder_id = str_param(&req.params, "folderId")?;
    let name = str_param(&req.params, "name")?;
    let before = store_before_change(&state.selection, conn)?;

    let list = repo::create_list(conn, &folder_id, &name)
        .map_err(|e| HandlerErr::from_repo(e, "db_insert_failed"))?;
    tracing::info!(list_id = %list.id, folder_id = %folder_id, "list created");
    include_new_nodes(&mut state.selection, conn, before, &[NodeKey::list(&list.id)])?;
    Ok(json!({ "list": to_json(&list)? }))
}

fn rename(state: &mut AppState, req: &Request, key: NodeKey) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let name = str_param(&req.params, "name")?;
    repo::rename(conn, &key, &name).map_err(|e| HandlerErr::from_repo(e, "db_update_failed"))?;
    tracing::info!(node = %key, name = %name, "renamed");
    Ok(json!({ "id": key.id, "name": name }))
}

/// Applies the course fields present in `fields`. Absent keys are untouched;
/// explicit nulls clear optional values.
fn apply_course_fields(
    course: &mut Course,
    fields: &Value,
    vocabulary: &Vocabulary,
) -> Result<(), HandlerErr> {
    let present = |key: &str| fields.get(key).is_some();

    if present("title") {
        course.title = str_param(fields, "title")?;
    }
    if present("listId") {
        course.list_id = Some(str_param(fields, "listId")?);
    }
    if present("description") {
        course.description = opt_str_param(fields, "description")?;
    }
    if present("modality") {
        course.modality = opt_str_param(fields, "modality")?;
    }
    if present("ownerEmail") {
        course.owner_email = opt_str_param(fields, "ownerEmail")?;
    }
    if present("leadEmail") {
        course.lead_email = opt_str_param(fields, "leadEmail")?;
    }
    if let Some(raw) = opt_str_param(fields, "priority")? {
        course.priority = Priority::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("priority must be one of: low, medium, high, critical")
                .with_details(json!({ "priority": raw }))
        })?;
    }
    if let Some(status) = opt_str_param(fields, "status")? {
        if !vocabulary.has_status(&status) {
            return Err(HandlerErr::bad_params("status is not in the status vocabulary")
                .with_details(json!({ "status": status })));
        }
        course.status = status;
    }
    if present("startDate") {
        course.start_date = opt_date_param(fields, "startDate")?;
    }
    if present("dueDate") {
        course.due_date = opt_date_param(fields, "dueDate")?;
    }
    if let Some(v) = opt_string_array(fields, "deliverables")? {
        course.deliverables = v;
    }
    if let Some(v) = opt_string_array(fields, "assignees")? {
        course.assignees = v;
    }
    Ok(())
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let list_id = str_param(&req.params, "listId")?;
    let vocabulary = load_vocabulary(conn)?;

    let mut course = Course {
        status: vocabulary.default_status.clone(),
        ..Course::default()
    };
    apply_course_fields(&mut course, &req.params, &vocabulary)?;
    course.list_id = Some(list_id);
    if course.title.is_empty() {
        return Err(HandlerErr::bad_params("missing title"));
    }

    let before = store_before_change(&state.selection, conn)?;
    let course = repo::create_course(conn, course)
        .map_err(|e| HandlerErr::from_repo(e, "db_insert_failed"))?;
    tracing::info!(course_id = %course.id, list_id = ?course.list_id, "course created");
    include_new_nodes(&mut state.selection, conn, before, &[NodeKey::course(&course.id)])?;
    Ok(json!({ "course": to_json(&course)? }))
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = conn(&state.db)?;
    let course_id = str_param(&req.params, "courseId")?;
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let vocabulary = load_vocabulary(conn)?;
    let store = load_store(conn, None)?;
    let Some(mut course) = store.course(&course_id).cloned() else {
        return Err(HandlerErr::new("not_found", "course not found"));
    };

    apply_course_fields(&mut course, patch, &vocabulary)?;
    repo::save_course(conn, &course).map_err(|e| HandlerErr::from_repo(e, "db_update_failed"))?;
    tracing::info!(course_id = %course.id, "course updated");
    Ok(json!({ "course": to_json(&course)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "hierarchy.get" => handle_hierarchy_get(state, req),
        "programs.create" => handle_programs_create(state, req),
        "programs.update" => handle_programs_update(state, req),
        "programs.delete" => {
            str_param(p, "programId").and_then(|id| delete(state, NodeKey::program(id)))
        }
        "folders.create" => handle_folders_create(state, req),
        "folders.rename" => {
            str_param(p, "folderId").and_then(|id| rename(state, req, NodeKey::folder(id)))
        }
        "folders.delete" => {
            str_param(p, "folderId").and_then(|id| delete(state, NodeKey::folder(id)))
        }
        "lists.create" => handle_lists_create(state, req),
        "lists.rename" => {
            str_param(p, "listId").and_then(|id| rename(state, req, NodeKey::list(id)))
        }
        "lists.delete" => str_param(p, "listId").and_then(|id| delete(state, NodeKey::list(id))),
        "courses.create" => handle_courses_create(state, req),
        "courses.update" => handle_courses_update(state, req),
        "courses.delete" => {
            str_param(p, "courseId").and_then(|id| delete(state, NodeKey::course(id)))
        }
        _ => return None,
    };
    Some(respond(&req.id, result))
}
