//! SQLite-backed hierarchy repository.
//!
//! Every SQL row is mapped into the `model` types here; nothing above this
//! layer looks at column shapes.

use crate::bulk::{CourseMutation, CoursePatch};
use crate::db;
use crate::model::{
    name_key, parse_date, Course, CourseList, Folder, HierarchySnapshot, NodeKey, NodeKind,
    Priority, Program, ProgramStatus, ProgramType, Vocabulary, DATE_FORMAT,
};
use crate::ordering::ReorderCommand;
use crate::reconcile::{ImportPlan, PlannedCourse, RowError, RowWarning};
use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

pub const VOCABULARY_KEY: &str = "setup.vocabulary";

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{0} not found")]
    NotFound(NodeKey),
    #[error("{0} has no orderable children")]
    NotOrderable(NodeKey),
    #[error("order for {parent} must list every child exactly once: {reason}")]
    NotPermutation { parent: NodeKey, reason: String },
    #[error("course {0:?} must belong to a list")]
    MissingList(String),
}

impl RepoError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotOrderable(_) | Self::NotPermutation { .. } | Self::MissingList(_) => {
                "bad_params"
            }
        }
    }
}

fn table_of(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Program => "programs",
        NodeKind::Folder => "folders",
        NodeKind::List => "lists",
        NodeKind::Course => "courses",
    }
}

// (table, parent column) holding the ordered children of `kind`.
fn children_table(kind: NodeKind) -> Option<(&'static str, &'static str)> {
    match kind {
        NodeKind::Program => Some(("folders", "program_id")),
        NodeKind::Folder => Some(("lists", "folder_id")),
        NodeKind::List => Some(("courses", "list_id")),
        NodeKind::Course => None,
    }
}

fn now_sql() -> &'static str {
    "strftime('%Y-%m-%dT%H:%M:%SZ','now')"
}

fn date_sql(d: Option<NaiveDate>) -> Option<String> {
    d.map(|d| d.format(DATE_FORMAT).to_string())
}

pub fn exists(conn: &Connection, key: &NodeKey) -> anyhow::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table_of(key.kind));
    let found: Option<i64> = conn
        .query_row(&sql, [&key.id], |r| r.get(0))
        .optional()
        .with_context(|| format!("look up {key}"))?;
    Ok(found.is_some())
}

fn require(conn: &Connection, key: &NodeKey) -> anyhow::Result<()> {
    if !exists(conn, key)? {
        return Err(RepoError::NotFound(key.clone()).into());
    }
    Ok(())
}

/// Loads the whole hierarchy, or one program and everything under it.
pub fn fetch_hierarchy(
    conn: &Connection,
    program_id: Option<&str>,
) -> anyhow::Result<HierarchySnapshot> {
    let programs = {
        let mut stmt = conn.prepare(
            "SELECT id, name, program_type, status, description
             FROM programs
             WHERE (?1 IS NULL OR id = ?1)
             ORDER BY name, id",
        )?;
        let rows = stmt
            .query_map([program_id], |row| {
                let program_type: String = row.get(2)?;
                let status: String = row.get(3)?;
                Ok(Program {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    program_type: ProgramType::parse(&program_type).unwrap_or_default(),
                    status: ProgramStatus::parse(&status).unwrap_or_default(),
                    description: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>();
        rows.context("load programs")?
    };

    let folders = {
        let mut stmt = conn.prepare(
            "SELECT id, name, program_id, sort_order
             FROM folders
             WHERE (?1 IS NULL OR program_id = ?1)
             ORDER BY program_id, sort_order, rowid",
        )?;
        let rows = stmt
            .query_map([program_id], |row| {
                Ok(Folder {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    program_id: row.get(2)?,
                    position: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>();
        rows.context("load folders")?
    };

    let lists = {
        let mut stmt = conn.prepare(
            "SELECT l.id, l.name, l.folder_id, l.sort_order
             FROM lists l
             JOIN folders f ON f.id = l.folder_id
             WHERE (?1 IS NULL OR f.program_id = ?1)
             ORDER BY l.folder_id, l.sort_order, l.rowid",
        )?;
        let rows = stmt
            .query_map([program_id], |row| {
                Ok(CourseList {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    folder_id: row.get(2)?,
                    position: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>();
        rows.context("load lists")?
    };

    let mut courses = {
        let mut stmt = conn.prepare(
            "SELECT c.id, c.list_id, c.title, c.description, c.priority, c.status,
                    c.start_date, c.due_date, c.modality, c.owner_email, c.lead_email
             FROM courses c
             LEFT JOIN lists l ON l.id = c.list_id
             LEFT JOIN folders f ON f.id = l.folder_id
             WHERE (?1 IS NULL OR f.program_id = ?1)
             ORDER BY c.list_id, c.sort_order, c.rowid",
        )?;
        let rows = stmt
            .query_map([program_id], |row| {
                let priority: String = row.get(4)?;
                let start: Option<String> = row.get(6)?;
                let due: Option<String> = row.get(7)?;
                Ok(Course {
                    id: row.get(0)?,
                    list_id: row.get(1)?,
                    title: row.get(2)?,
                    description: row.get(3)?,
                    priority: Priority::parse(&priority).unwrap_or_default(),
                    status: row.get(5)?,
                    start_date: start.as_deref().and_then(parse_date),
                    due_date: due.as_deref().and_then(parse_date),
                    modality: row.get(8)?,
                    owner_email: row.get(9)?,
                    lead_email: row.get(10)?,
                    ..Course::default()
                })
            })?
            .collect::<Result<Vec<_>, _>>();
        rows.context("load courses")?
    };

    let mut assignees = course_values(
        conn,
        "SELECT course_id, user_id FROM course_assignees ORDER BY course_id, sort_order",
    )
    .context("load course assignees")?;
    let mut deliverables = course_values(
        conn,
        "SELECT course_id, text FROM course_deliverables ORDER BY course_id, sort_order",
    )
    .context("load course deliverables")?;
    for c in &mut courses {
        c.assignees = assignees.remove(&c.id).unwrap_or_default();
        c.deliverables = deliverables.remove(&c.id).unwrap_or_default();
    }

    Ok(HierarchySnapshot {
        programs,
        folders,
        lists,
        courses,
    })
}

fn course_values(conn: &Connection, sql: &str) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(sql)?;
    let pairs = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (course_id, v) in pairs {
        out.entry(course_id).or_default().push(v);
    }
    Ok(out)
}

pub fn create_program(
    conn: &Connection,
    name: &str,
    program_type: ProgramType,
    status: ProgramStatus,
    description: Option<&str>,
) -> anyhow::Result<Program> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO programs(id, name, program_type, status, description) VALUES(?, ?, ?, ?, ?)",
        params![id, name, program_type.as_str(), status.as_str(), description],
    )
    .context("insert program")?;
    Ok(Program {
        id,
        name: name.to_string(),
        program_type,
        status,
        description: description.map(str::to_string),
    })
}

pub fn update_program(conn: &Connection, program: &Program) -> anyhow::Result<()> {
    let n = conn
        .execute(
            "UPDATE programs
             SET name = ?, program_type = ?, status = ?, description = ?
             WHERE id = ?",
            params![
                program.name,
                program.program_type.as_str(),
                program.status.as_str(),
                program.description,
                program.id
            ],
        )
        .context("update program")?;
    if n == 0 {
        return Err(RepoError::NotFound(NodeKey::program(&program.id)).into());
    }
    Ok(())
}

fn append_position(conn: &Connection, parent: &NodeKey) -> anyhow::Result<i64> {
    let Some((table, col)) = children_table(parent.kind) else {
        return Err(RepoError::NotOrderable(parent.clone()).into());
    };
    let sql = format!("SELECT COALESCE(MAX(sort_order), -1) + 1 FROM {table} WHERE {col} = ?");
    let pos = conn
        .query_row(&sql, [&parent.id], |r| r.get(0))
        .with_context(|| format!("next position under {parent}"))?;
    Ok(pos)
}

pub fn create_folder(conn: &Connection, program_id: &str, name: &str) -> anyhow::Result<Folder> {
    let parent = NodeKey::program(program_id);
    require(conn, &parent)?;
    let position = append_position(conn, &parent)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO folders(id, program_id, name, sort_order) VALUES(?, ?, ?, ?)",
        params![id, program_id, name, position],
    )
    .context("insert folder")?;
    Ok(Folder {
        id,
        name: name.to_string(),
        program_id: program_id.to_string(),
        position,
    })
}

pub fn create_list(conn: &Connection, folder_id: &str, name: &str) -> anyhow::Result<CourseList> {
    let parent = NodeKey::folder(folder_id);
    require(conn, &parent)?;
    let position = append_position(conn, &parent)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lists(id, folder_id, name, sort_order) VALUES(?, ?, ?, ?)",
        params![id, folder_id, name, position],
    )
    .context("insert list")?;
    Ok(CourseList {
        id,
        name: name.to_string(),
        folder_id: folder_id.to_string(),
        position,
    })
}

pub fn rename(conn: &Connection, key: &NodeKey, name: &str) -> anyhow::Result<()> {
    let sql = match key.kind {
        NodeKind::Course => "UPDATE courses SET title = ? WHERE id = ?".to_string(),
        kind => format!("UPDATE {} SET name = ? WHERE id = ?", table_of(kind)),
    };
    let n = conn
        .execute(&sql, params![name, key.id])
        .with_context(|| format!("rename {key}"))?;
    if n == 0 {
        return Err(RepoError::NotFound(key.clone()).into());
    }
    Ok(())
}

/// Inserts `course` under a fresh id, appended to its list.
pub fn create_course(conn: &Connection, mut course: Course) -> anyhow::Result<Course> {
    let parent = NodeKey::list(owning_list(&course)?);
    require(conn, &parent)?;
    let position = append_position(conn, &parent)?;
    course.id = Uuid::new_v4().to_string();

    let tx = conn.unchecked_transaction().context("begin create course")?;
    tx.execute(
        &format!(
            "INSERT INTO courses(id, list_id, title, description, priority, status,
                                 start_date, due_date, modality, owner_email, lead_email,
                                 sort_order, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, {})",
            now_sql()
        ),
        params![
            course.id,
            course.list_id,
            course.title,
            course.description,
            course.priority.as_str(),
            course.status,
            date_sql(course.start_date),
            date_sql(course.due_date),
            course.modality,
            course.owner_email,
            course.lead_email,
            position
        ],
    )
    .context("insert course")?;
    write_course_sets(&tx, &course)?;
    tx.commit().context("commit create course")?;
    Ok(course)
}

fn owning_list(course: &Course) -> Result<&str, RepoError> {
    course
        .list_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RepoError::MissingList(course.id.clone()))
}

/// Overwrites every stored field of an existing course.
pub fn save_course(conn: &Connection, course: &Course) -> anyhow::Result<()> {
    let key = NodeKey::course(&course.id);
    require(conn, &key)?;
    require(conn, &NodeKey::list(owning_list(course)?))?;
    let tx = conn.unchecked_transaction().context("begin save course")?;
    tx.execute(
        &format!(
            "UPDATE courses
             SET list_id = ?, title = ?, description = ?, priority = ?, status = ?,
                 start_date = ?, due_date = ?, modality = ?, owner_email = ?, lead_email = ?,
                 updated_at = {}
             WHERE id = ?",
            now_sql()
        ),
        params![
            course.list_id,
            course.title,
            course.description,
            course.priority.as_str(),
            course.status,
            date_sql(course.start_date),
            date_sql(course.due_date),
            course.modality,
            course.owner_email,
            course.lead_email,
            course.id
        ],
    )
    .context("update course")?;
    tx.execute("DELETE FROM course_assignees WHERE course_id = ?", [&course.id])?;
    tx.execute("DELETE FROM course_deliverables WHERE course_id = ?", [&course.id])?;
    write_course_sets(&tx, course)?;
    tx.commit().context("commit save course")?;
    Ok(())
}

fn write_course_sets(conn: &Connection, course: &Course) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for (i, user) in course
        .assignees
        .iter()
        .filter(|u| seen.insert(u.as_str()))
        .enumerate()
    {
        conn.execute(
            "INSERT INTO course_assignees(course_id, user_id, sort_order) VALUES(?, ?, ?)",
            params![course.id, user, i as i64],
        )
        .context("insert course assignee")?;
    }
    for (i, text) in course.deliverables.iter().enumerate() {
        conn.execute(
            "INSERT INTO course_deliverables(course_id, sort_order, text) VALUES(?, ?, ?)",
            params![course.id, i as i64, text],
        )
        .context("insert course deliverable")?;
    }
    Ok(())
}

/// Applies a partial update. Returns false when the course does not exist.
pub fn update_course(conn: &Connection, id: &str, patch: &CoursePatch) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction().context("begin update course")?;
    let n = tx
        .execute(
            &format!(
                "UPDATE courses
                 SET due_date = COALESCE(?1, due_date),
                     priority = COALESCE(?2, priority),
                     status = COALESCE(?3, status),
                     updated_at = {}
                 WHERE id = ?4",
                now_sql()
            ),
            params![
                date_sql(patch.due_date),
                patch.priority.map(Priority::as_str),
                patch.status,
                id
            ],
        )
        .context("update course")?;
    if n == 0 {
        return Ok(false);
    }
    for user in &patch.add_assignees {
        tx.execute(
            "INSERT OR IGNORE INTO course_assignees(course_id, user_id, sort_order)
             VALUES(?1, ?2, (SELECT COALESCE(MAX(sort_order), -1) + 1
                             FROM course_assignees WHERE course_id = ?1))",
            params![id, user],
        )
        .context("insert course assignee")?;
    }
    tx.commit().context("commit update course")?;
    Ok(true)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationFailure {
    pub course_id: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationReport {
    pub updated: usize,
    pub rejected: usize,
    pub errors: Vec<MutationFailure>,
}

/// Applies each mutation on its own. A failure never undoes earlier ones.
pub fn apply_mutations(conn: &Connection, mutations: &[CourseMutation]) -> MutationReport {
    let mut report = MutationReport::default();
    for m in mutations {
        match update_course(conn, &m.course_id, &m.patch) {
            Ok(true) => report.updated += 1,
            Ok(false) => report.errors.push(MutationFailure {
                course_id: m.course_id.clone(),
                code: "not_found",
                message: "course not found".to_string(),
            }),
            Err(e) => report.errors.push(MutationFailure {
                course_id: m.course_id.clone(),
                code: "db_update_failed",
                message: format!("{e:#}"),
            }),
        }
    }
    report.rejected = report.errors.len();
    report
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteCounts {
    pub programs: usize,
    pub folders: usize,
    pub lists: usize,
    pub courses: usize,
}

/// Deletes `key` and everything beneath it, then renumbers the remaining
/// siblings. Runs in one transaction.
pub fn delete_node(conn: &Connection, key: &NodeKey) -> anyhow::Result<DeleteCounts> {
    require(conn, key)?;
    let parent = parent_of(conn, key)?;

    let courses_under = match key.kind {
        NodeKind::Program => {
            "SELECT c.id FROM courses c
             JOIN lists l ON l.id = c.list_id
             JOIN folders f ON f.id = l.folder_id
             WHERE f.program_id = ?1"
        }
        NodeKind::Folder => {
            "SELECT c.id FROM courses c JOIN lists l ON l.id = c.list_id WHERE l.folder_id = ?1"
        }
        NodeKind::List => "SELECT id FROM courses WHERE list_id = ?1",
        NodeKind::Course => "SELECT ?1",
    };
    let lists_under = match key.kind {
        NodeKind::Program => Some(
            "SELECT l.id FROM lists l
             JOIN folders f ON f.id = l.folder_id
             WHERE f.program_id = ?1",
        ),
        NodeKind::Folder => Some("SELECT id FROM lists WHERE folder_id = ?1"),
        NodeKind::List => Some("SELECT ?1"),
        NodeKind::Course => None,
    };
    let folders_under = match key.kind {
        NodeKind::Program => Some("SELECT id FROM folders WHERE program_id = ?1"),
        NodeKind::Folder => Some("SELECT ?1"),
        _ => None,
    };

    let tx = conn.unchecked_transaction().context("begin delete")?;
    let mut counts = DeleteCounts::default();

    // Dependency order: sets, courses, lists, folders, program.
    tx.execute(
        &format!("DELETE FROM course_assignees WHERE course_id IN ({courses_under})"),
        [&key.id],
    )
    .context("delete course assignees")?;
    tx.execute(
        &format!("DELETE FROM course_deliverables WHERE course_id IN ({courses_under})"),
        [&key.id],
    )
    .context("delete course deliverables")?;
    counts.courses = tx
        .execute(
            &format!("DELETE FROM courses WHERE id IN ({courses_under})"),
            [&key.id],
        )
        .context("delete courses")?;
    if let Some(sql) = lists_under {
        counts.lists = tx
            .execute(&format!("DELETE FROM lists WHERE id IN ({sql})"), [&key.id])
            .context("delete lists")?;
    }
    if let Some(sql) = folders_under {
        counts.folders = tx
            .execute(&format!("DELETE FROM folders WHERE id IN ({sql})"), [&key.id])
            .context("delete folders")?;
    }
    if key.kind == NodeKind::Program {
        counts.programs = tx
            .execute("DELETE FROM programs WHERE id = ?", [&key.id])
            .context("delete program")?;
    }

    if let Some(parent) = parent {
        renumber_children(&tx, &parent)?;
    }
    tx.commit().context("commit delete")?;
    Ok(counts)
}

fn parent_of(conn: &Connection, key: &NodeKey) -> anyhow::Result<Option<NodeKey>> {
    let (sql, kind) = match key.kind {
        NodeKind::Program => return Ok(None),
        NodeKind::Folder => ("SELECT program_id FROM folders WHERE id = ?", NodeKind::Program),
        NodeKind::List => ("SELECT folder_id FROM lists WHERE id = ?", NodeKind::Folder),
        NodeKind::Course => ("SELECT list_id FROM courses WHERE id = ?", NodeKind::List),
    };
    let id: Option<Option<String>> = conn
        .query_row(sql, [&key.id], |r| r.get(0))
        .optional()
        .with_context(|| format!("parent of {key}"))?;
    Ok(id.flatten().map(|id| NodeKey::new(kind, id)))
}

fn child_ids(conn: &Connection, parent: &NodeKey) -> anyhow::Result<Vec<String>> {
    let Some((table, col)) = children_table(parent.kind) else {
        return Err(RepoError::NotOrderable(parent.clone()).into());
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM {table} WHERE {col} = ? ORDER BY sort_order, rowid"
    ))?;
    let ids = stmt
        .query_map([&parent.id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("children of {parent}"))?;
    Ok(ids)
}

fn renumber_children(conn: &Connection, parent: &NodeKey) -> anyhow::Result<()> {
    let Some((table, _)) = children_table(parent.kind) else {
        return Ok(());
    };
    let sql = format!("UPDATE {table} SET sort_order = ? WHERE id = ?");
    for (i, id) in child_ids(conn, parent)?.iter().enumerate() {
        conn.execute(&sql, params![i as i64, id])
            .with_context(|| format!("renumber {table}"))?;
    }
    Ok(())
}

/// Persists a full sibling order after checking it covers the current
/// children exactly.
pub fn reorder_siblings(conn: &Connection, command: &ReorderCommand) -> anyhow::Result<()> {
    let parent = &command.parent;
    if !matches!(parent.kind, NodeKind::Program | NodeKind::Folder) {
        return Err(RepoError::NotOrderable(parent.clone()).into());
    }
    require(conn, parent)?;
    let current: HashSet<String> = child_ids(conn, parent)?.into_iter().collect();

    let not_permutation = |reason: String| RepoError::NotPermutation {
        parent: parent.clone(),
        reason,
    };
    let mut seen = HashSet::new();
    for e in &command.entries {
        if !seen.insert(e.id.as_str()) {
            return Err(not_permutation(format!("duplicate {}", e.id)).into());
        }
        if !current.contains(&e.id) {
            return Err(not_permutation(format!("unknown {}", e.id)).into());
        }
    }
    if seen.len() != current.len() {
        return Err(not_permutation(format!(
            "expected {} ids, got {}",
            current.len(),
            seen.len()
        ))
        .into());
    }

    let (table, col) =
        children_table(parent.kind).ok_or_else(|| RepoError::NotOrderable(parent.clone()))?;
    let sql = format!("UPDATE {table} SET sort_order = ? WHERE id = ? AND {col} = ?");
    let tx = conn.unchecked_transaction().context("begin reorder")?;
    for e in &command.entries {
        tx.execute(&sql, params![e.position, e.id, parent.id])
            .with_context(|| format!("reorder {table}"))?;
    }
    tx.commit().context("commit reorder")?;
    Ok(())
}

/// Status and priority vocabularies from workspace settings, or the defaults.
///
/// A malformed saved value falls back to the defaults rather than failing.
pub fn load_vocabulary(conn: &Connection) -> anyhow::Result<Vocabulary> {
    let saved = db::settings_get_json(conn, VOCABULARY_KEY).context("load vocabulary")?;
    Ok(saved
        .and_then(|v| serde_json::from_value::<Vocabulary>(v).ok())
        .unwrap_or_default())
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub created: usize,
    pub rejected: usize,
    pub course_ids: Vec<String>,
    pub created_nodes: Vec<NodeKey>,
    pub errors: Vec<RowError>,
    pub warnings: Vec<RowWarning>,
}

type NodeCache = HashMap<(NodeKind, String, String), String>;

/// Creates a course per plan entry. Missing containers are created on demand
/// when `create_missing` is set; each row stands on its own.
pub fn apply_import_plan(
    conn: &Connection,
    plan: &ImportPlan,
    vocabulary: &Vocabulary,
    create_missing: bool,
) -> ImportReport {
    let mut report = ImportReport {
        warnings: plan.warnings.clone(),
        ..ImportReport::default()
    };
    let mut cache = NodeCache::new();

    for entry in &plan.entries {
        if entry.is_ambiguous() {
            report.errors.push(RowError {
                row: entry.row,
                code: "ambiguous_reference",
                message: "more than one node matches the given name".to_string(),
            });
            continue;
        }
        let list_id = match entry.list_id() {
            Some(id) => id.to_string(),
            None if create_missing => {
                match ensure_list(conn, entry, &mut cache, &mut report.created_nodes) {
                    Ok(id) => id,
                    Err(e) => {
                        report.errors.push(RowError {
                            row: entry.row,
                            code: "db_insert_failed",
                            message: format!("{e:#}"),
                        });
                        continue;
                    }
                }
            }
            None => {
                report.errors.push(RowError {
                    row: entry.row,
                    code: "unresolved_reference",
                    message: format!(
                        "{} / {} / {} does not exist",
                        entry.program.name, entry.folder.name, entry.list.name
                    ),
                });
                continue;
            }
        };

        let priority = match entry.priority.as_deref() {
            None => Priority::default(),
            Some(raw) => Priority::parse(raw).unwrap_or_else(|| {
                report.warnings.push(RowWarning {
                    row: entry.row,
                    code: "bad_priority",
                    message: format!("priority {raw:?} replaced with medium"),
                });
                Priority::default()
            }),
        };

        let course = Course {
            title: entry.title.clone(),
            description: entry.description.clone(),
            list_id: Some(list_id),
            priority,
            status: entry
                .status
                .clone()
                .unwrap_or_else(|| vocabulary.default_status.clone()),
            start_date: entry.start_date,
            due_date: entry.due_date,
            modality: entry.modality.clone(),
            owner_email: entry.owner_email.clone(),
            lead_email: entry.lead_email.clone(),
            ..Course::default()
        };
        match create_course(conn, course) {
            Ok(c) => {
                report.created += 1;
                report.course_ids.push(c.id);
            }
            Err(e) => report.errors.push(RowError {
                row: entry.row,
                code: "db_insert_failed",
                message: format!("{e:#}"),
            }),
        }
    }
    report.rejected = report.errors.len();
    report
}

fn ensure_list(
    conn: &Connection,
    entry: &PlannedCourse,
    cache: &mut NodeCache,
    created: &mut Vec<NodeKey>,
) -> anyhow::Result<String> {
    let program_id = match &entry.program.id {
        Some(id) => id.clone(),
        None => ensure_node(conn, cache, created, NodeKind::Program, "", &entry.program.name)?,
    };
    let folder_id = match &entry.folder.id {
        Some(id) => id.clone(),
        None => ensure_node(
            conn,
            cache,
            created,
            NodeKind::Folder,
            &program_id,
            &entry.folder.name,
        )?,
    };
    ensure_node(conn, cache, created, NodeKind::List, &folder_id, &entry.list.name)
}

fn ensure_node(
    conn: &Connection,
    cache: &mut NodeCache,
    created: &mut Vec<NodeKey>,
    kind: NodeKind,
    parent_id: &str,
    name: &str,
) -> anyhow::Result<String> {
    let key = (kind, parent_id.to_string(), name_key(name));
    if let Some(id) = cache.get(&key) {
        return Ok(id.clone());
    }
    let id = match kind {
        NodeKind::Program => {
            create_program(conn, name, ProgramType::Program, ProgramStatus::Active, None)?.id
        }
        NodeKind::Folder => create_folder(conn, parent_id, name)?.id,
        NodeKind::List => create_list(conn, parent_id, name)?.id,
        NodeKind::Course => anyhow::bail!("courses cannot contain other nodes"),
    };
    created.push(NodeKey::new(kind, &id));
    cache.insert(key, id.clone());
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchyStore;
    use crate::ordering;
    use crate::reconcile::{self, Row};

    fn temp_conn(name: &str) -> (std::path::PathBuf, Connection) {
        let p = std::env::temp_dir().join(format!("coursetreed-repo-{}-{}", name, Uuid::new_v4()));
        let conn = db::open_db(&p).expect("open db");
        (p, conn)
    }

    fn plain_program(conn: &Connection, name: &str) -> Program {
        create_program(conn, name, ProgramType::Program, ProgramStatus::Active, None).unwrap()
    }

    fn course_in(list_id: &str, title: &str) -> Course {
        Course {
            title: title.into(),
            list_id: Some(list_id.into()),
            status: "not_started".into(),
            ..Course::default()
        }
    }

    #[test]
    fn creates_append_positions_and_fetch_normalizes() {
        let (dir, conn) = temp_conn("create");
        let p = create_program(
            &conn,
            "Onboarding",
            ProgramType::Department,
            ProgramStatus::Active,
            None,
        )
        .unwrap();
        let a = create_folder(&conn, &p.id, "A").unwrap();
        let b = create_folder(&conn, &p.id, "B").unwrap();
        assert_eq!((a.position, b.position), (0, 1));
        let l = create_list(&conn, &a.id, "Week 1").unwrap();
        let mut c = course_in(&l.id, "Welcome");
        c.assignees = vec!["u1".into(), "u1".into(), "u2".into()];
        c.due_date = NaiveDate::from_ymd_opt(2025, 6, 30);
        create_course(&conn, c).unwrap();

        let snap = fetch_hierarchy(&conn, Some(p.id.as_str())).unwrap();
        assert_eq!(snap.programs[0].program_type, ProgramType::Department);
        assert_eq!(snap.folders.len(), 2);
        assert_eq!(snap.courses[0].assignees, vec!["u1", "u2"]);
        assert_eq!(snap.courses[0].due_date, NaiveDate::from_ymd_opt(2025, 6, 30));

        let err = create_folder(&conn, "nope", "X").unwrap_err();
        assert!(matches!(err.downcast_ref::<RepoError>(), Some(RepoError::NotFound(_))));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn delete_cascades_and_keeps_positions_dense() {
        let (dir, conn) = temp_conn("delete");
        let p = plain_program(&conn, "P");
        let f0 = create_folder(&conn, &p.id, "F0").unwrap();
        let f1 = create_folder(&conn, &p.id, "F1").unwrap();
        let f2 = create_folder(&conn, &p.id, "F2").unwrap();
        let l = create_list(&conn, &f1.id, "L").unwrap();
        create_course(&conn, course_in(&l.id, "One")).unwrap();
        create_course(&conn, course_in(&l.id, "Two")).unwrap();

        let counts = delete_node(&conn, &NodeKey::folder(&f1.id)).unwrap();
        assert_eq!(
            counts,
            DeleteCounts {
                programs: 0,
                folders: 1,
                lists: 1,
                courses: 2
            }
        );
        let store = HierarchyStore::from_snapshot(fetch_hierarchy(&conn, None).unwrap());
        assert!(store.position_violations().is_empty());
        let ids: Vec<&str> = store.folders_of(&p.id).iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec![f0.id.as_str(), f2.id.as_str()]);
        assert!(store.snapshot().courses.is_empty());

        delete_node(&conn, &NodeKey::program(&p.id)).unwrap();
        assert!(fetch_hierarchy(&conn, None).unwrap().folders.is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn reorder_requires_the_exact_child_set() {
        let (dir, conn) = temp_conn("reorder");
        let p = plain_program(&conn, "P");
        let a = create_folder(&conn, &p.id, "A").unwrap();
        let b = create_folder(&conn, &p.id, "B").unwrap();

        let store = HierarchyStore::from_snapshot(fetch_hierarchy(&conn, None).unwrap());
        let sibs = ordering::children_of(&store, &NodeKey::program(&p.id)).unwrap();
        let parent = NodeKey::program(&p.id);
        let cmd = ordering::move_sibling(&parent, &sibs, &b.id, ordering::Direction::Up).unwrap();
        reorder_siblings(&conn, &cmd).unwrap();
        let store = HierarchyStore::from_snapshot(fetch_hierarchy(&conn, None).unwrap());
        let names: Vec<&str> = store.folders_of(&p.id).iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);

        let mut partial = cmd.clone();
        partial.entries.retain(|e| e.id == a.id);
        let err = reorder_siblings(&conn, &partial).unwrap_err();
        assert_eq!(err.downcast_ref::<RepoError>().map(RepoError::code), Some("bad_params"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn mutations_report_missing_courses_individually() {
        let (dir, conn) = temp_conn("mutations");
        let p = plain_program(&conn, "P");
        let f = create_folder(&conn, &p.id, "F").unwrap();
        let l = create_list(&conn, &f.id, "L").unwrap();
        let c = create_course(&conn, course_in(&l.id, "One")).unwrap();

        let patch = CoursePatch {
            add_assignees: vec!["u9".into()],
            priority: Some(Priority::Critical),
            ..CoursePatch::default()
        };
        let report = apply_mutations(
            &conn,
            &[
                CourseMutation {
                    course_id: c.id.clone(),
                    patch: patch.clone(),
                },
                CourseMutation {
                    course_id: "gone".into(),
                    patch,
                },
            ],
        );
        assert_eq!(report.updated, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.errors[0].code, "not_found");

        let snap = fetch_hierarchy(&conn, None).unwrap();
        assert_eq!(snap.courses[0].priority, Priority::Critical);
        assert_eq!(snap.courses[0].assignees, vec!["u9"]);
        assert_eq!(snap.courses[0].status, "not_started");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn import_creates_missing_containers_once() {
        let (dir, conn) = temp_conn("import");
        let rows: Vec<Row> = ["A", "B"]
            .iter()
            .map(|t| {
                [
                    ("Title", *t),
                    ("Program", "New Program"),
                    ("Folder", "Intro"),
                    ("List", "Week 1"),
                    ("Priority", "urgent"),
                ]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
            })
            .collect();
        let vocab = Vocabulary::default();
        let store = HierarchyStore::from_snapshot(fetch_hierarchy(&conn, None).unwrap());
        let plan = reconcile::from_rows(&rows, &store, &vocab);

        let refused = apply_import_plan(&conn, &plan, &vocab, false);
        assert_eq!(refused.created, 0);
        assert_eq!(refused.errors[0].code, "unresolved_reference");

        let report = apply_import_plan(&conn, &plan, &vocab, true);
        assert_eq!(report.created, 2);
        assert_eq!(report.created_nodes.len(), 3);
        assert_eq!(report.warnings.iter().filter(|w| w.code == "bad_priority").count(), 2);

        let snap = fetch_hierarchy(&conn, None).unwrap();
        assert_eq!(snap.programs.len(), 1);
        assert_eq!(snap.lists.len(), 1);
        assert!(snap.courses.iter().all(|c| c.priority == Priority::Medium));
        assert!(snap.courses.iter().all(|c| c.status == "not_started"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
