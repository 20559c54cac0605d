use crate::csv;
use crate::hierarchy::HierarchyStore;
use crate::model::{format_date, parse_date, Course, NodeKind, Vocabulary};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// One spreadsheet row: column header -> cell text.
pub type Row = BTreeMap<String, String>;

pub const COL_PROGRAM: &str = "Program";
pub const COL_FOLDER: &str = "Folder";
pub const COL_LIST: &str = "List";
pub const COL_TITLE: &str = "Title";
pub const COL_DESCRIPTION: &str = "Description";
pub const COL_MODALITY: &str = "Modality";
pub const COL_PRIORITY: &str = "Priority";
pub const COL_STATUS: &str = "Status";
pub const COL_START_DATE: &str = "Start Date";
pub const COL_DUE_DATE: &str = "Due Date";
pub const COL_OWNER_EMAIL: &str = "Owner Email";
pub const COL_LEAD_EMAIL: &str = "Lead Email";

pub const COLUMNS: [&str; 12] = [
    COL_PROGRAM,
    COL_FOLDER,
    COL_LIST,
    COL_TITLE,
    COL_DESCRIPTION,
    COL_MODALITY,
    COL_PRIORITY,
    COL_STATUS,
    COL_START_DATE,
    COL_DUE_DATE,
    COL_OWNER_EMAIL,
    COL_LEAD_EMAIL,
];

pub const REQUIRED_COLUMNS: [&str; 4] = [COL_PROGRAM, COL_FOLDER, COL_LIST, COL_TITLE];

pub const UNASSIGNED: &str = "Unassigned";

/// Maps a raw header to its canonical column. `Title*` and ` title ` both map to `Title`.
pub fn canonical_header(raw: &str) -> Option<&'static str> {
    let trimmed = raw.trim();
    let base = trimmed.strip_suffix('*').unwrap_or(trimmed).trim();
    COLUMNS
        .iter()
        .copied()
        .find(|c| c.eq_ignore_ascii_case(base))
}

// Canonical column -> trimmed non-empty value. First non-empty duplicate wins.
fn normalize_row(row: &Row) -> HashMap<&'static str, String> {
    let mut out = HashMap::new();
    for (header, value) in row {
        let Some(col) = canonical_header(header) else {
            continue;
        };
        let v = value.trim();
        if v.is_empty() {
            continue;
        }
        out.entry(col).or_insert_with(|| v.to_string());
    }
    out
}

/// Renders courses as rows sorted by (Program, Folder, List).
///
/// Folder comes from the course's own folder hint, else from its list.
/// Program comes from the course's program hint, else from the folder.
pub fn to_rows(courses: &[Course], store: &HierarchyStore, vocabulary: &Vocabulary) -> Vec<Row> {
    let mut keyed: Vec<((String, String, String), Row)> = courses
        .iter()
        .map(|course| {
            let list = course.list_id.as_deref().and_then(|id| store.list(id));
            let folder = course
                .folder_id
                .as_deref()
                .and_then(|id| store.folder(id))
                .or_else(|| list.and_then(|l| store.folder(&l.folder_id)));
            let program = course
                .program_id
                .as_deref()
                .and_then(|id| store.program(id))
                .or_else(|| folder.and_then(|f| store.program(&f.program_id)));

            let program_name = program.map_or(UNASSIGNED, |p| p.name.as_str()).to_string();
            let folder_name = folder.map_or(UNASSIGNED, |f| f.name.as_str()).to_string();
            let list_name = list.map_or(UNASSIGNED, |l| l.name.as_str()).to_string();

            let mut row = Row::new();
            row.insert(COL_PROGRAM.into(), program_name.clone());
            row.insert(COL_FOLDER.into(), folder_name.clone());
            row.insert(COL_LIST.into(), list_name.clone());
            row.insert(COL_TITLE.into(), course.title.clone());
            row.insert(
                COL_DESCRIPTION.into(),
                course.description.clone().unwrap_or_default(),
            );
            row.insert(COL_MODALITY.into(), course.modality.clone().unwrap_or_default());
            row.insert(
                COL_PRIORITY.into(),
                vocabulary.priority_label(course.priority).to_string(),
            );
            row.insert(
                COL_STATUS.into(),
                vocabulary.status_label(&course.status).to_string(),
            );
            row.insert(COL_START_DATE.into(), format_date(course.start_date));
            row.insert(COL_DUE_DATE.into(), format_date(course.due_date));
            row.insert(
                COL_OWNER_EMAIL.into(),
                course.owner_email.clone().unwrap_or_default(),
            );
            row.insert(
                COL_LEAD_EMAIL.into(),
                course.lead_email.clone().unwrap_or_default(),
            );
            ((program_name, folder_name, list_name), row)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, row)| row).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Matched,
    Missing,
    Ambiguous,
}

/// A hierarchy name from a row and what it resolved to. `id` is null unless matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub name: String,
    pub id: Option<String>,
    pub status: ResolutionStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

impl Reference {
    fn from_candidates(name: &str, mut ids: Vec<String>) -> Self {
        let (id, status) = match ids.len() {
            0 => (None, ResolutionStatus::Missing),
            1 => (ids.pop(), ResolutionStatus::Matched),
            _ => (None, ResolutionStatus::Ambiguous),
        };
        let candidates = if status == ResolutionStatus::Ambiguous {
            ids
        } else {
            Vec::new()
        };
        Self {
            name: name.to_string(),
            id,
            status,
            candidates,
        }
    }

    fn missing(name: &str) -> Self {
        Self::from_candidates(name, Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedCourse {
    pub row: usize,
    pub program: Reference,
    pub folder: Reference,
    pub list: Reference,
    pub title: String,
    pub description: Option<String>,
    pub modality: Option<String>,
    /// Lowercased as given; enum validation happens at creation.
    pub priority: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub owner_email: Option<String>,
    pub lead_email: Option<String>,
}

impl PlannedCourse {
    pub fn list_id(&self) -> Option<&str> {
        self.list.id.as_deref()
    }

    pub fn is_ambiguous(&self) -> bool {
        [&self.program, &self.folder, &self.list]
            .iter()
            .any(|r| r.status == ResolutionStatus::Ambiguous)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("row {row}: {message}")]
pub struct RowError {
    pub row: usize,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowWarning {
    pub row: usize,
    pub code: &'static str,
    pub message: String,
}

/// Topmost hierarchy level of a row that did not resolve to exactly one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedReference {
    pub row: usize,
    pub level: NodeKind,
    pub name: String,
    pub ambiguous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImportPlan {
    pub rows_total: usize,
    pub skipped: usize,
    pub entries: Vec<PlannedCourse>,
    pub errors: Vec<RowError>,
    pub warnings: Vec<RowWarning>,
    pub unresolved: Vec<UnresolvedReference>,
}

impl ImportPlan {
    pub fn resolved_count(&self) -> usize {
        self.entries.iter().filter(|e| e.list_id().is_some()).count()
    }
}

/// Reconciles rows against `store` without creating anything.
pub fn from_rows(rows: &[Row], store: &HierarchyStore, vocabulary: &Vocabulary) -> ImportPlan {
    let mut plan = ImportPlan {
        rows_total: rows.len(),
        ..ImportPlan::default()
    };

    for (i, raw) in rows.iter().enumerate() {
        let row = i + 1;
        let cells = normalize_row(raw);
        let get = |col: &str| cells.get(col).cloned();

        let Some(title) = get(COL_TITLE) else {
            plan.skipped += 1;
            continue;
        };

        let (program_name, folder_name, list_name) =
            match (get(COL_PROGRAM), get(COL_FOLDER), get(COL_LIST)) {
                (Some(p), Some(f), Some(l)) => (p, f, l),
                (p, f, l) => {
                    let missing: Vec<&str> = [(COL_PROGRAM, p), (COL_FOLDER, f), (COL_LIST, l)]
                        .into_iter()
                        .filter(|(_, v)| v.is_none())
                        .map(|(c, _)| c)
                        .collect();
                    plan.errors.push(RowError {
                        row,
                        code: "missing_hierarchy",
                        message: format!("missing {}", missing.join(", ")),
                    });
                    continue;
                }
            };

        let start_date = match parse_optional_date(get(COL_START_DATE), COL_START_DATE, row) {
            Ok(v) => v,
            Err(e) => {
                plan.errors.push(e);
                continue;
            }
        };
        let due_date = match parse_optional_date(get(COL_DUE_DATE), COL_DUE_DATE, row) {
            Ok(v) => v,
            Err(e) => {
                plan.errors.push(e);
                continue;
            }
        };

        let program = Reference::from_candidates(
            &program_name,
            store
                .programs_named(&program_name)
                .into_iter()
                .map(|p| p.id.clone())
                .collect(),
        );
        let folder = match program.id.as_deref() {
            Some(pid) => Reference::from_candidates(
                &folder_name,
                store
                    .folders_named(pid, &folder_name)
                    .into_iter()
                    .map(|f| f.id.clone())
                    .collect(),
            ),
            None => Reference::missing(&folder_name),
        };
        let list = match folder.id.as_deref() {
            Some(fid) => Reference::from_candidates(
                &list_name,
                store
                    .lists_named(fid, &list_name)
                    .into_iter()
                    .map(|l| l.id.clone())
                    .collect(),
            ),
            None => Reference::missing(&list_name),
        };

        if let Some((level, reference)) = [
            (NodeKind::Program, &program),
            (NodeKind::Folder, &folder),
            (NodeKind::List, &list),
        ]
        .into_iter()
        .find(|(_, r)| r.status != ResolutionStatus::Matched)
        {
            plan.unresolved.push(UnresolvedReference {
                row,
                level,
                name: reference.name.clone(),
                ambiguous: reference.status == ResolutionStatus::Ambiguous,
            });
        }

        let status = match get(COL_STATUS) {
            Some(label) => match vocabulary.status_by_label(&label) {
                Some(value) => Some(value.to_string()),
                None => {
                    plan.warnings.push(RowWarning {
                        row,
                        code: "unknown_status",
                        message: format!("status {label:?} does not match any status label"),
                    });
                    None
                }
            },
            None => None,
        };

        plan.entries.push(PlannedCourse {
            row,
            program,
            folder,
            list,
            title,
            description: get(COL_DESCRIPTION),
            modality: get(COL_MODALITY),
            priority: get(COL_PRIORITY).map(|p| match vocabulary.priority_by_label(&p) {
                Some(value) => value.to_string(),
                None => p.to_lowercase(),
            }),
            status,
            start_date,
            due_date,
            owner_email: get(COL_OWNER_EMAIL),
            lead_email: get(COL_LEAD_EMAIL),
        });
    }

    plan
}

fn parse_optional_date(
    raw: Option<String>,
    column: &str,
    row: usize,
) -> Result<Option<NaiveDate>, RowError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    parse_date(&raw).map(Some).ok_or_else(|| RowError {
        row,
        code: "bad_date",
        message: format!("{column} must be YYYY-MM-DD, got {raw:?}"),
    })
}

/// Reads CSV text with a header line into rows keyed by the raw headers.
pub fn rows_from_csv(text: &str) -> Vec<Row> {
    let mut records = csv::parse_records(text).into_iter();
    let Some(headers) = records.next() else {
        return Vec::new();
    };
    records
        .map(|fields| {
            headers
                .iter()
                .zip(fields.into_iter().chain(std::iter::repeat(String::new())))
                .filter(|(h, _)| !h.trim().is_empty())
                .map(|(h, v)| (h.trim().to_string(), v))
                .collect()
        })
        .collect()
}

/// Writes rows as CSV using the fixed column order.
pub fn rows_to_csv(rows: &[Row], mark_required: bool) -> String {
    let headers: Vec<String> = COLUMNS
        .iter()
        .map(|c| {
            if mark_required && REQUIRED_COLUMNS.contains(c) {
                format!("{c}*")
            } else {
                c.to_string()
            }
        })
        .collect();
    let mut out = String::new();
    csv::write_record(&mut out, &headers);
    for row in rows {
        let fields: Vec<&str> = COLUMNS
            .iter()
            .map(|c| row.get(*c).map(String::as_str).unwrap_or(""))
            .collect();
        csv::write_record(&mut out, &fields);
    }
    out
}
