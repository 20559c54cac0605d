use crate::model::{parse_date, Course, Priority, Vocabulary, ARCHIVED_STATUS};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationKind {
    AssignUsers,
    UpdateDueDates,
    ChangePriority,
    WorkflowTransition,
    ArchiveCourses,
}

impl BulkOperationKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "assign_users" => Some(Self::AssignUsers),
            "update_due_dates" => Some(Self::UpdateDueDates),
            "change_priority" => Some(Self::ChangePriority),
            "workflow_transition" => Some(Self::WorkflowTransition),
            "archive_courses" => Some(Self::ArchiveCourses),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssignUsers => "assign_users",
            Self::UpdateDueDates => "update_due_dates",
            Self::ChangePriority => "change_priority",
            Self::WorkflowTransition => "workflow_transition",
            Self::ArchiveCourses => "archive_courses",
        }
    }
}

/// Operation-specific parameters. Which fields are required depends on the kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkParams {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOperationRequest {
    pub kind: BulkOperationKind,
    pub course_ids: Vec<String>,
    pub params: BulkParams,
}

impl BulkOperationRequest {
    pub fn new(
        kind: &str,
        course_ids: Vec<String>,
        params: BulkParams,
    ) -> Result<Self, ValidationError> {
        let kind = BulkOperationKind::parse(kind)
            .ok_or_else(|| ValidationError::UnknownKind(kind.to_string()))?;
        Ok(Self {
            kind,
            course_ids,
            params,
        })
    }
}

/// Partial course update. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePatch {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_assignees: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseMutation {
    pub course_id: String,
    pub patch: CoursePatch,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no target courses")]
    EmptyTargets,
    #[error("unknown operation kind: {0}")]
    UnknownKind(String),
    #[error("missing parameter: {0}")]
    MissingParam(&'static str),
    #[error("assign_users requires at least one user id")]
    NoUsers,
    #[error("dueDate must be YYYY-MM-DD, got {0:?}")]
    BadDate(String),
    #[error("priority must be one of: low, medium, high, critical; got {0:?}")]
    BadPriority(String),
    #[error("status {0:?} is not in the status vocabulary")]
    BadStatus(String),
    #[error("course {0} not found")]
    UnknownCourse(String),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownCourse(_) => "not_found",
            _ => "bad_params",
        }
    }
}

/// Validates `request` and emits one mutation per distinct target course.
///
/// Nothing is emitted unless every check passes. Output order follows the
/// first occurrence of each id in `request.course_ids`.
pub fn execute(
    request: &BulkOperationRequest,
    targets: &[Course],
    vocabulary: &Vocabulary,
) -> Result<Vec<CourseMutation>, ValidationError> {
    let mut seen = HashSet::new();
    let ids: Vec<&str> = request
        .course_ids
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && seen.insert(*s))
        .collect();
    if ids.is_empty() {
        return Err(ValidationError::EmptyTargets);
    }

    let patch = build_patch(request.kind, &request.params, vocabulary)?;

    for id in &ids {
        if !targets.iter().any(|c| c.id == *id) {
            return Err(ValidationError::UnknownCourse(id.to_string()));
        }
    }

    Ok(ids
        .into_iter()
        .map(|id| CourseMutation {
            course_id: id.to_string(),
            patch: patch.clone(),
        })
        .collect())
}

fn build_patch(
    kind: BulkOperationKind,
    params: &BulkParams,
    vocabulary: &Vocabulary,
) -> Result<CoursePatch, ValidationError> {
    let mut patch = CoursePatch::default();
    match kind {
        BulkOperationKind::AssignUsers => {
            let mut seen = HashSet::new();
            patch.add_assignees = params
                .user_ids
                .iter()
                .map(|u| u.trim())
                .filter(|u| !u.is_empty() && seen.insert(*u))
                .map(str::to_string)
                .collect();
            if patch.add_assignees.is_empty() {
                return Err(ValidationError::NoUsers);
            }
        }
        BulkOperationKind::UpdateDueDates => {
            let raw = params
                .due_date
                .as_deref()
                .ok_or(ValidationError::MissingParam("dueDate"))?;
            let date = parse_date(raw).ok_or_else(|| ValidationError::BadDate(raw.to_string()))?;
            patch.due_date = Some(date);
        }
        BulkOperationKind::ChangePriority => {
            let raw = params
                .priority
                .as_deref()
                .ok_or(ValidationError::MissingParam("priority"))?;
            let priority =
                Priority::parse(raw).ok_or_else(|| ValidationError::BadPriority(raw.to_string()))?;
            patch.priority = Some(priority);
        }
        BulkOperationKind::WorkflowTransition => {
            let raw = params
                .status
                .as_deref()
                .ok_or(ValidationError::MissingParam("status"))?;
            let status = raw.trim();
            if !vocabulary.has_status(status) {
                return Err(ValidationError::BadStatus(raw.to_string()));
            }
            patch.status = Some(status.to_string());
        }
        BulkOperationKind::ArchiveCourses => {
            patch.status = Some(ARCHIVED_STATUS.to_string());
        }
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::tests::course;

    fn targets() -> Vec<Course> {
        vec![
            course("c1", Some("l1"), "One"),
            course("c2", Some("l1"), "Two"),
        ]
    }

    fn request(kind: &str, ids: &[&str], params: BulkParams) -> BulkOperationRequest {
        BulkOperationRequest::new(kind, ids.iter().map(|s| s.to_string()).collect(), params)
            .expect("known kind")
    }

    #[test]
    fn change_priority_emits_one_mutation_per_course() {
        let req = request(
            "change_priority",
            &["c1", "c2"],
            BulkParams {
                priority: Some("high".into()),
                ..BulkParams::default()
            },
        );
        let out = execute(&req, &targets(), &Vocabulary::default()).unwrap();
        assert_eq!(out.len(), 2);
        for (m, id) in out.iter().zip(["c1", "c2"]) {
            assert_eq!(m.course_id, id);
            assert_eq!(m.patch.priority, Some(Priority::High));
            assert!(m.patch.status.is_none());
        }
    }

    #[test]
    fn empty_targets_fail_before_anything_else() {
        let req = request("change_priority", &[], BulkParams::default());
        assert_eq!(
            execute(&req, &targets(), &Vocabulary::default()),
            Err(ValidationError::EmptyTargets)
        );
    }

    #[test]
    fn due_dates_must_be_well_formed() {
        let bad = request(
            "update_due_dates",
            &["c1"],
            BulkParams {
                due_date: Some("2025-13-40".into()),
                ..BulkParams::default()
            },
        );
        assert_eq!(
            execute(&bad, &targets(), &Vocabulary::default()).unwrap_err(),
            ValidationError::BadDate("2025-13-40".into())
        );
        let missing = request("update_due_dates", &["c1"], BulkParams::default());
        assert_eq!(
            execute(&missing, &targets(), &Vocabulary::default()).unwrap_err(),
            ValidationError::MissingParam("dueDate")
        );
        let good = request(
            "update_due_dates",
            &["c2"],
            BulkParams {
                due_date: Some("2025-06-30".into()),
                ..BulkParams::default()
            },
        );
        let out = execute(&good, &targets(), &Vocabulary::default()).unwrap();
        assert_eq!(out[0].patch.due_date, NaiveDate::from_ymd_opt(2025, 6, 30));
    }

    #[test]
    fn priority_and_status_are_checked_against_their_enums() {
        let bad_priority = request(
            "change_priority",
            &["c1"],
            BulkParams {
                priority: Some("urgent".into()),
                ..BulkParams::default()
            },
        );
        assert!(matches!(
            execute(&bad_priority, &targets(), &Vocabulary::default()),
            Err(ValidationError::BadPriority(_))
        ));

        let bad_status = request(
            "workflow_transition",
            &["c1"],
            BulkParams {
                status: Some("shipped".into()),
                ..BulkParams::default()
            },
        );
        assert_eq!(
            execute(&bad_status, &targets(), &Vocabulary::default()).unwrap_err(),
            ValidationError::BadStatus("shipped".into())
        );

        let good = request(
            "workflow_transition",
            &["c1"],
            BulkParams {
                status: Some("in_review".into()),
                ..BulkParams::default()
            },
        );
        let out = execute(&good, &targets(), &Vocabulary::default()).unwrap();
        assert_eq!(out[0].patch.status.as_deref(), Some("in_review"));
    }

    #[test]
    fn assign_users_dedupes_and_requires_someone() {
        let req = request(
            "assign_users",
            &["c1", "c1", "c2"],
            BulkParams {
                user_ids: vec!["u1".into(), " u1 ".into(), "u2".into(), "".into()],
                ..BulkParams::default()
            },
        );
        let out = execute(&req, &targets(), &Vocabulary::default()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].patch.add_assignees, vec!["u1", "u2"]);

        let none = request("assign_users", &["c1"], BulkParams::default());
        assert_eq!(
            execute(&none, &targets(), &Vocabulary::default()).unwrap_err(),
            ValidationError::NoUsers
        );
    }

    #[test]
    fn archive_sets_archived_status_and_is_deterministic() {
        let req = request("archive_courses", &["c2", "c1"], BulkParams::default());
        let a = execute(&req, &targets(), &Vocabulary::default()).unwrap();
        let b = execute(&req, &targets(), &Vocabulary::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].course_id, "c2");
        assert!(a.iter().all(|m| m.patch.status.as_deref() == Some("archived")));
    }

    #[test]
    fn unknown_targets_and_kinds_are_rejected() {
        let req = request("archive_courses", &["c1", "zz"], BulkParams::default());
        let err = execute(&req, &targets(), &Vocabulary::default()).unwrap_err();
        assert_eq!(err, ValidationError::UnknownCourse("zz".into()));
        assert_eq!(err.code(), "not_found");

        let err = BulkOperationRequest::new("explode", vec![], BulkParams::default()).unwrap_err();
        assert_eq!(err, ValidationError::UnknownKind("explode".into()));
    }
}
