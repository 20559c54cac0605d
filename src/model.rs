use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const ARCHIVED_STATUS: &str = "archived";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Program,
    Folder,
    List,
    Course,
}

impl NodeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "program" => Some(Self::Program),
            "folder" => Some(Self::Folder),
            "list" => Some(Self::List),
            "course" => Some(Self::Course),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::Folder => "folder",
            Self::List => "list",
            Self::Course => "course",
        }
    }

    /// Depth below the program level (program = 0, course = 3).
    pub fn depth(self) -> u8 {
        match self {
            Self::Program => 0,
            Self::Folder => 1,
            Self::List => 2,
            Self::Course => 3,
        }
    }
}

/// Tree address of an entity. Ids are only unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub kind: NodeKind,
    pub id: String,
}

impl NodeKey {
    pub fn new(kind: NodeKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn program(id: impl Into<String>) -> Self {
        Self::new(NodeKind::Program, id)
    }

    pub fn folder(id: impl Into<String>) -> Self {
        Self::new(NodeKind::Folder, id)
    }

    pub fn list(id: impl Into<String>) -> Self {
        Self::new(NodeKind::List, id)
    }

    pub fn course(id: impl Into<String>) -> Self {
        Self::new(NodeKind::Course, id)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgramType {
    #[default]
    Program,
    Department,
}

impl ProgramType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "program" => Some(Self::Program),
            "department" => Some(Self::Department),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::Department => "department",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

impl ProgramStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub program_type: ProgramType,
    pub status: ProgramStatus,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub program_id: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseList {
    pub id: String,
    pub name: String,
    pub folder_id: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub list_id: Option<String>,
    /// Denormalized hints; the export path prefers these when present.
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub program_id: Option<String>,
    pub priority: Priority,
    pub status: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub modality: Option<String>,
    #[serde(default)]
    pub owner_email: Option<String>,
    #[serde(default)]
    pub lead_email: Option<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
}

/// Canonical hierarchy payload exchanged with the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HierarchySnapshot {
    pub programs: Vec<Program>,
    pub folders: Vec<Folder>,
    pub lists: Vec<CourseList>,
    pub courses: Vec<Course>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabEntry {
    pub value: String,
    pub label: String,
}

impl VocabEntry {
    pub fn new(value: &str, label: &str) -> Self {
        Self {
            value: value.to_string(),
            label: label.to_string(),
        }
    }
}

/// Externally configured status/priority enumerations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vocabulary {
    pub statuses: Vec<VocabEntry>,
    pub priorities: Vec<VocabEntry>,
    pub default_status: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            statuses: vec![
                VocabEntry::new("not_started", "Not Started"),
                VocabEntry::new("in_progress", "In Progress"),
                VocabEntry::new("in_review", "In Review"),
                VocabEntry::new("on_hold", "On Hold"),
                VocabEntry::new("completed", "Completed"),
                VocabEntry::new(ARCHIVED_STATUS, "Archived"),
            ],
            priorities: vec![
                VocabEntry::new("low", "Low"),
                VocabEntry::new("medium", "Medium"),
                VocabEntry::new("high", "High"),
                VocabEntry::new("critical", "Critical"),
            ],
            default_status: "not_started".to_string(),
        }
    }
}

impl Vocabulary {
    pub fn has_status(&self, value: &str) -> bool {
        self.statuses.iter().any(|s| s.value == value)
    }

    pub fn status_by_label(&self, label: &str) -> Option<&str> {
        let needle = label.trim().to_lowercase();
        self.statuses
            .iter()
            .find(|s| s.label.to_lowercase() == needle)
            .map(|s| s.value.as_str())
    }

    pub fn status_label<'a>(&'a self, value: &'a str) -> &'a str {
        self.statuses
            .iter()
            .find(|s| s.value == value)
            .map(|s| s.label.as_str())
            .unwrap_or(value)
    }

    pub fn priority_by_label(&self, label: &str) -> Option<&str> {
        let needle = label.trim().to_lowercase();
        self.priorities
            .iter()
            .find(|p| p.label.to_lowercase() == needle)
            .map(|p| p.value.as_str())
    }

    pub fn priority_label(&self, priority: Priority) -> &str {
        self.priorities
            .iter()
            .find(|p| p.value == priority.as_str())
            .map(|p| p.label.as_str())
            .unwrap_or(priority.as_str())
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

pub fn format_date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Case-insensitive comparison key for names.
pub fn name_key(s: &str) -> String {
    s.trim().to_lowercase()
}
