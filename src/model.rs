use chrono::{DateTime, FixedOffset, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Identifier assigned by the source system.
pub type SourceId = u64;

/// Identifier assigned by the destination system.
pub type DestId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum EntityKind {
    Client,
    Tag,
    Group,
    Project,
    Task,
    User,
    TimeEntry,
}

impl EntityKind {
    /// Migration passes in dependency order.
    pub const PASS_ORDER: [EntityKind; 7] = [
        Self::Client,
        Self::Tag,
        Self::Group,
        Self::Project,
        Self::Task,
        Self::User,
        Self::TimeEntry,
    ];

    /// Deletion order for a wipe: dependents before the things they reference.
    /// User groups are left in place.
    pub const WIPE_ORDER: [EntityKind; 5] = [
        Self::TimeEntry,
        Self::Task,
        Self::Project,
        Self::Tag,
        Self::Client,
    ];
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Tag => write!(f, "tag"),
            Self::Group => write!(f, "group"),
            Self::Project => write!(f, "project"),
            Self::Task => write!(f, "task"),
            Self::User => write!(f, "user"),
            Self::TimeEntry => write!(f, "time_entry"),
        }
    }
}

/// A named workspace as seen by one side of the migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
}

/// Half-open `[start, end)` interval applied to time-entry start timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Window that admits every timestamp, used when wiping.
    pub fn unbounded() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: None,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && self.end.is_none_or(|end| instant < end)
    }
}

// ---------------------------------------------------------------------------
// Source records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceClient {
    pub id: SourceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTag {
    pub id: SourceId,
    pub name: String,
}

/// A user group. Projects can be shared with whole groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceGroup {
    pub id: SourceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMember {
    pub user_id: SourceId,
    #[serde(default)]
    pub manager: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProject {
    pub id: SourceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<SourceId>,
    pub is_public: bool,
    pub billable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<ProjectMember>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_ids: Vec<SourceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTask {
    pub id: SourceId,
    pub name: String,
    pub project_id: SourceId,
    #[serde(default)]
    pub estimated_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUser {
    pub id: SourceId,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTimeEntry {
    pub id: SourceId,
    pub user_id: SourceId,
    /// Timestamps keep the offset the source reported; comparisons happen in UTC.
    pub start: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<FixedOffset>>,
    pub billable: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<SourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<SourceId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_ids: Vec<SourceId>,
}

// ---------------------------------------------------------------------------
// Destination records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestClient {
    pub id: DestId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestTag {
    pub id: DestId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestGroup {
    pub id: DestId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestProject {
    pub id: DestId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<DestId>,
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestTask {
    pub id: DestId,
    pub project_id: DestId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestUser {
    pub id: DestId,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestTimeEntry {
    pub id: DestId,
    pub user_id: DestId,
    pub start: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<FixedOffset>>,
    pub billable: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<DestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<DestId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_ids: Vec<DestId>,
}

// ---------------------------------------------------------------------------
// Creation requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewClient {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTag {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewGroup {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Membership {
    pub user_id: DestId,
    pub manager: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<DestId>,
    pub is_public: bool,
    pub billable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub memberships: Vec<Membership>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_ids: Vec<DestId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTask {
    pub project_id: DestId,
    pub name: String,
    /// ISO 8601 duration such as `PT1H30M`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTimeEntry {
    pub user_id: DestId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub billable: bool,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<DestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<DestId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tag_ids: Vec<DestId>,
}

/// Reference to a destination entity for deletion. Tasks are addressed
/// through their project on the destination side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: DestId,
    pub parent: Option<DestId>,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<DestId>) -> Self {
        Self {
            kind,
            id: id.into(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<DestId>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}
