//! Capability interfaces for the two time-tracking services.
//!
//! The engine only ever talks to these traits; `memory` provides fakes for
//! tests and dry runs, `toggl` and `clockify` bind them to the vendor APIs.

pub mod clockify;
pub mod http;
pub mod memory;
pub mod toggl;

use thiserror::Error;

use crate::model::{
    DestClient, DestGroup, DestId, DestProject, DestTag, DestTask, DestTimeEntry, DestUser,
    EntityRef, NewClient, NewGroup, NewProject, NewTag, NewTask, NewTimeEntry, SourceClient,
    SourceGroup, SourceProject, SourceTag, SourceTask, SourceTimeEntry, SourceUser, TimeWindow,
    Workspace,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("authentication failed")]
    Unauthorized,

    #[error("permission denied")]
    Forbidden,

    #[error("rate limit still exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("not found")]
    NotFound,

    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Failures that end the current workspace's run instead of a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized | Self::Forbidden | Self::RateLimited { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::NotFound => "not_found",
            Self::Rejected { .. } => "rejected",
            Self::Transport(_) => "transport_error",
            Self::Decode(_) => "decode_error",
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Read side of the system entities are migrated from.
pub trait SourceApi: Sync {
    fn workspaces(&self) -> ApiResult<Vec<Workspace>>;
    fn list_clients(&self, workspace: &Workspace) -> ApiResult<Vec<SourceClient>>;
    fn list_tags(&self, workspace: &Workspace) -> ApiResult<Vec<SourceTag>>;
    fn list_groups(&self, workspace: &Workspace) -> ApiResult<Vec<SourceGroup>>;
    fn list_projects(&self, workspace: &Workspace) -> ApiResult<Vec<SourceProject>>;
    fn list_tasks(&self, workspace: &Workspace) -> ApiResult<Vec<SourceTask>>;
    fn list_users(&self, workspace: &Workspace) -> ApiResult<Vec<SourceUser>>;
    fn list_time_entries(
        &self,
        workspace: &Workspace,
        window: &TimeWindow,
    ) -> ApiResult<Vec<SourceTimeEntry>>;
}

/// Read and write side of the system entities are migrated to.
pub trait DestinationApi: Sync {
    fn workspaces(&self) -> ApiResult<Vec<Workspace>>;
    fn list_clients(&self, workspace: &Workspace) -> ApiResult<Vec<DestClient>>;
    fn list_tags(&self, workspace: &Workspace) -> ApiResult<Vec<DestTag>>;
    fn list_groups(&self, workspace: &Workspace) -> ApiResult<Vec<DestGroup>>;
    fn list_projects(&self, workspace: &Workspace) -> ApiResult<Vec<DestProject>>;
    fn list_tasks(&self, workspace: &Workspace) -> ApiResult<Vec<DestTask>>;
    fn list_users(&self, workspace: &Workspace) -> ApiResult<Vec<DestUser>>;
    fn list_time_entries(
        &self,
        workspace: &Workspace,
        window: &TimeWindow,
    ) -> ApiResult<Vec<DestTimeEntry>>;

    fn create_client(&self, workspace: &Workspace, request: &NewClient) -> ApiResult<DestId>;
    fn create_tag(&self, workspace: &Workspace, request: &NewTag) -> ApiResult<DestId>;
    fn create_group(&self, workspace: &Workspace, request: &NewGroup) -> ApiResult<DestId>;
    fn create_project(&self, workspace: &Workspace, request: &NewProject) -> ApiResult<DestId>;
    fn create_task(&self, workspace: &Workspace, request: &NewTask) -> ApiResult<DestId>;
    fn create_time_entry(
        &self,
        workspace: &Workspace,
        request: &NewTimeEntry,
    ) -> ApiResult<DestId>;

    fn archive_project(&self, workspace: &Workspace, project_id: &str) -> ApiResult<()>;
    fn delete_entity(&self, workspace: &Workspace, target: &EntityRef) -> ApiResult<()>;
    fn resolve_user_by_email(&self, workspace: &Workspace, email: &str)
    -> ApiResult<Option<DestId>>;
}

/// Case- and whitespace-insensitive form of an email used as the cross-system user key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
