//! Destination binding for Clockify (REST API v1).
//!
//! Every configured key is resolved to its owner at connect time. Time
//! entries are written with the owner's own key when we hold it and
//! otherwise on their behalf with the admin key.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::http::{Auth, Transport, paged};
use super::{ApiError, ApiResult, DestinationApi, normalize_email};
use crate::error::{MigrateError, Result};
use crate::model::{
    DestClient, DestGroup, DestId, DestProject, DestTag, DestTask, DestTimeEntry, DestUser,
    EntityKind, EntityRef, NewClient, NewGroup, NewProject, NewTag, NewTask, NewTimeEntry,
    TimeWindow, Workspace,
};

pub const API_BASE: &str = "https://api.clockify.me/api/v1";

const PAGE_SIZE: usize = 200;

#[derive(Debug, Deserialize)]
struct WireNamed {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireId {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    id: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProject {
    id: String,
    name: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTask {
    id: String,
    name: String,
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct WireInterval {
    start: DateTime<FixedOffset>,
    #[serde(default)]
    end: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTimeEntry {
    id: String,
    user_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    billable: bool,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    tag_ids: Option<Vec<String>>,
    time_interval: WireInterval,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MembershipBody<'a> {
    user_id: &'a str,
    membership_type: &'static str,
    membership_status: &'static str,
    manager: bool,
}

/// Replaces a project's team. Members must be repeated or they are dropped.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TeamBody<'a> {
    user_ids: Vec<&'a str>,
    user_group_ids: &'a [DestId],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    is_public: bool,
    billable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<&'a str>,
    memberships: Vec<MembershipBody<'a>>,
}

#[derive(Debug, Serialize)]
struct TaskBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimate: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimeEntryBody<'a> {
    start: String,
    end: String,
    billable: bool,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<&'a str>,
    tag_ids: &'a [DestId],
}

#[derive(Debug, Serialize)]
struct ArchiveBody {
    archived: bool,
}

impl From<WireTimeEntry> for DestTimeEntry {
    fn from(entry: WireTimeEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            start: entry.time_interval.start,
            end: entry.time_interval.end,
            billable: entry.billable,
            description: entry.description.unwrap_or_default(),
            project_id: entry.project_id,
            task_id: entry.task_id,
            tag_ids: entry.tag_ids.unwrap_or_default(),
        }
    }
}

fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub struct ClockifyClient {
    http: Transport,
    base: String,
    admin: Auth,
    /// Keys by the destination id of the user who owns them.
    keys: HashMap<DestId, Auth>,
}

impl ClockifyClient {
    /// Identify the owner of every key. Fails unless one of them belongs to
    /// `admin_email`.
    pub fn connect(api_keys: &[String], admin_email: &str, http: Transport) -> Result<Self> {
        let base = API_BASE.to_string();
        let mut keys = HashMap::new();
        let mut admin = None;
        for key in api_keys {
            let auth = Auth::header("X-Api-Key", key.as_str());
            let owner: WireUser = http
                .get(&format!("{base}/user"), &auth, &[])
                .map_err(|e| MigrateError::api("identifying a destination API key", e))?;
            tracing::debug!(email = %owner.email, "destination key identified");
            if normalize_email(&owner.email) == normalize_email(admin_email) {
                admin = Some(auth.clone());
            }
            keys.insert(owner.id, auth);
        }
        let admin = admin.ok_or_else(|| {
            MigrateError::Config(format!(
                "admin {admin_email} does not own any of the configured destination keys"
            ))
        })?;
        Ok(Self {
            http,
            base,
            admin,
            keys,
        })
    }

    fn url(&self, workspace: &Workspace, path: &str) -> String {
        format!("{}/workspaces/{}/{path}", self.base, workspace.id)
    }

    fn list_paged<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        extra: &[(&str, String)],
    ) -> ApiResult<Vec<T>> {
        paged(PAGE_SIZE, |page| {
            let mut query = vec![
                ("page", page.to_string()),
                ("page-size", PAGE_SIZE.to_string()),
            ];
            query.extend(extra.iter().cloned());
            self.http.get(url, &self.admin, &query)
        })
    }

    /// Projects are created as the first manager we hold a key for, which
    /// makes that user the project's manager.
    fn project_author(&self, request: &NewProject) -> &Auth {
        request
            .memberships
            .iter()
            .filter(|m| m.manager)
            .find_map(|m| self.keys.get(&m.user_id))
            .unwrap_or(&self.admin)
    }

    /// Shares a freshly created project with its groups. The project
    /// exists either way, so only a fatal failure is passed on.
    fn assign_groups(
        &self,
        workspace: &Workspace,
        project_id: &str,
        request: &NewProject,
        author: &Auth,
    ) -> ApiResult<()> {
        let url = self.url(workspace, &format!("projects/{project_id}/team"));
        let body = TeamBody {
            user_ids: request.memberships.iter().map(|m| m.user_id.as_str()).collect(),
            user_group_ids: &request.group_ids,
        };
        match self.http.send("POST", &url, author, &[], Some(&body)) {
            Ok(_) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                tracing::warn!(project = %request.name, error = %err, "could not assign user groups");
                Ok(())
            }
        }
    }
}

impl DestinationApi for ClockifyClient {
    fn workspaces(&self) -> ApiResult<Vec<Workspace>> {
        let listed: Vec<WireNamed> = self
            .http
            .get(&format!("{}/workspaces", self.base), &self.admin, &[])?;
        Ok(listed
            .into_iter()
            .map(|w| Workspace {
                id: w.id,
                name: w.name,
            })
            .collect())
    }

    fn list_clients(&self, workspace: &Workspace) -> ApiResult<Vec<DestClient>> {
        let listed: Vec<WireNamed> = self.list_paged(&self.url(workspace, "clients"), &[])?;
        Ok(listed
            .into_iter()
            .map(|c| DestClient {
                id: c.id,
                name: c.name,
            })
            .collect())
    }

    fn list_tags(&self, workspace: &Workspace) -> ApiResult<Vec<DestTag>> {
        let listed: Vec<WireNamed> = self.list_paged(&self.url(workspace, "tags"), &[])?;
        Ok(listed
            .into_iter()
            .map(|t| DestTag {
                id: t.id,
                name: t.name,
            })
            .collect())
    }

    fn list_groups(&self, workspace: &Workspace) -> ApiResult<Vec<DestGroup>> {
        let listed: Vec<WireNamed> = self.list_paged(&self.url(workspace, "user-groups"), &[])?;
        Ok(listed
            .into_iter()
            .map(|g| DestGroup {
                id: g.id,
                name: g.name,
            })
            .collect())
    }

    fn list_projects(&self, workspace: &Workspace) -> ApiResult<Vec<DestProject>> {
        let url = self.url(workspace, "projects");
        let mut listed: Vec<WireProject> = Vec::new();
        for archived in ["false", "true"] {
            listed.extend(self.list_paged::<WireProject>(&url, &[("archived", archived.to_string())])?);
        }
        Ok(listed
            .into_iter()
            .map(|p| DestProject {
                id: p.id,
                name: p.name,
                client_id: p.client_id,
                archived: p.archived,
            })
            .collect())
    }

    fn list_tasks(&self, workspace: &Workspace) -> ApiResult<Vec<DestTask>> {
        let mut tasks = Vec::new();
        for project in self.list_projects(workspace)? {
            let url = self.url(workspace, &format!("projects/{}/tasks", project.id));
            let listed: Vec<WireTask> = self.list_paged(&url, &[])?;
            tasks.extend(listed.into_iter().map(|t| DestTask {
                id: t.id,
                project_id: t.project_id,
                name: t.name,
            }));
        }
        Ok(tasks)
    }

    fn list_users(&self, workspace: &Workspace) -> ApiResult<Vec<DestUser>> {
        let listed: Vec<WireUser> = self.list_paged(&self.url(workspace, "users"), &[])?;
        Ok(listed
            .into_iter()
            .map(|u| DestUser {
                id: u.id,
                email: u.email,
                name: u.name.unwrap_or_default(),
            })
            .collect())
    }

    fn list_time_entries(
        &self,
        workspace: &Workspace,
        window: &TimeWindow,
    ) -> ApiResult<Vec<DestTimeEntry>> {
        let mut range = Vec::new();
        if window.start > DateTime::<Utc>::MIN_UTC {
            range.push(("start", timestamp(window.start)));
        }
        if let Some(end) = window.end {
            range.push(("end", timestamp(end)));
        }

        let mut entries = Vec::new();
        for user in self.list_users(workspace)? {
            let url = self.url(workspace, &format!("user/{}/time-entries", user.id));
            let listed: Vec<WireTimeEntry> = self.list_paged(&url, &range)?;
            entries.extend(listed.into_iter().map(DestTimeEntry::from));
        }
        Ok(entries)
    }

    fn create_client(&self, workspace: &Workspace, request: &NewClient) -> ApiResult<DestId> {
        let created: WireId = self
            .http
            .post(&self.url(workspace, "clients"), &self.admin, request)?;
        Ok(created.id)
    }

    fn create_tag(&self, workspace: &Workspace, request: &NewTag) -> ApiResult<DestId> {
        let created: WireId = self
            .http
            .post(&self.url(workspace, "tags"), &self.admin, request)?;
        Ok(created.id)
    }

    fn create_group(&self, workspace: &Workspace, request: &NewGroup) -> ApiResult<DestId> {
        let created: WireId = self
            .http
            .post(&self.url(workspace, "user-groups"), &self.admin, request)?;
        Ok(created.id)
    }

    fn create_project(&self, workspace: &Workspace, request: &NewProject) -> ApiResult<DestId> {
        let body = ProjectBody {
            name: &request.name,
            client_id: request.client_id.as_deref(),
            is_public: request.is_public,
            billable: request.billable,
            color: request.color.as_deref(),
            memberships: request
                .memberships
                .iter()
                .map(|m| MembershipBody {
                    user_id: &m.user_id,
                    membership_type: "PROJECT",
                    membership_status: "ACTIVE",
                    manager: m.manager,
                })
                .collect(),
        };
        let author = self.project_author(request);
        let created: WireId = self
            .http
            .post(&self.url(workspace, "projects"), author, &body)?;
        if !request.group_ids.is_empty() {
            self.assign_groups(workspace, &created.id, request, author)?;
        }
        Ok(created.id)
    }

    fn create_task(&self, workspace: &Workspace, request: &NewTask) -> ApiResult<DestId> {
        let url = self.url(workspace, &format!("projects/{}/tasks", request.project_id));
        let body = TaskBody {
            name: &request.name,
            estimate: request.estimate.as_deref(),
        };
        let created: WireId = self.http.post(&url, &self.admin, &body)?;
        Ok(created.id)
    }

    fn create_time_entry(
        &self,
        workspace: &Workspace,
        request: &NewTimeEntry,
    ) -> ApiResult<DestId> {
        let body = TimeEntryBody {
            start: timestamp(request.start),
            end: timestamp(request.end),
            billable: request.billable,
            description: &request.description,
            project_id: request.project_id.as_deref(),
            task_id: request.task_id.as_deref(),
            tag_ids: &request.tag_ids,
        };
        let created: WireId = match self.keys.get(&request.user_id) {
            Some(own_key) => self
                .http
                .post(&self.url(workspace, "time-entries"), own_key, &body)?,
            None => {
                let url = self.url(workspace, &format!("user/{}/time-entries", request.user_id));
                self.http.post(&url, &self.admin, &body)?
            }
        };
        Ok(created.id)
    }

    fn archive_project(&self, workspace: &Workspace, project_id: &str) -> ApiResult<()> {
        let url = self.url(workspace, &format!("projects/{project_id}"));
        self.http.put(&url, &self.admin, &ArchiveBody { archived: true })
    }

    fn delete_entity(&self, workspace: &Workspace, target: &EntityRef) -> ApiResult<()> {
        let path = match target.kind {
            EntityKind::Client => format!("clients/{}", target.id),
            EntityKind::Tag => format!("tags/{}", target.id),
            EntityKind::TimeEntry => format!("time-entries/{}", target.id),
            EntityKind::Task => {
                let project = target.parent.as_deref().ok_or_else(|| ApiError::Rejected {
                    status: 400,
                    message: format!("task {} has no project reference", target.id),
                })?;
                format!("projects/{project}/tasks/{}", target.id)
            }
            EntityKind::Project => {
                // Active projects cannot be deleted.
                self.archive_project(workspace, &target.id)?;
                format!("projects/{}", target.id)
            }
            EntityKind::User | EntityKind::Group => {
                return Err(ApiError::Rejected {
                    status: 400,
                    message: format!("{}s cannot be deleted", target.kind),
                });
            }
        };
        self.http.delete(&self.url(workspace, &path), &self.admin)
    }

    fn resolve_user_by_email(
        &self,
        workspace: &Workspace,
        email: &str,
    ) -> ApiResult<Option<DestId>> {
        let wanted = normalize_email(email);
        let listed: Vec<WireUser> = self.http.get(
            &self.url(workspace, "users"),
            &self.admin,
            &[("email", wanted.clone())],
        )?;
        Ok(listed
            .into_iter()
            .find(|u| normalize_email(&u.email) == wanted)
            .map(|u| u.id))
    }
}
