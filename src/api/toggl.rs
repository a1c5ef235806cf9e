//! Source binding for Toggl Track (API v9 for workspace data, Reports API
//! v3 for time entries).

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::http::{Auth, Transport};
use super::{ApiError, ApiResult, SourceApi};
use crate::model::{
    ProjectMember, SourceClient, SourceGroup, SourceId, SourceProject, SourceTag, SourceTask,
    SourceTimeEntry, SourceUser, TimeWindow, Workspace,
};

pub const API_BASE: &str = "https://api.track.toggl.com/api/v9";
pub const REPORTS_BASE: &str = "https://api.track.toggl.com/reports/api/v3";

/// Report queries are split into spans no longer than this.
const REPORT_SPAN_DAYS: i64 = 300;
const REPORT_PAGE_SIZE: usize = 50;
const TASK_PAGE_SIZE: usize = 200;

#[derive(Debug, Deserialize)]
struct WireWorkspace {
    id: u64,
    name: String,
    #[serde(default)]
    admin: bool,
}

#[derive(Debug, Deserialize)]
struct WireNamed {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireProject {
    id: u64,
    name: String,
    #[serde(default)]
    client_id: Option<u64>,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    billable: Option<bool>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct WireProjectUser {
    project_id: u64,
    user_id: u64,
    #[serde(default)]
    manager: bool,
}

#[derive(Debug, Deserialize)]
struct WireProjectGroup {
    project_id: u64,
    group_id: u64,
}

#[derive(Debug, Deserialize)]
struct WireTaskPage {
    #[serde(default)]
    data: Vec<WireTask>,
}

#[derive(Debug, Deserialize)]
struct WireTask {
    id: u64,
    name: String,
    project_id: u64,
    #[serde(default)]
    estimated_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: u64,
    email: String,
    #[serde(default)]
    fullname: String,
}

#[derive(Debug, Serialize)]
struct ReportQuery {
    start_date: NaiveDate,
    end_date: NaiveDate,
    first_row_number: u64,
    page_size: usize,
}

/// One report row groups entries sharing user, project, task and description.
#[derive(Debug, Deserialize)]
struct WireReportRow {
    user_id: u64,
    #[serde(default)]
    project_id: Option<u64>,
    #[serde(default)]
    task_id: Option<u64>,
    #[serde(default)]
    billable: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tag_ids: Vec<u64>,
    #[serde(default)]
    time_entries: Vec<WireReportEntry>,
}

#[derive(Debug, Deserialize)]
struct WireReportEntry {
    id: u64,
    start: DateTime<FixedOffset>,
    #[serde(default)]
    stop: Option<DateTime<FixedOffset>>,
}

impl WireProject {
    fn into_source(self, members: Vec<ProjectMember>, group_ids: Vec<SourceId>) -> SourceProject {
        SourceProject {
            id: self.id,
            name: self.name,
            client_id: self.client_id,
            is_public: !self.is_private,
            billable: self.billable.unwrap_or(false),
            color: self.color,
            archived: !self.active,
            members,
            group_ids,
        }
    }
}

impl From<WireTask> for SourceTask {
    fn from(task: WireTask) -> Self {
        Self {
            id: task.id,
            name: task.name,
            project_id: task.project_id,
            estimated_seconds: task.estimated_seconds.unwrap_or(0),
        }
    }
}

impl From<WireUser> for SourceUser {
    fn from(user: WireUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.fullname,
        }
    }
}

impl WireReportRow {
    fn into_entries(self) -> impl Iterator<Item = SourceTimeEntry> {
        let description = self.description.unwrap_or_default();
        self.time_entries.into_iter().map(move |entry| SourceTimeEntry {
            id: entry.id,
            user_id: self.user_id,
            start: entry.start,
            end: entry.stop,
            billable: self.billable,
            description: description.clone(),
            project_id: self.project_id,
            task_id: self.task_id,
            tag_ids: self.tag_ids.clone(),
        })
    }
}

pub struct TogglClient {
    http: Transport,
    auth: Auth,
    api_base: String,
    reports_base: String,
}

impl TogglClient {
    pub fn new(api_token: &str, http: Transport) -> Self {
        Self {
            http,
            auth: Auth::basic(api_token, "api_token"),
            api_base: API_BASE.to_string(),
            reports_base: REPORTS_BASE.to_string(),
        }
    }

    fn workspace_id(workspace: &Workspace) -> ApiResult<u64> {
        workspace
            .id
            .parse()
            .map_err(|_| ApiError::Decode(format!("workspace id '{}' is not numeric", workspace.id)))
    }

    fn workspace_url(&self, workspace: &Workspace, path: &str) -> ApiResult<String> {
        Ok(format!(
            "{}/workspaces/{}/{path}",
            self.api_base,
            Self::workspace_id(workspace)?
        ))
    }

    fn memberships(&self, workspace: &Workspace) -> ApiResult<HashMap<SourceId, Vec<ProjectMember>>> {
        let url = self.workspace_url(workspace, "project_users")?;
        let rows: Vec<WireProjectUser> = self.http.get(&url, &self.auth, &[])?;
        let mut by_project: HashMap<SourceId, Vec<ProjectMember>> = HashMap::new();
        for row in rows {
            by_project.entry(row.project_id).or_default().push(ProjectMember {
                user_id: row.user_id,
                manager: row.manager,
            });
        }
        Ok(by_project)
    }

    fn project_groups(&self, workspace: &Workspace) -> ApiResult<HashMap<SourceId, Vec<SourceId>>> {
        let url = self.workspace_url(workspace, "project_groups")?;
        let rows: Option<Vec<WireProjectGroup>> = self.http.get(&url, &self.auth, &[])?;
        let mut by_project: HashMap<SourceId, Vec<SourceId>> = HashMap::new();
        for row in rows.unwrap_or_default() {
            by_project.entry(row.project_id).or_default().push(row.group_id);
        }
        Ok(by_project)
    }

    fn report_span(
        &self,
        url: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> ApiResult<Vec<SourceTimeEntry>> {
        let mut entries = Vec::new();
        let mut first_row_number = 1;
        loop {
            let query = ReportQuery {
                start_date,
                end_date,
                first_row_number,
                page_size: REPORT_PAGE_SIZE,
            };
            let response = self.http.send("POST", url, &self.auth, &[], Some(&query))?;
            let next = response
                .header("X-Next-Row-Number")
                .and_then(|value| value.trim().parse::<u64>().ok());
            let rows: Vec<WireReportRow> = response
                .into_json()
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            entries.extend(rows.into_iter().flat_map(WireReportRow::into_entries));
            tracing::debug!(%start_date, %end_date, fetched = entries.len(), "report page");
            match next {
                Some(row) if row > first_row_number => first_row_number = row,
                _ => return Ok(entries),
            }
        }
    }
}

/// Date ranges covering `window`, padded by a day on each side because the
/// report API filters by calendar date in the account's time zone.
fn report_spans(window: &TimeWindow, today: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let earliest = NaiveDate::from_ymd_opt(2006, 1, 1).unwrap_or(NaiveDate::MIN);
    let first = window.start.date_naive().max(earliest) - Duration::days(1);
    let last = window.end.map_or(today, |end| end.date_naive()) + Duration::days(1);

    let mut spans = Vec::new();
    let mut start = first;
    while start <= last {
        let end = (start + Duration::days(REPORT_SPAN_DAYS - 1)).min(last);
        spans.push((start, end));
        start = end + Duration::days(1);
    }
    spans
}

impl SourceApi for TogglClient {
    fn workspaces(&self) -> ApiResult<Vec<Workspace>> {
        let url = format!("{}/me/workspaces", self.api_base);
        let listed: Vec<WireWorkspace> = self.http.get(&url, &self.auth, &[])?;
        Ok(listed
            .into_iter()
            .filter(|w| w.admin)
            .map(|w| Workspace {
                id: w.id.to_string(),
                name: w.name,
            })
            .collect())
    }

    fn list_clients(&self, workspace: &Workspace) -> ApiResult<Vec<SourceClient>> {
        let url = self.workspace_url(workspace, "clients")?;
        let listed: Option<Vec<WireNamed>> = self.http.get(&url, &self.auth, &[])?;
        Ok(listed
            .unwrap_or_default()
            .into_iter()
            .map(|c| SourceClient {
                id: c.id,
                name: c.name,
            })
            .collect())
    }

    fn list_tags(&self, workspace: &Workspace) -> ApiResult<Vec<SourceTag>> {
        let url = self.workspace_url(workspace, "tags")?;
        let listed: Option<Vec<WireNamed>> = self.http.get(&url, &self.auth, &[])?;
        Ok(listed
            .unwrap_or_default()
            .into_iter()
            .map(|t| SourceTag {
                id: t.id,
                name: t.name,
            })
            .collect())
    }

    fn list_groups(&self, workspace: &Workspace) -> ApiResult<Vec<SourceGroup>> {
        let url = self.workspace_url(workspace, "groups")?;
        let listed: Option<Vec<WireNamed>> = self.http.get(&url, &self.auth, &[])?;
        Ok(listed
            .unwrap_or_default()
            .into_iter()
            .map(|g| SourceGroup {
                id: g.id,
                name: g.name,
            })
            .collect())
    }

    fn list_projects(&self, workspace: &Workspace) -> ApiResult<Vec<SourceProject>> {
        let url = self.workspace_url(workspace, "projects")?;
        let query = [("active", "both".to_string())];
        let listed: Option<Vec<WireProject>> = self.http.get(&url, &self.auth, &query)?;
        let mut members = self.memberships(workspace)?;
        // Groups are a paid feature; without them projects are simply unshared.
        let mut groups = match self.project_groups(workspace) {
            Ok(groups) => groups,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::warn!(workspace = %workspace.name, error = %err, "project groups unavailable");
                HashMap::new()
            }
        };
        Ok(listed
            .unwrap_or_default()
            .into_iter()
            .map(|p| {
                let project_members = members.remove(&p.id).unwrap_or_default();
                let group_ids = groups.remove(&p.id).unwrap_or_default();
                p.into_source(project_members, group_ids)
            })
            .collect())
    }

    fn list_tasks(&self, workspace: &Workspace) -> ApiResult<Vec<SourceTask>> {
        let url = self.workspace_url(workspace, "tasks")?;
        super::http::paged(TASK_PAGE_SIZE, |page| {
            let query = [
                ("page", page.to_string()),
                ("per_page", TASK_PAGE_SIZE.to_string()),
                ("active", "both".to_string()),
            ];
            let listed: WireTaskPage = self.http.get(&url, &self.auth, &query)?;
            Ok(listed.data.into_iter().map(SourceTask::from).collect())
        })
    }

    fn list_users(&self, workspace: &Workspace) -> ApiResult<Vec<SourceUser>> {
        let url = self.workspace_url(workspace, "users")?;
        let listed: Vec<WireUser> = self.http.get(&url, &self.auth, &[])?;
        Ok(listed.into_iter().map(SourceUser::from).collect())
    }

    fn list_time_entries(
        &self,
        workspace: &Workspace,
        window: &TimeWindow,
    ) -> ApiResult<Vec<SourceTimeEntry>> {
        let url = format!(
            "{}/workspace/{}/search/time_entries",
            self.reports_base,
            Self::workspace_id(workspace)?
        );
        let mut entries = Vec::new();
        for (start, end) in report_spans(window, Utc::now().date_naive()) {
            tracing::info!(workspace = %workspace.name, %start, %end, "fetching time entries");
            entries.extend(self.report_span(&url, start, end)?);
        }
        // Padded spans overlap the window edges; keep exactly the window.
        entries.retain(|e| window.contains(e.start.with_timezone(&Utc)));
        entries.sort_by_key(|e| e.id);
        entries.dedup_by_key(|e| e.id);
        Ok(entries)
    }
}
