//! In-memory implementations of both capability traits.
//!
//! Used by the test suite and handy for exercising the engine without
//! network access. The destination side behaves like the real service
//! where it matters to the engine: it assigns fresh ids, rejects tasks and
//! entries that reference unknown or archived projects, and counts every
//! mutating call.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use super::{ApiError, ApiResult, DestinationApi, SourceApi, normalize_email};
use crate::model::{
    DestClient, DestGroup, DestId, DestProject, DestTag, DestTask, DestTimeEntry, DestUser,
    EntityKind, EntityRef, NewClient, NewGroup, NewProject, NewTag, NewTask, NewTimeEntry,
    SourceClient, SourceGroup, SourceProject, SourceTag, SourceTask, SourceTimeEntry, SourceUser,
    TimeWindow, Workspace,
};
use crate::translate::to_utc;

/// Contents of one source workspace.
#[derive(Debug, Clone, Default)]
pub struct SourceWorkspace {
    pub workspace: Workspace,
    pub clients: Vec<SourceClient>,
    pub tags: Vec<SourceTag>,
    pub groups: Vec<SourceGroup>,
    pub projects: Vec<SourceProject>,
    pub tasks: Vec<SourceTask>,
    pub users: Vec<SourceUser>,
    pub time_entries: Vec<SourceTimeEntry>,
}

impl SourceWorkspace {
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workspace: Workspace {
                id: id.into(),
                name: name.into(),
            },
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySource {
    workspaces: Vec<SourceWorkspace>,
    failures: HashMap<(String, EntityKind), ApiError>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace(mut self, workspace: SourceWorkspace) -> Self {
        self.workspaces.push(workspace);
        self
    }

    /// Make every listing of `kind` in the named workspace fail with `error`.
    pub fn fail_list(mut self, workspace: &str, kind: EntityKind, error: ApiError) -> Self {
        self.failures.insert((workspace.to_string(), kind), error);
        self
    }

    fn lookup(&self, workspace: &Workspace, kind: EntityKind) -> ApiResult<&SourceWorkspace> {
        if let Some(error) = self.failures.get(&(workspace.name.clone(), kind)) {
            return Err(error.clone());
        }
        self.workspaces
            .iter()
            .find(|w| w.workspace.id == workspace.id)
            .ok_or(ApiError::NotFound)
    }
}

impl SourceApi for MemorySource {
    fn workspaces(&self) -> ApiResult<Vec<Workspace>> {
        Ok(self.workspaces.iter().map(|w| w.workspace.clone()).collect())
    }

    fn list_clients(&self, workspace: &Workspace) -> ApiResult<Vec<SourceClient>> {
        Ok(self.lookup(workspace, EntityKind::Client)?.clients.clone())
    }

    fn list_tags(&self, workspace: &Workspace) -> ApiResult<Vec<SourceTag>> {
        Ok(self.lookup(workspace, EntityKind::Tag)?.tags.clone())
    }

    fn list_groups(&self, workspace: &Workspace) -> ApiResult<Vec<SourceGroup>> {
        Ok(self.lookup(workspace, EntityKind::Group)?.groups.clone())
    }

    fn list_projects(&self, workspace: &Workspace) -> ApiResult<Vec<SourceProject>> {
        Ok(self.lookup(workspace, EntityKind::Project)?.projects.clone())
    }

    fn list_tasks(&self, workspace: &Workspace) -> ApiResult<Vec<SourceTask>> {
        Ok(self.lookup(workspace, EntityKind::Task)?.tasks.clone())
    }

    fn list_users(&self, workspace: &Workspace) -> ApiResult<Vec<SourceUser>> {
        Ok(self.lookup(workspace, EntityKind::User)?.users.clone())
    }

    fn list_time_entries(
        &self,
        workspace: &Workspace,
        window: &TimeWindow,
    ) -> ApiResult<Vec<SourceTimeEntry>> {
        Ok(self
            .lookup(workspace, EntityKind::TimeEntry)?
            .time_entries
            .iter()
            .filter(|entry| window.contains(to_utc(entry.start)))
            .cloned()
            .collect())
    }
}

/// Contents of one destination workspace.
#[derive(Debug, Clone, Default)]
pub struct DestWorkspace {
    pub workspace: Workspace,
    pub clients: Vec<DestClient>,
    pub tags: Vec<DestTag>,
    pub groups: Vec<DestGroup>,
    pub projects: Vec<DestProject>,
    pub tasks: Vec<DestTask>,
    pub users: Vec<DestUser>,
    pub time_entries: Vec<DestTimeEntry>,
    /// Groups each project was shared with at creation.
    pub project_groups: HashMap<DestId, Vec<DestId>>,
}

impl DestWorkspace {
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workspace: Workspace {
                id: id.into(),
                name: name.into(),
            },
            ..Self::default()
        }
    }

    pub fn with_user(mut self, id: impl Into<DestId>, email: impl Into<String>) -> Self {
        self.users.push(DestUser {
            id: id.into(),
            email: email.into(),
            name: String::new(),
        });
        self
    }

    fn project(&self, id: &str) -> ApiResult<&DestProject> {
        self.projects
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| rejected(format!("project {id} does not exist")))
    }

    fn usable_project(&self, id: &str) -> ApiResult<()> {
        if self.project(id)?.archived {
            return Err(rejected(format!("project {id} is archived")));
        }
        Ok(())
    }
}

fn rejected(message: String) -> ApiError {
    ApiError::Rejected {
        status: 400,
        message,
    }
}

fn new_id() -> DestId {
    Uuid::new_v4().simple().to_string()
}

/// Counts of mutating calls, per entity kind where it applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub created: HashMap<EntityKind, usize>,
    pub archived: usize,
    pub deleted: HashMap<EntityKind, usize>,
}

impl CallCounts {
    pub fn created(&self, kind: EntityKind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_created(&self) -> usize {
        self.created.values().sum()
    }

    pub fn deleted(&self, kind: EntityKind) -> usize {
        self.deleted.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct DestState {
    workspaces: Vec<DestWorkspace>,
    calls: CallCounts,
    list_failures: HashMap<(String, EntityKind), ApiError>,
    create_failures: HashMap<(EntityKind, String), ApiError>,
}

impl DestState {
    fn workspace(&self, workspace: &Workspace, kind: EntityKind) -> ApiResult<&DestWorkspace> {
        if let Some(error) = self.list_failures.get(&(workspace.name.clone(), kind)) {
            return Err(error.clone());
        }
        self.workspaces
            .iter()
            .find(|w| w.workspace.id == workspace.id)
            .ok_or(ApiError::NotFound)
    }

    fn workspace_mut(&mut self, workspace: &Workspace) -> ApiResult<&mut DestWorkspace> {
        self.workspaces
            .iter_mut()
            .find(|w| w.workspace.id == workspace.id)
            .ok_or(ApiError::NotFound)
    }

    /// Checks an injected failure for the record labelled `label`, then
    /// counts the call.
    fn begin_create(&mut self, kind: EntityKind, label: &str) -> ApiResult<()> {
        if let Some(error) = self.create_failures.get(&(kind, label.to_string())) {
            return Err(error.clone());
        }
        *self.calls.created.entry(kind).or_default() += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDestination {
    state: Mutex<DestState>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace(self, workspace: DestWorkspace) -> Self {
        self.lock().workspaces.push(workspace);
        self
    }

    /// Make every listing of `kind` in the named workspace fail with `error`.
    pub fn fail_list(self, workspace: &str, kind: EntityKind, error: ApiError) -> Self {
        self.lock()
            .list_failures
            .insert((workspace.to_string(), kind), error);
        self
    }

    /// Make creation of the record labelled `label` fail with `error`. The
    /// label is the name for named kinds and the description for entries.
    pub fn fail_create(self, kind: EntityKind, label: &str, error: ApiError) -> Self {
        self.lock()
            .create_failures
            .insert((kind, label.to_string()), error);
        self
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls.clone()
    }

    /// Current contents of the workspace with the given name.
    pub fn contents(&self, name: &str) -> Option<DestWorkspace> {
        self.lock()
            .workspaces
            .iter()
            .find(|w| w.workspace.name == name)
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, DestState> {
        // A panic while holding the lock only happens in a failing test.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DestinationApi for MemoryDestination {
    fn workspaces(&self) -> ApiResult<Vec<Workspace>> {
        Ok(self
            .lock()
            .workspaces
            .iter()
            .map(|w| w.workspace.clone())
            .collect())
    }

    fn list_clients(&self, workspace: &Workspace) -> ApiResult<Vec<DestClient>> {
        Ok(self.lock().workspace(workspace, EntityKind::Client)?.clients.clone())
    }

    fn list_tags(&self, workspace: &Workspace) -> ApiResult<Vec<DestTag>> {
        Ok(self.lock().workspace(workspace, EntityKind::Tag)?.tags.clone())
    }

    fn list_groups(&self, workspace: &Workspace) -> ApiResult<Vec<DestGroup>> {
        Ok(self.lock().workspace(workspace, EntityKind::Group)?.groups.clone())
    }

    fn list_projects(&self, workspace: &Workspace) -> ApiResult<Vec<DestProject>> {
        Ok(self.lock().workspace(workspace, EntityKind::Project)?.projects.clone())
    }

    fn list_tasks(&self, workspace: &Workspace) -> ApiResult<Vec<DestTask>> {
        Ok(self.lock().workspace(workspace, EntityKind::Task)?.tasks.clone())
    }

    fn list_users(&self, workspace: &Workspace) -> ApiResult<Vec<DestUser>> {
        Ok(self.lock().workspace(workspace, EntityKind::User)?.users.clone())
    }

    fn list_time_entries(
        &self,
        workspace: &Workspace,
        window: &TimeWindow,
    ) -> ApiResult<Vec<DestTimeEntry>> {
        Ok(self
            .lock()
            .workspace(workspace, EntityKind::TimeEntry)?
            .time_entries
            .iter()
            .filter(|entry| window.contains(to_utc(entry.start)))
            .cloned()
            .collect())
    }

    fn create_client(&self, workspace: &Workspace, request: &NewClient) -> ApiResult<DestId> {
        let mut state = self.lock();
        state.begin_create(EntityKind::Client, &request.name)?;
        let id = new_id();
        state.workspace_mut(workspace)?.clients.push(DestClient {
            id: id.clone(),
            name: request.name.clone(),
        });
        Ok(id)
    }

    fn create_tag(&self, workspace: &Workspace, request: &NewTag) -> ApiResult<DestId> {
        let mut state = self.lock();
        state.begin_create(EntityKind::Tag, &request.name)?;
        let id = new_id();
        state.workspace_mut(workspace)?.tags.push(DestTag {
            id: id.clone(),
            name: request.name.clone(),
        });
        Ok(id)
    }

    fn create_group(&self, workspace: &Workspace, request: &NewGroup) -> ApiResult<DestId> {
        let mut state = self.lock();
        state.begin_create(EntityKind::Group, &request.name)?;
        let id = new_id();
        state.workspace_mut(workspace)?.groups.push(DestGroup {
            id: id.clone(),
            name: request.name.clone(),
        });
        Ok(id)
    }

    fn create_project(&self, workspace: &Workspace, request: &NewProject) -> ApiResult<DestId> {
        let mut state = self.lock();
        state.begin_create(EntityKind::Project, &request.name)?;
        let target = state.workspace_mut(workspace)?;
        if let Some(client_id) = &request.client_id
            && !target.clients.iter().any(|c| &c.id == client_id)
        {
            return Err(rejected(format!("client {client_id} does not exist")));
        }
        if let Some(missing) = request
            .group_ids
            .iter()
            .find(|group_id| !target.groups.iter().any(|g| &g.id == *group_id))
        {
            return Err(rejected(format!("group {missing} does not exist")));
        }
        let id = new_id();
        target.projects.push(DestProject {
            id: id.clone(),
            name: request.name.clone(),
            client_id: request.client_id.clone(),
            archived: false,
        });
        target
            .project_groups
            .insert(id.clone(), request.group_ids.clone());
        Ok(id)
    }

    fn create_task(&self, workspace: &Workspace, request: &NewTask) -> ApiResult<DestId> {
        let mut state = self.lock();
        state.begin_create(EntityKind::Task, &request.name)?;
        let target = state.workspace_mut(workspace)?;
        target.usable_project(&request.project_id)?;
        let id = new_id();
        target.tasks.push(DestTask {
            id: id.clone(),
            project_id: request.project_id.clone(),
            name: request.name.clone(),
        });
        Ok(id)
    }

    fn create_time_entry(
        &self,
        workspace: &Workspace,
        request: &NewTimeEntry,
    ) -> ApiResult<DestId> {
        let mut state = self.lock();
        state.begin_create(EntityKind::TimeEntry, &request.description)?;
        let target = state.workspace_mut(workspace)?;
        if !target.users.iter().any(|u| u.id == request.user_id) {
            return Err(rejected(format!("user {} is not a member", request.user_id)));
        }
        if let Some(project_id) = &request.project_id {
            target.usable_project(project_id)?;
        }
        let id = new_id();
        target.time_entries.push(DestTimeEntry {
            id: id.clone(),
            user_id: request.user_id.clone(),
            start: request.start.fixed_offset(),
            end: Some(request.end.fixed_offset()),
            billable: request.billable,
            description: request.description.clone(),
            project_id: request.project_id.clone(),
            task_id: request.task_id.clone(),
            tag_ids: request.tag_ids.clone(),
        });
        Ok(id)
    }

    fn archive_project(&self, workspace: &Workspace, project_id: &str) -> ApiResult<()> {
        let mut state = self.lock();
        let target = state.workspace_mut(workspace)?;
        let project = target
            .projects
            .iter_mut()
            .find(|p| p.id == project_id)
            .ok_or(ApiError::NotFound)?;
        project.archived = true;
        state.calls.archived += 1;
        Ok(())
    }

    fn delete_entity(&self, workspace: &Workspace, target: &EntityRef) -> ApiResult<()> {
        let mut state = self.lock();
        let contents = state.workspace_mut(workspace)?;
        let before = match target.kind {
            EntityKind::Client => remove_by_id(&mut contents.clients, &target.id, |c| &c.id),
            EntityKind::Tag => remove_by_id(&mut contents.tags, &target.id, |t| &t.id),
            EntityKind::Project => {
                contents.project_groups.remove(&target.id);
                remove_by_id(&mut contents.projects, &target.id, |p| &p.id)
            }
            EntityKind::Task => remove_by_id(&mut contents.tasks, &target.id, |t| &t.id),
            EntityKind::TimeEntry => {
                remove_by_id(&mut contents.time_entries, &target.id, |e| &e.id)
            }
            EntityKind::User | EntityKind::Group => {
                return Err(rejected(format!("{}s cannot be deleted", target.kind)));
            }
        };
        if !before {
            return Err(ApiError::NotFound);
        }
        *state.calls.deleted.entry(target.kind).or_default() += 1;
        Ok(())
    }

    fn resolve_user_by_email(
        &self,
        workspace: &Workspace,
        email: &str,
    ) -> ApiResult<Option<DestId>> {
        let wanted = normalize_email(email);
        Ok(self
            .lock()
            .workspace(workspace, EntityKind::User)?
            .users
            .iter()
            .find(|u| normalize_email(&u.email) == wanted)
            .map(|u| u.id.clone()))
    }
}

fn remove_by_id<T>(items: &mut Vec<T>, id: &str, key: impl Fn(&T) -> &DestId) -> bool {
    let before = items.len();
    items.retain(|item| key(item) != id);
    items.len() != before
}
