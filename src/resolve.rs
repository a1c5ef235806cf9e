//! Existence checks against the destination's current contents.
//!
//! The snapshot is the source of truth for idempotency: it is rebuilt from
//! the destination on every run, and every entity created during the run is
//! added to it so repeated source records do not produce duplicates either.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::model::{
    DestClient, DestGroup, DestId, DestProject, DestTag, DestTask, DestTimeEntry, NewClient,
    NewGroup, NewProject, NewTag, NewTask, NewTimeEntry,
};
use crate::translate::to_utc;

/// Outcome of checking one candidate against the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A matching entity exists; creation is skipped.
    Existing(DestId),
    /// The match is an archived project; it is not treated as a usable target.
    ArchivedProject(DestId),
    /// Nothing matches; the candidate must be created.
    Missing,
}

impl Resolution {
    pub fn exists(&self) -> bool {
        !matches!(self, Self::Missing)
    }
}

/// Duplicate-detection key for time entries. Timestamps are always UTC
/// with whole-second precision so that offsets reported by either system
/// never cause a mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub user_id: DestId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: String,
}

impl EntryKey {
    pub fn for_request(request: &NewTimeEntry) -> Self {
        Self {
            user_id: request.user_id.clone(),
            start: request.start,
            end: request.end,
            description: request.description.trim().to_string(),
        }
    }

    pub fn for_existing(entry: &DestTimeEntry) -> Self {
        let start = to_utc(entry.start);
        Self {
            user_id: entry.user_id.clone(),
            start,
            end: entry.end.map(to_utc).unwrap_or(start),
            description: entry.description.trim().to_string(),
        }
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_string()
}

/// Per-workspace view of the destination, one instance per workspace run.
#[derive(Debug, Default)]
pub struct DestinationSnapshot {
    clients: HashMap<String, DestId>,
    tags: HashMap<String, DestId>,
    groups: HashMap<String, DestId>,
    projects: HashMap<String, DestId>,
    archived_projects: HashSet<DestId>,
    tasks: HashMap<(DestId, String), DestId>,
    entries: HashMap<EntryKey, DestId>,
}

impl DestinationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_clients(&mut self, clients: &[DestClient]) {
        self.clients = clients
            .iter()
            .map(|client| (name_key(&client.name), client.id.clone()))
            .collect();
    }

    pub fn load_tags(&mut self, tags: &[DestTag]) {
        self.tags = tags
            .iter()
            .map(|tag| (name_key(&tag.name), tag.id.clone()))
            .collect();
    }

    pub fn load_groups(&mut self, groups: &[DestGroup]) {
        self.groups = groups
            .iter()
            .map(|group| (name_key(&group.name), group.id.clone()))
            .collect();
    }

    pub fn load_projects(&mut self, projects: &[DestProject]) {
        self.projects.clear();
        self.archived_projects.clear();
        // An active project wins over an archived one with the same name.
        for project in projects.iter().filter(|p| p.archived) {
            self.projects
                .insert(name_key(&project.name), project.id.clone());
            self.archived_projects.insert(project.id.clone());
        }
        for project in projects.iter().filter(|p| !p.archived) {
            self.projects
                .insert(name_key(&project.name), project.id.clone());
        }
    }

    pub fn load_tasks(&mut self, tasks: &[DestTask]) {
        self.tasks = tasks
            .iter()
            .map(|task| {
                (
                    (task.project_id.clone(), name_key(&task.name)),
                    task.id.clone(),
                )
            })
            .collect();
    }

    pub fn load_time_entries(&mut self, entries: &[DestTimeEntry]) {
        self.entries = entries
            .iter()
            .map(|entry| (EntryKey::for_existing(entry), entry.id.clone()))
            .collect();
    }

    pub fn resolve_client(&self, candidate: &NewClient) -> Resolution {
        found(self.clients.get(&name_key(&candidate.name)))
    }

    pub fn resolve_tag(&self, candidate: &NewTag) -> Resolution {
        found(self.tags.get(&name_key(&candidate.name)))
    }

    pub fn resolve_group(&self, candidate: &NewGroup) -> Resolution {
        found(self.groups.get(&name_key(&candidate.name)))
    }

    pub fn resolve_project(&self, candidate: &NewProject) -> Resolution {
        match self.projects.get(&name_key(&candidate.name)) {
            Some(id) if self.archived_projects.contains(id) => Resolution::ArchivedProject(id.clone()),
            other => found(other),
        }
    }

    pub fn resolve_task(&self, candidate: &NewTask) -> Resolution {
        found(
            self.tasks
                .get(&(candidate.project_id.clone(), name_key(&candidate.name))),
        )
    }

    pub fn resolve_time_entry(&self, candidate: &NewTimeEntry) -> Resolution {
        found(self.entries.get(&EntryKey::for_request(candidate)))
    }

    pub fn record_client(&mut self, id: DestId, created: &NewClient) {
        self.clients.insert(name_key(&created.name), id);
    }

    pub fn record_tag(&mut self, id: DestId, created: &NewTag) {
        self.tags.insert(name_key(&created.name), id);
    }

    pub fn record_group(&mut self, id: DestId, created: &NewGroup) {
        self.groups.insert(name_key(&created.name), id);
    }

    pub fn record_project(&mut self, id: DestId, created: &NewProject) {
        self.projects.insert(name_key(&created.name), id);
    }

    pub fn record_task(&mut self, id: DestId, created: &NewTask) {
        self.tasks
            .insert((created.project_id.clone(), name_key(&created.name)), id);
    }

    pub fn record_time_entry(&mut self, id: DestId, created: &NewTimeEntry) {
        self.entries.insert(EntryKey::for_request(created), id);
    }

    pub fn archived_projects(&self) -> &HashSet<DestId> {
        &self.archived_projects
    }
}

fn found(id: Option<&DestId>) -> Resolution {
    id.cloned().map_or(Resolution::Missing, Resolution::Existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};

    fn dest_entry(start: &str, end: &str, description: &str) -> DestTimeEntry {
        DestTimeEntry {
            id: "e-1".into(),
            user_id: "u-1".into(),
            start: DateTime::parse_from_rfc3339(start).unwrap(),
            end: Some(DateTime::parse_from_rfc3339(end).unwrap()),
            billable: false,
            description: description.into(),
            project_id: None,
            task_id: None,
            tag_ids: vec![],
        }
    }

    fn request(start: DateTime<Utc>, end: DateTime<Utc>, description: &str) -> NewTimeEntry {
        NewTimeEntry {
            user_id: "u-1".into(),
            start,
            end,
            billable: false,
            description: description.into(),
            project_id: Some("p-1".into()),
            task_id: None,
            tag_ids: vec![],
        }
    }

    #[test]
    fn names_match_after_trimming() {
        let mut snapshot = DestinationSnapshot::new();
        snapshot.load_clients(&[DestClient {
            id: "c-1".into(),
            name: "Acme ".into(),
        }]);

        let resolution = snapshot.resolve_client(&NewClient {
            name: "Acme".into(),
        });
        assert_eq!(resolution, Resolution::Existing("c-1".into()));
        assert!(
            !snapshot
                .resolve_client(&NewClient {
                    name: "acme".into()
                })
                .exists()
        );
    }

    #[test]
    fn entries_match_across_timezone_offsets() {
        let mut snapshot = DestinationSnapshot::new();
        snapshot.load_time_entries(&[dest_entry(
            "2024-03-01T09:00:00+02:00",
            "2024-03-01T10:00:00+02:00",
            "standup",
        )]);

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(
            snapshot.resolve_time_entry(&request(start, end, "standup")),
            Resolution::Existing("e-1".into())
        );
        assert_eq!(
            snapshot.resolve_time_entry(&request(start, end, "retro")),
            Resolution::Missing
        );
    }

    #[test]
    fn sub_second_precision_does_not_break_matching() {
        let mut snapshot = DestinationSnapshot::new();
        snapshot.load_time_entries(&[dest_entry(
            "2024-03-01T07:00:00.900Z",
            "2024-03-01T08:00:00Z",
            "standup",
        )]);

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        assert!(snapshot.resolve_time_entry(&request(start, end, "standup")).exists());
    }

    #[test]
    fn archived_project_is_reported_instead_of_matched() {
        let mut snapshot = DestinationSnapshot::new();
        snapshot.load_projects(&[
            DestProject {
                id: "p-live".into(),
                name: "Live".into(),
                client_id: None,
                archived: false,
            },
            DestProject {
                id: "p-old".into(),
                name: "Old".into(),
                client_id: None,
                archived: true,
            },
        ]);

        let candidate = |name: &str| NewProject {
            name: name.into(),
            client_id: None,
            is_public: true,
            billable: false,
            color: None,
            memberships: vec![],
            group_ids: vec![],
        };
        assert_eq!(
            snapshot.resolve_project(&candidate("Live")),
            Resolution::Existing("p-live".into())
        );
        assert_eq!(
            snapshot.resolve_project(&candidate("Old")),
            Resolution::ArchivedProject("p-old".into())
        );
        assert!(snapshot.archived_projects().contains("p-old"));
    }

    #[test]
    fn tasks_are_scoped_to_their_project() {
        let mut snapshot = DestinationSnapshot::new();
        snapshot.load_tasks(&[DestTask {
            id: "t-1".into(),
            project_id: "p-1".into(),
            name: "Design".into(),
        }]);

        let same = NewTask {
            project_id: "p-1".into(),
            name: "Design".into(),
            estimate: None,
        };
        let other_project = NewTask {
            project_id: "p-2".into(),
            ..same.clone()
        };
        assert!(snapshot.resolve_task(&same).exists());
        assert!(!snapshot.resolve_task(&other_project).exists());
    }

    #[test]
    fn recorded_creations_are_found_afterwards() {
        let mut snapshot = DestinationSnapshot::new();
        let tag = NewTag {
            name: "urgent".into(),
        };
        assert_eq!(snapshot.resolve_tag(&tag), Resolution::Missing);
        snapshot.record_tag("tag-1".into(), &tag);
        assert_eq!(snapshot.resolve_tag(&tag), Resolution::Existing("tag-1".into()));
    }
}
