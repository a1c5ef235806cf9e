//! Source record → destination creation request.
//!
//! Translators are pure: they read the identity map and user directory and
//! either produce a request (plus any warnings worth logging) or explain why
//! the record cannot be mapped.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset, SubsecRound, Utc};
use thiserror::Error;

use crate::api::normalize_email;
use crate::identity::IdentityMap;
use crate::model::{
    DestId, DestUser, EntityKind, Membership, NewClient, NewGroup, NewProject, NewTag, NewTask,
    NewTimeEntry, SourceClient, SourceGroup, SourceId, SourceProject, SourceTag, SourceTask,
    SourceTimeEntry, SourceUser,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unmappable {
    #[error("record has an empty name")]
    EmptyName,

    #[error("project {0} was never migrated")]
    MissingProject(SourceId),

    #[error("project {0} is archived on the destination")]
    ArchivedProject(SourceId),

    #[error(
        "user {user_id} ({}) has no destination match and no fallback user is set",
        .email.as_deref().unwrap_or("unknown email")
    )]
    MissingUser {
        user_id: SourceId,
        email: Option<String>,
    },
}

/// A successful translation, with warnings the caller must log.
#[derive(Debug, Clone, PartialEq)]
pub struct Translated<T> {
    pub request: T,
    pub notes: Vec<String>,
}

impl<T> Translated<T> {
    fn clean(request: T) -> Self {
        Self {
            request,
            notes: Vec::new(),
        }
    }
}

pub type Translation<T> = std::result::Result<Translated<T>, Unmappable>;

/// Email-keyed join between source users and destination users.
#[derive(Debug, Default, Clone)]
pub struct UserDirectory {
    source_emails: HashMap<SourceId, String>,
    dest_by_email: HashMap<String, DestId>,
}

impl UserDirectory {
    pub fn new(source: &[SourceUser], dest: &[DestUser]) -> Self {
        let source_emails = source
            .iter()
            .map(|user| (user.id, user.email.clone()))
            .collect();
        let dest_by_email = dest
            .iter()
            .map(|user| (normalize_email(&user.email), user.id.clone()))
            .collect();
        Self {
            source_emails,
            dest_by_email,
        }
    }

    pub fn source_email(&self, user_id: SourceId) -> Option<&str> {
        self.source_emails.get(&user_id).map(String::as_str)
    }

    pub fn dest_for_email(&self, email: &str) -> Option<&DestId> {
        self.dest_by_email.get(&normalize_email(email))
    }

    pub fn dest_for_source(&self, user_id: SourceId) -> Option<&DestId> {
        self.source_email(user_id)
            .and_then(|email| self.dest_for_email(email))
    }

    /// Register a destination user discovered after the directory was built.
    pub fn learn(&mut self, email: &str, dest_id: DestId) {
        self.dest_by_email.insert(normalize_email(email), dest_id);
    }
}

fn clean_name(name: &str) -> Result<String, Unmappable> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(Unmappable::EmptyName)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn translate_client(client: &SourceClient) -> Translation<NewClient> {
    Ok(Translated::clean(NewClient {
        name: clean_name(&client.name)?,
    }))
}

pub fn translate_tag(tag: &SourceTag) -> Translation<NewTag> {
    Ok(Translated::clean(NewTag {
        name: clean_name(&tag.name)?,
    }))
}

pub fn translate_group(group: &SourceGroup) -> Translation<NewGroup> {
    Ok(Translated::clean(NewGroup {
        name: clean_name(&group.name)?,
    }))
}

pub fn translate_project(
    project: &SourceProject,
    map: &IdentityMap,
    users: &UserDirectory,
) -> Translation<NewProject> {
    let name = clean_name(&project.name)?;
    let mut notes = Vec::new();

    let client_id = match project.client_id {
        Some(source_client) => {
            let mapped = map.get(EntityKind::Client, source_client).cloned();
            if mapped.is_none() {
                notes.push(format!(
                    "client {source_client} was not migrated; project created without a client"
                ));
            }
            mapped
        }
        None => None,
    };

    let mut memberships = Vec::new();
    let mut seen = HashSet::new();
    for member in &project.members {
        match users.dest_for_source(member.user_id) {
            Some(dest_user) => {
                if seen.insert(dest_user.clone()) {
                    memberships.push(Membership {
                        user_id: dest_user.clone(),
                        manager: member.manager,
                    });
                }
            }
            None => {
                let email = users.source_email(member.user_id).unwrap_or("unknown email");
                notes.push(format!(
                    "member {} ({email}) has no destination user; left out of project membership",
                    member.user_id
                ));
            }
        }
    }

    let mut group_ids = Vec::new();
    for source_group in &project.group_ids {
        match map.get(EntityKind::Group, *source_group) {
            Some(dest) => {
                if !group_ids.contains(dest) {
                    group_ids.push(dest.clone());
                }
            }
            None => notes.push(format!(
                "group {source_group} was not migrated; project not shared with it"
            )),
        }
    }

    Ok(Translated {
        request: NewProject {
            name,
            client_id,
            is_public: project.is_public,
            billable: project.billable,
            color: project.color.clone(),
            memberships,
            group_ids,
        },
        notes,
    })
}

pub fn translate_task(
    task: &SourceTask,
    map: &IdentityMap,
    archived_projects: &HashSet<DestId>,
) -> Translation<NewTask> {
    let name = clean_name(&task.name)?;
    let project_id = map
        .get(EntityKind::Project, task.project_id)
        .ok_or(Unmappable::MissingProject(task.project_id))?;
    if archived_projects.contains(project_id) {
        return Err(Unmappable::ArchivedProject(task.project_id));
    }

    Ok(Translated::clean(NewTask {
        project_id: project_id.clone(),
        name,
        estimate: format_estimate(task.estimated_seconds),
    }))
}

/// Join a source user to a destination user by email.
pub fn translate_user(user: &SourceUser, users: &UserDirectory) -> Translation<DestId> {
    users
        .dest_for_email(&user.email)
        .cloned()
        .map(Translated::clean)
        .ok_or_else(|| Unmappable::MissingUser {
            user_id: user.id,
            email: Some(user.email.clone()),
        })
}

/// Everything a time-entry translation reads besides the record itself.
pub struct EntryContext<'a> {
    pub map: &'a IdentityMap,
    pub users: &'a UserDirectory,
    pub archived_projects: &'a HashSet<DestId>,
    pub fallback_user: Option<&'a DestId>,
}

pub fn translate_time_entry(
    entry: &SourceTimeEntry,
    ctx: &EntryContext<'_>,
) -> Translation<NewTimeEntry> {
    let mut notes = Vec::new();

    let user_id = match ctx.map.get(EntityKind::User, entry.user_id) {
        Some(user) => user.clone(),
        None => {
            let email = ctx.users.source_email(entry.user_id).map(str::to_string);
            let Some(fallback) = ctx.fallback_user else {
                return Err(Unmappable::MissingUser {
                    user_id: entry.user_id,
                    email,
                });
            };
            notes.push(format!(
                "user {} ({}) has no destination match; assigned to fallback user {fallback}",
                entry.user_id,
                email.as_deref().unwrap_or("unknown email")
            ));
            fallback.clone()
        }
    };

    let mut project_id = None;
    if let Some(source_project) = entry.project_id {
        match ctx.map.get(EntityKind::Project, source_project) {
            Some(dest) if ctx.archived_projects.contains(dest) => notes.push(format!(
                "project {source_project} is archived on the destination; entry created without a project"
            )),
            Some(dest) => project_id = Some(dest.clone()),
            None => notes.push(format!(
                "project {source_project} was not migrated; entry created without a project"
            )),
        }
    }

    let mut task_id = None;
    if let Some(source_task) = entry.task_id {
        if project_id.is_none() {
            notes.push(format!(
                "task {source_task} dropped along with its project; entry created without a task"
            ));
        } else {
            match ctx.map.get(EntityKind::Task, source_task) {
                Some(dest) => task_id = Some(dest.clone()),
                None => notes.push(format!(
                    "task {source_task} was not migrated; entry created without a task"
                )),
            }
        }
    }

    let mut tag_ids = Vec::new();
    for source_tag in &entry.tag_ids {
        match ctx.map.get(EntityKind::Tag, *source_tag) {
            Some(dest) => {
                if !tag_ids.contains(dest) {
                    tag_ids.push(dest.clone());
                }
            }
            None => notes.push(format!("tag {source_tag} was not migrated; dropped from entry")),
        }
    }

    let start = to_utc(entry.start);
    let end = match entry.end {
        Some(end) => to_utc(end),
        None => {
            notes.push("entry has no end time; stored as zero-length".to_string());
            start
        }
    };

    Ok(Translated {
        request: NewTimeEntry {
            user_id,
            start,
            end,
            billable: entry.billable,
            description: entry.description.trim().to_string(),
            project_id,
            task_id,
            tag_ids,
        },
        notes,
    })
}

/// Canonical instant used for every timestamp comparison: UTC, whole seconds.
pub fn to_utc(instant: DateTime<FixedOffset>) -> DateTime<Utc> {
    instant.with_timezone(&Utc).trunc_subsecs(0)
}

/// Render a duration in seconds as an ISO 8601 duration (`PT1H30M15S`).
/// Zero means "no estimate".
pub fn format_estimate(seconds: u64) -> Option<String> {
    if seconds == 0 {
        return None;
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 || hours > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    out.push_str(&format!("{secs}S"));
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProjectMember;

    fn source_project(client_id: Option<SourceId>, members: Vec<ProjectMember>) -> SourceProject {
        SourceProject {
            id: 10,
            name: "Website".into(),
            client_id,
            is_public: true,
            billable: true,
            color: Some("#06aaf5".into()),
            archived: false,
            members,
            group_ids: vec![],
        }
    }

    fn entry(user_id: SourceId) -> SourceTimeEntry {
        SourceTimeEntry {
            id: 500,
            user_id,
            start: DateTime::parse_from_rfc3339("2024-03-01T09:00:00.250+02:00").unwrap(),
            end: Some(DateTime::parse_from_rfc3339("2024-03-01T10:00:00+02:00").unwrap()),
            billable: false,
            description: "  standup ".into(),
            project_id: Some(10),
            task_id: Some(20),
            tag_ids: vec![30, 31],
        }
    }

    #[test]
    fn client_and_tag_pass_names_through() {
        let client = SourceClient {
            id: 1,
            name: " Acme ".into(),
        };
        assert_eq!(translate_client(&client).unwrap().request.name, "Acme");

        let tag = SourceTag {
            id: 2,
            name: "".into(),
        };
        assert_eq!(translate_tag(&tag).unwrap_err(), Unmappable::EmptyName);
    }

    #[test]
    fn project_without_migrated_client_is_kept_with_a_warning() {
        let translated = translate_project(
            &source_project(Some(1), vec![]),
            &IdentityMap::new(),
            &UserDirectory::default(),
        )
        .unwrap();
        assert_eq!(translated.request.client_id, None);
        assert_eq!(translated.notes.len(), 1);
        assert!(translated.notes[0].contains("client 1"));
    }

    #[test]
    fn project_resolves_client_and_filters_members_to_destination_users() {
        let mut map = IdentityMap::new();
        map.put(EntityKind::Client, 1, "c-acme");
        let users = UserDirectory::new(
            &[
                SourceUser {
                    id: 100,
                    email: "ada@example.com".into(),
                    name: "Ada".into(),
                },
                SourceUser {
                    id: 101,
                    email: "ghost@example.com".into(),
                    name: "Ghost".into(),
                },
            ],
            &[DestUser {
                id: "u-ada".into(),
                email: "ADA@example.com".into(),
                name: "Ada".into(),
            }],
        );
        let project = source_project(
            Some(1),
            vec![
                ProjectMember {
                    user_id: 100,
                    manager: true,
                },
                ProjectMember {
                    user_id: 101,
                    manager: false,
                },
            ],
        );

        let translated = translate_project(&project, &map, &users).unwrap();
        assert_eq!(translated.request.client_id.as_deref(), Some("c-acme"));
        assert_eq!(
            translated.request.memberships,
            vec![Membership {
                user_id: "u-ada".into(),
                manager: true
            }]
        );
        assert_eq!(translated.notes.len(), 1);
        assert!(translated.notes[0].contains("ghost@example.com"));
    }

    #[test]
    fn task_requires_a_migrated_live_project() {
        let task = SourceTask {
            id: 20,
            name: "Design".into(),
            project_id: 10,
            estimated_seconds: 5400,
        };
        let mut archived = HashSet::new();
        let mut map = IdentityMap::new();
        assert_eq!(
            translate_task(&task, &map, &archived).unwrap_err(),
            Unmappable::MissingProject(10)
        );

        map.put(EntityKind::Project, 10, "p-web");
        let translated = translate_task(&task, &map, &archived).unwrap();
        assert_eq!(translated.request.project_id, "p-web");
        assert_eq!(translated.request.estimate.as_deref(), Some("PT1H30M0S"));

        archived.insert("p-web".to_string());
        assert_eq!(
            translate_task(&task, &map, &archived).unwrap_err(),
            Unmappable::ArchivedProject(10)
        );
    }

    #[test]
    fn entry_maps_every_reference_and_normalizes_to_utc() {
        let mut map = IdentityMap::new();
        map.put(EntityKind::User, 100, "u-ada");
        map.put(EntityKind::Project, 10, "p-web");
        map.put(EntityKind::Task, 20, "t-design");
        map.put(EntityKind::Tag, 30, "tag-a");
        let archived = HashSet::new();
        let users = UserDirectory::default();
        let ctx = EntryContext {
            map: &map,
            users: &users,
            archived_projects: &archived,
            fallback_user: None,
        };

        let translated = translate_time_entry(&entry(100), &ctx).unwrap();
        let request = translated.request;
        assert_eq!(request.user_id, "u-ada");
        assert_eq!(request.project_id.as_deref(), Some("p-web"));
        assert_eq!(request.task_id.as_deref(), Some("t-design"));
        assert_eq!(request.tag_ids, vec!["tag-a".to_string()]);
        assert_eq!(request.description, "standup");
        assert_eq!(request.start.to_rfc3339(), "2024-03-01T07:00:00+00:00");
        assert_eq!(request.end.to_rfc3339(), "2024-03-01T08:00:00+00:00");
        assert_eq!(translated.notes.len(), 1, "unmapped tag 31 is reported");
    }

    #[test]
    fn entry_for_unknown_user_uses_fallback_or_is_unmappable() {
        let map = IdentityMap::new();
        let archived = HashSet::new();
        let users = UserDirectory::new(
            &[SourceUser {
                id: 100,
                email: "ada@example.com".into(),
                name: String::new(),
            }],
            &[],
        );
        let mut ctx = EntryContext {
            map: &map,
            users: &users,
            archived_projects: &archived,
            fallback_user: None,
        };

        let err = translate_time_entry(&entry(100), &ctx).unwrap_err();
        assert_eq!(
            err,
            Unmappable::MissingUser {
                user_id: 100,
                email: Some("ada@example.com".into())
            }
        );

        let fallback = "u-fallback".to_string();
        ctx.fallback_user = Some(&fallback);
        let translated = translate_time_entry(&entry(100), &ctx).unwrap();
        assert_eq!(translated.request.user_id, "u-fallback");
        assert!(
            translated
                .notes
                .iter()
                .any(|note| note.contains("fallback user u-fallback"))
        );
    }

    #[test]
    fn entry_targeting_archived_project_drops_project_and_task() {
        let mut map = IdentityMap::new();
        map.put(EntityKind::User, 100, "u-ada");
        map.put(EntityKind::Project, 10, "p-old");
        map.put(EntityKind::Task, 20, "t-old");
        let archived: HashSet<DestId> = ["p-old".to_string()].into_iter().collect();
        let users = UserDirectory::default();
        let ctx = EntryContext {
            map: &map,
            users: &users,
            archived_projects: &archived,
            fallback_user: None,
        };

        let translated = translate_time_entry(&entry(100), &ctx).unwrap();
        assert_eq!(translated.request.project_id, None);
        assert_eq!(translated.request.task_id, None);
        assert!(translated.notes.iter().any(|note| note.contains("archived")));
        assert!(
            translated
                .notes
                .iter()
                .any(|note| note.contains("task 20 dropped along with its project"))
        );
    }

    #[test]
    fn entry_on_unmigrated_project_reports_the_dropped_task() {
        let mut map = IdentityMap::new();
        map.put(EntityKind::User, 100, "u-ada");
        map.put(EntityKind::Task, 20, "t-design");
        let archived = HashSet::new();
        let users = UserDirectory::default();
        let ctx = EntryContext {
            map: &map,
            users: &users,
            archived_projects: &archived,
            fallback_user: None,
        };
        let mut plain = entry(100);
        plain.tag_ids.clear();

        let translated = translate_time_entry(&plain, &ctx).unwrap();
        assert_eq!(translated.request.task_id, None);
        assert_eq!(translated.notes.len(), 2);
        assert!(translated.notes[0].contains("project 10 was not migrated"));
        assert!(translated.notes[1].contains("task 20 dropped"));
    }

    #[test]
    fn project_groups_map_through_the_identity_map() {
        let mut map = IdentityMap::new();
        map.put(EntityKind::Group, 40, "g-design");
        let mut project = source_project(None, vec![]);
        project.group_ids = vec![40, 40, 41];

        let translated = translate_project(&project, &map, &UserDirectory::default()).unwrap();
        assert_eq!(translated.request.group_ids, vec!["g-design".to_string()]);
        assert_eq!(translated.notes.len(), 1);
        assert!(translated.notes[0].contains("group 41"));

        let group = SourceGroup {
            id: 40,
            name: " Designers ".into(),
        };
        assert_eq!(translate_group(&group).unwrap().request.name, "Designers");
    }

    #[test]
    fn running_entry_becomes_zero_length() {
        let mut map = IdentityMap::new();
        map.put(EntityKind::User, 100, "u-ada");
        let archived = HashSet::new();
        let users = UserDirectory::default();
        let ctx = EntryContext {
            map: &map,
            users: &users,
            archived_projects: &archived,
            fallback_user: None,
        };
        let mut running = entry(100);
        running.end = None;
        running.project_id = None;
        running.tag_ids.clear();

        let translated = translate_time_entry(&running, &ctx).unwrap();
        assert_eq!(translated.request.start, translated.request.end);
    }

    #[test]
    fn estimates_render_like_iso_durations() {
        assert_eq!(format_estimate(0), None);
        assert_eq!(format_estimate(45).as_deref(), Some("PT45S"));
        assert_eq!(format_estimate(125).as_deref(), Some("PT2M5S"));
        assert_eq!(format_estimate(3600).as_deref(), Some("PT1H0M0S"));
        assert_eq!(format_estimate(5415).as_deref(), Some("PT1H30M15S"));
    }

    #[test]
    fn user_translation_joins_on_email() {
        let users = UserDirectory::new(
            &[],
            &[DestUser {
                id: "u-1".into(),
                email: "Bob@Example.com".into(),
                name: String::new(),
            }],
        );
        let bob = SourceUser {
            id: 5,
            email: "bob@example.com".into(),
            name: String::new(),
        };
        assert_eq!(translate_user(&bob, &users).unwrap().request, "u-1");
    }
}
