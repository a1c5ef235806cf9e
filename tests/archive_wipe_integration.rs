use chrono::{DateTime, TimeZone, Utc};
use timeport::api::ApiError;
use timeport::api::memory::{DestWorkspace, MemoryDestination, MemorySource, SourceWorkspace};
use timeport::engine::{self, RunMode, RunOptions};
use timeport::model::{
    DestClient, DestProject, DestTag, DestTask, DestTimeEntry, EntityKind, SourceProject,
    SourceTimeEntry, SourceUser, TimeWindow,
};
use timeport::runlog::LogLevel;

fn january() -> TimeWindow {
    TimeWindow::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
    )
}

fn project(id: u64, name: &str, archived: bool) -> SourceProject {
    SourceProject {
        id,
        name: name.into(),
        client_id: None,
        is_public: true,
        billable: false,
        color: None,
        archived,
        members: vec![],
        group_ids: vec![],
    }
}

fn entry_on(id: u64, project_id: u64, start: &str, description: &str) -> SourceTimeEntry {
    let start = DateTime::parse_from_rfc3339(start).unwrap();
    SourceTimeEntry {
        id,
        user_id: 100,
        start,
        end: Some(start + chrono::Duration::hours(1)),
        billable: false,
        description: description.into(),
        project_id: Some(project_id),
        task_id: None,
        tag_ids: vec![],
    }
}

/// "Website" is live, "Legacy" is archived at the source, and "Old" is live
/// at the source but already archived at the destination.
fn archive_workspaces() -> (SourceWorkspace, DestWorkspace) {
    let mut src = SourceWorkspace::named("t1", "Acme");
    src.projects = vec![
        project(10, "Website", false),
        project(11, "Legacy", true),
        project(12, "Old", false),
    ];
    src.users.push(SourceUser {
        id: 100,
        email: "ada@example.com".into(),
        name: "Ada".into(),
    });
    src.time_entries = vec![
        entry_on(1, 10, "2024-01-02T09:00:00Z", "site work"),
        entry_on(2, 11, "2024-01-03T09:00:00Z", "legacy cleanup"),
        entry_on(3, 12, "2024-01-04T09:00:00Z", "old stuff"),
    ];

    let mut dst = DestWorkspace::named("c1", "Acme").with_user("u-ada", "ada@example.com");
    dst.projects.push(DestProject {
        id: "p-old".into(),
        name: "Old".into(),
        client_id: None,
        archived: true,
    });
    (src, dst)
}

fn archive_fixture() -> (MemorySource, MemoryDestination) {
    let (src, dst) = archive_workspaces();
    (
        MemorySource::new().with_workspace(src),
        MemoryDestination::new().with_workspace(dst),
    )
}

fn find_project<'a>(contents: &'a DestWorkspace, name: &str) -> &'a DestProject {
    contents
        .projects
        .iter()
        .find(|p| p.name == name)
        .unwrap_or_else(|| panic!("project {name} missing"))
}

#[test]
fn archive_mode_archives_after_entries_are_migrated() {
    let (source, dest) = archive_fixture();
    let mut options = RunOptions::new(january());
    options.mode = RunMode::from_flags(true, false, false);

    let report = engine::run(&source, &dest, &options).unwrap();
    assert!(!report.has_aborted());

    let contents = dest.contents("Acme").unwrap();
    let legacy = find_project(&contents, "Legacy");
    assert!(legacy.archived);
    assert!(!find_project(&contents, "Website").archived);
    assert!(find_project(&contents, "Old").archived);
    assert_eq!(dest.calls().archived, 1);

    // The legacy entry was written while its project was still active.
    let cleanup = contents
        .time_entries
        .iter()
        .find(|e| e.description == "legacy cleanup")
        .unwrap();
    assert_eq!(cleanup.project_id.as_ref(), Some(&legacy.id));

    // Entries on a project archived at the destination lose the project.
    let old = contents
        .time_entries
        .iter()
        .find(|e| e.description == "old stuff")
        .unwrap();
    assert_eq!(old.project_id, None);

    let archive = report.workspace("Acme").unwrap().archive.clone().unwrap();
    assert_eq!(archive.candidates, 1);
    assert_eq!(archive.archived, 1);
}

#[test]
fn failed_entry_pass_keeps_the_finalizer_from_archiving() {
    let (src, dst) = archive_workspaces();
    let failing = MemorySource::new().with_workspace(src.clone()).fail_list(
        "Acme",
        EntityKind::TimeEntry,
        ApiError::Transport("connection reset".into()),
    );
    let dest = MemoryDestination::new().with_workspace(dst);
    let mut options = RunOptions::new(january());
    options.mode = RunMode::from_flags(true, false, false);

    let report = engine::run(&failing, &dest, &options).unwrap();

    let workspace = report.workspace("Acme").unwrap();
    assert!(!workspace.is_aborted());
    assert!(workspace.archive.is_none());
    assert_eq!(dest.calls().archived, 0);
    assert!(!find_project(&dest.contents("Acme").unwrap(), "Legacy").archived);
    assert!(report.log.iter().any(|r| {
        r.level == LogLevel::Warning && r.message.contains("archive finalizer skipped")
    }));

    // A clean re-run writes the legacy entry first, then archives.
    let healthy = MemorySource::new().with_workspace(src);
    let report = engine::run(&healthy, &dest, &options).unwrap();

    assert!(report.workspace("Acme").unwrap().archive.is_some());
    let contents = dest.contents("Acme").unwrap();
    let legacy = find_project(&contents, "Legacy");
    assert!(legacy.archived);
    let cleanup = contents
        .time_entries
        .iter()
        .find(|e| e.description == "legacy cleanup")
        .unwrap();
    assert_eq!(cleanup.project_id.as_ref(), Some(&legacy.id));
}

#[test]
fn plain_migration_never_archives() {
    let (source, dest) = archive_fixture();

    let report = engine::run(&source, &dest, &RunOptions::new(january())).unwrap();

    assert_eq!(dest.calls().archived, 0);
    assert!(report.workspace("Acme").unwrap().archive.is_none());
    let contents = dest.contents("Acme").unwrap();
    assert!(!find_project(&contents, "Legacy").archived);
    assert!(find_project(&contents, "Old").archived);
}

#[test]
fn archived_destination_match_is_reported_as_warning() {
    let (source, dest) = archive_fixture();

    let report = engine::run(&source, &dest, &RunOptions::new(january())).unwrap();

    assert!(report.log.iter().any(|r| {
        r.kind == Some(EntityKind::Project)
            && r.source_id == Some(12)
            && r.level == LogLevel::Warning
    }));
    assert_eq!(dest.calls().created(EntityKind::Project), 2);
}

fn populated_dest() -> DestWorkspace {
    let mut dst = DestWorkspace::named("c1", "Acme")
        .with_user("u-ada", "ada@example.com")
        .with_user("u-ops", "ops@example.com");
    dst.clients.push(DestClient {
        id: "c-acme".into(),
        name: "Acme".into(),
    });
    dst.tags.push(DestTag {
        id: "t-billable".into(),
        name: "billable".into(),
    });
    dst.projects = vec![
        DestProject {
            id: "p-web".into(),
            name: "Website".into(),
            client_id: Some("c-acme".into()),
            archived: false,
        },
        DestProject {
            id: "p-old".into(),
            name: "Old".into(),
            client_id: None,
            archived: true,
        },
    ];
    dst.tasks.push(DestTask {
        id: "k-design".into(),
        project_id: "p-web".into(),
        name: "Design".into(),
    });
    // One entry inside the configured window and one far outside it.
    for (id, start) in [("e1", "2024-01-05T10:00:00Z"), ("e2", "2019-06-01T10:00:00+05:00")] {
        let start = DateTime::parse_from_rfc3339(start).unwrap();
        dst.time_entries.push(DestTimeEntry {
            id: id.into(),
            user_id: "u-ada".into(),
            start,
            end: Some(start + chrono::Duration::minutes(30)),
            billable: false,
            description: String::new(),
            project_id: Some("p-web".into()),
            task_id: Some("k-design".into()),
            tag_ids: vec!["t-billable".into()],
        });
    }
    dst
}

fn wipe_options() -> RunOptions {
    let mut options = RunOptions::new(january());
    options.mode = RunMode::from_flags(true, true, false);
    options.skip.insert(EntityKind::Project);
    options.fallback_email = Some("ops@example.com".into());
    options
}

#[test]
fn wipe_deletes_everything_and_creates_nothing() {
    let mut src = SourceWorkspace::named("t1", "Acme");
    src.projects.push(project(10, "Website", false));
    let source = MemorySource::new().with_workspace(src);
    let dest = MemoryDestination::new().with_workspace(populated_dest());

    let report = engine::run(&source, &dest, &wipe_options()).unwrap();

    assert_eq!(report.mode, RunMode::Wipe);
    let calls = dest.calls();
    assert_eq!(calls.total_created(), 0);
    assert_eq!(calls.archived, 0);
    assert_eq!(calls.deleted(EntityKind::TimeEntry), 2);
    assert_eq!(calls.deleted(EntityKind::Project), 2);

    let contents = dest.contents("Acme").unwrap();
    assert!(contents.clients.is_empty());
    assert!(contents.tags.is_empty());
    assert!(contents.projects.is_empty());
    assert!(contents.tasks.is_empty());
    assert!(contents.time_entries.is_empty());
    assert_eq!(contents.users.len(), 2);

    let workspace = report.workspace("Acme").unwrap();
    assert!(workspace.passes.is_empty());
    let wipe = workspace.wipe.as_ref().unwrap();
    assert_eq!(wipe.deleted(EntityKind::Task), 1);
    assert_eq!(wipe.deleted(EntityKind::Client), 1);
    assert_eq!(wipe.failed, 0);
}

#[test]
fn dry_run_wipe_only_counts() {
    let source = MemorySource::new().with_workspace(SourceWorkspace::named("t1", "Acme"));
    let dest = MemoryDestination::new().with_workspace(populated_dest());
    let mut options = wipe_options();
    options.dry_run = true;

    let report = engine::run(&source, &dest, &options).unwrap();

    assert_eq!(dest.calls().deleted(EntityKind::TimeEntry), 0);
    assert_eq!(dest.contents("Acme").unwrap().projects.len(), 2);
    let wipe = report.workspace("Acme").unwrap().wipe.clone().unwrap();
    assert_eq!(wipe.deleted(EntityKind::TimeEntry), 2);
    assert_eq!(wipe.deleted(EntityKind::Tag), 1);
}

#[test]
fn wipe_does_not_need_the_source_workspace() {
    let source = MemorySource::new();
    let dest = MemoryDestination::new().with_workspace(populated_dest());
    let mut options = wipe_options();
    options.workspaces = Some(vec!["Acme".into()]);

    let report = engine::run(&source, &dest, &options).unwrap();

    assert!(!report.has_aborted());
    assert!(dest.contents("Acme").unwrap().time_entries.is_empty());
}

#[test]
fn delete_entries_removes_only_the_named_users_entries() {
    let mut contents = populated_dest();
    let start = DateTime::parse_from_rfc3339("2024-01-06T10:00:00Z").unwrap();
    contents.time_entries.push(DestTimeEntry {
        id: "e-ops".into(),
        user_id: "u-ops".into(),
        start,
        end: Some(start + chrono::Duration::minutes(15)),
        billable: false,
        description: "on call".into(),
        project_id: None,
        task_id: None,
        tag_ids: vec![],
    });
    let source = MemorySource::new();
    let dest = MemoryDestination::new().with_workspace(contents);
    let mut options = RunOptions::new(january());
    options.mode = RunMode::from_flags(true, false, true);
    options.workspaces = Some(vec!["Acme".into()]);
    options.delete_entries_of = vec!["Ada@Example.com".into()];

    let report = engine::run(&source, &dest, &options).unwrap();

    assert_eq!(report.mode, RunMode::DeleteEntries);
    assert!(!report.has_aborted());
    let calls = dest.calls();
    assert_eq!(calls.total_created(), 0);
    assert_eq!(calls.archived, 0);
    assert_eq!(calls.deleted(EntityKind::TimeEntry), 2);

    let after = dest.contents("Acme").unwrap();
    let left: Vec<&str> = after.time_entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(left, ["e-ops"]);
    assert_eq!(after.projects.len(), 2);

    let workspace = report.workspace("Acme").unwrap();
    assert!(workspace.passes.is_empty());
    assert!(workspace.wipe.is_none());
    let purge = workspace.purge.as_ref().unwrap();
    assert_eq!(purge.deleted("ada@example.com"), 2);
    assert_eq!(purge.failed, 0);
}
