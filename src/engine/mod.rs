//! Run driver: picks the workspaces to process and runs each one in its
//! own execution unit with its own identity map, snapshot and log.

pub mod archive;
pub mod migrate;
pub mod purge;
pub mod wipe;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::api::{DestinationApi, SourceApi};
use crate::error::{MigrateError, Result};
use crate::model::{EntityKind, TimeWindow, Workspace};
use crate::runlog::{LogRecord, RunLog};

pub use archive::ArchiveReport;
pub use migrate::{PassReport, PassState};
pub use purge::PurgeReport;
pub use wipe::WipeReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Migrate,
    /// Migration passes followed by the archive finalizer.
    MigrateAndArchive,
    /// Delete everything in the destination workspace and nothing else.
    Wipe,
    /// Delete the time entries of selected users and nothing else.
    DeleteEntries,
}

impl RunMode {
    /// Wipe wins over every other flag, then entry deletion, then archiving.
    pub fn from_flags(do_archive: bool, wipe_all: bool, delete_entries: bool) -> Self {
        match (wipe_all, delete_entries, do_archive) {
            (true, _, _) => Self::Wipe,
            (false, true, _) => Self::DeleteEntries,
            (false, false, true) => Self::MigrateAndArchive,
            (false, false, false) => Self::Migrate,
        }
    }

    /// Modes that delete from the destination instead of migrating into it.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Wipe | Self::DeleteEntries)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    pub window: TimeWindow,
    /// Exact, case-sensitive workspace names. `None` selects every source workspace.
    pub workspaces: Option<Vec<String>>,
    pub fallback_email: Option<String>,
    pub skip: BTreeSet<EntityKind>,
    /// Users whose entries `RunMode::DeleteEntries` removes, by email.
    pub delete_entries_of: Vec<String>,
    pub dry_run: bool,
    pub parallelism: usize,
}

impl RunOptions {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            mode: RunMode::Migrate,
            window,
            workspaces: None,
            fallback_email: None,
            skip: BTreeSet::new(),
            delete_entries_of: Vec::new(),
            dry_run: false,
            parallelism: 1,
        }
    }

    pub fn runs(&self, kind: EntityKind) -> bool {
        !self.skip.contains(&kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum WorkspaceStatus {
    Completed,
    /// A fatal error ended the workspace early; later passes never ran.
    Aborted { code: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceReport {
    pub workspace: String,
    #[serde(flatten)]
    pub status: WorkspaceStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub passes: Vec<PassReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wipe: Option<WipeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purge: Option<PurgeReport>,
}

impl WorkspaceReport {
    fn new(workspace: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            status: WorkspaceStatus::Completed,
            passes: Vec::new(),
            archive: None,
            wipe: None,
            purge: None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.status, WorkspaceStatus::Aborted { .. })
    }

    pub fn pass(&self, kind: EntityKind) -> Option<&PassReport> {
        self.passes.iter().find(|p| p.kind == kind)
    }

    fn abort(&mut self, err: &MigrateError) {
        self.status = WorkspaceStatus::Aborted {
            code: err.code().to_string(),
            message: err.to_string(),
        };
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub dry_run: bool,
    pub workspaces: Vec<WorkspaceReport>,
    #[serde(skip)]
    pub log: Vec<LogRecord>,
}

impl RunReport {
    pub fn has_aborted(&self) -> bool {
        self.workspaces.iter().any(WorkspaceReport::is_aborted)
    }

    pub fn workspace(&self, name: &str) -> Option<&WorkspaceReport> {
        self.workspaces.iter().find(|w| w.workspace == name)
    }
}

/// A selected workspace name with its counterpart on each side, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceTarget {
    pub name: String,
    pub source: Option<Workspace>,
    pub dest: Option<Workspace>,
}

/// Pair source and destination workspaces by exact name.
pub fn select_workspaces(
    allow_list: Option<&[String]>,
    source: &[Workspace],
    dest: &[Workspace],
) -> Vec<WorkspaceTarget> {
    let names: Vec<String> = match allow_list {
        Some(names) => names.to_vec(),
        None => source.iter().map(|w| w.name.clone()).collect(),
    };

    let mut seen = BTreeSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .map(|name| WorkspaceTarget {
            source: source.iter().find(|w| w.name == name).cloned(),
            dest: dest.iter().find(|w| w.name == name).cloned(),
            name,
        })
        .collect()
}

/// Run every selected workspace and collect their reports.
pub fn run(
    source: &dyn SourceApi,
    dest: &dyn DestinationApi,
    options: &RunOptions,
) -> Result<RunReport> {
    let source_workspaces = source
        .workspaces()
        .map_err(|e| MigrateError::api("listing source workspaces", e))?;
    let dest_workspaces = dest
        .workspaces()
        .map_err(|e| MigrateError::api("listing destination workspaces", e))?;
    let targets = select_workspaces(
        options.workspaces.as_deref(),
        &source_workspaces,
        &dest_workspaces,
    );
    tracing::info!(
        mode = ?options.mode,
        dry_run = options.dry_run,
        workspaces = targets.len(),
        "starting run"
    );

    let workers = options.parallelism.clamp(1, targets.len().max(1));
    let next = AtomicUsize::new(0);
    let mut finished: Vec<(usize, WorkspaceReport, RunLog)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(target) = targets.get(index) else {
                            break;
                        };
                        let (report, log) = run_workspace(source, dest, target, options);
                        done.push((index, report, log));
                    }
                    done
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    });
    finished.sort_by_key(|(index, _, _)| *index);

    let mut workspaces = Vec::with_capacity(finished.len());
    let mut log = Vec::new();
    for (_, report, workspace_log) in finished {
        workspaces.push(report);
        log.extend(workspace_log.into_records());
    }

    Ok(RunReport {
        mode: options.mode,
        dry_run: options.dry_run,
        workspaces,
        log,
    })
}

fn run_workspace(
    source: &dyn SourceApi,
    dest: &dyn DestinationApi,
    target: &WorkspaceTarget,
    options: &RunOptions,
) -> (WorkspaceReport, RunLog) {
    let mut report = WorkspaceReport::new(&target.name);
    let mut log = RunLog::new(&target.name);

    let Some(dest_ws) = &target.dest else {
        let err = MigrateError::WorkspaceNotFound {
            name: target.name.clone(),
            side: "destination",
        };
        report.abort(&err);
        log.status(format!("aborted: {err}"));
        return (report, log);
    };

    if options.mode == RunMode::Wipe {
        match wipe::wipe_workspace(dest, dest_ws, options.dry_run, &mut log) {
            Ok(wiped) => report.wipe = Some(wiped),
            Err((wiped, err)) => {
                report.wipe = Some(wiped);
                report.abort(&err);
            }
        }
        finish(&report, &mut log);
        return (report, log);
    }

    if options.mode == RunMode::DeleteEntries {
        let emails = &options.delete_entries_of;
        match purge::delete_user_entries(dest, dest_ws, emails, options.dry_run, &mut log) {
            Ok(purged) => report.purge = Some(purged),
            Err((purged, err)) => {
                report.purge = Some(purged);
                report.abort(&err);
            }
        }
        finish(&report, &mut log);
        return (report, log);
    }

    let Some(source_ws) = &target.source else {
        let err = MigrateError::WorkspaceNotFound {
            name: target.name.clone(),
            side: "source",
        };
        report.abort(&err);
        log.status(format!("aborted: {err}"));
        return (report, log);
    };

    let outcome = migrate::Migration::new(source, dest, source_ws, dest_ws, options, &mut log).run();
    report.passes = outcome.passes;
    if let Some(err) = outcome.fatal {
        report.abort(&err);
    } else if options.mode == RunMode::MigrateAndArchive && !passes_clean(&report.passes) {
        log.warn(
            EntityKind::Project,
            None,
            "archive finalizer skipped: not every pass finished cleanly",
        );
    } else if options.mode == RunMode::MigrateAndArchive {
        match archive::finalize(source, dest, source_ws, dest_ws, &outcome.map, options.dry_run, &mut log) {
            Ok(archived) => report.archive = Some(archived),
            Err((archived, err)) => {
                report.archive = Some(archived);
                report.abort(&err);
            }
        }
    }

    finish(&report, &mut log);
    (report, log)
}

/// Archiving is only safe once every pass that ran has written all its records.
fn passes_clean(passes: &[PassReport]) -> bool {
    passes.iter().all(|p| match p.state {
        PassState::Skipped => true,
        PassState::Done => p.failed == 0,
        _ => false,
    })
}

fn finish(report: &WorkspaceReport, log: &mut RunLog) {
    match &report.status {
        WorkspaceStatus::Completed => log.status("completed"),
        WorkspaceStatus::Aborted { message, .. } => log.status(format!("aborted: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws(id: &str, name: &str) -> Workspace {
        Workspace {
            id: id.into(),
            name: name.into(),
        }
    }

    #[test]
    fn wipe_flag_overrides_archive() {
        assert_eq!(RunMode::from_flags(true, true, true), RunMode::Wipe);
        assert_eq!(RunMode::from_flags(true, false, true), RunMode::DeleteEntries);
        assert_eq!(RunMode::from_flags(true, false, false), RunMode::MigrateAndArchive);
        assert_eq!(RunMode::from_flags(false, false, false), RunMode::Migrate);
        assert!(RunMode::DeleteEntries.is_destructive());
        assert!(!RunMode::MigrateAndArchive.is_destructive());
    }

    #[test]
    fn finalizer_needs_every_pass_done_without_failures() {
        let mut passes: Vec<PassReport> = [EntityKind::Client, EntityKind::TimeEntry]
            .into_iter()
            .map(PassReport::new)
            .collect();
        passes[0].state = PassState::Skipped;
        passes[1].state = PassState::Done;
        assert!(passes_clean(&passes));

        passes[1].failed = 1;
        assert!(!passes_clean(&passes));

        passes[1].failed = 0;
        passes[1].state = PassState::Failed;
        assert!(!passes_clean(&passes));
    }

    #[test]
    fn selection_matches_names_case_sensitively() {
        let source = [ws("1", "Acme"), ws("2", "Side")];
        let dest = [ws("a", "acme"), ws("b", "Side")];
        let targets = select_workspaces(None, &source, &dest);

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].dest, None);
        assert_eq!(targets[1].dest, Some(ws("b", "Side")));
    }

    #[test]
    fn allow_list_restricts_and_dedups() {
        let source = [ws("1", "Acme"), ws("2", "Side")];
        let dest = [ws("a", "Acme"), ws("b", "Side")];
        let allow = vec!["Side".to_string(), "Side".to_string(), "Ghost".to_string()];
        let targets = select_workspaces(Some(&allow), &source, &dest);

        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Side", "Ghost"]);
        assert_eq!(targets[1].source, None);
    }

    #[test]
    fn skip_set_controls_passes() {
        let mut options = RunOptions::new(TimeWindow::unbounded());
        options.skip.insert(EntityKind::Tag);
        assert!(!options.runs(EntityKind::Tag));
        assert!(options.runs(EntityKind::Client));
    }
}
