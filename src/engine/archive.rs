//! Archive finalizer: mirror the source's archived flag onto destination
//! projects once their entries have been migrated. Only ever archives.

use std::collections::HashSet;

use serde::Serialize;

use crate::api::{DestinationApi, SourceApi};
use crate::error::MigrateError;
use crate::identity::IdentityMap;
use crate::model::{DestId, EntityKind, Workspace};
use crate::runlog::RunLog;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    /// Archived source projects considered.
    pub candidates: usize,
    pub archived: usize,
    pub already_archived: usize,
    pub unmatched: usize,
    pub failed: usize,
}

pub fn finalize(
    source: &dyn SourceApi,
    dest: &dyn DestinationApi,
    source_ws: &Workspace,
    dest_ws: &Workspace,
    map: &IdentityMap,
    dry_run: bool,
    log: &mut RunLog,
) -> Result<ArchiveReport, (ArchiveReport, MigrateError)> {
    let mut report = ArchiveReport::default();
    let kind = EntityKind::Project;

    let listed = source
        .list_projects(source_ws)
        .map_err(|e| MigrateError::api("listing source projects", e))
        .and_then(|projects| {
            dest.list_projects(dest_ws)
                .map(|existing| (projects, existing))
                .map_err(|e| MigrateError::api("listing destination projects", e))
        });
    let (projects, existing) = match listed {
        Ok(lists) => lists,
        Err(err) if err.is_fatal() => return Err((report, err)),
        Err(err) => {
            log.fail(kind, None, format!("archive finalizer: {err}"));
            report.failed += 1;
            return Ok(report);
        }
    };

    let dest_for = |source_id, name: &str| -> Option<DestId> {
        map.get(kind, source_id).cloned().or_else(|| {
            existing
                .iter()
                .find(|p| p.name.trim() == name.trim())
                .map(|p| p.id.clone())
        })
    };

    // A destination project shared with a still-active source project stays active.
    let active: HashSet<DestId> = projects
        .iter()
        .filter(|p| !p.archived)
        .filter_map(|p| dest_for(p.id, &p.name))
        .collect();

    for project in projects.iter().filter(|p| p.archived) {
        report.candidates += 1;
        let Some(dest_id) = dest_for(project.id, &project.name) else {
            log.warn(
                kind,
                Some(project.id),
                format!("archived project '{}' has no destination counterpart", project.name),
            );
            report.unmatched += 1;
            continue;
        };
        if active.contains(&dest_id) {
            log.warn(
                kind,
                Some(project.id),
                format!("destination project {dest_id} also backs an active source project; left active"),
            );
            continue;
        }

        match existing.iter().find(|p| p.id == dest_id) {
            Some(current) if current.archived => {
                report.already_archived += 1;
                continue;
            }
            Some(_) => {}
            // Planned ids only exist in a dry run.
            None if dry_run => {}
            None => {
                log.warn(
                    kind,
                    Some(project.id),
                    format!("destination project {dest_id} no longer exists"),
                );
                report.unmatched += 1;
                continue;
            }
        }

        if dry_run {
            report.archived += 1;
            continue;
        }
        match dest.archive_project(dest_ws, &dest_id) {
            Ok(()) => {
                tracing::info!(source_id = project.id, %dest_id, "project archived");
                report.archived += 1;
            }
            Err(e) if e.is_fatal() => {
                report.failed += 1;
                return Err((report, MigrateError::api(format!("archiving project {dest_id}"), e)));
            }
            Err(e) => {
                log.fail(kind, Some(project.id), format!("archiving {dest_id} failed: {e}"));
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        candidates = report.candidates,
        archived = report.archived,
        already_archived = report.already_archived,
        "archive finalizer finished"
    );
    Ok(report)
}
