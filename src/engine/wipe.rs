//! Workspace wiper: delete every entry, task, project, tag and client in a
//! destination workspace, dependents first. Never creates anything.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::api::{ApiResult, DestinationApi};
use crate::error::MigrateError;
use crate::model::{EntityKind, EntityRef, TimeWindow, Workspace};
use crate::runlog::RunLog;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WipeReport {
    pub deleted: BTreeMap<EntityKind, usize>,
    pub failed: usize,
}

impl WipeReport {
    pub fn deleted(&self, kind: EntityKind) -> usize {
        self.deleted.get(&kind).copied().unwrap_or(0)
    }
}

/// Everything of one kind currently in the workspace.
fn list_refs(
    dest: &dyn DestinationApi,
    ws: &Workspace,
    kind: EntityKind,
) -> ApiResult<Vec<EntityRef>> {
    let refs = match kind {
        EntityKind::TimeEntry => dest
            .list_time_entries(ws, &TimeWindow::unbounded())?
            .into_iter()
            .map(|e| EntityRef::new(kind, e.id))
            .collect(),
        EntityKind::Task => dest
            .list_tasks(ws)?
            .into_iter()
            .map(|t| EntityRef::new(kind, t.id).with_parent(t.project_id))
            .collect(),
        EntityKind::Project => dest
            .list_projects(ws)?
            .into_iter()
            .map(|p| EntityRef::new(kind, p.id))
            .collect(),
        EntityKind::Tag => dest
            .list_tags(ws)?
            .into_iter()
            .map(|t| EntityRef::new(kind, t.id))
            .collect(),
        EntityKind::Client => dest
            .list_clients(ws)?
            .into_iter()
            .map(|c| EntityRef::new(kind, c.id))
            .collect(),
        EntityKind::User | EntityKind::Group => Vec::new(),
    };
    Ok(refs)
}

/// With `dry_run` the workspace is only listed and the counts say what
/// would have been deleted.
pub fn wipe_workspace(
    dest: &dyn DestinationApi,
    ws: &Workspace,
    dry_run: bool,
    log: &mut RunLog,
) -> Result<WipeReport, (WipeReport, MigrateError)> {
    let span = tracing::info_span!("wipe", workspace = %ws.name);
    let _guard = span.enter();
    let mut report = WipeReport::default();

    for kind in EntityKind::WIPE_ORDER {
        let targets = match list_refs(dest, ws, kind) {
            Ok(targets) => targets,
            Err(e) => {
                let err = MigrateError::api(format!("listing destination {kind} records"), e);
                if err.is_fatal() {
                    return Err((report, err));
                }
                log.fail(kind, None, err.to_string());
                report.failed += 1;
                continue;
            }
        };

        for target in targets {
            if !dry_run
                && let Err(e) = dest.delete_entity(ws, &target)
            {
                if e.is_fatal() {
                    report.failed += 1;
                    return Err((
                        report,
                        MigrateError::api(format!("deleting {kind} {}", target.id), e),
                    ));
                }
                log.fail(kind, None, format!("deleting {} failed: {e}", target.id));
                report.failed += 1;
                continue;
            }
            *report.deleted.entry(kind).or_default() += 1;
        }
        tracing::info!(%kind, deleted = report.deleted(kind), "wiped");
    }

    Ok(report)
}
