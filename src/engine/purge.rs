//! Per-user entry deletion: remove every time entry a set of users owns in
//! a destination workspace. Like the wiper it never migrates or creates.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::api::{DestinationApi, normalize_email};
use crate::error::MigrateError;
use crate::model::{EntityKind, EntityRef, TimeWindow, Workspace};
use crate::runlog::RunLog;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Deleted (or, in a dry run, deletable) entries per normalized email.
    pub deleted: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unmatched_users: Vec<String>,
    pub failed: usize,
}

impl PurgeReport {
    pub fn deleted(&self, email: &str) -> usize {
        self.deleted.get(&normalize_email(email)).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.deleted.values().sum()
    }
}

pub fn delete_user_entries(
    dest: &dyn DestinationApi,
    ws: &Workspace,
    emails: &[String],
    dry_run: bool,
    log: &mut RunLog,
) -> Result<PurgeReport, (PurgeReport, MigrateError)> {
    let span = tracing::info_span!("delete_entries", workspace = %ws.name);
    let _guard = span.enter();
    let kind = EntityKind::TimeEntry;
    let mut report = PurgeReport::default();

    let mut owners = Vec::new();
    for email in emails {
        let email = normalize_email(email);
        if owners.iter().any(|(known, _)| known == &email) || report.unmatched_users.contains(&email)
        {
            continue;
        }
        match dest.resolve_user_by_email(ws, &email) {
            Ok(Some(user_id)) => {
                report.deleted.insert(email.clone(), 0);
                owners.push((email, user_id));
            }
            Ok(None) => {
                log.warn(kind, None, format!("user {email} does not exist on the destination"));
                report.unmatched_users.push(email);
            }
            Err(e) => {
                let err = MigrateError::api(format!("resolving user {email}"), e);
                if err.is_fatal() {
                    return Err((report, err));
                }
                log.fail(kind, None, err.to_string());
                report.failed += 1;
            }
        }
    }
    if owners.is_empty() {
        return Ok(report);
    }

    let entries = match dest.list_time_entries(ws, &TimeWindow::unbounded()) {
        Ok(entries) => entries,
        Err(e) => {
            let err = MigrateError::api("listing destination time entries", e);
            if err.is_fatal() {
                return Err((report, err));
            }
            log.fail(kind, None, err.to_string());
            report.failed += 1;
            return Ok(report);
        }
    };

    for entry in entries {
        let Some((email, _)) = owners.iter().find(|(_, user_id)| *user_id == entry.user_id) else {
            continue;
        };
        if !dry_run
            && let Err(e) = dest.delete_entity(ws, &EntityRef::new(kind, entry.id.clone()))
        {
            if e.is_fatal() {
                report.failed += 1;
                return Err((
                    report,
                    MigrateError::api(format!("deleting time entry {}", entry.id), e),
                ));
            }
            log.fail(kind, None, format!("deleting {} failed: {e}", entry.id));
            report.failed += 1;
            continue;
        }
        *report.deleted.entry(email.clone()).or_default() += 1;
    }

    for (email, count) in &report.deleted {
        tracing::info!(user = %email, deleted = count, "entries deleted");
    }
    Ok(report)
}
