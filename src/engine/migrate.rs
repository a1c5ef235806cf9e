//! Per-workspace migration passes.
//!
//! Each pass walks `Pending -> Fetching -> Translating -> Resolving ->
//! Creating -> Done`. A bad record is logged and skipped; a failed fetch
//! fails only its own pass; authentication and rate-limit exhaustion end
//! the workspace.

use serde::Serialize;

use crate::api::{ApiResult, DestinationApi, SourceApi};
use crate::error::MigrateError;
use crate::identity::IdentityMap;
use crate::model::{DestId, EntityKind, SourceId, SourceUser, Workspace};
use crate::resolve::{DestinationSnapshot, Resolution};
use crate::runlog::RunLog;
use crate::translate::{
    EntryContext, Translation, UserDirectory, to_utc, translate_client, translate_group,
    translate_project, translate_tag, translate_task, translate_time_entry, translate_user,
};

use super::RunOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Pending,
    Skipped,
    Fetching,
    Translating,
    Resolving,
    Creating,
    Done,
    Failed,
}

/// Per-pass summary: how many source records were seen and what became of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub kind: EntityKind,
    pub state: PassState,
    pub total: usize,
    pub created: usize,
    pub existing: usize,
    pub warnings: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PassReport {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            state: PassState::Pending,
            total: 0,
            created: 0,
            existing: 0,
            warnings: 0,
            failed: 0,
            error: None,
        }
    }

    fn enter(&mut self, state: PassState) {
        tracing::debug!(kind = %self.kind, from = ?self.state, to = ?state, "pass transition");
        self.state = state;
    }

    fn fail(&mut self, err: &MigrateError) {
        self.state = PassState::Failed;
        self.error = Some(err.to_string());
    }
}

pub struct MigrationOutcome {
    pub passes: Vec<PassReport>,
    /// Populated identity map, handed to the archive finalizer.
    pub map: IdentityMap,
    pub fatal: Option<MigrateError>,
}

/// Destination-side operations one pass needs beyond translation.
struct Settle<T> {
    resolve: fn(&DestinationSnapshot, &T) -> Resolution,
    create: fn(&dyn DestinationApi, &Workspace, &T) -> ApiResult<DestId>,
    record: fn(&mut DestinationSnapshot, DestId, &T),
}

pub struct Migration<'a> {
    source: &'a dyn SourceApi,
    dest: &'a dyn DestinationApi,
    source_ws: &'a Workspace,
    dest_ws: &'a Workspace,
    options: &'a RunOptions,
    log: &'a mut RunLog,
    map: IdentityMap,
    snapshot: DestinationSnapshot,
    users: Option<UserDirectory>,
    source_users: Vec<SourceUser>,
}

impl<'a> Migration<'a> {
    pub fn new(
        source: &'a dyn SourceApi,
        dest: &'a dyn DestinationApi,
        source_ws: &'a Workspace,
        dest_ws: &'a Workspace,
        options: &'a RunOptions,
        log: &'a mut RunLog,
    ) -> Self {
        Self {
            source,
            dest,
            source_ws,
            dest_ws,
            options,
            log,
            map: IdentityMap::new(),
            snapshot: DestinationSnapshot::new(),
            users: None,
            source_users: Vec::new(),
        }
    }

    /// Run every enabled pass in dependency order.
    pub fn run(mut self) -> MigrationOutcome {
        let span = tracing::info_span!("workspace", name = %self.source_ws.name);
        let _guard = span.enter();

        let mut passes: Vec<PassReport> =
            EntityKind::PASS_ORDER.iter().copied().map(PassReport::new).collect();
        let mut fatal = None;

        for report in passes.iter_mut() {
            if !self.options.runs(report.kind) {
                report.enter(PassState::Skipped);
                tracing::info!(kind = %report.kind, "pass skipped");
                continue;
            }
            let result = match report.kind {
                EntityKind::Client => self.client_pass(report),
                EntityKind::Tag => self.tag_pass(report),
                EntityKind::Group => self.group_pass(report),
                EntityKind::Project => self.project_pass(report),
                EntityKind::Task => self.task_pass(report),
                EntityKind::User => self.user_pass(report),
                EntityKind::TimeEntry => self.time_entry_pass(report),
            };
            match result {
                Ok(()) => tracing::info!(
                    kind = %report.kind,
                    state = ?report.state,
                    total = report.total,
                    created = report.created,
                    existing = report.existing,
                    warnings = report.warnings,
                    failed = report.failed,
                    "pass finished"
                ),
                Err(err) => {
                    self.log
                        .fail(report.kind, None, format!("workspace aborted: {err}"));
                    report.fail(&err);
                    fatal = Some(err);
                    break;
                }
            }
        }

        MigrationOutcome {
            passes,
            map: self.map,
            fatal,
        }
    }

    fn client_pass(&mut self, report: &mut PassReport) -> Result<(), MigrateError> {
        report.enter(PassState::Fetching);
        let listed = self.source.list_clients(self.source_ws);
        let Some(records) = self.fetched(report, "listing source clients", listed)? else {
            return Ok(());
        };
        let listed = self.dest.list_clients(self.dest_ws);
        let Some(existing) = self.fetched(report, "listing destination clients", listed)? else {
            return Ok(());
        };
        self.snapshot.load_clients(&existing);

        let candidates = translate_all(self.log, report, &records, |c| c.id, translate_client);
        self.settle(
            report,
            candidates,
            Settle {
                resolve: DestinationSnapshot::resolve_client,
                create: |api, ws, request| api.create_client(ws, request),
                record: DestinationSnapshot::record_client,
            },
        )
    }

    fn tag_pass(&mut self, report: &mut PassReport) -> Result<(), MigrateError> {
        report.enter(PassState::Fetching);
        let listed = self.source.list_tags(self.source_ws);
        let Some(records) = self.fetched(report, "listing source tags", listed)? else {
            return Ok(());
        };
        let listed = self.dest.list_tags(self.dest_ws);
        let Some(existing) = self.fetched(report, "listing destination tags", listed)? else {
            return Ok(());
        };
        self.snapshot.load_tags(&existing);

        let candidates = translate_all(self.log, report, &records, |t| t.id, translate_tag);
        self.settle(
            report,
            candidates,
            Settle {
                resolve: DestinationSnapshot::resolve_tag,
                create: |api, ws, request| api.create_tag(ws, request),
                record: DestinationSnapshot::record_tag,
            },
        )
    }

    fn group_pass(&mut self, report: &mut PassReport) -> Result<(), MigrateError> {
        report.enter(PassState::Fetching);
        let listed = self.source.list_groups(self.source_ws);
        let Some(records) = self.fetched(report, "listing source groups", listed)? else {
            return Ok(());
        };
        let listed = self.dest.list_groups(self.dest_ws);
        let Some(existing) = self.fetched(report, "listing destination groups", listed)? else {
            return Ok(());
        };
        self.snapshot.load_groups(&existing);

        let candidates = translate_all(self.log, report, &records, |g| g.id, translate_group);
        self.settle(
            report,
            candidates,
            Settle {
                resolve: DestinationSnapshot::resolve_group,
                create: |api, ws, request| api.create_group(ws, request),
                record: DestinationSnapshot::record_group,
            },
        )
    }

    fn project_pass(&mut self, report: &mut PassReport) -> Result<(), MigrateError> {
        report.enter(PassState::Fetching);
        let listed = self.source.list_projects(self.source_ws);
        let Some(records) = self.fetched(report, "listing source projects", listed)? else {
            return Ok(());
        };
        let listed = self.dest.list_projects(self.dest_ws);
        let Some(existing) = self.fetched(report, "listing destination projects", listed)? else {
            return Ok(());
        };
        self.snapshot.load_projects(&existing);

        if let Err(err) = self.load_users() {
            if err.is_fatal() {
                return Err(err);
            }
            self.log.warn(
                EntityKind::Project,
                None,
                format!("{err}; projects will be created without members"),
            );
            report.warnings += 1;
        }

        let empty = UserDirectory::default();
        let users = self.users.as_ref().unwrap_or(&empty);
        let map = &self.map;
        let candidates = translate_all(self.log, report, &records, |p| p.id, |p| {
            translate_project(p, map, users)
        });
        self.settle(
            report,
            candidates,
            Settle {
                resolve: DestinationSnapshot::resolve_project,
                create: |api, ws, request| api.create_project(ws, request),
                record: DestinationSnapshot::record_project,
            },
        )
    }

    fn task_pass(&mut self, report: &mut PassReport) -> Result<(), MigrateError> {
        report.enter(PassState::Fetching);
        let listed = self.source.list_tasks(self.source_ws);
        let Some(records) = self.fetched(report, "listing source tasks", listed)? else {
            return Ok(());
        };
        let listed = self.dest.list_tasks(self.dest_ws);
        let Some(existing) = self.fetched(report, "listing destination tasks", listed)? else {
            return Ok(());
        };
        self.snapshot.load_tasks(&existing);

        let map = &self.map;
        let archived = self.snapshot.archived_projects();
        let candidates = translate_all(self.log, report, &records, |t| t.id, |t| {
            translate_task(t, map, archived)
        });
        self.settle(
            report,
            candidates,
            Settle {
                resolve: DestinationSnapshot::resolve_task,
                create: |api, ws, request| api.create_task(ws, request),
                record: DestinationSnapshot::record_task,
            },
        )
    }

    /// Users are never created: each source user is joined to an existing
    /// destination user by email, asking the destination directly when the
    /// listed members do not contain a match.
    fn user_pass(&mut self, report: &mut PassReport) -> Result<(), MigrateError> {
        report.enter(PassState::Fetching);
        if let Err(err) = self.load_users() {
            if err.is_fatal() {
                return Err(err);
            }
            self.log.fail(EntityKind::User, None, err.to_string());
            report.fail(&err);
            return Ok(());
        }
        let Some(directory) = self.users.as_mut() else {
            return Ok(());
        };

        report.enter(PassState::Translating);
        report.total = self.source_users.len();
        report.enter(PassState::Resolving);
        for user in &self.source_users {
            let unmatched = match translate_user(user, directory) {
                Ok(matched) => {
                    self.map.put(EntityKind::User, user.id, matched.request);
                    report.existing += 1;
                    continue;
                }
                Err(unmatched) => unmatched,
            };
            match self.dest.resolve_user_by_email(self.dest_ws, &user.email) {
                Ok(Some(dest_id)) => {
                    directory.learn(&user.email, dest_id.clone());
                    self.map.put(EntityKind::User, user.id, dest_id);
                    report.existing += 1;
                }
                Ok(None) => {
                    self.log.warn(
                        EntityKind::User,
                        Some(user.id),
                        format!("{unmatched}; their entries need the fallback user"),
                    );
                    report.warnings += 1;
                }
                Err(e) if e.is_fatal() => {
                    return Err(MigrateError::api(
                        format!("resolving user {}", user.email),
                        e,
                    ));
                }
                Err(e) => {
                    self.log.fail(
                        EntityKind::User,
                        Some(user.id),
                        format!("resolving user {} failed: {e}", user.email),
                    );
                    report.failed += 1;
                }
            }
        }
        report.enter(PassState::Creating);
        report.enter(PassState::Done);
        Ok(())
    }

    fn time_entry_pass(&mut self, report: &mut PassReport) -> Result<(), MigrateError> {
        let window = self.options.window;
        report.enter(PassState::Fetching);
        let listed = self.source.list_time_entries(self.source_ws, &window);
        let Some(mut records) = self.fetched(report, "listing source time entries", listed)?
        else {
            return Ok(());
        };
        // Out-of-window entries are not part of the pass at all.
        records.retain(|entry| window.contains(to_utc(entry.start)));
        let listed = self.dest.list_time_entries(self.dest_ws, &window);
        let Some(existing) =
            self.fetched(report, "listing destination time entries", listed)?
        else {
            return Ok(());
        };
        self.snapshot.load_time_entries(&existing);
        let fallback = self.fallback_user(report)?;

        let empty = UserDirectory::default();
        let ctx = EntryContext {
            map: &self.map,
            users: self.users.as_ref().unwrap_or(&empty),
            archived_projects: self.snapshot.archived_projects(),
            fallback_user: fallback.as_ref(),
        };
        let candidates = translate_all(self.log, report, &records, |e| e.id, |e| {
            translate_time_entry(e, &ctx)
        });
        self.settle(
            report,
            candidates,
            Settle {
                resolve: DestinationSnapshot::resolve_time_entry,
                create: |api, ws, request| api.create_time_entry(ws, request),
                record: DestinationSnapshot::record_time_entry,
            },
        )
    }

    /// Fetched records, `None` when a non-fatal failure has failed the pass.
    fn fetched<T>(
        &mut self,
        report: &mut PassReport,
        what: &str,
        result: ApiResult<T>,
    ) -> Result<Option<T>, MigrateError> {
        match result {
            Ok(records) => Ok(Some(records)),
            Err(e) => {
                let err = MigrateError::api(what, e);
                if err.is_fatal() {
                    return Err(err);
                }
                self.log.fail(report.kind, None, err.to_string());
                report.fail(&err);
                Ok(None)
            }
        }
    }

    /// List users on both sides once; later passes reuse the directory.
    fn load_users(&mut self) -> Result<(), MigrateError> {
        if self.users.is_some() {
            return Ok(());
        }
        let source_users = self
            .source
            .list_users(self.source_ws)
            .map_err(|e| MigrateError::api("listing source users", e))?;
        let dest_users = self
            .dest
            .list_users(self.dest_ws)
            .map_err(|e| MigrateError::api("listing destination users", e))?;
        self.users = Some(UserDirectory::new(&source_users, &dest_users));
        self.source_users = source_users;
        Ok(())
    }

    fn fallback_user(&mut self, report: &mut PassReport) -> Result<Option<DestId>, MigrateError> {
        let options = self.options;
        let Some(email) = options.fallback_email.as_deref() else {
            return Ok(None);
        };
        match self.dest.resolve_user_by_email(self.dest_ws, email) {
            Ok(Some(id)) => Ok(Some(id)),
            Ok(None) => {
                self.log.warn(
                    EntityKind::TimeEntry,
                    None,
                    format!("fallback user {email} does not exist on the destination; ignoring it"),
                );
                report.warnings += 1;
                Ok(None)
            }
            Err(e) => {
                let err = MigrateError::api(format!("resolving fallback user {email}"), e);
                if err.is_fatal() {
                    return Err(err);
                }
                self.log.warn(EntityKind::TimeEntry, None, format!("{err}; ignoring it"));
                report.warnings += 1;
                Ok(None)
            }
        }
    }

    /// Resolve every candidate against the snapshot, then create the rest.
    fn settle<T>(
        &mut self,
        report: &mut PassReport,
        candidates: Vec<(SourceId, T)>,
        ops: Settle<T>,
    ) -> Result<(), MigrateError> {
        let kind = report.kind;

        report.enter(PassState::Resolving);
        let mut missing = Vec::new();
        for (source_id, candidate) in candidates {
            match (ops.resolve)(&self.snapshot, &candidate) {
                Resolution::Existing(dest_id) => {
                    tracing::debug!(%kind, source_id, %dest_id, "already on destination");
                    self.map.put(kind, source_id, dest_id);
                    report.existing += 1;
                }
                Resolution::ArchivedProject(dest_id) => {
                    self.log.warn(
                        kind,
                        Some(source_id),
                        format!(
                            "matches archived destination project {dest_id}; \
                             tasks and entries will not reference it"
                        ),
                    );
                    self.map.put(kind, source_id, dest_id);
                    report.existing += 1;
                    report.warnings += 1;
                }
                Resolution::Missing => missing.push((source_id, candidate)),
            }
        }

        report.enter(PassState::Creating);
        for (source_id, candidate) in missing {
            // An identical record may have been created earlier in this pass.
            if let Resolution::Existing(dest_id) = (ops.resolve)(&self.snapshot, &candidate) {
                self.map.put(kind, source_id, dest_id);
                report.existing += 1;
                continue;
            }
            let created = if self.options.dry_run {
                Ok(format!("planned-{kind}-{source_id}"))
            } else {
                (ops.create)(self.dest, self.dest_ws, &candidate)
            };
            match created {
                Ok(dest_id) => {
                    tracing::debug!(%kind, source_id, %dest_id, "created");
                    (ops.record)(&mut self.snapshot, dest_id.clone(), &candidate);
                    self.map.put(kind, source_id, dest_id);
                    report.created += 1;
                }
                Err(e) if e.is_fatal() => {
                    report.failed += 1;
                    return Err(MigrateError::api(format!("creating {kind} {source_id}"), e));
                }
                Err(e) => {
                    self.log
                        .fail(kind, Some(source_id), format!("creation failed: {e}"));
                    report.failed += 1;
                }
            }
        }

        report.enter(PassState::Done);
        Ok(())
    }
}

/// Translate every record, logging notes and unmappable records as warnings.
fn translate_all<R, T>(
    log: &mut RunLog,
    report: &mut PassReport,
    records: &[R],
    id_of: impl Fn(&R) -> SourceId,
    translate: impl Fn(&R) -> Translation<T>,
) -> Vec<(SourceId, T)> {
    report.enter(PassState::Translating);
    report.total = records.len();

    let mut candidates = Vec::with_capacity(records.len());
    for record in records {
        let source_id = id_of(record);
        match translate(record) {
            Ok(translated) => {
                for note in translated.notes {
                    log.warn(report.kind, Some(source_id), note);
                    report.warnings += 1;
                }
                candidates.push((source_id, translated.request));
            }
            Err(unmappable) => {
                log.warn(report.kind, Some(source_id), format!("skipped: {unmappable}"));
                report.warnings += 1;
            }
        }
    }
    candidates
}
