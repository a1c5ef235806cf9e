use std::fmt::Write as _;

use clap::ValueEnum;
use colored::Colorize;

use crate::engine::{PassState, RunReport, WorkspaceReport, WorkspaceStatus};
use crate::error::Result;
use crate::model::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

pub fn print_report(report: &RunReport, format: Format) -> Result<()> {
    print!("{}", render_report(report, format)?);
    Ok(())
}

pub fn render_report(report: &RunReport, format: Format) -> Result<String> {
    let mut out = String::new();
    match format {
        Format::Json => {
            out.push_str(&serde_json::to_string(report)?);
            out.push('\n');
        }
        Format::Pretty => {
            for workspace in &report.workspaces {
                render_pretty(&mut out, workspace, report.dry_run);
                out.push('\n');
            }
        }
        Format::Minimal => {
            let _ = writeln!(
                out,
                "{:16} {:11} {:9} {:>6} {:>7} {:>8} {:>5} {:>6}",
                "WORKSPACE", "KIND", "STATE", "TOTAL", "CREATED", "EXISTING", "WARN", "FAILED"
            );
            let _ = writeln!(out, "{}", "-".repeat(76));
            for workspace in &report.workspaces {
                let name = truncate_name(&workspace.workspace, 16);
                for pass in &workspace.passes {
                    let _ = writeln!(
                        out,
                        "{:16} {:11} {:9} {:>6} {:>7} {:>8} {:>5} {:>6}",
                        name,
                        pass.kind.to_string(),
                        state_label(pass.state),
                        pass.total,
                        pass.created,
                        pass.existing,
                        pass.warnings,
                        pass.failed
                    );
                }
                if let Some(wipe) = &workspace.wipe {
                    for (kind, deleted) in &wipe.deleted {
                        let _ = writeln!(out, "{:16} {:11} {:9} {:>6}", name, kind.to_string(), "deleted", deleted);
                    }
                }
                if let Some(purge) = &workspace.purge {
                    for (email, deleted) in &purge.deleted {
                        let _ = writeln!(out, "{:16} {:11} {:9} {:>6}", name, truncate_name(email, 11), "deleted", deleted);
                    }
                }
                if let WorkspaceStatus::Aborted { code, .. } = &workspace.status {
                    let _ = writeln!(out, "{:16} aborted: {code}", name);
                }
            }
        }
    }
    Ok(out)
}

fn render_pretty(out: &mut String, workspace: &WorkspaceReport, dry_run: bool) {
    let status = match &workspace.status {
        WorkspaceStatus::Completed => "completed".green().to_string(),
        WorkspaceStatus::Aborted { .. } => "aborted".red().bold().to_string(),
    };
    let suffix = if dry_run { " (dry run)" } else { "" };
    let _ = writeln!(out, "{} {status}{suffix}", workspace.workspace.cyan().bold());
    if let WorkspaceStatus::Aborted { message, .. } = &workspace.status {
        let _ = writeln!(out, "  {}", message.red());
    }

    for pass in &workspace.passes {
        let state = match pass.state {
            PassState::Done => state_label(pass.state).green().to_string(),
            PassState::Failed => state_label(pass.state).red().to_string(),
            _ => state_label(pass.state).dimmed().to_string(),
        };
        let _ = write!(
            out,
            "  {:11} {state:9} {} total, {} created, {} existing",
            pass.kind.to_string(),
            pass.total,
            pass.created,
            pass.existing
        );
        if pass.warnings > 0 {
            let _ = write!(out, ", {}", format!("{} warnings", pass.warnings).yellow());
        }
        if pass.failed > 0 {
            let _ = write!(out, ", {}", format!("{} failed", pass.failed).red());
        }
        out.push('\n');
    }

    if let Some(archive) = &workspace.archive {
        let _ = writeln!(
            out,
            "  {:11} {} archived, {} already archived, {} unmatched, {} failed",
            "archive", archive.archived, archive.already_archived, archive.unmatched, archive.failed
        );
    }
    if let Some(wipe) = &workspace.wipe {
        for kind in EntityKind::WIPE_ORDER {
            let _ = writeln!(out, "  {:11} {} deleted", kind.to_string(), wipe.deleted(kind));
        }
        if wipe.failed > 0 {
            let _ = writeln!(out, "  {}", format!("{} deletions failed", wipe.failed).red());
        }
    }
    if let Some(purge) = &workspace.purge {
        for (email, deleted) in &purge.deleted {
            let _ = writeln!(out, "  {email}: {deleted} entries deleted");
        }
        for email in &purge.unmatched_users {
            let _ = writeln!(out, "  {}", format!("{email}: no such destination user").yellow());
        }
        if purge.failed > 0 {
            let _ = writeln!(out, "  {}", format!("{} deletions failed", purge.failed).red());
        }
    }
}

fn state_label(state: PassState) -> &'static str {
    match state {
        PassState::Pending => "pending",
        PassState::Skipped => "skipped",
        PassState::Fetching => "fetching",
        PassState::Translating => "translating",
        PassState::Resolving => "resolving",
        PassState::Creating => "creating",
        PassState::Done => "done",
        PassState::Failed => "failed",
    }
}

pub fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() > max_len {
        let truncated: String = name.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PassReport, PurgeReport, RunMode};

    fn report() -> RunReport {
        let mut clients = PassReport::new(EntityKind::Client);
        clients.state = PassState::Done;
        clients.total = 3;
        clients.created = 2;
        clients.existing = 1;
        RunReport {
            mode: RunMode::Migrate,
            dry_run: false,
            workspaces: vec![WorkspaceReport {
                workspace: "Acme".into(),
                status: WorkspaceStatus::Completed,
                passes: vec![clients],
                archive: None,
                wipe: None,
                purge: None,
            }],
            log: vec![],
        }
    }

    #[test]
    fn json_output_flattens_workspace_status() {
        let rendered = render_report(&report(), Format::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(rendered.trim()).unwrap();

        assert_eq!(value["mode"], "migrate");
        assert_eq!(value["workspaces"][0]["status"], "completed");
        assert_eq!(value["workspaces"][0]["passes"][0]["kind"], "client");
        assert_eq!(value["workspaces"][0]["passes"][0]["created"], 2);
    }

    #[test]
    fn minimal_output_has_one_row_per_pass() {
        let rendered = render_report(&report(), Format::Minimal).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("Acme"));
        assert!(lines[2].contains("done"));
    }

    #[test]
    fn pretty_output_lists_deleted_entries_per_user() {
        colored::control::set_override(false);
        let mut report = report();
        report.mode = RunMode::DeleteEntries;
        let workspace = &mut report.workspaces[0];
        workspace.passes.clear();
        let mut purge = PurgeReport::default();
        purge.deleted.insert("ada@example.com".into(), 4);
        purge.unmatched_users.push("ghost@example.com".into());
        workspace.purge = Some(purge);

        let rendered = render_report(&report, Format::Pretty).unwrap();

        assert!(rendered.contains("ada@example.com: 4 entries deleted"));
        assert!(rendered.contains("ghost@example.com: no such destination user"));
    }

    #[test]
    fn truncate_name_respects_limit() {
        assert_eq!(truncate_name("short", 16), "short");
        assert_eq!(truncate_name("a very long workspace name", 10), "a very ...");
    }
}
