use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use timeport::api::clockify::ClockifyClient;
use timeport::api::http::Transport;
use timeport::api::toggl::TogglClient;
use timeport::config::Config;
use timeport::engine::{self, RunMode, RunOptions};
use timeport::error::{MigrateError, Result};
use timeport::model::EntityKind;
use timeport::output::{self, Format};
use timeport::{build_info, lock, runlog};
use tracing_subscriber::EnvFilter;

/// Exit status when at least one workspace was aborted.
const EXIT_ABORTED: i32 = 2;

#[derive(Parser)]
#[command(
    name = "timeport",
    version,
    long_version = build_info::long_version(),
    about = "Migrate Toggl workspaces into Clockify, idempotently"
)]
struct Cli {
    /// Configuration file (JSON, or YAML by extension)
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,
    /// Do not migrate clients
    #[arg(long)]
    skip_clients: bool,
    /// Do not migrate tags
    #[arg(long)]
    skip_tags: bool,
    /// Do not migrate user groups
    #[arg(long)]
    skip_groups: bool,
    /// Do not migrate projects
    #[arg(long)]
    skip_projects: bool,
    /// Do not migrate tasks
    #[arg(long)]
    skip_tasks: bool,
    /// Do not map users
    #[arg(long)]
    skip_users: bool,
    /// Do not migrate time entries
    #[arg(long)]
    skip_entries: bool,
    /// Archive destination projects whose source project is archived
    #[arg(long)]
    do_archive: bool,
    /// Delete everything in the destination workspaces instead of migrating
    #[arg(long)]
    wipe_all: bool,
    /// Delete every destination entry of these users instead of migrating
    #[arg(long, value_name = "EMAIL", value_delimiter = ',', num_args = 1..)]
    delete_entries: Vec<String>,
    /// Skip the confirmation prompt for --wipe-all and --delete-entries
    #[arg(long, short)]
    yes: bool,
    /// Resolve and report without writing to the destination
    #[arg(long)]
    dry_run: bool,
    /// Workspaces processed concurrently (overrides the config)
    #[arg(long)]
    parallelism: Option<usize>,
    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, hide = true)]
    pretty: bool,
    /// Where the per-record run log is written (JSON lines)
    #[arg(long, default_value = "timeport-log.jsonl")]
    log_file: PathBuf,
    /// Verbose diagnostics on stderr
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn skipped(&self) -> BTreeSet<EntityKind> {
        [
            (self.skip_clients, EntityKind::Client),
            (self.skip_tags, EntityKind::Tag),
            (self.skip_groups, EntityKind::Group),
            (self.skip_projects, EntityKind::Project),
            (self.skip_tasks, EntityKind::Task),
            (self.skip_users, EntityKind::User),
            (self.skip_entries, EntityKind::TimeEntry),
        ]
        .into_iter()
        .filter_map(|(skip, kind)| skip.then_some(kind))
        .collect()
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("timeport=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("timeport=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn confirm_delete(config: &Path, workspaces: Option<&[String]>, what: &str) -> Result<()> {
    let scope = match workspaces {
        Some(names) => names.join(", "),
        None => "every workspace".to_string(),
    };
    eprint!(
        "This deletes {what} in {scope} (config {}). It cannot be undone. Continue? [y/N] ",
        config.display()
    );
    std::io::stderr().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    match answer.trim() {
        "y" | "Y" | "yes" => Ok(()),
        _ => Err(MigrateError::Aborted("deletion not confirmed".into())),
    }
}

fn run(cli: Cli, format: Format) -> Result<i32> {
    let config = Config::load(&cli.config)?;
    let mode = RunMode::from_flags(cli.do_archive, cli.wipe_all, !cli.delete_entries.is_empty());
    if mode.is_destructive() && !cli.yes && !cli.dry_run {
        let what = match mode {
            RunMode::DeleteEntries => {
                format!("all destination entries of {}", cli.delete_entries.join(", "))
            }
            _ => "ALL destination data".to_string(),
        };
        confirm_delete(&cli.config, config.workspaces.as_deref(), &what)?;
    }

    let lock_file = lock::acquire_lock(&lock::lock_path_for(&cli.config))?;
    runlog::truncate(&cli.log_file)?;

    let toggl = TogglClient::new(&config.toggl_key, Transport::new(config.http));
    let clockify = ClockifyClient::connect(
        &config.clockify_keys,
        &config.clockify_admin,
        Transport::new(config.http),
    )?;

    let mut options = RunOptions::new(config.window);
    options.mode = mode;
    options.workspaces = config.workspaces.clone();
    options.fallback_email = config.fallback_email.clone();
    options.skip = cli.skipped();
    options.delete_entries_of = cli.delete_entries.clone();
    options.dry_run = cli.dry_run;
    options.parallelism = cli.parallelism.unwrap_or(config.parallelism).max(1);

    let report = engine::run(&toggl, &clockify, &options)?;
    runlog::write_jsonl(&cli.log_file, &report.log)?;
    lock::release_lock(lock_file)?;

    output::print_report(&report, format)?;
    Ok(if report.has_aborted() { EXIT_ABORTED } else { 0 })
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    match run(cli, format) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            match format {
                Format::Json => {
                    eprintln!(
                        "{}",
                        serde_json::json!({
                            "error": e.code(),
                            "message": e.to_string()
                        })
                    );
                }
                _ => eprintln!("error: {e}"),
            }
            std::process::exit(1);
        }
    }
}
