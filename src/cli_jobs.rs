use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use fleetcron::coordination::{QueueSettings, DEFAULT_LEASE_SECONDS, DEFAULT_MAX_ATTEMPTS};
use fleetcron::store::{
    DeleteJobOutcome, QueueEntry, QueueFilter, QueueStatus, MAX_INTERVAL_SECONDS,
};
use fleetcron::{JobAdmin, SqliteCoordinationStore, TriggerOutcome};
use std::path::PathBuf;
use std::sync::Arc;

mod cli_style;

use cli_style::{
    get_prompt, get_styles, print_command_echo, print_empty_list, print_error, print_key_value,
    print_success, print_warning, print_welcome, TableBuilder,
};

use rustyline::{
    completion::Completer, highlight::Highlighter, history::FileHistory, validate::Validator,
    CompletionType, Config, Editor, Helper,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_status(s: &str) -> Result<QueueStatus, String> {
    QueueStatus::from_db_str(s).ok_or_else(|| {
        let valid: Vec<&str> = QueueStatus::ALL.iter().map(|s| s.as_db_str()).collect();
        format!("Invalid status '{}'. Valid values: {}", s, valid.join(", "))
    })
}

#[derive(Parser, Debug)]
#[command(styles=get_styles())]
struct CliArgs {
    /// Path to the shared SQLite database file.
    #[clap(long, env = "FLEETCRON_DB", value_parser = parse_path, default_value = fleetcron::config::DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// Lease used when reclaiming from this tool.
    #[clap(long, env = "LEASE_SECONDS", default_value_t = DEFAULT_LEASE_SECONDS)]
    pub lease_seconds: i64,

    /// Reclaim budget used when reclaiming from this tool.
    #[clap(long, env = "MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: i64,
}

#[derive(Parser)]
#[command(styles=get_styles(),name = "")]
struct InnerCli {
    #[command(subcommand)]
    command: InnerCommand,
}

#[derive(Subcommand)]
enum InnerCommand {
    /// Defines a job that runs every `interval_seconds`.
    AddJob { job_id: String, interval_seconds: i64 },

    /// Stops the scheduler from enqueuing the job.
    PauseJob { job_id: String },

    /// Lets the scheduler enqueue the job again.
    ResumeJob { job_id: String },

    /// Deletes a job and its pending entries. Refused while the job is running.
    DeleteJob { job_id: String },

    /// Enqueues the job right away, without touching its schedule.
    Trigger { job_id: String },

    /// Shows all job definitions.
    ListJobs,

    /// Shows queue entries, newest first.
    Queue {
        #[clap(long, value_parser = parse_status)]
        status: Option<QueueStatus>,
        #[clap(long)]
        job: Option<String>,
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },

    /// Shows every field of a queue entry.
    Show { entry_id: i64 },

    /// Shows entry counts per status.
    Stats,

    /// Requeues or fails entries whose lease expired.
    Reclaim,

    /// Deletes finished entries older than the given number of days.
    PruneHistory { days: i64 },

    /// Shows the path of the current database.
    Where,

    /// Close this program.
    Exit,
}

enum CommandExecutionResult {
    Ok,
    Exit,
    Error(String),
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_entries(entries: &[QueueEntry]) {
    if entries.is_empty() {
        print_empty_list("No queue entries");
        return;
    }
    let mut table = TableBuilder::new(vec![
        "ID", "Job", "Status", "Attempts", "Worker", "Enqueued", "Executed",
    ]);
    for entry in entries {
        table.add_row(vec![
            entry.id.to_string(),
            entry.job_id.clone(),
            entry.status.to_string(),
            entry.attempts.to_string(),
            entry.worker_id.clone().unwrap_or_else(|| "-".to_string()),
            format_time(Some(entry.enqueued_at)),
            format_time(entry.executed_at),
        ]);
    }
    table.print();
}

fn execute_command(line: String, admin: &JobAdmin, db_path: &str) -> CommandExecutionResult {
    if line.is_empty() {
        return CommandExecutionResult::Ok;
    }

    let args =
        shlex::split(&line).unwrap_or_else(|| line.split_whitespace().map(String::from).collect());

    let cli = InnerCli::try_parse_from(std::iter::once(" ").chain(args.iter().map(String::as_str)));

    let command = match cli {
        Ok(cli) => cli.command,
        Err(e) => {
            if e.print().is_err() {
                println!("{}", e);
            }
            return CommandExecutionResult::Ok;
        }
    };

    print_command_echo(&line);
    let now = Utc::now();
    match command {
        InnerCommand::AddJob {
            job_id,
            interval_seconds,
        } => match admin.add_job(&job_id, interval_seconds, now) {
            Ok(true) => print_success(&format!(
                "Job '{}' added, runs every {}s",
                job_id, interval_seconds
            )),
            Ok(false) => print_warning(&format!("Job '{}' already exists", job_id)),
            Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
        },
        InnerCommand::PauseJob { job_id } => match admin.pause_job(&job_id) {
            Ok(true) => print_success(&format!("Job '{}' paused", job_id)),
            Ok(false) => print_warning(&format!("Job '{}' not found", job_id)),
            Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
        },
        InnerCommand::ResumeJob { job_id } => match admin.resume_job(&job_id) {
            Ok(true) => print_success(&format!("Job '{}' resumed", job_id)),
            Ok(false) => print_warning(&format!("Job '{}' not found", job_id)),
            Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
        },
        InnerCommand::DeleteJob { job_id } => match admin.delete_job(&job_id) {
            Ok(DeleteJobOutcome::Deleted { purged_pending }) => print_success(&format!(
                "Job '{}' deleted ({} pending entries removed)",
                job_id, purged_pending
            )),
            Ok(DeleteJobOutcome::NotFound) => {
                print_warning(&format!("Job '{}' not found", job_id))
            }
            Ok(DeleteJobOutcome::InProgress) => {
                return CommandExecutionResult::Error(format!(
                    "Job '{}' is running, try again once it finished",
                    job_id
                ))
            }
            Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
        },
        InnerCommand::Trigger { job_id } => match admin.trigger_job(&job_id, now) {
            Ok(TriggerOutcome::Enqueued { entry_id }) => {
                print_success(&format!("Job '{}' enqueued as entry {}", job_id, entry_id))
            }
            Ok(TriggerOutcome::AlreadyInFlight) => print_warning(&format!(
                "Job '{}' already has a pending or running entry",
                job_id
            )),
            Ok(TriggerOutcome::NotFound) => print_warning(&format!("Job '{}' not found", job_id)),
            Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
        },
        InnerCommand::ListJobs => {
            let jobs = match admin.list_jobs() {
                Ok(jobs) => jobs,
                Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
            };
            if jobs.is_empty() {
                print_empty_list("No jobs defined");
            } else {
                let mut table =
                    TableBuilder::new(vec!["Job", "Interval", "Paused", "Last run", "Next run"]);
                for job in jobs {
                    table.add_row(vec![
                        job.id,
                        format!("{}s", job.interval_seconds),
                        if job.paused { "yes" } else { "no" }.to_string(),
                        format_time(job.last_run_time),
                        format_time(job.next_run_time),
                    ]);
                }
                table.print();
            }
        }
        InnerCommand::Queue { status, job, limit } => {
            let filter = QueueFilter {
                status,
                job_id: job,
            };
            match admin.list_queue(&filter, limit) {
                Ok(entries) => print_entries(&entries),
                Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
            }
        }
        InnerCommand::Show { entry_id } => match admin.get_entry(entry_id) {
            Ok(Some(entry)) => {
                print_key_value("Entry", &entry.id.to_string());
                print_key_value("Job", &entry.job_id);
                print_key_value("Status", &entry.status.to_string());
                print_key_value("Attempts", &entry.attempts.to_string());
                print_key_value("Worker", entry.worker_id.as_deref().unwrap_or("-"));
                print_key_value("Enqueued", &format_time(Some(entry.enqueued_at)));
                print_key_value("Started", &format_time(entry.started_at));
                print_key_value("Lease expires", &format_time(entry.lease_expires_at));
                print_key_value("Executed", &format_time(entry.executed_at));
                print_key_value("Last error", entry.last_error.as_deref().unwrap_or("-"));
            }
            Ok(None) => print_warning(&format!("Entry {} not found", entry_id)),
            Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
        },
        InnerCommand::Stats => match admin.queue_stats() {
            Ok(stats) => {
                print_key_value("Pending", &stats.pending.to_string());
                print_key_value("In progress", &stats.in_progress.to_string());
                print_key_value("Done", &stats.done.to_string());
                print_key_value("Failed", &stats.failed.to_string());
                print_key_value("Total", &stats.total().to_string());
            }
            Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
        },
        InnerCommand::Reclaim => match admin.reclaim(now) {
            Ok(report) if report.is_empty() => print_empty_list("No expired leases"),
            Ok(report) => print_success(&format!(
                "Requeued {:?}, failed {:?}",
                report.requeued, report.failed
            )),
            Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
        },
        InnerCommand::PruneHistory { days } => {
            let retention = match retention_days(days) {
                Ok(retention) => retention,
                Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
            };
            match admin.prune_history(retention, now) {
                Ok(deleted) => print_success(&format!("Deleted {} finished entries", deleted)),
                Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
            }
        }
        InnerCommand::Where => {
            println!("{}", db_path);
        }
        InnerCommand::Exit => return CommandExecutionResult::Exit,
    }
    CommandExecutionResult::Ok
}

fn retention_days(days: i64) -> Result<Duration> {
    if days < 0 {
        bail!("days must not be negative");
    }
    Duration::try_days(days).ok_or_else(|| anyhow!("{} days is out of range", days))
}

fn queue_settings(cli_args: &CliArgs) -> Result<QueueSettings> {
    if cli_args.lease_seconds <= 0 || cli_args.lease_seconds > MAX_INTERVAL_SECONDS {
        bail!(
            "lease_seconds must be between 1 and {}, got {}",
            MAX_INTERVAL_SECONDS,
            cli_args.lease_seconds
        );
    }
    let lease = Duration::try_seconds(cli_args.lease_seconds)
        .ok_or_else(|| anyhow!("lease_seconds {} is out of range", cli_args.lease_seconds))?;
    Ok(QueueSettings {
        lease,
        max_attempts: cli_args.max_attempts,
    })
}

#[derive(rustyline_derive::Hinter)]
struct CommandHelper {
    commands_names: Vec<String>,
}

impl CommandHelper {
    pub fn new() -> Self {
        let commands_names: Vec<String> = InnerCli::command()
            .get_subcommands()
            .map(|sc| sc.get_name().to_string())
            .collect();

        CommandHelper { commands_names }
    }
}

impl Completer for CommandHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if line.contains(' ') {
            return Ok((0, Vec::with_capacity(0)));
        }
        let matches = self
            .commands_names
            .iter()
            .filter(|c| c.starts_with(line))
            .cloned()
            .collect::<Vec<_>>();

        Ok((0, matches))
    }
}

impl Highlighter for CommandHelper {}
impl Validator for CommandHelper {}
impl Helper for CommandHelper {}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    let store = Arc::new(SqliteCoordinationStore::new(&cli_args.db_path)?);
    let admin = JobAdmin::new(store, queue_settings(&cli_args)?);
    let db_path = cli_args.db_path.display().to_string();

    print_welcome(&db_path);

    let config = Config::builder()
        .completion_type(CompletionType::List)
        .build();

    let mut rl = Editor::<CommandHelper, FileHistory>::with_config(config)?;
    rl.set_helper(Some(CommandHelper::new()));

    loop {
        match rl.readline(&get_prompt()) {
            Ok(line) => {
                let line = line.trim().to_string();
                if line == "help" {
                    InnerCli::command().print_long_help()?;
                    continue;
                }
                let _ = rl.add_history_entry(&line);
                match execute_command(line, &admin, &db_path) {
                    CommandExecutionResult::Ok => {}
                    CommandExecutionResult::Exit => break,
                    CommandExecutionResult::Error(err) => {
                        print_error(&err);
                        continue;
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("CTRL-D: exiting.");
                break;
            }
            Err(e) => {
                println!("Error: {:?}", e);
                break;
            }
        }
    }
    Ok(())
}
