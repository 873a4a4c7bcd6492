use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use fsc_core::committer::CommitterOptions;
use fsc_core::job::analyzer::TaskListFile;
use fsc_core::persist::default_storage_root;
use fsc_core::runner::{preflight_docker_image, preflight_docker_running};
use fsc_core::store::SWEEP_INTERVAL;
use fsc_core::{
    spawn_sweeper, Config, ContainerGate, DockerSolverProvider, Error, JobInput, JobOrchestrator,
    JobState, OrchestratorOptions, StateStore, TaskPersistence,
};

#[derive(Parser)]
#[command(
    name = "fsc",
    about = "Self-coding job server: analyze a repo, run coding agents, commit the results",
    version
)]
struct Cli {
    /// Storage root (default: ~/.full-self-coding-server)
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one job end to end
    Run {
        /// Repository URL (or local path with --local)
        target: String,

        /// Treat the target as a local directory
        #[arg(long)]
        local: bool,

        /// Treat the target as a plain git remote instead of GitHub
        #[arg(long, conflicts_with = "local")]
        git: bool,

        /// Task plan file: a JSON array of {id, title, description, priority}
        #[arg(long)]
        tasks: PathBuf,

        /// Per-job config override (repeatable)
        #[arg(short = 'o', long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Stash uncommitted changes in the working tree before committing
        #[arg(long)]
        auto_stash: bool,

        /// Create a safety branch at HEAD before committing
        #[arg(long, value_name = "PREFIX")]
        backup_branch: Option<String>,
    },

    /// List past jobs
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Print a job's persisted state and results
    Show {
        /// Job id
        id: String,
    },

    /// Delete a job's persisted files
    Delete {
        /// Job id
        id: String,
    },

    /// Remove terminal jobs older than a number of days
    Prune {
        #[arg(long, default_value_t = 7)]
        days: u64,
    },

    /// Print persistence statistics
    Stats,
}

// Exit codes for the `run` subcommand.
const EXIT_CONFIG: i32 = 1;
const EXIT_ANALYSIS: i32 = 2;
const EXIT_EXECUTION: i32 = 3;
const EXIT_COMMIT: i32 = 4;

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let storage_root = cli
        .storage_root
        .clone()
        .unwrap_or_else(default_storage_root);

    let code = match cli.command {
        Commands::Run {
            target,
            local,
            git,
            tasks,
            overrides,
            auto_stash,
            backup_branch,
        } => cmd_run(
            &storage_root,
            &target,
            local,
            git,
            tasks,
            &overrides,
            auto_stash,
            backup_branch,
        ),
        Commands::History { limit, offset } => simple(cmd_history(&storage_root, limit, offset)),
        Commands::Show { id } => simple(cmd_show(&storage_root, &id)),
        Commands::Delete { id } => simple(cmd_delete(&storage_root, &id)),
        Commands::Prune { days } => simple(cmd_prune(&storage_root, days)),
        Commands::Stats => simple(cmd_stats(&storage_root)),
    };
    std::process::exit(code);
}

fn simple(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("fsc: {e:#}");
            1
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    storage_root: &Path,
    target: &str,
    local: bool,
    git: bool,
    tasks: PathBuf,
    overrides: &[String],
    auto_stash: bool,
    backup_branch: Option<String>,
) -> i32 {
    let config = match Config::load(storage_root) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fsc: {e}");
            return EXIT_CONFIG;
        }
    };

    let mut input = if local {
        JobInput::local(target)
    } else if git {
        JobInput::git(target)
    } else {
        JobInput::github(target)
    };
    match parse_overrides(overrides) {
        Ok(map) if !map.is_empty() => input.config_overrides = Some(map),
        Ok(_) => {}
        Err(e) => {
            eprintln!("fsc: {e}");
            return EXIT_CONFIG;
        }
    }

    let persistence = match TaskPersistence::new(storage_root) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("fsc: {e}");
            return EXIT_CONFIG;
        }
    };
    let store = Arc::new(StateStore::new());
    let _sweeper = spawn_sweeper(Arc::clone(&store), SWEEP_INTERVAL);
    let gate = ContainerGate::new(config.max_docker_containers);
    let orchestrator = JobOrchestrator::new(
        config.clone(),
        persistence,
        store,
        TaskListFile::new(tasks),
        DockerSolverProvider::new(gate),
        OrchestratorOptions {
            committer: CommitterOptions {
                auto_stash,
                backup_branch,
                ..CommitterOptions::default()
            },
            ..OrchestratorOptions::default()
        },
    );

    let job = match orchestrator.submit(input) {
        Ok(job) => job,
        Err(e) => {
            eprintln!("fsc: {e}");
            return EXIT_CONFIG;
        }
    };
    println!("Submitted {} for {}", job.id, job.input.url);

    if let Err(e) = preflight_docker_running().and_then(|()| preflight_docker_image(&config.docker_image)) {
        eprintln!("fsc: {e}");
        return EXIT_EXECUTION;
    }

    match orchestrator.execute_job(&job.id) {
        Ok(done) => {
            print_final(&done);
            0
        }
        Err(e) => {
            eprintln!("fsc: job {} failed: {e}", job.id);
            exit_code_for(&e, reload(storage_root, &job.id).as_ref())
        }
    }
}

fn print_final(job: &JobState) {
    if let Some(report) = &job.final_report {
        println!("Job {}: {}", job.id, report.summary);
        println!(
            "Duration: {:.1}s",
            report.duration_ms as f64 / 1000.0
        );
    } else {
        println!("Job {}: {}", job.id, job.status);
    }
}

/// The exit-code contract: 1 config/validation, 2 analysis, 3 execution,
/// 4 commit failure. The commit stage is recognizable from outside by the
/// published solver percent: 90 is set right before the committer runs.
fn exit_code_for(err: &Error, job: Option<&JobState>) -> i32 {
    match err {
        Error::Config(_) => EXIT_CONFIG,
        Error::Analysis(_) => EXIT_ANALYSIS,
        Error::DirtyTree(_) | Error::Apply(_) => EXIT_COMMIT,
        _ => {
            if job.is_some_and(|j| j.solver_progress.percent == 90) {
                EXIT_COMMIT
            } else {
                EXIT_EXECUTION
            }
        }
    }
}

fn reload(storage_root: &Path, id: &str) -> Option<JobState> {
    TaskPersistence::new(storage_root)
        .ok()?
        .load_job(id)
        .ok()
        .flatten()
}

fn parse_overrides(entries: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut map = BTreeMap::new();
    for entry in entries {
        match entry.split_once('=') {
            Some((key, value)) => {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => return Err(format!("invalid override '{entry}', expected KEY=VALUE")),
        }
    }
    Ok(map)
}

fn cmd_history(storage_root: &Path, limit: usize, offset: usize) -> Result<()> {
    let persistence = TaskPersistence::new(storage_root)?;
    let page = persistence.history(limit, offset)?;
    println!("{} job(s) total", page.total_count);
    for job in &page.tasks {
        let completed = job
            .completed_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:9}  {:10}  {}  {}",
            job.id,
            job.status.as_str(),
            job.kind,
            completed,
            job.url
        );
        if let Some(summary) = &job.summary {
            println!("    {summary}");
        }
    }
    Ok(())
}

fn cmd_show(storage_root: &Path, id: &str) -> Result<()> {
    let persistence = TaskPersistence::new(storage_root)?;
    let Some(job) = persistence.load_job(id)? else {
        bail!("no job with id {id}");
    };
    let json = serde_json::to_string_pretty(&job).context("serialize job")?;
    println!("{json}");
    if let Some(results) = persistence.load_results(id)? {
        println!("Results: {}", results.len());
        for result in &results {
            println!(
                "  {} {} {} ({})",
                result.status.glyph(),
                result.id,
                result.title,
                result.status
            );
        }
    }
    Ok(())
}

fn cmd_delete(storage_root: &Path, id: &str) -> Result<()> {
    let persistence = TaskPersistence::new(storage_root)?;
    if !persistence.delete_job(id)? {
        bail!("no job with id {id}");
    }
    println!("Deleted {id}");
    Ok(())
}

fn cmd_prune(storage_root: &Path, days: u64) -> Result<()> {
    let persistence = TaskPersistence::new(storage_root)?;
    let removed = persistence.prune_terminal_older_than(days)?;
    println!("Pruned {removed} job(s) older than {days} day(s)");
    Ok(())
}

fn cmd_stats(storage_root: &Path) -> Result<()> {
    let persistence = TaskPersistence::new(storage_root)?;
    let stats = persistence.stats()?;
    println!("Jobs: {}", stats.total);
    println!("  pending:     {}", stats.pending);
    println!("  in progress: {}", stats.in_progress);
    println!("  completed:   {}", stats.completed);
    println!("  failed:      {}", stats.failed);
    Ok(())
}
