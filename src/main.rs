use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use plexcrawl::config::Config;
use plexcrawl::db::{
    Database, JobFilter, TargetStatus, SETTING_BASE_SCAN_PATH, SETTING_SMB_SERVER,
};
use plexcrawl::probe::ProbePipeline;
use plexcrawl::progress::{self, ProgressEvent};
use plexcrawl::registry::Registry;
use plexcrawl::schedule::{self, JobOutcome, Scheduler};
use plexcrawl::logging;

enum Command {
    Scan,
    Probe,
    TargetAdd(String),
    TargetRemove(String),
    TargetEnable(String),
    TargetDisable(String),
    TargetList,
    Server(String),
    BasePath(String),
    Jobs { all: bool },
    Status,
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut all = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("plexcrawl {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--all" | "-a" => all = true,
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let words: Vec<&str> = positional.iter().map(String::as_str).collect();
    let command = match words.as_slice() {
        [] | ["scan"] => Command::Scan,
        ["probe"] => Command::Probe,
        ["target", "add", name] => Command::TargetAdd(name.to_string()),
        ["target", "remove", name] => Command::TargetRemove(name.to_string()),
        ["target", "enable", name] => Command::TargetEnable(name.to_string()),
        ["target", "disable", name] => Command::TargetDisable(name.to_string()),
        ["target", "list"] | ["targets"] => Command::TargetList,
        ["server", name] => Command::Server(name.to_string()),
        ["base-path", path] => Command::BasePath(path.to_string()),
        ["jobs"] => Command::Jobs { all },
        ["status"] => Command::Status,
        _ => {
            eprintln!("Unknown command: {}", positional.join(" "));
            print_help();
            std::process::exit(1);
        }
    };

    Args {
        config_path,
        command,
    }
}

fn print_help() {
    println!(
        r#"plexcrawl - Media index crawler for network and removable volumes

USAGE:
    plexcrawl [OPTIONS] [COMMAND]

COMMANDS:
    scan                     Crawl every active target once (default)
    probe                    Run one batch of detailed ffprobe scans
    target add NAME          Register a target, or reactivate it
    target remove NAME       Forget a target permanently
    target enable NAME       Include a target in crawl passes
    target disable NAME      Exclude a target from crawl passes
    target list              List registered targets
    server NAME              Set the SMB server used for remounts
    base-path PATH           Set the directory targets are mounted under
    jobs [--all]             Show open (or all recent) scan jobs
    status                   Show index totals

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PLEXCRAWL_CONFIG    Path to config file (overrides default location)
    PLEXCRAWL_LOG       Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/plexcrawl/config.toml

See also: plexcrawl-daemon --help"#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    // Logging is best effort; a second subscriber or an unwritable log dir is not fatal.
    let _ = logging::init(None);

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.db_path, &config.store)
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;
    db.initialize().context("Failed to initialize database schema")?;

    match args.command {
        Command::Scan => run_scan(&db, &config),
        Command::Probe => run_probe(&db, &config),
        Command::TargetAdd(name) => {
            let outcome = Registry::new(&db).add(&name)?;
            println!("{}: {:?}", name, outcome);
            Ok(())
        }
        Command::TargetRemove(name) => report_found(&name, Registry::new(&db).remove(&name)?),
        Command::TargetEnable(name) => report_found(
            &name,
            Registry::new(&db).set_status(&name, TargetStatus::Active)?,
        ),
        Command::TargetDisable(name) => report_found(
            &name,
            Registry::new(&db).set_status(&name, TargetStatus::Inactive)?,
        ),
        Command::TargetList => {
            for target in Registry::new(&db).list_all()? {
                println!(
                    "{:<30} {:<8} {}",
                    target.top_folder,
                    target.status.as_str(),
                    target.last_scanned.as_deref().unwrap_or("never")
                );
            }
            Ok(())
        }
        Command::Server(name) => {
            db.set_setting(SETTING_SMB_SERVER, &name)?;
            println!("SMB server set to {}", name);
            Ok(())
        }
        Command::BasePath(path) => {
            db.set_setting(SETTING_BASE_SCAN_PATH, &path)?;
            println!("Base scan path set to {}", path);
            Ok(())
        }
        Command::Jobs { all } => {
            let filter = if all { JobFilter::All } else { JobFilter::Open };
            for job in db.list_jobs(filter, 50)? {
                println!(
                    "{:>6} {:<12} {:<24} {} {}",
                    job.id,
                    job.status.as_str(),
                    job.top_folder,
                    job.created_at,
                    job.error_message.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Command::Status => {
            let targets = Registry::new(&db).list_all()?;
            let active = targets.iter().filter(|t| t.is_active()).count();
            let unprobed = db.list_unprobed_video_paths(&config.probe.video_extensions)?;
            println!("Database:      {}", config.db_path.display());
            println!("Base path:     {}", schedule::resolve_base_path(&db, &config)?.display());
            println!(
                "SMB server:    {}",
                schedule::resolve_server(&db, &config)?.unwrap_or_else(|| "(none)".to_string())
            );
            println!("Targets:       {} ({} active)", targets.len(), active);
            println!("Files:         {}", db.count_file_records(None)?);
            println!("Unprobed:      {}", unprobed.len());
            println!("Open jobs:     {}", db.list_jobs(JobFilter::Open, 1000)?.len());
            Ok(())
        }
    }
}

fn report_found(name: &str, found: bool) -> Result<()> {
    if found {
        println!("{}: done", name);
        Ok(())
    } else {
        anyhow::bail!("No scan target named {}", name)
    }
}

fn run_scan(db: &Database, config: &Config) -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    let scheduler = Scheduler::from_config(db, config, cancel)?;
    let report = scheduler.run_pass()?;

    for job in &report.jobs {
        let summary = match &job.outcome {
            JobOutcome::Completed {
                crawl,
                reconcile,
                recovered,
            } => format!(
                "completed: {} seen, {} new, {} updated, {} removed{}",
                crawl.seen,
                crawl.new,
                crawl.updated,
                reconcile.removed,
                if *recovered { " (remounted)" } else { "" }
            ),
            JobOutcome::Unreachable => "skipped: volume unreachable".to_string(),
            JobOutcome::Inactive => "failed: target inactive".to_string(),
            JobOutcome::Cancelled => "failed: cancelled".to_string(),
            JobOutcome::Failed(message) => format!("failed: {}", message),
            JobOutcome::NotClaimed => "claimed by another worker".to_string(),
        };
        println!("[job {}] {}: {}", job.job_id, job.top_folder, summary);
    }

    println!(
        "Pass finished: {} completed, {} unreachable, {} failed",
        report.completed(),
        report.unreachable(),
        report.failed()
    );
    Ok(())
}

fn run_probe(db: &Database, config: &Config) -> Result<()> {
    let (sink, rx) = progress::channel();

    let printer = thread::spawn(move || {
        for event in rx {
            match event {
                ProgressEvent::Started { total } => println!("Probing {} file(s)", total),
                ProgressEvent::Progress(p) => {
                    println!("  {}/{} ({}%)", p.processed, p.total, p.percent())
                }
                ProgressEvent::Completed { succeeded, failed } => {
                    println!("Done: {} probed, {} failed", succeeded, failed)
                }
                ProgressEvent::Cancelled { processed } => {
                    println!("Cancelled after {} file(s)", processed)
                }
            }
        }
    });

    let result = ProbePipeline::from_config(&config.probe)
        .with_progress(sink)
        .run(db);

    // The pipeline (and its sender) is dropped by now, which ends the printer.
    let _ = printer.join();
    result?;
    Ok(())
}
