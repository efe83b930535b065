//! plexcrawl daemon for scheduled crawling and probing.
//!
//! Runs a crawl pass over every active target on a fixed interval, and a
//! detailed probe batch on its own, shorter interval. Both share the
//! metadata store with the interactive `plexcrawl` command.
//!
//! ## Usage
//!
//! ```bash
//! plexcrawl-daemon              # Run in foreground
//! plexcrawl-daemon --once       # One crawl pass and one probe batch, then exit
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use plexcrawl::config::Config;
use plexcrawl::db::Database;
use plexcrawl::logging;
use plexcrawl::probe::ProbePipeline;
use plexcrawl::schedule::Scheduler;

struct DaemonArgs {
    /// Overrides `daemon.poll_interval_secs`.
    poll_interval: Option<u64>,
    once: bool,
    config_path: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = parse_args();

    logging::init(None)?;
    info!("plexcrawl daemon starting");

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Failing to open the store is the one fatal error.
    let db = Database::open(&config.db_path, &config.store)
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;
    db.initialize().context("Failed to initialize database schema")?;
    let db = Arc::new(db);
    info!(path = %config.db_path.display(), "Database opened");

    let abandoned = db.fail_abandoned_jobs(Duration::from_secs(config.daemon.stale_job_secs))?;
    if abandoned > 0 {
        warn!(abandoned, "Failed scan jobs left in progress by an earlier run");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    watch_for_shutdown(shutdown.clone());

    if args.once {
        info!("Running in single-shot mode");
        run_pass(&db, &config, &shutdown);
        run_probe_batch(&db, &config, &shutdown);
    } else {
        let poll = Duration::from_secs(args.poll_interval.unwrap_or(config.daemon.poll_interval_secs));
        info!(poll_secs = poll.as_secs(), "Running in daemon mode");

        let probe_thread = {
            let db = db.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || run_probe_loop(&db, &config, &shutdown))
        };

        while !shutdown.load(Ordering::SeqCst) {
            run_pass(&db, &config, &shutdown);
            sleep_until_shutdown(poll, &shutdown);
        }

        if probe_thread.join().is_err() {
            error!("Probe thread panicked");
        }
    }

    info!("plexcrawl daemon stopped");
    Ok(())
}

fn parse_args() -> DaemonArgs {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args_from(&args) {
        Ok(Some(daemon_args)) => daemon_args,
        Ok(None) => {
            print_help();
            std::process::exit(0);
        }
        Err(message) => {
            eprintln!("Error: {}", message);
            print_help();
            std::process::exit(1);
        }
    }
}

/// Parse arguments (without the program name). `Ok(None)` means help was requested.
fn parse_args_from(args: &[String]) -> Result<Option<DaemonArgs>, String> {
    let mut daemon_args = DaemonArgs {
        poll_interval: None,
        once: false,
        config_path: None,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--once" | "-1" => daemon_args.once = true,
            "--interval" | "-i" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--interval requires a number of seconds".to_string())?;
                match value.parse::<u64>() {
                    Ok(secs) if secs > 0 => daemon_args.poll_interval = Some(secs),
                    _ => return Err(format!("invalid --interval value: {}", value)),
                }
            }
            "--config" | "-c" => {
                let path = iter
                    .next()
                    .ok_or_else(|| "--config requires a path argument".to_string())?;
                daemon_args.config_path = Some(PathBuf::from(path));
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {}", other)),
        }
    }

    Ok(Some(daemon_args))
}

fn print_help() {
    println!(
        r#"plexcrawl-daemon - Scheduled crawler and prober for plexcrawl

USAGE:
    plexcrawl-daemon [OPTIONS]

OPTIONS:
    --once, -1          Run one crawl pass and one probe batch, then exit
    --interval, -i N    Seconds between crawl passes (default: from config)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    PLEXCRAWL_CONFIG    Path to config file (overrides default location)
    PLEXCRAWL_LOG       Log filter (trace, debug, info, warn, error)
"#
    );
}

/// Set `shutdown` on Ctrl-C or SIGTERM so in-flight work stops at the next file.
fn watch_for_shutdown(shutdown: Arc<AtomicBool>) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "Signal handling unavailable");
                return;
            }
        };

        runtime.block_on(async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut term) => {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {}
                            _ = term.recv() => {}
                        }
                    }
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        });

        info!("Shutdown requested");
        shutdown.store(true, Ordering::SeqCst);
    });
}

fn run_pass(db: &Database, config: &Config, shutdown: &Arc<AtomicBool>) {
    let scheduler = match Scheduler::from_config(db, config, shutdown.clone()) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!(error = %e, "Could not prepare crawl pass");
            return;
        }
    };

    if let Err(e) = scheduler.run_pass() {
        error!(error = %e, "Crawl pass aborted");
    }
}

fn run_probe_batch(db: &Database, config: &Config, shutdown: &Arc<AtomicBool>) {
    let pipeline = ProbePipeline::from_config(&config.probe).with_cancel_flag(shutdown.clone());
    if let Err(e) = pipeline.run(db) {
        error!(error = %e, "Probe run aborted");
    }
}

fn run_probe_loop(db: &Database, config: &Config, shutdown: &Arc<AtomicBool>) {
    let interval = Duration::from_secs(config.daemon.probe_interval_secs);
    while !shutdown.load(Ordering::SeqCst) {
        run_probe_batch(db, config, shutdown);
        sleep_until_shutdown(interval, shutdown);
    }
}

fn sleep_until_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_secs(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<DaemonArgs>, String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        parse_args_from(&args)
    }

    #[test]
    fn test_interval_is_parsed() {
        let args = parse(&["--interval", "60", "--once"]).unwrap().unwrap();
        assert_eq!(args.poll_interval, Some(60));
        assert!(args.once);
    }

    #[test]
    fn test_bad_interval_is_rejected() {
        assert!(parse(&["--interval", "soon"]).is_err());
        assert!(parse(&["--interval", "0"]).is_err());
        assert!(parse(&["--interval"]).is_err());
    }

    #[test]
    fn test_config_requires_path() {
        assert!(parse(&["--config"]).is_err());
        let args = parse(&["-c", "/etc/plexcrawl.toml"]).unwrap().unwrap();
        assert_eq!(args.config_path, Some(PathBuf::from("/etc/plexcrawl.toml")));
    }

    #[test]
    fn test_help_and_unknown_arguments() {
        assert!(matches!(parse(&["--help"]), Ok(None)));
        assert!(parse(&["--bogus"]).is_err());
    }
}
