//! Bounded execution of external programs.
//!
//! Each call drives a small current-thread tokio runtime so callers stay
//! synchronous. The child is spawned with `kill_on_drop`, so hitting the
//! timeout also terminates the process.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Run `program` with `args`, returning stdout if it exits successfully
/// within `timeout`.
pub fn run_bounded<S, A>(program: S, args: &[A], timeout: Duration) -> Result<Vec<u8>, CommandError>
where
    S: AsRef<OsStr>,
    A: AsRef<OsStr>,
{
    let program = program.as_ref();
    let name = program.to_string_lossy().into_owned();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CommandError::Runtime)?;

    let start = Instant::now();
    let result = runtime.block_on(async {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: name.clone(),
                source,
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(CommandError::Spawn {
                program: name.clone(),
                source,
            }),
            Err(_elapsed) => Err(CommandError::Timeout {
                program: name.clone(),
                timeout,
            }),
        }
    });

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            warn!(program = %name, error = %e, "External command did not complete");
            return Err(e);
        }
    };

    debug!(
        program = %name,
        elapsed_ms = start.elapsed().as_millis() as u64,
        code = ?output.status.code(),
        "External command finished"
    );

    if !output.status.success() {
        return Err(CommandError::Failed {
            program: name,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}
