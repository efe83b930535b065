//! Mount presence checks and one-shot remount of network volumes.
//!
//! A missing target root gets exactly one reconnect attempt, one settle
//! wait, and one re-check. Nothing here returns an error: the caller gets a
//! [`Reachability`] and skips the target for this pass if it is unreachable.

use anyhow::Result;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::command::run_bounded;
use crate::config::RecoveryConfig;

/// Platform reconnect operation for one share on one server.
pub trait Remount: Send + Sync {
    fn reconnect(&self, server: &str, share: &str) -> Result<()>;
}

/// Reconnects by running a configured command, e.g. `open smb://{server}/{share}`.
pub struct CommandRemount {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandRemount {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(config.reconnect_command.clone(), config.reconnect_timeout())
    }

    fn expand(&self, server: &str, share: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|part| part.replace("{server}", server).replace("{share}", share))
            .collect()
    }
}

impl Remount for CommandRemount {
    fn reconnect(&self, server: &str, share: &str) -> Result<()> {
        let argv = self.expand(server, share);
        let Some((program, args)) = argv.split_first() else {
            anyhow::bail!("reconnect command is empty");
        };

        info!(program = %program, server, share, "Attempting remount");
        run_bounded(program, args, self.timeout)?;
        Ok(())
    }
}

/// Result of a reachability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// The root existed on the first check.
    Present,
    /// The root appeared after a reconnect.
    Recovered,
    Unreachable,
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Reachability::Unreachable)
    }
}

pub struct VolumeRecovery {
    remount: Box<dyn Remount>,
    settle: Duration,
}

impl VolumeRecovery {
    pub fn new(remount: Box<dyn Remount>, settle: Duration) -> Self {
        Self { remount, settle }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(
            Box::new(CommandRemount::from_config(config)),
            config.settle_interval(),
        )
    }

    /// Check that `root` is mounted, remounting `share` from `server` once if not.
    ///
    /// With no server identity there is nothing to reconnect to, so a
    /// missing root is reported unreachable straight away.
    pub fn ensure_reachable(&self, root: &Path, share: &str, server: Option<&str>) -> Reachability {
        if is_mounted(root) {
            return Reachability::Present;
        }

        let Some(server) = server.filter(|s| !s.trim().is_empty()) else {
            warn!(root = %root.display(), share, "Target missing and no server configured");
            return Reachability::Unreachable;
        };

        warn!(root = %root.display(), share, server, "Target missing, reconnecting");
        if let Err(e) = self.remount.reconnect(server, share) {
            warn!(share, server, error = %e, "Reconnect failed");
        }

        thread::sleep(self.settle);

        if is_mounted(root) {
            info!(root = %root.display(), share, "Target recovered after remount");
            Reachability::Recovered
        } else {
            warn!(root = %root.display(), share, "Target still unreachable, skipping for this pass");
            Reachability::Unreachable
        }
    }
}

/// A target root counts as mounted when it exists and is a directory.
pub fn is_mounted(root: &Path) -> bool {
    std::fs::metadata(root).map(|m| m.is_dir()).unwrap_or(false)
}
