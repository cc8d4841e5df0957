//! Privilege checks and escalation.
//!
//! Every mutating entry point first asks [`is_privileged`]. Unprivileged
//! callers hand the work to a [`PrivilegeEscalator`], which re-invokes the
//! command line tool with elevated rights and reports back synchronously.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use nix::unistd::{Group, getegid, geteuid, getgroups};

use crate::error::{KisitError, Result};
use crate::system::{CommandOutput, CommandRunner};

/// Running with an effective uid of 0.
pub fn is_root() -> bool {
    geteuid().is_root()
}

/// Root, or a member of the administrative group.
pub fn is_privileged(admin_group: &str) -> bool {
    if is_root() {
        return true;
    }

    let gid = match Group::from_name(admin_group) {
        Ok(Some(group)) => group.gid,
        Ok(None) => {
            tracing::debug!(admin_group, "administrative group does not exist");
            return false;
        }
        Err(err) => {
            tracing::warn!(admin_group, error = %err, "group lookup failed");
            return false;
        }
    };

    getegid() == gid || getgroups().map(|groups| groups.contains(&gid)).unwrap_or(false)
}

pub trait PrivilegeEscalator: Send + Sync + fmt::Debug {
    /// Re-run the tool with `args` under elevated rights.
    fn reexec(&self, args: &[String]) -> Result<CommandOutput>;

    /// Repair ownership and mode of the state files with elevated rights.
    fn repair_permissions(&self) -> Result<()> {
        let output = self.reexec(&["fix-permissions".to_string()])?;
        if output.success() {
            Ok(())
        } else {
            Err(KisitError::Escalation(format!(
                "fix-permissions exited with {:?}: {}",
                output.status,
                output.stderr.trim()
            )))
        }
    }
}

/// Escalates through `pkexec`, which prompts for administrator credentials.
#[derive(Debug, Clone)]
pub struct PkexecEscalator {
    runner: Arc<dyn CommandRunner>,
    program: PathBuf,
    /// Arguments prepended to every re-invocation (e.g. `--config <path>`),
    /// since pkexec does not carry the caller's environment over.
    base_args: Vec<String>,
}

impl PkexecEscalator {
    pub fn new(runner: Arc<dyn CommandRunner>, program: PathBuf, base_args: Vec<String>) -> Self {
        Self {
            runner,
            program,
            base_args,
        }
    }

    /// Escalator re-invoking the running executable.
    pub fn for_current_exe(runner: Arc<dyn CommandRunner>, base_args: Vec<String>) -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(runner, program, base_args))
    }
}

impl PrivilegeEscalator for PkexecEscalator {
    fn reexec(&self, args: &[String]) -> Result<CommandOutput> {
        let program = self.program.to_string_lossy().into_owned();
        let mut full: Vec<&str> = vec![program.as_str()];
        full.extend(self.base_args.iter().map(String::as_str));
        full.extend(args.iter().map(String::as_str));

        tracing::info!(args = ?args, "re-invoking with elevated privileges");
        self.runner.run("pkexec", &full)
    }
}

/// Escalator for contexts that must never prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEscalation;

impl PrivilegeEscalator for NoEscalation {
    fn reexec(&self, _args: &[String]) -> Result<CommandOutput> {
        Err(KisitError::Escalation("privilege escalation is disabled".to_string()))
    }
}
