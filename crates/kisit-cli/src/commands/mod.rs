pub mod activation;
pub mod apps;
pub mod profile;
pub mod status;

use anyhow::Result;
use colored::Colorize;
use kisit_core::{EnforcementContext, KisitError, ProfileStore, StateGuard, is_privileged, is_root};

use crate::cli::Commands;
use crate::output::OutputFormat;

/// Everything a command needs from the parsed command line.
pub struct Invocation {
    pub ctx: EnforcementContext,
    pub format: OutputFormat,
    pub no_escalate: bool,
}

/// Privilege a command requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Editing the profile store, which the administrative group may write.
    Admin,
    /// Enforcement, which changes ownership and modes of system files.
    Root,
}

/// Result of an access check.
pub enum Gate {
    /// The caller is privileged enough; run the command here.
    Proceed,
    /// The command already ran in an elevated child with this exit code.
    Escalated(i32),
}

impl Invocation {
    pub fn gate(&self, access: Access) -> Result<Gate> {
        let allowed = match access {
            Access::Admin => is_privileged(&self.ctx.config.accounts.admin_group),
            Access::Root => is_root(),
        };
        if allowed {
            return Ok(Gate::Proceed);
        }
        if self.no_escalate {
            return Err(KisitError::NotPrivileged.into());
        }

        let args = forwarded_args(std::env::args().skip(1));
        let output = self.ctx.escalator.reexec(&args)?;
        // pkexec: 126 dismissed, 127 not authorized.
        if matches!(output.status, Some(126) | Some(127)) {
            return Err(KisitError::Escalation(output.stderr.trim().to_string()).into());
        }
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
        Ok(Gate::Escalated(output.status.unwrap_or(1)))
    }

    pub fn load_store(&self) -> Result<ProfileStore> {
        let store = ProfileStore::load(self.ctx.config.profiles_path(), self.ctx.escalator.clone())?;
        if let Some(corruption) = store.corruption() {
            eprintln!("{} {corruption}", "Warning:".yellow().bold());
        }
        Ok(store)
    }

    pub fn guard(&self) -> Result<StateGuard> {
        Ok(StateGuard::acquire(&self.ctx.config.guard_path())?)
    }
}

/// The caller's arguments without the ones the escalator supplies itself.
fn forwarded_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut forwarded = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            args.next();
        } else if arg.starts_with("--config=") || arg == "--no-escalate" {
            continue;
        } else {
            forwarded.push(arg);
        }
    }
    forwarded
}

pub fn run(command: Commands, inv: &Invocation) -> Result<i32> {
    match command {
        Commands::Restrict => activation::restrict(inv),
        Commands::Unrestrict => activation::unrestrict(inv),
        Commands::Reload => activation::reload(inv),
        Commands::EnableWebsiteRestriction => activation::set_website_restriction(inv, true),
        Commands::DisableWebsiteRestriction => activation::set_website_restriction(inv, false),
        Commands::FixPermissions => activation::fix_permissions(inv),
        Commands::AlwaysRestrictedApps => activation::always_restricted_apps(inv),
        Commands::GenerateApplist => apps::generate_applist(inv),
        Commands::Status => status::run(inv),
        Commands::Apps => apps::list(inv),
        Commands::Profile { command } => profile::run(command, inv),
        Commands::Completions { shell } => {
            crate::completions::generate_completions(shell);
            Ok(0)
        }
    }
}
