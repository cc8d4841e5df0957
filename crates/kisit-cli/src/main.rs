mod cli;
mod commands;
mod completions;
mod error;
mod logging;
mod output;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use commands::Invocation;
use kisit_core::{
    CommandRunner, EnforcementContext, KisitConfig, NoEscalation, PkexecEscalator, PrivilegeEscalator,
    SystemCommandRunner,
};

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => error::handle_error(err),
    }
}

fn run(cli: Cli) -> Result<i32> {
    if let Commands::Completions { shell } = cli.command {
        completions::generate_completions(shell);
        return Ok(0);
    }

    let config_path = cli.config.clone().unwrap_or_else(KisitConfig::resolve_path);
    let config = KisitConfig::load_from_path(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;
    let _log_guard = logging::init(cli.verbose, &config.paths.log_dir);

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let escalator: Arc<dyn PrivilegeEscalator> = if cli.no_escalate {
        Arc::new(NoEscalation)
    } else {
        Arc::new(PkexecEscalator::for_current_exe(
            runner.clone(),
            escalation_base_args(&config_path),
        )?)
    };

    let invocation = Invocation {
        ctx: EnforcementContext::new(config, runner, escalator),
        format: cli.format,
        no_escalate: cli.no_escalate,
    };
    commands::run(cli.command, &invocation)
}

/// pkexec drops the caller's environment, so the configuration path is
/// passed explicitly. The elevated child never escalates again.
fn escalation_base_args(config_path: &Path) -> Vec<String> {
    let config_path = std::path::absolute(config_path).unwrap_or_else(|_| config_path.to_path_buf());
    vec![
        "--config".to_string(),
        config_path.to_string_lossy().into_owned(),
        "--no-escalate".to_string(),
    ]
}
