use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Output format for CLI commands
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

#[derive(Parser)]
#[command(name = "kisit")]
#[command(version, about = "ETAP Kısıt - profile-based application and website restriction")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to /etc/eta-kisit/config.toml)
    #[arg(long, global = true, env = "KISIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Fail instead of asking for administrator rights
    #[arg(long, global = true)]
    pub no_escalate: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Restrict applications and websites of the current profile
    Restrict,

    /// Lift the active restriction
    Unrestrict,

    /// Lift the active restriction and apply the current profile again
    Reload,

    /// Re-enable website restriction of the applied profile
    EnableWebsiteRestriction,

    /// Lift website restriction while keeping applications restricted
    DisableWebsiteRestriction,

    /// Repair ownership and mode of the state files
    FixPermissions,

    /// Restrict only the always-restricted applications
    AlwaysRestrictedApps,

    /// Write the installed application list to the state directory
    GenerateApplist,

    /// Show whether a restriction is active
    Status,

    /// List installed applications
    Apps,

    /// Profile management
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// List profiles
    List,

    /// Show a profile (defaults to the current one)
    Show { name: Option<String> },

    /// Create an unrestricted profile
    Create {
        name: String,
        /// Owning account
        #[arg(long)]
        owner: Option<String>,
    },

    /// Copy a profile under a new name
    Duplicate {
        source: String,
        target: String,
        /// Owning account of the copy
        #[arg(long)]
        owner: Option<String>,
    },

    /// Remove a profile
    Remove { name: String },

    /// Rename a profile
    Rename { old: String, new: String },

    /// Make a profile current, re-applying it when a restriction is active
    Use { name: String },

    /// Set how an axis is restricted
    SetType {
        name: String,
        #[arg(value_enum)]
        axis: Axis,
        #[arg(value_enum)]
        kind: RestrictionKind,
    },

    /// Edit allow and deny lists
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },
}

#[derive(Subcommand)]
pub enum RuleAction {
    /// Add entries to a list
    Add(RuleArgs),

    /// Remove entries from a list
    Remove(RuleArgs),
}

#[derive(clap::Args)]
pub struct RuleArgs {
    /// Profile name
    pub name: String,

    #[arg(value_enum)]
    pub axis: Axis,

    #[arg(value_enum)]
    pub list: ListKind,

    /// Application ids (or desktop file paths) or domains
    #[arg(required = true)]
    pub entries: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Axis {
    Application,
    Website,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum RestrictionKind {
    None,
    Allowlist,
    Denylist,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ListKind {
    Allowlist,
    Denylist,
}
