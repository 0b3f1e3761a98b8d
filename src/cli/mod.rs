//! CLI argument definitions.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::backup::BackupFormat;
use crate::profile::Variant;

/// Profile store - manage cached, persisted, and backed-up settings profiles.
///
/// Use --json for machine-parseable output.
#[derive(Parser, Debug)]
#[command(name = "pstore", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (text for humans, json for scripts)
    #[arg(
        long,
        short = 'f',
        default_value = "text",
        global = true,
        env = "PSTORE_FORMAT"
    )]
    pub format: OutputFormat,

    /// Shorthand for --format=json
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short = 'c', global = true, env = "PSTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding the configuration
    #[arg(long, global = true, env = "PSTORE_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text with optional color
    #[default]
    Text,
    /// Pretty JSON
    Json,
    /// Single-line JSON
    JsonCompact,
}

impl Cli {
    /// Returns true if output should be JSON.
    pub const fn use_json(&self) -> bool {
        self.json || matches!(self.format, OutputFormat::Json | OutputFormat::JsonCompact)
    }

    /// Returns true if output should be compact JSON.
    pub const fn use_compact_json(&self) -> bool {
        matches!(self.format, OutputFormat::JsonCompact)
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    // === Profiles ===
    /// List profiles
    #[command(visible_alias = "ls")]
    List(ListArgs),

    /// Show one profile with all its settings
    Show(ShowArgs),

    /// Create a profile
    Add(AddArgs),

    /// Delete a profile
    #[command(visible_alias = "rm")]
    Remove(RemoveArgs),

    // === Settings ===
    /// Read a setting (`category.key`, or a bare key)
    Get(GetArgs),

    /// Write a setting
    Set(SetArgs),

    /// Remove a setting
    Unset(UnsetArgs),

    // === Backups ===
    /// Save, inspect, or restore backup files
    #[command(subcommand)]
    Backup(BackupCommand),

    // === Utilities ===
    /// Show cache and database statistics
    Stats,

    /// Show or initialize the configuration
    Config(ConfigArgs),

    /// Show version and build information
    Version,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only list profiles of this variant
    #[arg(long)]
    pub variant: Option<Variant>,
}

#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Profile name or id
    pub profile: String,

    /// Print settings grouped by category
    #[arg(long)]
    pub nested: bool,
}

#[derive(Parser, Debug)]
pub struct AddArgs {
    /// Profile name (unique, case-insensitive)
    pub name: String,

    #[arg(long, default_value = "standard")]
    pub variant: Variant,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    /// Mark as the default profile
    #[arg(long)]
    pub default: bool,
}

#[derive(Parser, Debug)]
pub struct RemoveArgs {
    /// Profile name or id
    pub profile: String,
}

#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Profile name or id
    pub profile: String,

    /// Setting path, e.g. prayerSettings.boneHandler
    pub key: String,

    /// Printed when the setting is absent
    #[arg(long)]
    pub default: Option<String>,
}

/// Write a setting.
///
/// # Examples
///
/// ```bash
/// pstore set Default prayerSettings.boneHandler Bank
/// pstore set Default volume 7
/// pstore set Default hotkeys '["F1","F2"]' --create
/// ```
#[derive(Parser, Debug)]
pub struct SetArgs {
    /// Profile name or id
    pub profile: String,

    /// Setting path
    pub key: String,

    /// Value; true/false, numbers, and JSON arrays are typed, the rest is text
    pub value: String,

    /// Create the profile if it does not exist
    #[arg(long)]
    pub create: bool,
}

#[derive(Parser, Debug)]
pub struct UnsetArgs {
    /// Profile name or id
    pub profile: String,

    /// Setting path
    pub key: String,
}

/// Shared backup selection.
#[derive(Parser, Debug)]
pub struct BackupTarget {
    /// File format (defaults to the configured format)
    #[arg(long)]
    pub format: Option<BackupFormat>,

    /// Collection variant (defaults to the configured variant)
    #[arg(long)]
    pub variant: Option<Variant>,

    /// Backup directory (defaults to the configured directory)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Write the live profiles of a variant to a backup file
    Save(BackupTarget),

    /// Print the profiles in a backup file without changing the store
    Load(BackupTarget),

    /// Load a backup file into the store
    Restore(BackupTarget),

    /// List backup files
    List {
        /// Backup directory (defaults to the configured directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Print the configuration file path only
    #[arg(long)]
    pub path: bool,

    /// Write a default configuration file
    #[arg(long)]
    pub init: bool,

    /// Overwrite an existing file with --init
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
