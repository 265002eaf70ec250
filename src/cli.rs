use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::core::policy::KeepPolicy;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
}

#[derive(Parser)]
#[command(name = "benchsweep")]
#[command(
    about = "A lightweight CLI for keeping web-agent benchmark result corpora clean: dedup, coverage, metrics"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress bars and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deduplicate result files down to one record per model/website/task
    Dedup(DedupArgs),

    /// Read-only duplicate audit of a results directory
    Check(CheckArgs),

    /// Report task coverage per website and model against expected totals
    Coverage(CoverageArgs),

    /// Success-rate metrics over the deduplicated record set
    Metrics(MetricsArgs),

    /// Manage backup sessions created by live dedup runs
    Backup(BackupArgs),

    /// Initialize a benchsweep.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
pub struct DedupArgs {
    /// Results directory to scan (defaults to config)
    #[arg(short, long)]
    pub dir: Option<Utf8PathBuf>,

    /// Keeper selection policy
    #[arg(long, value_enum)]
    pub policy: Option<KeepPolicy>,

    /// Back up and delete files for real (default is a dry run)
    #[arg(long)]
    pub execute: bool,

    /// Backup root for live runs (defaults to config)
    #[arg(long)]
    pub backup_dir: Option<Utf8PathBuf>,

    /// Write the JSON report to this exact path
    #[arg(long)]
    pub report: Option<Utf8PathBuf>,

    /// Additional glob patterns to exclude from the scan
    #[arg(short = 'x', long = "exclude")]
    pub excludes: Vec<String>,

    /// Print keep/remove decisions for the first N duplicate groups
    #[arg(long, default_value_t = 10)]
    pub show_groups: usize,
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Results directory to scan (defaults to config)
    #[arg(short, long)]
    pub dir: Option<Utf8PathBuf>,

    /// Show the N largest duplicate groups
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Emit a machine-readable JSON summary instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct CoverageArgs {
    /// Results directory to scan (defaults to config)
    #[arg(short, long)]
    pub dir: Option<Utf8PathBuf>,

    /// Websites to audit (repeatable; defaults to config)
    #[arg(short, long)]
    pub websites: Vec<String>,

    /// Models to audit (repeatable; defaults to config)
    #[arg(short, long)]
    pub models: Vec<String>,

    /// Expected task count per website (defaults to config)
    #[arg(long)]
    pub tasks_per_site: Option<usize>,

    /// Divide by the observed unique task count instead of the expected one
    #[arg(long)]
    pub observed: bool,

    /// Emit a machine-readable JSON report instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct MetricsArgs {
    /// Results directory to scan (defaults to config)
    #[arg(short, long)]
    pub dir: Option<Utf8PathBuf>,

    /// Emit a machine-readable JSON report instead of tables
    #[arg(long)]
    pub json: bool,

    /// Also write the JSON report to this path
    #[arg(short, long)]
    pub output: Option<Utf8PathBuf>,
}

#[derive(Parser)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupSubcommand,
}

#[derive(Subcommand)]
pub enum BackupSubcommand {
    /// List backup sessions
    List(BackupListArgs),

    /// Restore files from a backup session into the results directory
    Restore(BackupRestoreArgs),

    /// Clean up old backup sessions
    Cleanup(BackupCleanupArgs),
}

#[derive(Parser, Debug)]
pub struct BackupListArgs {
    /// Backup root (defaults to config)
    #[arg(long)]
    pub backup_dir: Option<Utf8PathBuf>,

    /// Filter: only sessions whose run completed successfully
    #[arg(long)]
    pub successful: bool,

    /// Limit result count
    #[arg(long, default_value_t = 100)]
    pub limit: usize,

    /// Machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupRestoreArgs {
    /// Session ID, unique prefix, or 'latest'
    pub session: String,

    /// Backup root (defaults to config)
    #[arg(long)]
    pub backup_dir: Option<Utf8PathBuf>,

    /// Restore into this directory (defaults to the directory recorded in the session)
    #[arg(long)]
    pub into: Option<Utf8PathBuf>,

    /// Do not write files; show the plan only
    #[arg(long)]
    pub dry_run: bool,

    /// Overwrite even if current content differs
    #[arg(long)]
    pub force: bool,

    /// Emit JSON result instead of human text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupCleanupArgs {
    /// Backup root (defaults to config)
    #[arg(long)]
    pub backup_dir: Option<Utf8PathBuf>,

    /// Relative span: 7d, 24h, 90m, 45s
    #[arg(long)]
    pub older_than: Option<String>,

    /// Keep N newest sessions; remove the rest
    #[arg(long)]
    pub keep_latest: Option<usize>,

    /// Include sessions without DONE marker
    #[arg(long)]
    pub include_incomplete: bool,

    /// Simulate without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Emit JSON result instead of human text
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: Utf8PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<Utf8PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}
