use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use benchsweep::cli::{AppContext, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG controls verbosity; warnings only by default
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
    };

    match cli.command {
        Commands::Dedup(args) => benchsweep::core::dedup::run(args, &ctx),
        Commands::Check(args) => benchsweep::core::dedup::check(args, &ctx),
        Commands::Coverage(args) => benchsweep::core::coverage::run(args, &ctx),
        Commands::Metrics(args) => benchsweep::core::metrics::run(args, &ctx),
        Commands::Backup(args) => benchsweep::core::backup_ops::run(args, &ctx),
        Commands::Init(args) => benchsweep::infra::config::init(args, &ctx),
        Commands::Completions(args) => benchsweep::completion::run(args),
    }
}
