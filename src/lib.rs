//! **benchsweep** - CLI for keeping web-agent benchmark result corpora clean
//!
//! Scans flat directories of `result_*.json` records, deduplicates them under
//! explainable keeper policies, and reports coverage/metrics over the corpus.
//! Live runs always back up before deleting; dry run is the default.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Core processing pipeline - scan, policy, plan, backup, apply, report
pub mod core {
    /// Result-record model, strict validation, composite keys, directory scan
    pub mod record;
    pub use self::record::{RecordFile, ResultRecord, ScanOutcome, scan_results};

    /// Keeper selection policies (pluggable comparators, both total orders)
    pub mod policy;
    pub use self::policy::KeepPolicy;

    /// Deduplication planning, execution, and report emission
    pub mod dedup;
    pub use self::dedup::{check as check_run, run as dedup_run};

    /// Session-scoped backup store written before any deletion
    pub mod backup;

    /// Backup session management: list, restore, cleanup
    pub mod backup_ops;

    /// Task coverage accounting per website and model
    pub mod coverage;
    pub use self::coverage::run as coverage_run;

    /// Success-rate aggregation over the deduplicated record set
    pub mod metrics;
    pub use self::metrics::run as metrics_run;
}

/// Infrastructure - Configuration, I/O, and utilities (lean architecture)
pub mod infra {
    /// Configuration management with TOML support and env overrides
    pub mod config;
    pub use self::config::{Config, init as config_init, load_config};

    /// Memory-mapped file I/O for large result payloads (>1MB threshold)
    pub mod io;
    pub use self::io::{FileBytes, read_file_bytes};

    /// Flat result-directory walking with the result-file naming convention
    pub mod walk;
    pub use self::walk::ResultFileWalker;

    /// Utility functions and helpers for common operations
    pub mod utils;
    // Keep utils private - not part of the public API
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, Commands};
pub use infra::{Config, ResultFileWalker, load_config};
pub use self::core::{KeepPolicy, RecordFile, ResultRecord, ScanOutcome, scan_results};
