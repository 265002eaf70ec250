//! Duplicate-result resolution over a flat results corpus.
//!
//! A run is: scan -> group by composite key -> pick one keeper per group
//! under the configured policy -> back up every removal candidate ->
//! delete. Dry run is the default and only writes the plan report.
//!
//! The dry-run switch is threaded through as an explicit parameter; there
//! is no mutable mode flag to toggle between calls. Backup is
//! all-or-nothing: one failed copy aborts the run before anything is
//! deleted. Deletion itself is best-effort: per-file errors are counted
//! and reported, not fatal.

use std::fs;
use std::io::Write;

use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use indicatif::ProgressBar;
use itertools::Itertools;
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::cli::{AppContext, CheckArgs, DedupArgs};
use crate::core::backup::BackupManager;
use crate::core::policy::KeepPolicy;
use crate::core::record::{ScanOutcome, scan_results};
use crate::infra::config::load_config;
use crate::infra::utils::PathUtils;
use crate::infra::walk::ResultFileWalker;

/// One file that survives deduplication for its composite key.
#[derive(Debug, Clone)]
pub struct KeepAction {
    pub task_key: String,
    pub filename: String,
    pub path: Utf8PathBuf,
    pub success: bool,
    pub group_size: usize,
}

/// One file slated for removal, with an explainable reason.
#[derive(Debug, Clone)]
pub struct RemoveAction {
    pub filename: String,
    pub path: Utf8PathBuf,
    pub reason: String,
}

/// The full keep/remove partition for a scanned directory.
#[derive(Debug)]
pub struct DedupPlan {
    pub keep: Vec<KeepAction>,
    pub remove: Vec<RemoveAction>,
    pub total_files: usize,
    pub group_count: usize,
    pub duplicate_groups: usize,
    pub corrupted_files: usize,
}

/// Compute the keep/remove partition. Pure; identical scans under the same
/// policy always produce the identical partition.
pub fn plan(scan: &ScanOutcome, policy: KeepPolicy) -> DedupPlan {
    let mut keep = Vec::with_capacity(scan.groups.len());
    let mut remove = Vec::new();

    for group in scan.groups.values() {
        let Some(keeper) = policy.select_keeper(group) else {
            continue;
        };

        keep.push(KeepAction {
            task_key: keeper.key.clone(),
            filename: keeper.filename.clone(),
            path: keeper.path.clone(),
            success: keeper.record.is_success(),
            group_size: group.len(),
        });

        for file in group {
            if file.filename == keeper.filename {
                continue;
            }
            remove.push(RemoveAction {
                filename: file.filename.clone(),
                path: file.path.clone(),
                reason: format!(
                    "duplicate of {} ({} kept)",
                    keeper.filename,
                    if keeper.record.is_success() {
                        "successful"
                    } else {
                        "failed"
                    }
                ),
            });
        }
    }

    // Corrupted files are never keepers, whatever the policy.
    for c in &scan.corrupted {
        remove.push(RemoveAction {
            filename: c.filename.clone(),
            path: c.path.clone(),
            reason: format!("corrupted: {}", c.error),
        });
    }

    DedupPlan {
        keep,
        remove,
        total_files: scan.total_files,
        group_count: scan.group_count(),
        duplicate_groups: scan.duplicate_group_count(),
        corrupted_files: scan.corrupted.len(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionFailure {
    pub filename: String,
    pub error: String,
}

/// What a live execution actually did.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub deleted: usize,
    pub failures: Vec<DeletionFailure>,
    pub backup_session: Option<String>,
}

/// Machine-readable run report, written on every run (dry or live).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupReport {
    pub timestamp: String,
    pub policy: KeepPolicy,
    pub dry_run: bool,
    pub total_files: usize,
    pub files_kept: usize,
    pub files_removed: usize,
    pub duplicate_groups: usize,
    pub corrupted_files: usize,
    pub deletion_list: Vec<DeletionEntry>,
    pub keep_list: Vec<KeepEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletion_errors: Vec<DeletionFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_session: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletionEntry {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepEntry {
    pub task_key: String,
    pub filename: String,
}

pub fn build_report(
    dedup_plan: &DedupPlan,
    outcome: &ApplyOutcome,
    policy: KeepPolicy,
    dry_run: bool,
) -> DedupReport {
    DedupReport {
        timestamp: Utc::now().to_rfc3339(),
        policy,
        dry_run,
        total_files: dedup_plan.total_files,
        files_kept: dedup_plan.keep.len(),
        files_removed: if dry_run {
            dedup_plan.remove.len()
        } else {
            outcome.deleted
        },
        duplicate_groups: dedup_plan.duplicate_groups,
        corrupted_files: dedup_plan.corrupted_files,
        deletion_list: dedup_plan
            .remove
            .iter()
            .map(|r| DeletionEntry {
                filename: r.filename.clone(),
                reason: r.reason.clone(),
            })
            .collect(),
        keep_list: dedup_plan
            .keep
            .iter()
            .map(|k| KeepEntry {
                task_key: k.task_key.clone(),
                filename: k.filename.clone(),
            })
            .collect(),
        deletion_errors: outcome.failures.clone(),
        backup_session: outcome.backup_session.clone(),
    }
}

/// Entry point for `bsw dedup`.
pub fn run(args: DedupArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config().unwrap_or_default();

    let results_dir = PathUtils::resolve_dir(args.dir, &config.results_dir)?;
    let policy = args.policy.unwrap_or(config.dedup.policy);
    let dry_run = !args.execute;

    let mut excludes = config.ignore_patterns.clone();
    excludes.extend(args.excludes.iter().cloned());
    let walker = ResultFileWalker::new(&config.file_prefix, &excludes)?;

    if !ctx.quiet {
        println!(
            "Scanning {} (policy: {})",
            results_dir.cyan(),
            policy.label()
        );
    }

    let scan = scan_results(&results_dir, &walker)?;
    let dedup_plan = plan(&scan, policy);

    print_summary(&dedup_plan, dry_run, args.show_groups, ctx);

    let outcome = if dry_run {
        ApplyOutcome::default()
    } else {
        let backup_root = PathUtils::resolve_dir(args.backup_dir, &config.backup_dir)?;
        execute(&dedup_plan, &results_dir, &backup_root, policy, ctx)?
    };

    let report = build_report(&dedup_plan, &outcome, policy, dry_run);
    let report_path = write_report(&report, args.report, config.report_dir.as_deref(), &results_dir)?;

    if !ctx.quiet {
        if !dry_run {
            println!(
                "Deleted {} files ({} errors), backup session {}",
                outcome.deleted,
                outcome.failures.len(),
                outcome.backup_session.as_deref().unwrap_or("-")
            );
        }
        println!("Report written to {report_path}");
    }

    Ok(())
}

/// Back up every removal candidate, then delete. Nothing is deleted unless
/// the backup set is complete.
fn execute(
    dedup_plan: &DedupPlan,
    results_dir: &Utf8Path,
    backup_root: &Utf8Path,
    policy: KeepPolicy,
    ctx: &AppContext,
) -> Result<ApplyOutcome> {
    if dedup_plan.remove.is_empty() {
        return Ok(ApplyOutcome::default());
    }

    // The results directory is exclusively ours for the whole live run.
    let lock_path = results_dir.join(".benchsweep.lock");
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("open run lock: {lock_path}"))?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = lock
        .try_write()
        .map_err(|_| anyhow!("another live run holds the lock on {results_dir}"))?;

    let mut mgr = BackupManager::begin(backup_root, policy.label(), results_dir)?;

    let bar = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        println!("Backing up {} files to {}", dedup_plan.remove.len(), backup_root);
        ProgressBar::new(dedup_plan.remove.len() as u64)
    };
    for action in &dedup_plan.remove {
        mgr.backup_file(&action.path).with_context(|| {
            format!(
                "backup of {} failed; aborting before any deletion",
                action.filename
            )
        })?;
        bar.inc(1);
    }
    bar.finish_and_clear();
    mgr.finalize(true)?;
    info!(session = %mgr.session_id(), files = mgr.file_count(), "backup session complete");

    let bar = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(dedup_plan.remove.len() as u64)
    };
    let mut outcome = ApplyOutcome {
        backup_session: Some(mgr.session_id().to_string()),
        ..ApplyOutcome::default()
    };
    for action in &dedup_plan.remove {
        match fs::remove_file(&action.path) {
            Ok(()) => outcome.deleted += 1,
            Err(e) => {
                warn!(file = %action.filename, error = %e, "failed to delete");
                outcome.failures.push(DeletionFailure {
                    filename: action.filename.clone(),
                    error: e.to_string(),
                });
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    Ok(outcome)
}

fn print_summary(dedup_plan: &DedupPlan, dry_run: bool, show_groups: usize, ctx: &AppContext) {
    if ctx.quiet {
        return;
    }

    println!(
        "{} files, {} combinations, {} with duplicates, {} corrupted",
        dedup_plan.total_files,
        dedup_plan.group_count,
        dedup_plan.duplicate_groups,
        dedup_plan.corrupted_files
    );
    println!(
        "keep {}, remove {}",
        dedup_plan.keep.len().to_string().green(),
        dedup_plan.remove.len().to_string().red()
    );

    for action in dedup_plan
        .keep
        .iter()
        .filter(|k| k.group_size > 1)
        .take(show_groups)
    {
        let status = if action.success { "successful" } else { "failed" };
        println!(
            "  {}: keeping {} of {} ({})",
            action.task_key, action.filename, action.group_size, status
        );
    }

    if dry_run {
        let banner = "DRY RUN - no files will be deleted (pass --execute to apply)";
        if ctx.no_color {
            println!("{banner}");
        } else {
            println!("{}", banner.yellow());
        }
    }
}

/// Serialize the report next to the results directory (or to an explicit
/// path), staged through a temp file so a crash never leaves half a report.
fn write_report(
    report: &DedupReport,
    explicit: Option<Utf8PathBuf>,
    report_dir: Option<&Utf8Path>,
    results_dir: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let path = match explicit {
        Some(p) => p,
        None => {
            let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ");
            let parent = match report_dir {
                Some(d) => {
                    fs::create_dir_all(d).with_context(|| format!("create report dir: {d}"))?;
                    d
                }
                None => results_dir.parent().unwrap_or(results_dir),
            };
            parent.join(format!("dedup_report_{stamp}.json"))
        }
    };

    let json = serde_json::to_string_pretty(report).context("serialize report")?;
    let dir = match path.parent() {
        Some(p) if !p.as_str().is_empty() => p,
        _ => Utf8Path::new("."),
    };
    let mut tmp =
        NamedTempFile::new_in(dir).with_context(|| format!("stage report under {dir}"))?;
    tmp.write_all(json.as_bytes()).context("write report")?;
    tmp.persist(&path)
        .map_err(|e| e.error)
        .with_context(|| format!("persist report to {path}"))?;

    Ok(path)
}

/// Read-only duplicate audit summary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    pub total_files: usize,
    pub unique_combinations: usize,
    pub successful_combinations: usize,
    pub duplicated_combinations: usize,
    pub surplus_files: usize,
    pub corrupted_files: usize,
}

/// Entry point for `bsw check`.
pub fn check(args: CheckArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config().unwrap_or_default();
    let results_dir = PathUtils::resolve_dir(args.dir, &config.results_dir)?;
    let walker = ResultFileWalker::new(&config.file_prefix, &config.ignore_patterns)?;

    let scan = scan_results(&results_dir, &walker)?;

    let summary = CheckSummary {
        total_files: scan.total_files,
        unique_combinations: scan.group_count(),
        successful_combinations: scan
            .groups
            .values()
            .filter(|g| g.iter().any(|f| f.record.is_success()))
            .count(),
        duplicated_combinations: scan.duplicate_group_count(),
        surplus_files: scan.groups.values().map(|g| g.len() - 1).sum(),
        corrupted_files: scan.corrupted.len(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} result files in {}", summary.total_files, results_dir);
    println!("  unique combinations:  {}", summary.unique_combinations);
    println!("  with any success:     {}", summary.successful_combinations);
    println!(
        "  duplicated:           {} ({} surplus files)",
        summary.duplicated_combinations, summary.surplus_files
    );
    println!("  corrupted:            {}", summary.corrupted_files);

    if summary.duplicated_combinations > 0 && !ctx.quiet {
        println!("largest duplicate groups:");
        for (key, group) in scan
            .groups
            .iter()
            .filter(|(_, g)| g.len() > 1)
            .sorted_by_key(|(_, g)| std::cmp::Reverse(g.len()))
            .take(args.top)
        {
            let successes = group.iter().filter(|f| f.record.is_success()).count();
            println!("  {}: {} copies ({} successful)", key, group.len(), successes);
        }
    }

    Ok(())
}
