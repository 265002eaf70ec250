//! Backup session management operations
//!
//! High-level operations for listing, restoring, and cleaning up backup
//! sessions created by live dedup runs. Restores are conservative by
//! default: a file whose current content diverges from the backed-up copy
//! is reported as a conflict and left alone unless --force is given.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::fs;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{
    AppContext, BackupArgs, BackupCleanupArgs, BackupListArgs, BackupRestoreArgs,
    BackupSubcommand,
};
use crate::core::backup::{SessionIndexEntry, list_sessions, read_session_manifest};
use crate::infra::config::load_config;
use crate::infra::utils::PathUtils;

/// Entry point for `bsw backup <subcommand>`.
pub fn run(args: BackupArgs, ctx: &AppContext) -> Result<()> {
    match args.command {
        BackupSubcommand::List(a) => list(a, ctx),
        BackupSubcommand::Restore(a) => restore(a, ctx),
        BackupSubcommand::Cleanup(a) => cleanup(a, ctx),
    }
}

fn backup_root(cli: Option<Utf8PathBuf>) -> Result<Utf8PathBuf> {
    let config = load_config().unwrap_or_default();
    PathUtils::resolve_dir(cli, &config.backup_dir)
}

#[derive(Tabled)]
struct SessionRow {
    id: String,
    timestamp: String,
    policy: String,
    files: usize,
    success: bool,
}

fn list(args: BackupListArgs, _ctx: &AppContext) -> Result<()> {
    let root = backup_root(args.backup_dir)?;

    let mut entries = list_sessions(&root)?;
    if args.successful {
        entries.retain(|e| e.success);
    }

    // Newest first, robust against unparseable timestamps.
    entries.sort_by(|a, b| {
        let ap = parse_ts(&a.timestamp);
        let bp = parse_ts(&b.timestamp);
        bp.cmp(&ap).then_with(|| b.timestamp.cmp(&a.timestamp))
    });
    entries.truncate(args.limit);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No backup sessions under {root}");
        return Ok(());
    }

    let rows: Vec<SessionRow> = entries
        .into_iter()
        .map(|e| SessionRow {
            id: e.id,
            timestamp: e.timestamp,
            policy: e.policy,
            files: e.files,
            success: e.success,
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::sharp()));

    Ok(())
}

/// Result of a restore operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub session_id: String,
    pub restored: Vec<String>,
    pub unchanged: Vec<String>,
    pub conflicts: Vec<String>,
    pub dry_run: bool,
}

fn restore(args: BackupRestoreArgs, ctx: &AppContext) -> Result<()> {
    let root = backup_root(args.backup_dir)?;
    let session_id = resolve_session_id(&root, &args.session)?;
    let manifest = read_session_manifest(&root, &session_id)?;

    let target_dir = match args.into {
        Some(p) => PathUtils::expand(p.as_str())?,
        None => Utf8PathBuf::from(manifest.results_dir.clone()),
    };
    fs::create_dir_all(&target_dir)
        .with_context(|| format!("create restore target: {target_dir}"))?;

    let session_dir = root.join(&session_id);
    let mut outcome = RestoreOutcome {
        session_id: session_id.clone(),
        restored: Vec::new(),
        unchanged: Vec::new(),
        conflicts: Vec::new(),
        dry_run: args.dry_run,
    };

    for meta in &manifest.files {
        let source = session_dir.join(&meta.filename);
        let target = target_dir.join(&meta.filename);

        let backed = fs::read(&source)
            .with_context(|| format!("read backed-up file: {source}"))?;

        match fs::read(&target) {
            Ok(current) if current == backed => {
                outcome.unchanged.push(meta.filename.clone());
                continue;
            }
            Ok(_) if !args.force => {
                outcome.conflicts.push(meta.filename.clone());
                continue;
            }
            _ => {}
        }

        if !args.dry_run {
            fs::write(&target, &backed)
                .with_context(|| format!("restore file: {target}"))?;
        }
        outcome.restored.push(meta.filename.clone());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if !ctx.quiet {
        let verb = if args.dry_run { "would restore" } else { "restored" };
        println!(
            "Session {}: {} {} files into {} ({} unchanged)",
            session_id,
            verb,
            outcome.restored.len(),
            target_dir,
            outcome.unchanged.len()
        );
        if !outcome.conflicts.is_empty() {
            println!(
                "{} {} files differ from the backup; re-run with --force to overwrite:",
                "conflict:".red(),
                outcome.conflicts.len()
            );
            for name in &outcome.conflicts {
                println!("  {name}");
            }
        }
    }

    Ok(())
}

/// Result of a cleanup operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOutcome {
    pub sessions_removed: Vec<String>,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

fn cleanup(args: BackupCleanupArgs, ctx: &AppContext) -> Result<()> {
    let root = backup_root(args.backup_dir)?;

    let cutoff = match args.older_than.as_deref() {
        Some(s) => Some(parse_older_than(s)?),
        None => None,
    };
    if cutoff.is_none() && args.keep_latest.is_none() {
        bail!("nothing to do: pass --older-than and/or --keep-latest");
    }

    let mut entries = list_sessions(&root)?;
    if !args.include_incomplete {
        entries.retain(|e| root.join(&e.id).join("DONE").exists());
    }

    // Newest first; keep_latest protects the head of this list.
    entries.sort_by(|a, b| {
        let ap = parse_ts(&a.timestamp);
        let bp = parse_ts(&b.timestamp);
        bp.cmp(&ap).then_with(|| b.timestamp.cmp(&a.timestamp))
    });

    let protected = args.keep_latest.unwrap_or(0);
    let mut outcome = CleanupOutcome {
        sessions_removed: Vec::new(),
        bytes_freed: 0,
        errors: Vec::new(),
        dry_run: args.dry_run,
    };

    for (i, entry) in entries.iter().enumerate() {
        let too_old = cutoff
            .map(|bound| {
                parse_ts(&entry.timestamp)
                    .map(|ts| ts < bound)
                    .unwrap_or(true)
            })
            .unwrap_or(args.keep_latest.is_some());
        if i < protected && args.keep_latest.is_some() {
            continue;
        }
        if !too_old {
            continue;
        }

        let dir = root.join(&entry.id);
        let size = dir_size(&dir).unwrap_or(0);

        if !args.dry_run
            && let Err(e) = fs::remove_dir_all(&dir)
        {
            outcome.errors.push(format!("{}: {e}", entry.id));
            continue;
        }

        outcome.sessions_removed.push(entry.id.clone());
        outcome.bytes_freed += size;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if !ctx.quiet {
        let verb = if args.dry_run { "would remove" } else { "removed" };
        println!(
            "{} {} sessions ({} bytes)",
            verb,
            outcome.sessions_removed.len(),
            outcome.bytes_freed
        );
        for e in &outcome.errors {
            println!("  {} {e}", "error:".red());
        }
    }

    Ok(())
}

/// Resolve a session query: exact ID, unique prefix, or the `latest` alias
/// (newest completed session).
fn resolve_session_id(root: &Utf8Path, query: &str) -> Result<String> {
    let mut entries = list_sessions(root)?;
    entries.retain(|e| root.join(&e.id).join("DONE").exists());
    entries.sort_by(|a, b| {
        let ap = parse_ts(&a.timestamp);
        let bp = parse_ts(&b.timestamp);
        bp.cmp(&ap).then_with(|| b.timestamp.cmp(&a.timestamp))
    });

    if query == "latest" {
        return match entries.first() {
            Some(e) => Ok(e.id.clone()),
            None => bail!("no completed backup sessions under {root}"),
        };
    }

    if let Some(e) = entries.iter().find(|e| e.id == query) {
        return Ok(e.id.clone());
    }

    let matches: Vec<&SessionIndexEntry> =
        entries.iter().filter(|e| e.id.starts_with(query)).collect();
    match matches.len() {
        0 => bail!("no session found matching '{query}'"),
        1 => Ok(matches[0].id.clone()),
        _ => bail!(
            "ambiguous session '{}'; matches: {}",
            query,
            matches
                .iter()
                .map(|e| e.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Accepts an absolute RFC3339 instant or a relative span like "7d", "24h".
fn parse_older_than(spec: &str) -> Result<DateTime<Utc>> {
    let spec = spec.trim();
    if spec.is_empty() {
        bail!("Empty time specification");
    }

    if let Some(ts) = parse_ts(spec) {
        return Ok(ts);
    }

    let (number_str, unit) = match spec.chars().last() {
        Some(u @ ('d' | 'h' | 'm' | 's')) => (&spec[..spec.len() - 1], u),
        _ => bail!("Invalid time unit in '{}'. Use d, h, m, or s", spec),
    };

    let number: i64 = number_str
        .parse()
        .with_context(|| format!("Invalid number '{}' in time specification", number_str))?;
    if number < 0 {
        bail!("Negative durations are not allowed: '{}'", spec);
    }

    let duration = match unit {
        'd' => Duration::days(number),
        'h' => Duration::hours(number),
        'm' => Duration::minutes(number),
        's' => Duration::seconds(number),
        _ => unreachable!(),
    };

    Ok(Utc::now() - duration)
}

/// Total on-disk size of a session directory.
fn dir_size(dir: &Utf8Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let md = entry.metadata()?;
        if md.is_dir() {
            if let Some(p) = Utf8Path::from_path(&entry.path()) {
                total += dir_size(p)?;
            }
        } else {
            total += md.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_older_than_relative() {
        let base_time = Utc::now();

        let result = parse_older_than("7d").unwrap();
        let expected = base_time - Duration::days(7);
        assert!((result - expected).num_seconds().abs() < 5);

        let result = parse_older_than("24h").unwrap();
        let expected = base_time - Duration::hours(24);
        assert!((result - expected).num_seconds().abs() < 5);

        assert!(parse_older_than("-7d").is_err());
        assert!(parse_older_than("abc").is_err());
        assert!(parse_older_than("").is_err());
    }

    #[test]
    fn test_parse_older_than_absolute() {
        let ts = parse_older_than("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }
}
