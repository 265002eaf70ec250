//! Success-rate aggregation over the deduplicated record set.
//!
//! Groups collapse to their final attempt (highest attempt number wins,
//! first-seen on ties) before any rate is computed, so re-runs of a task
//! never inflate totals.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{AppContext, MetricsArgs};
use crate::core::record::{RecordFile, ScanOutcome, scan_results};
use crate::infra::config::load_config;
use crate::infra::utils::PathUtils;
use crate::infra::walk::ResultFileWalker;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateStats {
    pub total: usize,
    pub success: usize,
    pub success_rate: f64,
}

impl RateStats {
    fn add(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.success += 1;
        }
    }

    fn finish(mut self) -> Self {
        self.success_rate = if self.total == 0 {
            0.0
        } else {
            (self.success as f64 / self.total as f64 * 1000.0).round() / 10.0
        };
        self
    }

    fn empty() -> Self {
        RateStats {
            total: 0,
            success: 0,
            success_rate: 0.0,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub generated: String,
    pub total_files: usize,
    pub unique_combinations: usize,
    pub corrupted_files: usize,
    pub overall: RateStats,
    pub models: BTreeMap<String, RateStats>,
    pub websites: BTreeMap<String, RateStats>,
}

/// Keep one record per composite key: the one with the highest attempt
/// number (ties resolved in scan order).
pub fn final_records(scan: &ScanOutcome) -> Vec<&RecordFile> {
    scan.groups
        .values()
        .filter_map(|group| {
            group.iter().fold(None::<&RecordFile>, |best, candidate| {
                match best {
                    Some(b) if candidate.record.attempt_number() <= b.record.attempt_number() => {
                        Some(b)
                    }
                    _ => Some(candidate),
                }
            })
        })
        .collect()
}

/// Pure aggregation over the collapsed record set.
pub fn compute(scan: &ScanOutcome) -> MetricsReport {
    let finals = final_records(scan);

    let mut overall = RateStats::empty();
    let mut models: BTreeMap<String, RateStats> = BTreeMap::new();
    let mut websites: BTreeMap<String, RateStats> = BTreeMap::new();

    for file in &finals {
        let success = file.record.is_success();
        overall.add(success);
        models
            .entry(file.model.clone())
            .or_insert_with(RateStats::empty)
            .add(success);
        websites
            .entry(file.website.clone())
            .or_insert_with(RateStats::empty)
            .add(success);
    }

    MetricsReport {
        generated: chrono::Utc::now().to_rfc3339(),
        total_files: scan.total_files,
        unique_combinations: finals.len(),
        corrupted_files: scan.corrupted.len(),
        overall: overall.finish(),
        models: models.into_iter().map(|(k, v)| (k, v.finish())).collect(),
        websites: websites.into_iter().map(|(k, v)| (k, v.finish())).collect(),
    }
}

#[derive(Tabled)]
struct RateRow {
    name: String,
    total: usize,
    success: usize,
    #[tabled(rename = "rate(%)")]
    rate: f64,
}

fn rate_rows(stats: &BTreeMap<String, RateStats>) -> Vec<RateRow> {
    stats
        .iter()
        .sorted_by(|a, b| {
            b.1.success_rate
                .total_cmp(&a.1.success_rate)
                .then_with(|| a.0.cmp(b.0))
        })
        .map(|(name, s)| RateRow {
            name: name.clone(),
            total: s.total,
            success: s.success,
            rate: s.success_rate,
        })
        .collect()
}

/// Entry point for `bsw metrics`.
pub fn run(args: MetricsArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config().unwrap_or_default();
    let results_dir = PathUtils::resolve_dir(args.dir, &config.results_dir)?;
    let walker = ResultFileWalker::new(&config.file_prefix, &config.ignore_patterns)?;

    let scan = scan_results(&results_dir, &walker)?;
    let report = compute(&scan);

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("write metrics report: {path}"))?;
        if !ctx.quiet {
            println!("Metrics report written to {path}");
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if !ctx.quiet {
        println!(
            "{} unique combinations from {} files ({} corrupted skipped)",
            report.unique_combinations, report.total_files, report.corrupted_files
        );
        println!(
            "overall: {}/{} succeeded ({}%)",
            report.overall.success, report.overall.total, report.overall.success_rate
        );
    }

    println!("{}", Table::new(rate_rows(&report.models)).with(Style::sharp()));
    println!("{}", Table::new(rate_rows(&report.websites)).with(Style::sharp()));

    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;

    fn write_record(dir: &Utf8Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    fn scan_dir(dir: &Utf8Path) -> ScanOutcome {
        let walker = ResultFileWalker::new("result_", &[]).unwrap();
        scan_results(dir, &walker).unwrap()
    }

    #[test]
    fn test_highest_attempt_wins() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();

        // Same combination; the retry succeeded.
        write_record(
            dir,
            "result_first.json",
            r#"{"model":"m1","website":"w1","task":{"id":"t1"},"success":false,"attempt":1}"#,
        );
        write_record(
            dir,
            "result_retry.json",
            r#"{"model":"m1","website":"w1","task":{"id":"t1"},"success":true,"attempt":2}"#,
        );

        let report = compute(&scan_dir(dir));

        assert_eq!(report.unique_combinations, 1);
        assert_eq!(report.overall.total, 1);
        assert_eq!(report.overall.success, 1);
        assert_eq!(report.overall.success_rate, 100.0);
    }

    #[test]
    fn test_rates_per_model_and_website() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();

        write_record(
            dir,
            "result_a.json",
            r#"{"model":"m1","website":"w1","task":{"id":"t1"},"success":true}"#,
        );
        write_record(
            dir,
            "result_b.json",
            r#"{"model":"m1","website":"w1","task":{"id":"t2"},"success":false}"#,
        );
        write_record(
            dir,
            "result_c.json",
            r#"{"model":"m2","website":"w2","task":{"id":"t1"},"success":true}"#,
        );

        let report = compute(&scan_dir(dir));

        assert_eq!(report.unique_combinations, 3);
        assert_eq!(report.models["m1"].total, 2);
        assert_eq!(report.models["m1"].success, 1);
        assert_eq!(report.models["m1"].success_rate, 50.0);
        assert_eq!(report.models["m2"].success_rate, 100.0);
        assert_eq!(report.websites["w1"].total, 2);
        assert_eq!(report.websites["w2"].total, 1);
        assert_eq!(report.overall.success_rate, 66.7);
    }

    #[test]
    fn test_empty_corpus() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();

        let report = compute(&scan_dir(dir));
        assert_eq!(report.overall.total, 0);
        assert_eq!(report.overall.success_rate, 0.0);
        assert!(report.models.is_empty());
    }
}
