//! Task coverage accounting per website and model.
//!
//! Counts come from parsed records only. A file whose record does not
//! carry its own model/website/task identity is corrupted and excluded;
//! nothing is ever inferred from file names.

use std::collections::BTreeSet;

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{AppContext, CoverageArgs};
use crate::core::record::{RecordFile, scan_results};
use crate::infra::config::load_config;
use crate::infra::utils::{FmtUtils, PathUtils};
use crate::infra::walk::ResultFileWalker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageStatus {
    Complete,
    Mostly,
    Partial,
    Incomplete,
}

impl CoverageStatus {
    fn label(&self) -> &'static str {
        match self {
            CoverageStatus::Complete => "complete",
            CoverageStatus::Mostly => "mostly complete",
            CoverageStatus::Partial => "partially complete",
            CoverageStatus::Incomplete => "incomplete",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ModelCoverage {
    pub model: String,
    pub completed: usize,
    pub expected: usize,
    pub percent: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteCoverage {
    pub website: String,
    pub files: usize,
    pub unique_tasks: usize,
    pub status: CoverageStatus,
    pub per_model: Vec<ModelCoverage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub generated: String,
    pub corrupted_files: usize,
    pub sites: Vec<SiteCoverage>,
}

/// Pure aggregation over scanned records.
pub fn compute(
    records: &[&RecordFile],
    websites: &[String],
    models: &[String],
    tasks_per_site: usize,
    observed_denominator: bool,
) -> Vec<SiteCoverage> {
    let mut sites = Vec::with_capacity(websites.len());

    for website in websites {
        let site_records: Vec<&&RecordFile> = records
            .iter()
            .filter(|r| r.website == *website)
            .collect();

        let observed: BTreeSet<&str> = site_records
            .iter()
            .map(|r| r.task_id.as_str())
            .collect();
        let expected = if observed_denominator {
            observed.len()
        } else {
            tasks_per_site
        };

        let per_model: Vec<ModelCoverage> = models
            .iter()
            .map(|model| {
                let completed: BTreeSet<&str> = site_records
                    .iter()
                    .filter(|r| r.model == *model)
                    .map(|r| r.task_id.as_str())
                    .collect();
                ModelCoverage {
                    model: model.clone(),
                    completed: completed.len(),
                    expected,
                    percent: FmtUtils::percent(completed.len(), expected),
                }
            })
            .collect();

        sites.push(SiteCoverage {
            website: website.clone(),
            files: site_records.len(),
            unique_tasks: observed.len(),
            status: site_status(&per_model, expected),
            per_model,
        });
    }

    sites
}

fn site_status(per_model: &[ModelCoverage], expected: usize) -> CoverageStatus {
    if expected == 0 || per_model.is_empty() {
        return CoverageStatus::Incomplete;
    }

    let min = per_model.iter().map(|m| m.completed).min().unwrap_or(0);
    if min >= expected {
        return CoverageStatus::Complete;
    }

    let sum: usize = per_model.iter().map(|m| m.completed).sum();
    let avg = sum as f64 / per_model.len() as f64;
    let ratio = avg / expected as f64;

    if ratio >= 0.9 {
        CoverageStatus::Mostly
    } else if ratio >= 0.5 {
        CoverageStatus::Partial
    } else {
        CoverageStatus::Incomplete
    }
}

#[derive(Tabled)]
struct CoverageRow {
    website: String,
    model: String,
    completed: String,
    pct: String,
}

/// Entry point for `bsw coverage`.
pub fn run(args: CoverageArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config().unwrap_or_default();
    let results_dir = PathUtils::resolve_dir(args.dir, &config.results_dir)?;
    let walker = ResultFileWalker::new(&config.file_prefix, &config.ignore_patterns)?;

    let scan = scan_results(&results_dir, &walker)?;
    let records: Vec<&RecordFile> = scan.records().collect();

    let websites = if args.websites.is_empty() {
        config.coverage.websites
    } else {
        args.websites
    };
    let models = if args.models.is_empty() {
        config.coverage.models
    } else {
        args.models
    };
    let tasks_per_site = args
        .tasks_per_site
        .unwrap_or(config.coverage.tasks_per_website);

    let sites = compute(&records, &websites, &models, tasks_per_site, args.observed);

    if args.json {
        let report = CoverageReport {
            generated: chrono::Utc::now().to_rfc3339(),
            corrupted_files: scan.corrupted.len(),
            sites,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let rows: Vec<CoverageRow> = sites
        .iter()
        .flat_map(|site| {
            site.per_model.iter().map(|m| CoverageRow {
                website: site.website.clone(),
                model: short_model(&m.model).to_string(),
                completed: format!("{}/{}", m.completed, m.expected),
                pct: format!("{}%", m.percent),
            })
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::sharp()));

    if !ctx.quiet {
        for site in &sites {
            let line = format!(
                "{}: {} ({} files, {} unique tasks)",
                site.website,
                site.status.label(),
                site.files,
                site.unique_tasks
            );
            match site.status {
                CoverageStatus::Complete => println!("{}", line.green()),
                CoverageStatus::Mostly | CoverageStatus::Partial => {
                    println!("{}", line.yellow());
                }
                CoverageStatus::Incomplete => println!("{}", line.red()),
            }
        }
        if !scan.corrupted.is_empty() {
            println!("{} corrupted files skipped", scan.corrupted.len());
        }
    }

    Ok(())
}

/// Short display name: the part after the provider prefix.
fn short_model(model: &str) -> &str {
    model.split('/').next_back().unwrap_or(model)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::core::record::ResultRecord;

    fn record(model: &str, website: &str, task: &str) -> RecordFile {
        RecordFile {
            path: Utf8PathBuf::from(format!("result_{model}_{website}_{task}.json")),
            filename: format!("result_{model}_{website}_{task}.json"),
            size_bytes: 1,
            model: model.to_string(),
            website: website.to_string(),
            task_id: task.to_string(),
            key: format!("{model}__{website}__{task}"),
            record: ResultRecord::default(),
        }
    }

    #[test]
    fn test_counts_unique_tasks_per_model() {
        let files = vec![
            record("m1", "w1", "t1"),
            record("m1", "w1", "t1"), // duplicate combination
            record("m1", "w1", "t2"),
            record("m2", "w1", "t1"),
        ];
        let refs: Vec<&RecordFile> = files.iter().collect();

        let sites = compute(
            &refs,
            &["w1".to_string()],
            &["m1".to_string(), "m2".to_string()],
            2,
            false,
        );

        assert_eq!(sites.len(), 1);
        let site = &sites[0];
        assert_eq!(site.files, 4);
        assert_eq!(site.unique_tasks, 2);
        assert_eq!(site.per_model[0].completed, 2); // m1: t1, t2
        assert_eq!(site.per_model[0].percent, 100);
        assert_eq!(site.per_model[1].completed, 1); // m2: t1
        assert_eq!(site.per_model[1].percent, 50);
        assert_eq!(site.status, CoverageStatus::Partial);
    }

    #[test]
    fn test_complete_requires_every_model() {
        let files = vec![
            record("m1", "w1", "t1"),
            record("m2", "w1", "t1"),
        ];
        let refs: Vec<&RecordFile> = files.iter().collect();

        let sites = compute(
            &refs,
            &["w1".to_string()],
            &["m1".to_string(), "m2".to_string()],
            1,
            false,
        );
        assert_eq!(sites[0].status, CoverageStatus::Complete);
    }

    #[test]
    fn test_observed_denominator() {
        let files = vec![record("m1", "w1", "t1"), record("m1", "w1", "t2")];
        let refs: Vec<&RecordFile> = files.iter().collect();

        // Expected comes from the data itself, not config.
        let sites = compute(&refs, &["w1".to_string()], &["m1".to_string()], 20, true);
        assert_eq!(sites[0].per_model[0].expected, 2);
        assert_eq!(sites[0].status, CoverageStatus::Complete);
    }

    #[test]
    fn test_unknown_site_is_incomplete() {
        let refs: Vec<&RecordFile> = Vec::new();
        let sites = compute(&refs, &["w9".to_string()], &["m1".to_string()], 20, false);
        assert_eq!(sites[0].status, CoverageStatus::Incomplete);
        assert_eq!(sites[0].per_model[0].percent, 0);
    }

    #[test]
    fn test_short_model_names() {
        assert_eq!(short_model("openai/gpt-4.1"), "gpt-4.1");
        assert_eq!(short_model("plain-model"), "plain-model");
    }
}
