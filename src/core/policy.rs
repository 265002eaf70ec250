//! Keeper selection policies.
//!
//! Both policies agree on the headline rule: a failed record beats a
//! successful one, because failures are the rare, hard-to-reproduce
//! evidence. They diverge on everything after that:
//!
//! - `worst` keeps the least flattering duplicate (fewest passing
//!   sub-attempts, shortest run, earliest timestamp), so the surviving
//!   sample is never biased toward favorable outcomes.
//! - `freshest` keeps the richest evidence (most recent timestamp,
//!   largest log payload, highest attempt number).
//!
//! Every chain ends in stable file-name order, which makes both policies
//! total orders: identical inputs always produce the identical keeper.

use std::cmp::Ordering;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::core::record::RecordFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeepPolicy {
    /// Keep the worst performing duplicate (conservative)
    Worst,
    /// Keep the most recent, most detailed duplicate, failures first
    Freshest,
}

impl KeepPolicy {
    /// Stable label for manifests, reports, and log lines.
    pub fn label(&self) -> &'static str {
        match self {
            KeepPolicy::Worst => "worst",
            KeepPolicy::Freshest => "freshest",
        }
    }

    /// Compare two group members by keep priority: `Less` means `a` is the
    /// better keeper. Never returns `Equal` for distinct files.
    pub fn cmp_keep(&self, a: &RecordFile, b: &RecordFile) -> Ordering {
        let ord = match self {
            KeepPolicy::Worst => cmp_worst(a, b),
            KeepPolicy::Freshest => cmp_freshest(a, b),
        };

        // Identical candidates fall through to stable name order.
        ord.then_with(|| a.filename.cmp(&b.filename))
    }

    /// Pick exactly one keeper from a group. `None` only for empty groups,
    /// which the scan never produces.
    pub fn select_keeper<'a>(&self, group: &'a [RecordFile]) -> Option<&'a RecordFile> {
        group.iter().min_by(|a, b| self.cmp_keep(a, b))
    }
}

/// failed > fewer passing sub-attempts > shorter run > earliest timestamp
fn cmp_worst(a: &RecordFile, b: &RecordFile) -> Ordering {
    // false sorts before true, so failures win
    a.record
        .is_success()
        .cmp(&b.record.is_success())
        .then_with(|| {
            a.record
                .successful_attempts()
                .cmp(&b.record.successful_attempts())
        })
        .then_with(|| {
            a.record
                .execution_time_ms()
                .total_cmp(&b.record.execution_time_ms())
        })
        .then_with(|| a.record.timestamp_utc().cmp(&b.record.timestamp_utc()))
}

/// failed > most recent timestamp > larger payload > higher attempt number
fn cmp_freshest(a: &RecordFile, b: &RecordFile) -> Ordering {
    a.record
        .is_success()
        .cmp(&b.record.is_success())
        .then_with(|| b.record.timestamp_utc().cmp(&a.record.timestamp_utc()))
        .then_with(|| b.size_bytes.cmp(&a.size_bytes))
        .then_with(|| b.record.attempt_number().cmp(&a.record.attempt_number()))
}
