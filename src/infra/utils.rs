//! Filepath: src/infra/utils.rs
//! Utility helpers organized by small, focused structs.
//! All functions are associated fns to keep call sites
//! ergonomic, testable, and discoverable.

use anyhow::{Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use std::path::PathBuf;

/// Path resolution helpers
pub struct PathUtils;

impl PathUtils
{
    /// Expand `~` and `$VAR`, then normalize. Paths that do not exist
    /// yet (backup roots, report targets) pass through unchanged.
    pub fn expand(input: &str) -> Result<Utf8PathBuf>
    {
        // Shell-style expansion first
        let expanded = shellexpand::full(input)?;

        let raw = PathBuf::from(expanded.as_ref());

        // Canonicalize without UNC prefixes on Windows
        let normalized = dunce::canonicalize(&raw).unwrap_or(raw);

        Utf8PathBuf::from_path_buf(normalized)
            .map_err(|p| anyhow!("non UTF-8 path: {}", p.display()))
    }

    /// Resolve a directory from a CLI override or a config default.
    pub fn resolve_dir(
        cli: Option<Utf8PathBuf>,
        config_default: &Utf8Path,
    ) -> Result<Utf8PathBuf>
    {
        match cli
        {
            Some(p) => Self::expand(p.as_str()),
            None => Self::expand(config_default.as_str()),
        }
    }
}

/// Human-readable formatting helpers
pub struct FmtUtils;

impl FmtUtils
{
    /// Integer percentage with a divide-by-zero guard
    pub fn percent(
        part: usize,
        whole: usize,
    ) -> u32
    {
        if whole == 0
        {
            return 0;
        }

        ((part as f64 / whole as f64) * 100.0).round() as u32
    }
}
