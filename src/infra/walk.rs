//! Filepath: src/infra/walk.rs
//! Flat result-directory walker.
//! - Scans a single directory level (results corpora are flat stores)
//! - Keeps only files matching the result naming convention
//!   (`<prefix>*.json`, e.g. `result_a9Jh5.json`)
//! - Extra exclude globs for stray files (plans, reports, temp copies)
//! - Deterministic ordering for stable plans/tests
//!
//! Backed by ripgrep's `ignore` crate and `globset`. The scan does NOT
//! respect gitignore files: a results directory is a data store, and an
//! inherited ignore rule must never hide records from the audit.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use regex::Regex;

/// Walker over one directory level of result files.
pub struct ResultFileWalker
{
    /// Compiled result-file naming convention, anchored on the file name
    name_re: Regex,

    /// Compiled set of additional exclude patterns
    exclude_patterns: GlobSet,
}

impl ResultFileWalker
{
    /// Build a walker for files named `<prefix>*.json`, minus any
    /// `excludes` globs (matched against bare file names).
    pub fn new(
        prefix: &str,
        excludes: &[String],
    ) -> Result<Self>
    {
        let name_re = Regex::new(&format!(r"^{}.*\.json$", regex::escape(prefix)))?;

        let mut builder = GlobSetBuilder::new();

        for pattern in excludes
        {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            name_re,
            exclude_patterns: builder.build()?,
        })
    }

    /// Whether a bare file name is in scope for scanning.
    pub fn matches(
        &self,
        file_name: &str,
    ) -> bool
    {
        self.name_re
            .is_match(file_name)
            && !self
                .exclude_patterns
                .is_match(file_name)
    }

    /// Collect in-scope result files directly under `root`.
    /// Returns a **sorted** list of paths for determinism.
    pub fn walk_files<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Vec<PathBuf>
    {
        let mut b = WalkBuilder::new(root.as_ref());

        // One level only; the corpus is flat
        b.max_depth(Some(1));

        // Data store scan: no ignore-file semantics of any kind
        b.standard_filters(false);

        // Dotfiles are never result files
        b.hidden(true);

        b.follow_links(false);

        let mut out: Vec<PathBuf> = b
            .build()
            // Drop entries with IO errors (surfaced separately by the scan)
            .filter_map(|res| res.ok())
            // Keep only regular files
            .filter(|entry| {
                entry
                    .file_type()
                    .is_some_and(|ft| ft.is_file())
            })
            .map(|entry| entry.into_path())
            // Apply the naming convention + excludes on the bare name
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| self.matches(name))
            })
            .collect();

        // Deterministic order (stable plans & tests)
        out.sort();

        out
    }
}
