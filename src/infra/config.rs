use camino::Utf8PathBuf;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::policy::KeepPolicy;

#[derive(Debug, Serialize, Deserialize)]
pub struct Config
{
    /// Results directory holding result_*.json records
    pub results_dir: Utf8PathBuf,

    /// Root for backup sessions created by live dedup runs
    pub backup_dir: Utf8PathBuf,

    /// Directory for run reports; reports land next to the results
    /// directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_dir: Option<Utf8PathBuf>,

    /// Result-file naming prefix
    pub file_prefix: String,

    /// Glob patterns excluded from scans (matched on bare file names)
    pub ignore_patterns: Vec<String>,

    /// Default dedup settings
    pub dedup: DedupConfig,

    /// Expected corpus shape for coverage accounting
    pub coverage: CoverageConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DedupConfig
{
    pub policy: KeepPolicy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoverageConfig
{
    pub websites: Vec<String>,
    pub models: Vec<String>,
    pub tasks_per_website: usize,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            results_dir: Utf8PathBuf::from("benchmark_results/data"),
            backup_dir: Utf8PathBuf::from("benchmark_results/backups"),
            report_dir: None,
            file_prefix: "result_".to_string(),
            ignore_patterns: vec!["*.partial.json".to_string()],
            dedup: DedupConfig { policy: KeepPolicy::Worst },
            coverage: CoverageConfig {
                websites: vec![
                    "Airbnb".to_string(),
                    "TikTok".to_string(),
                    "reddit".to_string(),
                    "instagram".to_string(),
                    "facebook".to_string(),
                    "discord".to_string(),
                    "Threads".to_string(),
                ],
                models: vec![
                    "openai/gpt-4.1".to_string(),
                    "deepseek-ai/DeepSeek-V3.1-thinking-on".to_string(),
                    "openai/gpt-4o-mini".to_string(),
                    "google/gemini-2.5-pro-thinking-on".to_string(),
                ],
                tasks_per_website: 20,
            },
        }
    }
}

pub fn load_config() -> Result<Config>
{
    let mut builder = config::Config::builder();

    // Load from config files in priority order
    let config_paths = ["benchsweep.toml", ".benchsweep.toml"];

    for path in &config_paths
    {
        if Path::new(path).exists()
        {
            builder = builder.add_source(config::File::with_name(path));
            break;
        }
    }

    // Add environment variables with BENCHSWEEP_ prefix
    builder = builder.add_source(config::Environment::with_prefix("BENCHSWEEP").separator("_"));

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join("benchsweep.toml");

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {config_path}");
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_default_round_trips_through_toml()
    {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();

        assert_eq!(back.file_prefix, "result_");
        assert_eq!(back.dedup.policy, KeepPolicy::Worst);
        assert_eq!(back.coverage.tasks_per_website, 20);
        assert_eq!(back.coverage.websites.len(), 7);
    }
}
