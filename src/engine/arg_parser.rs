use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::config::PackagePaths;

/// Estimate the monthly cost of alerting policies.
#[derive(Clone, Parser)]
#[command(name = "alertprice")]
#[command(
    about = "Estimate what alerting policies will cost, per policy, as a summary, or as CSV."
)]
pub struct Cli {
    /// Alert policies to price, `projects/P/alertPolicies/ID`. Comma-separated or repeated.
    #[arg(long, value_delimiter = ',')]
    pub policy: Vec<String>,

    /// Projects whose enabled policies are priced.
    #[arg(long, short = 'p', value_delimiter = ',')]
    pub project: Vec<String>,

    /// Folder ids whose projects are priced.
    #[arg(long, short = 'f', value_delimiter = ',')]
    pub folder: Vec<String>,

    /// Organization ids whose projects are priced.
    #[arg(long, short = 'o', value_delimiter = ',')]
    pub organization: Vec<String>,

    /// Folder ids skipped together with everything below them.
    #[arg(long, short = 'e', value_delimiter = ',')]
    pub exclude_folder: Vec<String>,

    /// Descend into child folders of folder/organization roots.
    #[arg(long, short = 'r', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub recursive: Option<bool>,

    /// Skip projects where the caller lacks the monitoring permissions.
    #[arg(long, short = 't', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub test_permissions: Option<bool>,

    /// Also price disabled policies.
    #[arg(long, short = 'i', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub include_disabled: Option<bool>,

    /// Print only the total over all policies.
    #[arg(long, short = 's', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub summary: Option<bool>,

    /// Write one CSV row per policy to PATH instead of printing.
    #[arg(long, short = 'c', value_name = "PATH")]
    pub csv_out: Option<PathBuf>,

    /// Workers per stage. Default: 4.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub threads: Option<usize>,

    /// Lookback window of the queries, e.g. `12h`, `30m`. Default: 12h.
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Project billed for API quota.
    #[arg(long, short = 'q')]
    pub quota_project: Option<String>,

    /// JSON snapshot replayed as the monitoring backend.
    #[arg(long, value_name = "PATH")]
    pub snapshot: Option<PathBuf>,

    /// Settings file. Default: `.alertprice.toml` in the working directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

impl Cli {
    /// Get the settings file path, defaulting to the package config filename.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(PackagePaths::get().config_filename()))
    }
}
