//! Application configuration constants.
//! Pricing, defaults and package-derived names in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Settings file looked up in the working directory when `--config` is not given.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }
}

// ---- Pricing ----

/// Fixed pricing formula. Samples are billed at $0.35 per million over a 30-day month.
pub struct PricingConsts;

impl PricingConsts {
    /// Flat surcharge per condition, independent of what its query returns.
    pub const CONDITION_BASE_PRICE: f64 = 1.5;
    /// Price of one time series sampled every 30 s for 30 days:
    /// 2_592_000 s / 30 s * 0.35 / 1_000_000.
    pub const PRICE_PER_SERIES: f64 = 0.03024;
    /// 2_592_000 s * 0.35 / 1_000_000. Divide by the PromQL step (seconds) for a per-series price.
    pub const PROMQL_MONTH_PRICE: f64 = 0.9072;
}

// ---- Scan defaults ----

/// Defaults applied before the settings file and CLI flags.
pub struct ScanDefaults;

impl ScanDefaults {
    /// Worker count per pipeline stage (and queue capacity between stages).
    pub const THREADS: usize = 4;
    /// How far back from now the replayed queries look.
    pub const LOOKBACK: Duration = Duration::from_secs(12 * 60 * 60);
}

// ---- Permissions ----

/// Permissions a project must grant before its policies can be listed and replayed.
/// Checked in this order; the first missing one is reported.
pub const REQUIRED_PERMISSIONS: [&str; 3] = [
    "monitoring.timeSeries.list",
    "monitoring.alertPolicies.get",
    "monitoring.alertPolicies.list",
];

// ---- Output ----

/// Console page for a single alerting policy; `{policy}` and `{project}` are substituted.
pub const CONSOLE_POLICY_URL: &str =
    "https://console.cloud.google.com/monitoring/alerting/policies/{policy}?project={project}";

/// Column header of the CSV report.
pub const CSV_HEADER: [&str; 8] = [
    "ProjectId",
    "Policy Name",
    "Link",
    "DisplayName",
    "Conditions",
    "Time Series",
    "Price",
    "Error",
];
