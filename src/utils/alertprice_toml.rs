//! Load `.alertprice.toml` (CLI only). Lib callers build [`ScanConfig`](crate::ScanConfig) themselves.
//!
//! ```toml
//! [settings]
//! threads = 8
//! duration = "6h"
//! exclude_folders = ["123", "456"]
//! snapshot = "hierarchy.json"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::RunOpts;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct AlertpriceToml {
    #[serde(default)]
    settings: SettingsSection,
}

/// Scan roots are deliberately absent: they always come from the command line.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsSection {
    exclude_folders: Option<Vec<String>>,
    recursive: Option<bool>,
    include_disabled: Option<bool>,
    test_permissions: Option<bool>,
    summary: Option<bool>,
    csv_out: Option<String>,
    threads: Option<usize>,
    duration: Option<String>,
    quota_project: Option<String>,
    snapshot: Option<String>,
    verbose: Option<bool>,
}

/// Load the settings file at `path`. `Ok(None)` when it does not exist; a file that exists but
/// cannot be read or parsed is an error.
pub(crate) fn load_alertprice_toml(path: &Path) -> Result<Option<AlertpriceToml>> {
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let file = toml::from_str(&s).with_context(|| format!("parse config {}", path.display()))?;
    Ok(Some(file))
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($idx:expr, $opts:expr, $idx_field:ident => $($opts_field:ident).+) => {
        if let Some(v) = $idx.$idx_field.clone() {
            $opts.$($opts_field).+ = v;
        }
    };
}

/// Apply file config to opts (only set fields present in the file). Call before applying CLI.
pub(crate) fn apply_file_to_opts(file: &AlertpriceToml, opts: &mut RunOpts) -> Result<()> {
    let s = &file.settings;
    if let Some(ref folders) = s.exclude_folders {
        opts.scan.excluded_folders = folders.iter().cloned().collect();
    }
    apply_file_opt!(s, opts, recursive => scan.recursive);
    apply_file_opt!(s, opts, include_disabled => scan.include_disabled);
    apply_file_opt!(s, opts, test_permissions => scan.test_permissions);
    apply_file_opt!(s, opts, summary => summary);
    if let Some(ref p) = s.csv_out {
        opts.csv_out = Some(PathBuf::from(p));
    }
    apply_file_opt!(s, opts, threads => scan.threads);
    if let Some(ref d) = s.duration {
        opts.scan.lookback =
            humantime::parse_duration(d).with_context(|| format!("settings.duration `{d}`"))?;
    }
    if let Some(ref q) = s.quota_project {
        opts.scan.quota_project = Some(q.clone());
    }
    if let Some(ref p) = s.snapshot {
        opts.snapshot = Some(PathBuf::from(p));
    }
    apply_file_opt!(s, opts, verbose => verbose);
    Ok(())
}
