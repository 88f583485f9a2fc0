//! CLI command handler: layer settings, open the snapshot backend, stream results into a sink.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use std::sync::Arc;

use crate::RunOpts;
use crate::backend::{Backend, SnapshotBackend};
use crate::engine::arg_parser::Cli;
use crate::engine::progress::{close_bar, create_counter, update_progress_bar};
use crate::engine::report::ReportSink;
use crate::pipeline::CancelToken;
use crate::utils::alertprice_toml::{apply_file_to_opts, load_alertprice_toml};
use crate::utils::setup_logging;

/// Overwrite opts from CLI flags that were given. Lists replace, they do not append.
fn apply_cli_to_opts(cli: &Cli, opts: &mut RunOpts) {
    let scan = &mut opts.scan;
    scan.policies = cli.policy.clone();
    scan.projects = cli.project.clone();
    scan.folders = cli.folder.clone();
    scan.organizations = cli.organization.clone();
    if !cli.exclude_folder.is_empty() {
        scan.excluded_folders = cli.exclude_folder.iter().cloned().collect();
    }
    if let Some(v) = cli.recursive {
        scan.recursive = v;
    }
    if let Some(v) = cli.test_permissions {
        scan.test_permissions = v;
    }
    if let Some(v) = cli.include_disabled {
        scan.include_disabled = v;
    }
    if let Some(v) = cli.threads {
        scan.threads = v;
    }
    if let Some(v) = cli.duration {
        scan.lookback = v;
    }
    if cli.quota_project.is_some() {
        scan.quota_project = cli.quota_project.clone();
    }
    if let Some(v) = cli.summary {
        opts.summary = v;
    }
    if cli.csv_out.is_some() {
        opts.csv_out = cli.csv_out.clone();
    }
    if cli.snapshot.is_some() {
        opts.snapshot = cli.snapshot.clone();
    }
    if let Some(v) = cli.verbose {
        opts.verbose = v;
    }
}

/// Defaults, then the settings file, then CLI flags.
fn setup_opts(cli: &Cli) -> Result<RunOpts> {
    let mut opts = RunOpts::default();
    let config_path = cli.config_path();
    match load_alertprice_toml(&config_path)? {
        Some(file) => apply_file_to_opts(&file, &mut opts)?,
        None if cli.config.is_some() => {
            bail!("config file {} not found", config_path.display())
        }
        None => {}
    }
    apply_cli_to_opts(cli, &mut opts);
    if !setup_logging(opts.verbose) {
        debug!("Logger already installed; keeping its filters");
    }
    Ok(opts)
}

/// Price every policy reachable from the scan roots and report in the selected output mode.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let opts = setup_opts(cli)?;
    opts.validate()?;

    let snapshot = opts
        .snapshot
        .as_deref()
        .context("--snapshot is required")?;
    let backend = SnapshotBackend::open(snapshot)?.with_quota_project(opts.scan.quota_project.clone());
    let backend = Backend::from_shared(Arc::new(backend));

    // Open the sink first so an unwritable CSV path fails before any work starts.
    let mut sink = ReportSink::open(&opts.output_mode())?;

    let cancel = CancelToken::default();
    let cancel_handler = cancel.clone();
    ctrlc::set_handler(move || cancel_handler.cancel()).context("set Ctrl+C handler")?;

    let mut stream = crate::estimate(backend, &opts.scan, cancel.clone())?;
    let bar = opts.verbose.then(|| create_counter("Pricing"));
    let mut count = 0usize;
    for result in stream.by_ref() {
        sink.record(&result)?;
        count += 1;
        if let Some(bar) = &bar {
            update_progress_bar(bar, 1);
        }
    }
    if let Some(bar) = &bar {
        close_bar(bar);
    }
    sink.finish()?;
    stream.finish()?;

    if cancel.is_cancelled() {
        warn!("Interrupted: results cover {} policies only", count);
    }
    debug!("Priced {} policies", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;
    use std::time::Duration;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("alertprice").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[settings]\nthreads = 8\nduration = \"6h\"\nsummary = true\n").unwrap();
        let config = path.to_string_lossy().to_string();

        let opts =
            setup_opts(&cli(&["-p", "a", "--config", config.as_str(), "--threads", "2"])).unwrap();
        assert_eq!(opts.scan.threads, 2);
        assert_eq!(opts.scan.lookback, Duration::from_secs(6 * 3600));
        assert!(opts.summary);
        assert_eq!(opts.scan.projects, vec!["a"]);

        let opts = setup_opts(&cli(&["-p", "a", "--config", config.as_str(), "-s", "false"])).unwrap();
        assert!(!opts.summary);
    }

    #[test]
    fn test_explicit_missing_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml").to_string_lossy().to_string();
        assert!(setup_opts(&cli(&["-p", "a", "--config", missing.as_str()])).is_err());
    }

    #[test]
    fn test_csv_out_mode() {
        let mut opts = RunOpts::default();
        apply_cli_to_opts(&cli(&["-f", "1", "-c", "out.csv"]), &mut opts);
        assert_eq!(
            opts.output_mode(),
            crate::OutputMode::Csv(PathBuf::from("out.csv"))
        );
        assert_eq!(opts.scan.folders, vec!["1"]);
    }

    #[test]
    fn test_handle_run_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("snapshot.json");
        std::fs::write(
            &snapshot,
            r#"{
              "projects": {
                "p1": {
                  "policies": [{
                    "name": "projects/p1/alertPolicies/7",
                    "displayName": "CPU",
                    "enabled": true,
                    "conditions": [{
                      "displayName": "mql",
                      "conditionMonitoringQueryLanguage": { "query": "fetch gce_instance" }
                    }]
                  }]
                }
              },
              "mql": { "fetch gce_instance": { "rows": 2 } }
            }"#,
        )
        .unwrap();
        let csv = dir.path().join("out.csv");
        let snapshot = snapshot.to_string_lossy().to_string();
        let csv_path = csv.to_string_lossy().to_string();
        let absent = dir.path().join("absent.toml").to_string_lossy().to_string();
        let args = cli(&[
            "-p",
            "p1",
            "--snapshot",
            snapshot.as_str(),
            "-c",
            csv_path.as_str(),
            "--config",
            absent.as_str(),
        ]);
        // An explicit --config must exist.
        assert!(handle_run(&args).is_err());

        let settings = dir.path().join("settings.toml");
        std::fs::write(&settings, "[settings]\n").unwrap();
        let settings = settings.to_string_lossy().to_string();
        let args = cli(&[
            "-p",
            "p1",
            "--snapshot",
            snapshot.as_str(),
            "-c",
            csv_path.as_str(),
            "--config",
            settings.as_str(),
        ]);
        handle_run(&args).unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].starts_with("p1,projects/p1/alertPolicies/7,"));
        assert!(rows[1].ends_with(",CPU,1,2,1.56,"));
    }
}
