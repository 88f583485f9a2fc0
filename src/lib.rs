//! alertprice: estimate the monthly cost of alerting policies across a resource hierarchy.

pub mod backend;
pub mod engine;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use backend::{AlertPolicySource, Backend, QueryBackend, ResourceManager, SnapshotBackend};
pub use pipeline::{CancelToken, EstimateStream};

use log::debug;

/// Result alias used by public alertprice API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point: validate `config`, fix the query window to the `lookback` ending now, and
/// start the pipeline against `backend`.
///
/// Results stream out of the returned [`EstimateStream`] as they are evaluated; call
/// [`EstimateStream::finish`] once it is drained. `cancel` stops the run early (e.g. on Ctrl-C).
///
/// ```ignore
/// let backend = Backend::from_shared(Arc::new(SnapshotBackend::open(path)?));
/// let config = ScanConfig { projects: vec!["my-project".into()], ..Default::default() };
/// let mut stream = alertprice::estimate(backend, &config, CancelToken::default())?;
/// let total: f64 = stream.by_ref().map(|r| r.price).sum();
/// stream.finish()?;
/// ```
pub fn estimate(backend: Backend, config: &ScanConfig, cancel: CancelToken) -> Result<EstimateStream> {
    config.validate()?;
    let window = TimeWindow::ending_now(config.lookback);
    let config_str = format!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        config
    );
    debug!("{}", config_str);
    debug!(
        "Query window {} .. {}",
        window.start_rfc3339(),
        window.end_rfc3339()
    );
    pipeline::run_pipeline(backend, config, window, cancel)
}
