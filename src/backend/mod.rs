//! Provider capabilities the pipeline consumes: resource hierarchy, IAM, alert policies and queries.
//!
//! Every method is fallible. Streamed listings yield `Err` items when a page fails; callers
//! stop consuming that listing at the first error.

pub mod snapshot;

use anyhow::Result;
use std::sync::Arc;

use crate::types::{AlertPolicy, Aggregation, ProjectId, ResourceRef, TimeSeriesRow, TimeWindow};

pub use snapshot::{CannedResponse, ParentSnapshot, ProjectSnapshot, Snapshot, SnapshotBackend};

/// Streamed, fallible listing borrowed from the provider that produced it.
pub type Listing<'a, T> = Box<dyn Iterator<Item = Result<T>> + 'a>;

/// Projects, folders and permissions of the resource hierarchy.
pub trait ResourceManager: Send + Sync {
    /// Projects directly under `parent`.
    fn list_child_projects(&self, parent: &ResourceRef) -> Listing<'_, ProjectId>;

    /// Folders directly under `parent`.
    fn list_child_folders(&self, parent: &ResourceRef) -> Listing<'_, ResourceRef>;

    /// Subset of `permissions` the caller holds on `project`.
    fn test_permissions(&self, project: &str, permissions: &[&str]) -> Result<Vec<String>>;
}

/// Alerting policy API.
pub trait AlertPolicySource: Send + Sync {
    fn list_alert_policies(&self, project: &str) -> Listing<'_, AlertPolicy>;

    /// Fetch one policy by its full name.
    fn get_alert_policy(&self, name: &str) -> Result<AlertPolicy>;
}

/// Response shape requested from a time series listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeSeriesView {
    /// Series identity only, no points.
    Headers,
    /// Series with their points.
    Full,
}

/// Time series list request built from a threshold or absence condition.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeriesRequest {
    pub project: ProjectId,
    pub filter: String,
    pub aggregation: Option<Aggregation>,
    pub secondary_aggregation: Option<Aggregation>,
    pub window: TimeWindow,
    pub view: TimeSeriesView,
}

/// Query execution against the metrics backend.
pub trait QueryBackend: Send + Sync {
    /// Run a Monitoring Query Language query scoped to `project`.
    fn query_mql(&self, project: &str, query: &str) -> Listing<'_, TimeSeriesRow>;

    /// Run a PromQL range query and return the decoded JSON body
    /// (`{"status": …, "data": {"result": […]}}`).
    fn query_promql_range(
        &self,
        project: &str,
        query: &str,
        window: &TimeWindow,
        step_secs: u64,
    ) -> Result<serde_json::Value>;

    fn list_time_series(&self, request: &TimeSeriesRequest) -> Listing<'_, TimeSeriesRow>;
}

/// Shared handles to every capability. Cloned into each worker thread.
#[derive(Clone)]
pub struct Backend {
    pub resources: Arc<dyn ResourceManager>,
    pub policies: Arc<dyn AlertPolicySource>,
    pub queries: Arc<dyn QueryBackend>,
}

impl Backend {
    /// Use one provider for all three capabilities.
    pub fn from_shared<B>(provider: Arc<B>) -> Self
    where
        B: ResourceManager + AlertPolicySource + QueryBackend + 'static,
    {
        Self {
            resources: provider.clone(),
            policies: provider.clone(),
            queries: provider,
        }
    }
}
