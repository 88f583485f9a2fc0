//! Offline backend: replays a JSON snapshot of a resource hierarchy, its alert policies and canned
//! query responses. Lets a scan run without network access (CI, demos, tests).

use anyhow::{Context, Result, anyhow};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{
    AlertPolicySource, Listing, QueryBackend, ResourceManager, TimeSeriesRequest,
};
use crate::types::{AlertPolicy, ProjectId, ResourceRef, TimeSeriesRow, TimeWindow};

/// Whole snapshot file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Keyed by full parent name (`folders/X`, `organizations/X`). Unknown parents have no children.
    #[serde(default)]
    pub parents: BTreeMap<String, ParentSnapshot>,
    #[serde(default)]
    pub projects: BTreeMap<ProjectId, ProjectSnapshot>,
    /// MQL responses keyed by query text.
    #[serde(default)]
    pub mql: BTreeMap<String, CannedResponse>,
    /// PromQL responses keyed by query text.
    #[serde(default)]
    pub promql: BTreeMap<String, CannedResponse>,
    /// Time series list responses keyed by filter.
    #[serde(default)]
    pub time_series: BTreeMap<String, CannedResponse>,
}

/// Children of one folder or organization.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentSnapshot {
    #[serde(default)]
    pub projects: Vec<ProjectId>,
    /// Full folder names, `folders/X`.
    #[serde(default)]
    pub folders: Vec<String>,
    /// Simulated failing page in the project listing.
    #[serde(default)]
    pub projects_error: Option<String>,
    /// Position of `projects_error` among the projects. Default: after the last one.
    #[serde(default)]
    pub projects_error_after: Option<usize>,
    /// Simulated failing page in the folder listing.
    #[serde(default)]
    pub folders_error: Option<String>,
    /// Position of `folders_error` among the folders. Default: after the last one.
    #[serde(default)]
    pub folders_error_after: Option<usize>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    /// Granted permissions. `None` grants everything asked for.
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub permissions_error: Option<String>,
    #[serde(default)]
    pub policies: Vec<AlertPolicy>,
    /// Simulated failing page in the policy listing.
    #[serde(default)]
    pub policies_error: Option<String>,
    /// Position of `policies_error` among the policies. Default: after the last one.
    #[serde(default)]
    pub policies_error_after: Option<usize>,
}

/// Canned answer to a query.
///
/// Streamed queries yield `rows` series with `error`, if set, after the first `error_after` of
/// them (after all of them by default). PromQL returns `body` when set, otherwise a matrix body
/// with `rows` series; `error` fails the whole call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CannedResponse {
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_after: Option<usize>,
}

impl CannedResponse {
    pub fn rows(rows: usize) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
            ..Self::default()
        }
    }
}

/// [`Snapshot`] served through the provider traits.
pub struct SnapshotBackend {
    snapshot: Snapshot,
    quota_project: Option<String>,
    time_series_requests: Mutex<Vec<TimeSeriesRequest>>,
    permission_checks: AtomicUsize,
}

impl SnapshotBackend {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            quota_project: None,
            time_series_requests: Mutex::new(Vec::new()),
            permission_checks: AtomicUsize::new(0),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(s).context("parse snapshot")?;
        Ok(Self::new(snapshot))
    }

    /// Load a snapshot file.
    pub fn open(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read snapshot {}", path.display()))?;
        let backend = Self::from_json_str(&s)
            .with_context(|| format!("load snapshot {}", path.display()))?;
        debug!(
            "Snapshot {}: {} parents, {} projects",
            path.display(),
            backend.snapshot.parents.len(),
            backend.snapshot.projects.len()
        );
        Ok(backend)
    }

    /// Project billed for API quota. Recorded only; the snapshot has no quota.
    pub fn with_quota_project(mut self, quota_project: Option<String>) -> Self {
        if let Some(q) = &quota_project {
            debug!("Quota project: {}", q);
        }
        self.quota_project = quota_project;
        self
    }

    pub fn quota_project(&self) -> Option<&str> {
        self.quota_project.as_deref()
    }

    /// Every time series list request received so far, in arrival order.
    pub fn time_series_requests(&self) -> Vec<TimeSeriesRequest> {
        self.time_series_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of permission tests issued.
    pub fn permission_checks(&self) -> usize {
        self.permission_checks.load(Ordering::Relaxed)
    }

    fn project(&self, project: &str) -> Result<&ProjectSnapshot> {
        self.snapshot
            .projects
            .get(project)
            .ok_or_else(|| anyhow!("project {project} not found"))
    }
}

/// Yield `items` with `error`, if set, in position `error_after` (at the end when unset).
/// Items behind the error are still yielded; consumers decide whether to read past it.
fn listing<'a, T: 'a>(
    mut items: impl Iterator<Item = Result<T>> + 'a,
    error: Option<&String>,
    error_after: Option<usize>,
) -> Listing<'a, T> {
    let Some(e) = error else {
        return Box::new(items);
    };
    let err = std::iter::once(Err(anyhow!("{e}")));
    match error_after {
        None => Box::new(items.chain(err)),
        Some(n) => {
            let head: Vec<Result<T>> = items.by_ref().take(n).collect();
            Box::new(head.into_iter().chain(err).chain(items))
        }
    }
}

fn failed<'a, T: 'a>(err: anyhow::Error) -> Listing<'a, T> {
    Box::new(std::iter::once(Err(err)))
}

/// Streamed rows for a canned response, or a single error when nothing is canned for `key`.
fn canned_rows<'a>(
    responses: &'a BTreeMap<String, CannedResponse>,
    key: &str,
) -> Listing<'a, TimeSeriesRow> {
    match responses.get(key) {
        Some(resp) => listing(
            (0..resp.rows).map(|i| Ok(json!({ "series": i }))),
            resp.error.as_ref(),
            resp.error_after,
        ),
        None => failed(anyhow!("no canned response for `{key}`")),
    }
}

impl ResourceManager for SnapshotBackend {
    fn list_child_projects(&self, parent: &ResourceRef) -> Listing<'_, ProjectId> {
        match self.snapshot.parents.get(&parent.to_string()) {
            Some(p) => listing(
                p.projects.iter().cloned().map(Ok),
                p.projects_error.as_ref(),
                p.projects_error_after,
            ),
            None => Box::new(std::iter::empty()),
        }
    }

    fn list_child_folders(&self, parent: &ResourceRef) -> Listing<'_, ResourceRef> {
        match self.snapshot.parents.get(&parent.to_string()) {
            Some(p) => listing(
                p.folders.iter().map(|name| {
                    ResourceRef::parse(name).ok_or_else(|| anyhow!("invalid folder name {name}"))
                }),
                p.folders_error.as_ref(),
                p.folders_error_after,
            ),
            None => Box::new(std::iter::empty()),
        }
    }

    fn test_permissions(&self, project: &str, permissions: &[&str]) -> Result<Vec<String>> {
        self.permission_checks.fetch_add(1, Ordering::Relaxed);
        let p = self.project(project)?;
        if let Some(e) = &p.permissions_error {
            return Err(anyhow!("{e}"));
        }
        let granted = permissions
            .iter()
            .filter(|perm| {
                p.permissions
                    .as_ref()
                    .is_none_or(|held| held.iter().any(|h| h == *perm))
            })
            .map(|perm| perm.to_string())
            .collect();
        Ok(granted)
    }
}

impl AlertPolicySource for SnapshotBackend {
    fn list_alert_policies(&self, project: &str) -> Listing<'_, AlertPolicy> {
        match self.project(project) {
            Ok(p) => listing(
                p.policies.iter().cloned().map(Ok),
                p.policies_error.as_ref(),
                p.policies_error_after,
            ),
            Err(e) => failed(e),
        }
    }

    fn get_alert_policy(&self, name: &str) -> Result<AlertPolicy> {
        self.snapshot
            .projects
            .values()
            .flat_map(|p| p.policies.iter())
            .find(|policy| policy.name == name)
            .cloned()
            .ok_or_else(|| anyhow!("alert policy {name} not found"))
    }
}

impl QueryBackend for SnapshotBackend {
    fn query_mql(&self, _project: &str, query: &str) -> Listing<'_, TimeSeriesRow> {
        canned_rows(&self.snapshot.mql, query)
    }

    fn query_promql_range(
        &self,
        _project: &str,
        query: &str,
        window: &TimeWindow,
        step_secs: u64,
    ) -> Result<serde_json::Value> {
        debug!(
            "PromQL range {} .. {} step {}s: {}",
            window.start_rfc3339(),
            window.end_rfc3339(),
            step_secs,
            query
        );
        let resp = self
            .snapshot
            .promql
            .get(query)
            .ok_or_else(|| anyhow!("no canned response for `{query}`"))?;
        if let Some(e) = &resp.error {
            return Err(anyhow!("{e}"));
        }
        if let Some(body) = &resp.body {
            return Ok(body.clone());
        }
        let result: Vec<serde_json::Value> = (0..resp.rows)
            .map(|i| json!({ "metric": { "series": i.to_string() }, "values": [] }))
            .collect();
        Ok(json!({
            "status": "success",
            "data": { "resultType": "matrix", "result": result }
        }))
    }

    fn list_time_series(&self, request: &TimeSeriesRequest) -> Listing<'_, TimeSeriesRow> {
        self.time_series_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        canned_rows(&self.snapshot.time_series, &request.filter)
    }
}
