//! Public and internal types for the alertprice API and pipeline.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::utils::config::{CONSOLE_POLICY_URL, ScanDefaults};

/// Opaque project identifier (the bare id, not `projects/…`).
pub type ProjectId = String;

/// Opaque time series row returned by a streamed query. Only counted, never inspected.
pub type TimeSeriesRow = serde_json::Value;

/// Parent node of the resource hierarchy that projects and folders hang off.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceRef {
    Folder(String),
    Organization(String),
}

impl ResourceRef {
    /// Id without the resource-kind prefix (`X` for `folders/X`).
    pub fn bare_id(&self) -> &str {
        match self {
            ResourceRef::Folder(id) | ResourceRef::Organization(id) => id,
        }
    }

    /// Parse a full resource name (`folders/X` or `organizations/X`).
    pub fn parse(name: &str) -> Option<Self> {
        let (kind, id) = name.split_once('/')?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        match kind {
            "folders" => Some(ResourceRef::Folder(id.to_string())),
            "organizations" => Some(ResourceRef::Organization(id.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Folder(id) => write!(f, "folders/{id}"),
            ResourceRef::Organization(id) => write!(f, "organizations/{id}"),
        }
    }
}

/// One scan root a run is invoked against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanTarget {
    /// Full policy name, `projects/P/alertPolicies/ID`.
    Policy(String),
    Project(ProjectId),
    Folder(String),
    Organization(String),
}

impl ScanTarget {
    /// Hierarchy node to walk for folder and organization roots.
    pub fn resource(&self) -> Option<ResourceRef> {
        match self {
            ScanTarget::Folder(id) => Some(ResourceRef::Folder(id.clone())),
            ScanTarget::Organization(id) => Some(ResourceRef::Organization(id.clone())),
            ScanTarget::Policy(_) | ScanTarget::Project(_) => None,
        }
    }
}

/// Alerting policy as returned by the policy API. Never mutated by the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPolicy {
    /// Full name, `projects/P/alertPolicies/ID`.
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Absent means disabled for filtering purposes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl AlertPolicy {
    /// Project segment of the full name, or `None` if the name is malformed.
    pub fn project_id(&self) -> Option<&str> {
        let rest = self.name.strip_prefix("projects/")?;
        let (project, _) = rest.split_once('/')?;
        (!project.is_empty()).then_some(project)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled == Some(true)
    }
}

/// A single evaluable clause of a policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub display_name: String,
    #[serde(flatten)]
    pub kind: ConditionKind,
}

/// The query mechanism a condition uses. Exactly one per condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConditionKind {
    #[serde(rename = "conditionMonitoringQueryLanguage")]
    MonitoringQueryLanguage { query: String },
    #[serde(rename = "conditionPrometheusQueryLanguage")]
    PrometheusQueryLanguage {
        query: String,
        #[serde(rename = "evaluationInterval", default, with = "duration_str")]
        evaluation_interval: Duration,
    },
    #[serde(rename = "conditionThreshold")]
    Threshold {
        filter: String,
        #[serde(default)]
        aggregations: Vec<Aggregation>,
    },
    #[serde(rename = "conditionAbsent")]
    Absence {
        filter: String,
        #[serde(default)]
        aggregations: Vec<Aggregation>,
    },
    /// Log-based condition; carries no metric query and is never priced.
    #[serde(rename = "conditionMatchedLog")]
    MatchedLog { filter: String },
}

/// Alignment and reduction applied to a time series list request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_series_aligner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_series_reducer: Option<Reducer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by_fields: Vec<String>,
}

/// Declare the cross-series reducers with their backend names.
macro_rules! reducers {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Cross-series reducer, serialized by its backend name (e.g. `REDUCE_COUNT_FALSE`).
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum Reducer {
            $($variant),+
        }

        impl Reducer {
            pub fn name(&self) -> &'static str {
                match self {
                    $(Reducer::$variant => $name),+
                }
            }
        }

        impl TryFrom<String> for Reducer {
            type Error = String;

            fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
                match name.as_str() {
                    $($name => Ok(Reducer::$variant),)+
                    other => Err(format!("unknown cross-series reducer {other}")),
                }
            }
        }
    };
}

reducers! {
    NoReduction => "REDUCE_NONE",
    Mean => "REDUCE_MEAN",
    Min => "REDUCE_MIN",
    Max => "REDUCE_MAX",
    Sum => "REDUCE_SUM",
    Stddev => "REDUCE_STDDEV",
    Count => "REDUCE_COUNT",
    CountTrue => "REDUCE_COUNT_TRUE",
    CountFalse => "REDUCE_COUNT_FALSE",
    FractionTrue => "REDUCE_FRACTION_TRUE",
    Percentile99 => "REDUCE_PERCENTILE_99",
    Percentile95 => "REDUCE_PERCENTILE_95",
    Percentile50 => "REDUCE_PERCENTILE_50",
    Percentile05 => "REDUCE_PERCENTILE_05",
}

impl From<Reducer> for String {
    fn from(r: Reducer) -> Self {
        r.name().to_string()
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Durations in the backend's JSON shape (`"60s"`), parsed with humantime.
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Query window `[start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: SystemTime,
    pub end: SystemTime,
}

impl TimeWindow {
    /// Window of length `lookback` ending at `end`. Clamped to the epoch.
    pub fn ending_at(end: SystemTime, lookback: Duration) -> Self {
        let start = end
            .checked_sub(lookback)
            .filter(|start| *start >= UNIX_EPOCH)
            .unwrap_or(UNIX_EPOCH);
        Self { start, end }
    }

    pub fn ending_now(lookback: Duration) -> Self {
        Self::ending_at(SystemTime::now(), lookback)
    }

    pub fn start_rfc3339(&self) -> String {
        humantime::format_rfc3339_seconds(self.start).to_string()
    }

    pub fn end_rfc3339(&self) -> String {
        humantime::format_rfc3339_seconds(self.end).to_string()
    }
}

/// Cost estimate for one policy. Built by a single evaluation worker and handed to the consumer.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PolicyResult {
    pub project_id: ProjectId,
    /// Full policy name.
    pub name: String,
    pub display_name: String,
    pub conditions: usize,
    pub time_series: usize,
    pub price: f64,
    /// Message of the last condition that failed to evaluate, if any.
    pub error: Option<String>,
}

impl PolicyResult {
    /// Trailing id of the policy name.
    pub fn policy_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn console_url(&self) -> String {
        CONSOLE_POLICY_URL
            .replace("{policy}", self.policy_id())
            .replace("{project}", &self.project_id)
    }
}

/// Totals over a result stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    pub policies: usize,
    pub conditions: usize,
    pub time_series: usize,
    pub price: f64,
}

impl Summary {
    pub fn add(&mut self, result: &PolicyResult) {
        self.policies += 1;
        self.conditions += result.conditions;
        self.time_series += result.time_series;
        self.price += result.price;
    }
}

/// Scan settings for the pipeline. Built once at startup and shared read-only.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Explicit policies, `projects/P/alertPolicies/ID`.
    pub policies: Vec<String>,
    pub projects: Vec<ProjectId>,
    /// Folder ids without the `folders/` prefix.
    pub folders: Vec<String>,
    /// Organization ids without the `organizations/` prefix.
    pub organizations: Vec<String>,
    /// Descend into child folders, not just the root's immediate projects.
    pub recursive: bool,
    /// Bare folder ids pruned (with their subtree) during the walk.
    pub excluded_folders: BTreeSet<String>,
    pub include_disabled: bool,
    /// Check IAM permissions on each project before listing its policies.
    pub test_permissions: bool,
    /// Workers per stage and capacity of the queues between stages.
    pub threads: usize,
    /// Length of the query window ending now.
    pub lookback: Duration,
    /// Quota/billing project passed to the backend.
    pub quota_project: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            policies: Vec::new(),
            projects: Vec::new(),
            folders: Vec::new(),
            organizations: Vec::new(),
            recursive: false,
            excluded_folders: BTreeSet::new(),
            include_disabled: false,
            test_permissions: false,
            threads: ScanDefaults::THREADS,
            lookback: ScanDefaults::LOOKBACK,
            quota_project: None,
        }
    }
}

/// Fails when more than one option of `group` is set.
fn mutually_exclusive(group: &[(&str, bool)]) -> Result<()> {
    let set: Vec<&str> = group
        .iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| *name)
        .collect();
    if set.len() > 1 {
        bail!("options {} cannot be used together", set.join(", "));
    }
    Ok(())
}

impl ScanConfig {
    /// All scan roots in the order they are fed to the pipeline.
    pub fn scan_targets(&self) -> Vec<ScanTarget> {
        let policies = self.policies.iter().cloned().map(ScanTarget::Policy);
        let projects = self.projects.iter().cloned().map(ScanTarget::Project);
        let folders = self.folders.iter().cloned().map(ScanTarget::Folder);
        let orgs = self
            .organizations
            .iter()
            .cloned()
            .map(ScanTarget::Organization);
        policies.chain(projects).chain(folders).chain(orgs).collect()
    }

    /// Reject option combinations that make no sense before any work starts.
    pub fn validate(&self) -> Result<()> {
        let policy = !self.policies.is_empty();
        let project = !self.projects.is_empty();
        let folder = !self.folders.is_empty();
        let organization = !self.organizations.is_empty();
        let exclude = !self.excluded_folders.is_empty();

        if !(policy || project || folder || organization) {
            bail!("one of --policy, --project, --folder or --organization is required");
        }
        mutually_exclusive(&[
            ("--policy", policy),
            ("--project", project),
            ("--folder", folder),
            ("--organization", organization),
        ])?;
        mutually_exclusive(&[
            ("--policy", policy),
            ("--project", project),
            ("--recursive", self.recursive),
        ])?;
        mutually_exclusive(&[
            ("--policy", policy),
            ("--project", project),
            ("--exclude-folder", exclude),
        ])?;
        mutually_exclusive(&[
            ("--policy", policy),
            ("--test-permissions", self.test_permissions),
        ])?;
        mutually_exclusive(&[
            ("--policy", policy),
            ("--include-disabled", self.include_disabled),
        ])?;
        if self.threads == 0 {
            bail!("--threads must be at least 1");
        }
        Ok(())
    }
}

/// How results are presented once the stream is drained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// One human-readable line per policy on stdout.
    Lines,
    /// A single total over all policies.
    Summary,
    /// One CSV row per policy written to the given file.
    Csv(PathBuf),
}

/// Full options (CLI). Use [`ScanConfig`] for lib.
#[derive(Clone, Debug, Default)]
pub struct RunOpts {
    pub scan: ScanConfig,
    /// Snapshot file the backend replays.
    pub snapshot: Option<PathBuf>,
    pub summary: bool,
    pub csv_out: Option<PathBuf>,
    /// Debug logging and a progress counter.
    pub verbose: bool,
}

impl RunOpts {
    pub fn validate(&self) -> Result<()> {
        self.scan.validate()?;
        mutually_exclusive(&[
            ("--csv-out", self.csv_out.is_some()),
            ("--summary", self.summary),
        ])?;
        if self.snapshot.is_none() {
            bail!("--snapshot is required (no live backend is configured)");
        }
        Ok(())
    }

    pub fn output_mode(&self) -> OutputMode {
        match (&self.csv_out, self.summary) {
            (Some(path), _) => OutputMode::Csv(path.clone()),
            (None, true) => OutputMode::Summary,
            (None, false) => OutputMode::Lines,
        }
    }
}
