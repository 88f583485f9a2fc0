//! Alert policy listing for admitted projects.

use log::warn;

use crate::backend::AlertPolicySource;
use crate::types::AlertPolicy;

/// Lazy sequence of the policies in `project` that should be priced: enabled ones, or all of them
/// when `include_disabled`. A listing failure is logged and ends the sequence.
pub fn enumerate_policies<'a>(
    source: &'a dyn AlertPolicySource,
    project: &'a str,
    include_disabled: bool,
) -> impl Iterator<Item = AlertPolicy> + 'a {
    source
        .list_alert_policies(project)
        .map_while(move |policy| match policy {
            Ok(policy) => Some(policy),
            Err(e) => {
                warn!("Failed to list policies in {}: {:#}", project, e);
                None
            }
        })
        .filter(move |policy| include_disabled || policy.is_enabled())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ProjectSnapshot, Snapshot, SnapshotBackend};

    fn policy(id: &str, enabled: Option<bool>) -> AlertPolicy {
        AlertPolicy {
            name: format!("projects/p1/alertPolicies/{id}"),
            display_name: id.to_string(),
            enabled,
            conditions: Vec::new(),
        }
    }

    fn backend(policies_error: Option<&str>) -> SnapshotBackend {
        let mut snapshot = Snapshot::default();
        snapshot.projects.insert(
            "p1".to_string(),
            ProjectSnapshot {
                policies: vec![
                    policy("on", Some(true)),
                    policy("off", Some(false)),
                    policy("unset", None),
                ],
                policies_error: policies_error.map(str::to_string),
                ..ProjectSnapshot::default()
            },
        );
        SnapshotBackend::new(snapshot)
    }

    fn names(b: &SnapshotBackend, project: &str, include_disabled: bool) -> Vec<String> {
        enumerate_policies(b, project, include_disabled)
            .map(|p| p.display_name)
            .collect()
    }

    #[test]
    fn test_only_enabled_by_default() {
        assert_eq!(names(&backend(None), "p1", false), vec!["on"]);
    }

    #[test]
    fn test_include_disabled_admits_all() {
        assert_eq!(
            names(&backend(None), "p1", true),
            vec!["on", "off", "unset"]
        );
    }

    #[test]
    fn test_listing_failure_truncates() {
        assert_eq!(
            names(&backend(Some("backend unavailable")), "p1", true),
            vec!["on", "off", "unset"]
        );
        assert!(names(&backend(None), "missing", true).is_empty());
    }

    #[test]
    fn test_policies_behind_failed_page_not_emitted() {
        let mut snapshot = Snapshot::default();
        snapshot.projects.insert(
            "p1".to_string(),
            ProjectSnapshot {
                policies: vec![policy("on", Some(true)), policy("late", Some(true))],
                policies_error: Some("page 2 failed".into()),
                policies_error_after: Some(1),
                ..ProjectSnapshot::default()
            },
        );
        let b = SnapshotBackend::new(snapshot);
        assert_eq!(names(&b, "p1", true), vec!["on"]);
    }
}
