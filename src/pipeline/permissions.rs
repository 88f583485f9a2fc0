//! Permission gate in front of policy listing.

use log::warn;

use crate::backend::ResourceManager;

/// Admit `project` when the gate is off, or when the caller holds every permission in `required`.
///
/// One provider call per project. A failed call rejects the project; so does a missing
/// permission, and the first one missing (in `required` order) is logged.
pub fn admit_project(
    resources: &dyn ResourceManager,
    project: &str,
    required: &[&str],
    enabled: bool,
) -> bool {
    if !enabled {
        return true;
    }
    let granted = match resources.test_permissions(project, required) {
        Ok(granted) => granted,
        Err(e) => {
            warn!("Failed to test IAM permissions on project {}: {:#}", project, e);
            return false;
        }
    };
    match required
        .iter()
        .find(|perm| !granted.iter().any(|g| g == *perm))
    {
        Some(missing) => {
            warn!("No permission {} on {}. Skipping", missing, project);
            false
        }
        None => true,
    }
}
