//! Project discovery: walks folders and organizations, yielding the projects under them.

use log::{debug, warn};
use std::collections::BTreeSet;

use crate::backend::{Listing, ResourceManager};
use crate::types::{ProjectId, ResourceRef};

/// Lazy walk of the projects under one root.
///
/// Parents are expanded from an explicit frontier, so depth is bounded by the hierarchy and not by
/// the call stack. A parent whose bare id is excluded is pruned with its whole subtree when it is
/// reached (the root included). Listing failures are logged and end that listing only.
pub struct ProjectWalk<'a> {
    resources: &'a dyn ResourceManager,
    recursive: bool,
    excluded: &'a BTreeSet<String>,
    frontier: Vec<ResourceRef>,
    current: Option<(ResourceRef, Listing<'a, ProjectId>)>,
}

impl<'a> ProjectWalk<'a> {
    pub fn new(
        resources: &'a dyn ResourceManager,
        root: ResourceRef,
        recursive: bool,
        excluded: &'a BTreeSet<String>,
    ) -> Self {
        Self {
            resources,
            recursive,
            excluded,
            frontier: vec![root],
            current: None,
        }
    }

    /// Push the child folders of `parent` onto the frontier.
    fn expand_folders(&mut self, parent: &ResourceRef) {
        for folder in self.resources.list_child_folders(parent) {
            match folder {
                Ok(folder) => self.frontier.push(folder),
                Err(e) => {
                    warn!("Failed to list folders under {}: {:#}", parent, e);
                    break;
                }
            }
        }
    }
}

impl Iterator for ProjectWalk<'_> {
    type Item = ProjectId;

    fn next(&mut self) -> Option<ProjectId> {
        loop {
            if let Some((parent, projects)) = self.current.as_mut() {
                match projects.next() {
                    Some(Ok(project)) => return Some(project),
                    Some(Err(e)) => warn!("Failed to list projects under {}: {:#}", parent, e),
                    None => {}
                }
                self.current = None;
            }

            let parent = self.frontier.pop()?;
            if self.excluded.contains(parent.bare_id()) {
                debug!("Skipping excluded {}", parent);
                continue;
            }
            if self.recursive {
                self.expand_folders(&parent);
            }
            let projects = self.resources.list_child_projects(&parent);
            self.current = Some((parent, projects));
        }
    }
}

/// Fresh walk of the projects under `root`.
pub fn resolve_projects<'a>(
    resources: &'a dyn ResourceManager,
    root: ResourceRef,
    recursive: bool,
    excluded: &'a BTreeSet<String>,
) -> ProjectWalk<'a> {
    ProjectWalk::new(resources, root, recursive, excluded)
}
