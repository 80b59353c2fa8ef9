//! Diff-and-write planning. Site-list edits are the common case and cost one
//! partial write touching only the affected folders; any structural or
//! metadata change escalates to a full-document snapshot write.

use crate::models::{CategoryNode, NavTree, PlanKind, SiteEntry};
use crate::resolver::MAX_TREE_DEPTH;

#[derive(Debug, Clone, PartialEq)]
pub struct FolderUpdate {
    pub title_path: Vec<String>,
    pub sites: Vec<SiteEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WritePlan {
    None,
    Partial(Vec<FolderUpdate>),
    Full,
}

impl WritePlan {
    pub fn kind(&self) -> PlanKind {
        match self {
            Self::None => PlanKind::None,
            Self::Partial(_) => PlanKind::Partial,
            Self::Full => PlanKind::Full,
        }
    }
}

pub fn plan_write(old: &NavTree, new: &NavTree) -> WritePlan {
    // Profile edits touch document identity the same way category metadata
    // does and always take the snapshot path.
    if old.profile != new.profile {
        return WritePlan::Full;
    }
    if !structure_matches(&old.categories, &new.categories, 0) {
        return WritePlan::Full;
    }
    if !metadata_matches(&old.categories, &new.categories, 0) {
        return WritePlan::Full;
    }

    let mut updates = Vec::new();
    let mut path = Vec::new();
    if !collect_site_updates(&old.categories, &new.categories, &mut path, &mut updates, 0) {
        // Lockstep walk failed even though the structural pass matched.
        // Never drop an update on an inconsistency; rewrite everything.
        tracing::warn!("write planner lockstep walk diverged, escalating to full snapshot");
        return WritePlan::Full;
    }

    if updates.is_empty() {
        WritePlan::None
    } else {
        WritePlan::Partial(updates)
    }
}

/// Compares (id, title, ordered child identity) at every depth. Sites and
/// icons are ignored here; any added, removed, reordered or renamed node
/// anywhere makes the trees structurally different.
fn structure_matches(old: &[CategoryNode], new: &[CategoryNode], depth: usize) -> bool {
    if depth > MAX_TREE_DEPTH || old.len() != new.len() {
        return false;
    }
    old.iter().zip(new.iter()).all(|(a, b)| {
        a.id == b.id && a.title == b.title && structure_matches(&a.children, &b.children, depth + 1)
    })
}

/// Assumes structural equality; checks the remaining per-node metadata.
fn metadata_matches(old: &[CategoryNode], new: &[CategoryNode], depth: usize) -> bool {
    if depth > MAX_TREE_DEPTH {
        return false;
    }
    old.iter().zip(new.iter()).all(|(a, b)| {
        a.icon == b.icon && metadata_matches(&a.children, &b.children, depth + 1)
    })
}

fn collect_site_updates(
    old: &[CategoryNode],
    new: &[CategoryNode],
    path: &mut Vec<String>,
    updates: &mut Vec<FolderUpdate>,
    depth: usize,
) -> bool {
    if depth > MAX_TREE_DEPTH || old.len() != new.len() {
        return false;
    }
    for (a, b) in old.iter().zip(new.iter()) {
        path.push(b.title.clone());
        if a.sites != b.sites {
            updates.push(FolderUpdate {
                title_path: path.clone(),
                sites: b.sites.clone(),
            });
        }
        let ok = collect_site_updates(&a.children, &b.children, path, updates, depth + 1);
        path.pop();
        if !ok {
            return false;
        }
    }
    true
}
