//! Address resolution over the category tree. All three addressing schemes
//! (index path, title path, id path) share one descent so they resolve
//! identically against the same document.

use crate::errors::{AppError, AppResult};
use crate::models::{Address, CategoryNode};

/// Recursion cap for every tree walk. Documents deeper than this are treated
/// as unresolvable rather than risking unbounded stack usage.
pub const MAX_TREE_DEPTH: usize = 50;

/// A resolved tree position. `indices` is the index path from the root list
/// down to the target; the last element is the target's position within its
/// parent's child list (or the root list for a single-element path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub indices: Vec<usize>,
}

impl Resolved {
    pub fn position_in_parent(&self) -> usize {
        *self.indices.last().expect("resolved path is never empty")
    }

    pub fn parent_indices(&self) -> &[usize] {
        &self.indices[..self.indices.len() - 1]
    }
}

pub fn resolve(categories: &[CategoryNode], address: &Address) -> AppResult<Resolved> {
    let indices = match address {
        Address::Index(path) => descend(categories, path, |_, position, want| position == *want)?,
        Address::Title(path) => descend(categories, path, |node, _, want| node.title == *want)?,
        Address::Id(path) => descend(categories, path, |node, _, want| node.address_key() == want)?,
    };
    Ok(Resolved { indices })
}

fn descend<K: std::fmt::Debug>(
    categories: &[CategoryNode],
    path: &[K],
    matches: impl Fn(&CategoryNode, usize, &K) -> bool,
) -> AppResult<Vec<usize>> {
    if path.is_empty() {
        return Err(AppError::NotFound("Empty address".to_string()));
    }
    if path.len() > MAX_TREE_DEPTH {
        return Err(AppError::NotFound(format!(
            "Address exceeds maximum depth of {}",
            MAX_TREE_DEPTH
        )));
    }

    let mut indices = Vec::with_capacity(path.len());
    let mut level = categories;
    for (depth, key) in path.iter().enumerate() {
        let position = level
            .iter()
            .enumerate()
            .find(|(position, node)| matches(node, *position, key))
            .map(|(position, _)| position)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No category matching {:?} at address depth {}",
                    key, depth
                ))
            })?;
        indices.push(position);
        level = &level[position].children;
    }
    Ok(indices)
}

pub fn node_at<'a>(categories: &'a [CategoryNode], indices: &[usize]) -> Option<&'a CategoryNode> {
    let mut level = categories;
    let mut node = None;
    for &position in indices {
        let current = level.get(position)?;
        node = Some(current);
        level = &current.children;
    }
    node
}

pub fn node_at_mut<'a>(
    categories: &'a mut [CategoryNode],
    indices: &[usize],
) -> Option<&'a mut CategoryNode> {
    let (&last, rest) = indices.split_last()?;
    let mut level = categories;
    for &position in rest {
        level = &mut level.get_mut(position)?.children;
    }
    level.get_mut(last)
}

/// The sibling list holding the addressed node: the root list for a
/// single-element path, otherwise the parent's `children`.
pub fn sibling_list_mut<'a>(
    categories: &'a mut Vec<CategoryNode>,
    indices: &[usize],
) -> Option<&'a mut Vec<CategoryNode>> {
    let (_, rest) = indices.split_last()?;
    let mut level = categories;
    for &position in rest {
        level = &mut level.get_mut(position)?.children;
    }
    Some(level)
}

/// Canonicalize any address into the title path used by partial writes.
pub fn title_path(categories: &[CategoryNode], indices: &[usize]) -> Option<Vec<String>> {
    let mut titles = Vec::with_capacity(indices.len());
    let mut level = categories;
    for &position in indices {
        let node = level.get(position)?;
        titles.push(node.title.clone());
        level = &node.children;
    }
    Some(titles)
}

/// First site whose title matches exactly. Site titles are not unique within
/// a category; when they collide the first entry wins.
pub fn find_site(category: &CategoryNode, title: &str) -> Option<usize> {
    category.sites.iter().position(|site| site.title == title)
}

pub fn find_site_by_url(category: &CategoryNode, url: &str) -> Option<usize> {
    category.sites.iter().position(|site| site.url == url)
}
