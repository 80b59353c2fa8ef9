//! The catalog of tree mutations. Every operation is a plain transformation
//! of an in-memory `NavTree`; persistence is decided afterwards by the write
//! planner. Validation happens here, as close to the operation as possible.

use crate::errors::{AppError, AppResult};
use crate::models::{
    Address, BatchItemError, BatchSiteItem, BatchSummary, CategoryNode, CreateCategoryPayload,
    NavTree, SiteEntry, SiteInput, SitePatch, SubcategoryAddPayload, UpdateCategoryPayload,
    DEFAULT_FOLDER_GLYPH, RESERVED_CATEGORY_ID, RESERVED_CATEGORY_TITLE,
};
use crate::resolver::{self, MAX_TREE_DEPTH};
use once_cell::sync::Lazy;
use regex::Regex;

static CATEGORY_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-z0-9-]+$").expect("category id pattern"));

/// Idempotent repair of the reserved fallback category: locate it by fixed
/// id, fall back to its fixed title, create it on demand, and normalize its
/// shape. Returns whether the tree was modified so callers can persist the
/// fix-up before proceeding.
pub fn ensure_reserved(tree: &mut NavTree) -> bool {
    let position = tree
        .categories
        .iter()
        .position(|node| node.id.as_deref() == Some(RESERVED_CATEGORY_ID))
        .or_else(|| {
            tree.categories
                .iter()
                .position(|node| node.title == RESERVED_CATEGORY_TITLE)
        });

    match position {
        Some(position) => {
            let node = &mut tree.categories[position];
            let mut changed = false;
            if node.id.as_deref() != Some(RESERVED_CATEGORY_ID) {
                node.id = Some(RESERVED_CATEGORY_ID.to_string());
                changed = true;
            }
            if node.icon.is_none() {
                node.icon = Some(DEFAULT_FOLDER_GLYPH.to_string());
                changed = true;
            }
            changed
        }
        None => {
            let mut node = CategoryNode::new(
                Some(RESERVED_CATEGORY_ID.to_string()),
                RESERVED_CATEGORY_TITLE,
            );
            node.icon = Some(DEFAULT_FOLDER_GLYPH.to_string());
            tree.categories.push(node);
            true
        }
    }
}

fn reserved_position(tree: &NavTree) -> Option<usize> {
    tree.categories
        .iter()
        .position(|node| node.id.as_deref() == Some(RESERVED_CATEGORY_ID))
}

fn validate_category_id(id: &str) -> AppResult<()> {
    if !CATEGORY_ID_PATTERN.is_match(id) {
        return Err(AppError::Validation(format!(
            "Category id '{}' must use only lowercase letters, digits and hyphens",
            id
        )));
    }
    Ok(())
}

fn validate_title(title: &str) -> AppResult<()> {
    if title.trim().is_empty() {
        return Err(AppError::Validation("Title must not be empty".to_string()));
    }
    Ok(())
}

fn validate_site_input(input: &SiteInput) -> AppResult<()> {
    validate_title(&input.title)?;
    if input.url.trim().is_empty() {
        return Err(AppError::Validation("Url must not be empty".to_string()));
    }
    Ok(())
}

pub fn placeholder_description(title: &str) -> String {
    format!("Saved link: {}", title)
}

pub fn add_root_category(tree: &mut NavTree, payload: &CreateCategoryPayload) -> AppResult<()> {
    validate_category_id(&payload.id)?;
    validate_title(&payload.title)?;
    if tree
        .categories
        .iter()
        .any(|node| node.id.as_deref() == Some(payload.id.as_str()))
    {
        return Err(AppError::Conflict(format!(
            "Category id '{}' already exists",
            payload.id
        )));
    }

    let mut node = CategoryNode::new(Some(payload.id.clone()), payload.title.clone());
    node.icon = payload.icon.clone();

    // The reserved fallback conventionally stays last in the root list.
    match reserved_position(tree) {
        Some(position) => tree.categories.insert(position, node),
        None => tree.categories.push(node),
    }
    Ok(())
}

pub fn add_subcategory(tree: &mut NavTree, payload: &SubcategoryAddPayload) -> AppResult<()> {
    validate_title(&payload.title)?;
    if let Some(id) = payload.id.as_deref() {
        validate_category_id(id)?;
    }

    let resolved = resolver::resolve(&tree.categories, &payload.parent)?;
    let parent = resolver::node_at_mut(&mut tree.categories, &resolved.indices)
        .ok_or_else(|| AppError::Internal("Resolved parent vanished".to_string()))?;

    if let Some(id) = payload.id.as_deref() {
        if parent
            .children
            .iter()
            .any(|child| child.id.as_deref() == Some(id))
        {
            return Err(AppError::Conflict(format!(
                "Subcategory id '{}' already exists under '{}'",
                id, parent.title
            )));
        }
    }

    let mut node = CategoryNode::new(payload.id.clone(), payload.title.clone());
    node.icon = payload.icon.clone();
    parent.children.push(node);
    Ok(())
}

pub fn edit_category(
    tree: &mut NavTree,
    target: &Address,
    patch: &UpdateCategoryPayload,
) -> AppResult<()> {
    if let Some(title) = patch.title.as_deref() {
        validate_title(title)?;
    }
    let resolved = resolver::resolve(&tree.categories, target)?;
    let node = resolver::node_at_mut(&mut tree.categories, &resolved.indices)
        .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;

    if let Some(title) = patch.title.as_ref() {
        node.title = title.clone();
    }
    if let Some(icon) = patch.icon.as_ref() {
        node.icon = if icon.is_empty() {
            None
        } else {
            Some(icon.clone())
        };
    }
    Ok(())
}

/// Removes the addressed node and its entire subtree.
pub fn delete_category(tree: &mut NavTree, target: &Address) -> AppResult<CategoryNode> {
    let resolved = resolver::resolve(&tree.categories, target)?;
    let position = resolved.position_in_parent();
    let siblings = resolver::sibling_list_mut(&mut tree.categories, &resolved.indices)
        .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;
    Ok(siblings.remove(position))
}

/// Replaces a sibling list with the proposed key order (ids or titles).
/// Existing nodes not mentioned in the order are appended at the end rather
/// than dropped.
pub fn reorder_categories(
    tree: &mut NavTree,
    parent: Option<&Address>,
    order: &[String],
) -> AppResult<()> {
    let list = match parent {
        None => &mut tree.categories,
        Some(address) => {
            let resolved = resolver::resolve(&tree.categories, address)?;
            let node = resolver::node_at_mut(&mut tree.categories, &resolved.indices)
                .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;
            &mut node.children
        }
    };

    let existing = std::mem::take(list);
    *list = permute_by_keys(existing, order, |node: &CategoryNode, key| {
        node.address_key() == key || node.title == key
    });
    Ok(())
}

pub fn reorder_sites(tree: &mut NavTree, category: &Address, order: &[String]) -> AppResult<()> {
    let resolved = resolver::resolve(&tree.categories, category)?;
    let node = resolver::node_at_mut(&mut tree.categories, &resolved.indices)
        .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;

    let existing = std::mem::take(&mut node.sites);
    node.sites = permute_by_keys(existing, order, |site: &SiteEntry, key| site.title == key);
    Ok(())
}

fn permute_by_keys<T>(
    mut items: Vec<T>,
    order: &[String],
    matches: impl Fn(&T, &str) -> bool,
) -> Vec<T> {
    let mut reordered = Vec::with_capacity(items.len());
    for key in order {
        if let Some(position) = items.iter().position(|item| matches(item, key)) {
            reordered.push(items.remove(position));
        }
    }
    reordered.extend(items);
    reordered
}

fn destination_indices(tree: &mut NavTree, category: Option<&Address>) -> AppResult<Vec<usize>> {
    match category {
        Some(address) => Ok(resolver::resolve(&tree.categories, address)?.indices),
        None => {
            ensure_reserved(tree);
            let position = reserved_position(tree)
                .ok_or_else(|| AppError::Internal("Reserved category missing".to_string()))?;
            Ok(vec![position])
        }
    }
}

pub fn add_site(
    tree: &mut NavTree,
    category: Option<&Address>,
    input: &SiteInput,
) -> AppResult<SiteEntry> {
    validate_site_input(input)?;
    let indices = destination_indices(tree, category)?;
    let node = resolver::node_at_mut(&mut tree.categories, &indices)
        .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;

    if resolver::find_site_by_url(node, &input.url).is_some() {
        return Err(AppError::Conflict(format!(
            "Url '{}' already exists in category '{}'",
            input.url, node.title
        )));
    }

    let mut entry = SiteEntry::new(input.title.clone(), input.url.clone());
    entry.description = Some(
        input
            .description
            .clone()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| placeholder_description(&input.title)),
    );
    entry.icon = input.icon.clone();
    node.sites.push(entry.clone());
    Ok(entry)
}

/// Merges the provided fields over the first site with a matching title.
pub fn update_site(
    tree: &mut NavTree,
    category: &Address,
    title: &str,
    patch: &SitePatch,
) -> AppResult<SiteEntry> {
    if let Some(new_title) = patch.title.as_deref() {
        validate_title(new_title)?;
    }
    if let Some(new_url) = patch.url.as_deref() {
        if new_url.trim().is_empty() {
            return Err(AppError::Validation("Url must not be empty".to_string()));
        }
    }

    let resolved = resolver::resolve(&tree.categories, category)?;
    let node = resolver::node_at_mut(&mut tree.categories, &resolved.indices)
        .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;
    let position = resolver::find_site(node, title).ok_or_else(|| {
        AppError::NotFound(format!(
            "Site '{}' not found in category '{}'",
            title, node.title
        ))
    })?;

    let site = &mut node.sites[position];
    if let Some(new_title) = patch.title.as_ref() {
        site.title = new_title.clone();
    }
    if let Some(new_url) = patch.url.as_ref() {
        site.url = new_url.clone();
    }
    if let Some(description) = patch.description.as_ref() {
        site.description = Some(description.clone());
    }
    if let Some(icon) = patch.icon.as_ref() {
        site.icon = Some(icon.clone());
    }
    Ok(site.clone())
}

pub fn delete_site(tree: &mut NavTree, category: &Address, title: &str) -> AppResult<SiteEntry> {
    let resolved = resolver::resolve(&tree.categories, category)?;
    let node = resolver::node_at_mut(&mut tree.categories, &resolved.indices)
        .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;
    let position = resolver::find_site(node, title).ok_or_else(|| {
        AppError::NotFound(format!(
            "Site '{}' not found in category '{}'",
            title, node.title
        ))
    })?;
    Ok(node.sites.remove(position))
}

/// Removes the site from the source category and appends it to the
/// destination, preserving all fields. The append is skipped when the
/// destination already holds the same url.
pub fn move_site(
    tree: &mut NavTree,
    from: &Address,
    to: Option<&Address>,
    title: &str,
) -> AppResult<()> {
    let source = resolver::resolve(&tree.categories, from)?.indices;
    let destination = destination_indices(tree, to)?;

    let entry = {
        let node = resolver::node_at_mut(&mut tree.categories, &source)
            .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;
        let position = resolver::find_site(node, title).ok_or_else(|| {
            AppError::NotFound(format!(
                "Site '{}' not found in category '{}'",
                title, node.title
            ))
        })?;
        node.sites.remove(position)
    };

    let node = resolver::node_at_mut(&mut tree.categories, &destination)
        .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;
    if resolver::find_site_by_url(node, &entry.url).is_none() {
        node.sites.push(entry);
    }
    Ok(())
}

/// Applies every batch item against the working tree. Item failures are
/// collected into the summary; they never abort the remaining items.
pub fn apply_batch(tree: &mut NavTree, items: &[BatchSiteItem]) -> BatchSummary {
    let mut summary = BatchSummary::default();
    for (index, item) in items.iter().enumerate() {
        let outcome = match item {
            BatchSiteItem::Add { category, site } => {
                add_site(tree, category.as_ref(), site).map(|_| ())
            }
            BatchSiteItem::Update {
                category,
                title,
                patch,
            } => update_site(tree, category, title, patch).map(|_| ()),
            BatchSiteItem::Delete { category, title } => {
                delete_site(tree, category, title).map(|_| ())
            }
            BatchSiteItem::Move { from, to, title } => move_site(tree, from, to.as_ref(), title),
        };
        match outcome {
            Ok(()) => match item {
                BatchSiteItem::Add { .. } => summary.added += 1,
                BatchSiteItem::Update { .. } => summary.updated += 1,
                BatchSiteItem::Delete { .. } => summary.deleted += 1,
                BatchSiteItem::Move { .. } => summary.moved += 1,
            },
            Err(error) => summary.errors.push(BatchItemError {
                index,
                message: error.to_string(),
            }),
        }
    }
    summary
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeStats {
    pub categories: usize,
    pub sites: usize,
    pub max_depth: usize,
}

pub fn tree_stats(categories: &[CategoryNode]) -> TreeStats {
    let mut stats = TreeStats::default();
    count_nodes(categories, 1, &mut stats);
    stats
}

fn count_nodes(categories: &[CategoryNode], depth: usize, stats: &mut TreeStats) {
    if depth > MAX_TREE_DEPTH {
        return;
    }
    for node in categories {
        stats.categories += 1;
        stats.sites += node.sites.len();
        stats.max_depth = stats.max_depth.max(depth);
        count_nodes(&node.children, depth + 1, stats);
    }
}

/// Depth-guarded visit of every site together with its category title path.
pub fn walk_sites(categories: &[CategoryNode], visit: &mut impl FnMut(&[String], &SiteEntry)) {
    let mut path = Vec::new();
    walk_sites_inner(categories, &mut path, visit, 1);
}

fn walk_sites_inner(
    categories: &[CategoryNode],
    path: &mut Vec<String>,
    visit: &mut impl FnMut(&[String], &SiteEntry),
    depth: usize,
) {
    if depth > MAX_TREE_DEPTH {
        return;
    }
    for node in categories {
        path.push(node.title.clone());
        for site in &node.sites {
            visit(path, site);
        }
        walk_sites_inner(&node.children, path, visit, depth + 1);
        path.pop();
    }
}

/// Depth-guarded mutable visit of every site in the tree.
pub fn walk_sites_mut(categories: &mut [CategoryNode], visit: &mut impl FnMut(&mut SiteEntry)) {
    walk_sites_mut_inner(categories, visit, 1);
}

fn walk_sites_mut_inner(
    categories: &mut [CategoryNode],
    visit: &mut impl FnMut(&mut SiteEntry),
    depth: usize,
) {
    if depth > MAX_TREE_DEPTH {
        return;
    }
    for node in categories {
        for site in &mut node.sites {
            visit(site);
        }
        walk_sites_mut_inner(&mut node.children, visit, depth + 1);
    }
}
